//! covex: map coverage traces onto a binary and query the result.
//!
//! ```bash
//! covex summary ./app trace.drcov           # per-trace summaries
//! covex blocks ./app a.log b.log --expr "A - B" --filter "hits>=10"
//! covex discover ./app trace.drcov --scan 32 --apply
//! ```
//!
//! Output is JSON on stdout; logs go to stderr.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use covex::analysis::{DiscoveryPlan, DiscoveryReport};
use covex::core::MapDiagnostics;
use covex::logging::{init_tracing, init_tracing_json};
use covex::model::ObjectModel;
use covex::workspace::{BlockSummary, CoverageWorkspace, LoadOutcome, TraceSummary};
use covex::CovexConfig;

#[derive(Parser, Debug)]
#[command(name = "covex")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// JSON configuration file; omitted fields keep their defaults
    #[arg(long, global = true, env = "COVEX_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Per-trace summaries and mapping diagnostics
    Summary(InputArgs),

    /// Covered blocks of the composed, filtered coverage set
    Blocks(BlocksArgs),

    /// Plan (and optionally create) functions for hits outside known functions
    Discover(DiscoverArgs),
}

#[derive(Args, Debug)]
struct InputArgs {
    /// Program image (ELF, PE or Mach-O)
    image: PathBuf,

    /// Coverage traces, aliased A, B, C... in order
    #[arg(required = true)]
    traces: Vec<PathBuf>,
}

#[derive(Args, Debug)]
struct BlocksArgs {
    #[command(flatten)]
    input: InputArgs,

    /// Composition expression over trace aliases, e.g. "(A | B) - C"
    #[arg(long)]
    expr: Option<String>,

    /// Block filter, e.g. "hits>=10 func:init"
    #[arg(long)]
    filter: Option<String>,
}

#[derive(Args, Debug)]
struct DiscoverArgs {
    #[command(flatten)]
    input: InputArgs,

    #[arg(long)]
    expr: Option<String>,

    /// Bytes to scan backwards for an earlier instruction boundary
    #[arg(long)]
    scan: Option<u64>,

    /// Only accept hits inside sections marked as code
    #[arg(long)]
    require_code_section: bool,

    /// Create the planned functions and report the outcome
    #[arg(long)]
    apply: bool,
}

#[derive(Serialize)]
struct BlocksReport<'a> {
    expression: &'a str,
    filter: &'a str,
    addresses: usize,
    total_hits: u64,
    diagnostics: Option<&'a MapDiagnostics>,
    blocks: &'a [BlockSummary],
}

#[derive(Serialize)]
struct DiscoverOutput {
    plan: DiscoveryPlan,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<DiscoveryReport>,
}

fn load_config(path: Option<&Path>) -> Result<CovexConfig> {
    match path {
        Some(path) => CovexConfig::from_json_file(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => Ok(CovexConfig::default()),
    }
}

fn open_workspace(
    input: &InputArgs,
    config: &CovexConfig,
) -> Result<CoverageWorkspace<ObjectModel>> {
    let model = ObjectModel::open(&input.image)
        .with_context(|| format!("failed to load image {}", input.image.display()))?;
    let mut workspace = CoverageWorkspace::new(model, config);
    for path in &input.traces {
        let outcome = workspace
            .load_trace_file(path)
            .map_err(|e| covex::log_error!(e, "trace load failed"))
            .with_context(|| format!("failed to load trace {}", path.display()))?;
        if outcome == LoadOutcome::Unsupported {
            bail!("unsupported coverage file: {}", path.display());
        }
    }
    Ok(workspace)
}

/// Install `expr`, or the union of every trace when none is given.
fn compose(workspace: &mut CoverageWorkspace<ObjectModel>, expr: Option<&str>) -> Result<()> {
    workspace
        .set_expression(expr.unwrap_or(""))
        .context("invalid composition expression")?;
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run_summary(args: &InputArgs, config: &CovexConfig) -> Result<()> {
    let workspace = open_workspace(args, config)?;
    let summaries: Vec<TraceSummary> = workspace.trace_summaries();
    print_json(&summaries)
}

fn run_blocks(args: &BlocksArgs, config: &CovexConfig) -> Result<()> {
    let mut workspace = open_workspace(&args.input, config)?;
    compose(&mut workspace, args.expr.as_deref())?;
    if let Some(filter) = &args.filter {
        workspace
            .set_block_filter(filter)
            .context("invalid block filter")?;
    }

    let index = workspace.active_index();
    let stats = index.map(|i| *i.dataset.stats()).unwrap_or_default();
    print_json(&BlocksReport {
        expression: workspace.expression(),
        filter: workspace.filter_text(),
        addresses: stats.unique_addresses,
        total_hits: stats.total_hits,
        diagnostics: index.map(|i| &i.diagnostics),
        blocks: workspace.block_summaries(),
    })
}

fn run_discover(args: &DiscoverArgs, config: &CovexConfig) -> Result<()> {
    let mut workspace = open_workspace(&args.input, config)?;
    compose(&mut workspace, args.expr.as_deref())?;

    let mut discovery = config.discovery.clone();
    if let Some(scan) = args.scan {
        discovery.backward_scan_bytes = scan;
    }
    discovery.require_code_section |= args.require_code_section;

    let plan = workspace.plan_discovery(&discovery);
    let report = args
        .apply
        .then(|| workspace.discover_functions(&discovery));
    print_json(&DiscoverOutput { plan, report })
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.json_logs {
        init_tracing_json();
    } else {
        init_tracing();
    }

    let config = load_config(cli.config.as_deref())?;
    match &cli.command {
        Commands::Summary(args) => run_summary(args, &config),
        Commands::Blocks(args) => run_blocks(args, &config),
        Commands::Discover(args) => run_discover(args, &config),
    }
}
