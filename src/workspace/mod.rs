//! Coverage workspace: loaded traces, the active coverage set and its view.
//!
//! A `CoverageWorkspace` owns one program model and everything derived from
//! it. Traces are parsed through an explicit `ParserRegistry`, mapped
//! immediately and given an alias (`A`, `B`, ... `Z`, `AA`, ...). The active
//! set is either the last loaded trace or the result of a composition
//! expression over aliases.
//!
//! Composition and filtering can run off the owning thread. `begin_compose`
//! snapshots what the job needs into a `Send` [`ComposeJob`] tagged with a
//! generation; `finish_compose` installs the result only if no newer request
//! was issued in the meantime. Filtering works the same way through
//! [`FilterJob`]. Superseded results are discarded, never interrupted.

pub mod summary;

use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::analysis::{build_discovery_plan, execute_discovery_plan, CoverageMapper};
use crate::analysis::{DiscoveryPlan, DiscoveryReport};
use crate::config::{CovexConfig, DiscoveryConfig};
use crate::core::{CoverageDataset, CoverageIndex, CoverageTrace, CoveredBlock};
use crate::error::Result;
use crate::formats::ParserRegistry;
use crate::model::ProgramModel;
use crate::query::{
    compose, evaluate_expression, parse_block_filter, parse_expression, BlockFilter,
    ComposeError, ComposePlan, ComposePolicies, CompositionOp, FilterError,
};

pub use summary::{BlockSummary, CoverageSink, TraceSummary};

/// A loaded trace and its mapping against the workspace model.
#[derive(Debug, Clone)]
pub struct TraceRecord {
    pub id: u64,
    pub alias: String,
    pub trace: CoverageTrace,
    pub index: CoverageIndex,
}

impl TraceRecord {
    pub fn summary(&self) -> TraceSummary {
        TraceSummary::new(&self.alias, &self.trace, &self.index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded(TraceSummary),
    /// No registered parser recognized the file
    Unsupported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// A newer request was issued after this one; the result was dropped
    Stale,
}

/// Spreadsheet-style alias for the `n`th trace: `A`..`Z`, `AA`, `AB`, ...
pub fn alias_for_index(mut n: usize) -> String {
    let mut letters = Vec::new();
    loop {
        letters.push(b'A' + (n % 26) as u8);
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }
    letters.iter().rev().map(|&b| char::from(b)).collect()
}

#[derive(Debug, Clone)]
enum ComposeWork {
    /// Union of every loaded trace
    UnionAll(Vec<CoverageDataset>),
    Plan {
        plan: ComposePlan,
        datasets: HashMap<String, CoverageDataset>,
    },
}

/// A composition request detached from the workspace.
#[derive(Debug, Clone)]
pub struct ComposeJob {
    generation: u64,
    expression: String,
    policies: ComposePolicies,
    work: ComposeWork,
}

/// Finished composition, ready for `finish_compose`.
#[derive(Debug, Clone)]
pub struct ComposeResult {
    generation: u64,
    expression: String,
    result: std::result::Result<CoverageDataset, ComposeError>,
}

impl ComposeJob {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn run(self) -> ComposeResult {
        let _span = crate::span_trace!("compose", generation = self.generation).entered();
        let result = match self.work {
            ComposeWork::UnionAll(datasets) => {
                let policy = self.policies.for_op(CompositionOp::Union);
                Ok(datasets
                    .iter()
                    .fold(CoverageDataset::default(), |acc, ds| {
                        compose(&acc, ds, CompositionOp::Union, policy)
                    }))
            }
            ComposeWork::Plan { plan, datasets } => {
                evaluate_expression(&plan, &datasets, self.policies)
            }
        };
        ComposeResult {
            generation: self.generation,
            expression: self.expression,
            result,
        }
    }
}

/// A filter request detached from the workspace.
#[derive(Debug, Clone)]
pub struct FilterJob {
    generation: u64,
    text: String,
    filter: BlockFilter,
    blocks: Vec<CoveredBlock>,
}

#[derive(Debug, Clone)]
pub struct FilterResult {
    generation: u64,
    text: String,
    filter: BlockFilter,
    rows: Vec<BlockSummary>,
}

impl FilterJob {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn run(self) -> FilterResult {
        let rows = self
            .filter
            .apply(&self.blocks)
            .map(BlockSummary::from)
            .collect();
        FilterResult {
            generation: self.generation,
            text: self.text,
            filter: self.filter,
            rows,
        }
    }
}

pub struct CoverageWorkspace<M: ProgramModel> {
    model: M,
    parsers: ParserRegistry,
    mapper: CoverageMapper,
    policies: ComposePolicies,
    traces: Vec<TraceRecord>,
    next_id: u64,
    active: Option<CoverageIndex>,
    expression: String,
    filter: BlockFilter,
    filter_text: String,
    filtered: Vec<BlockSummary>,
    compose_generation: u64,
    filter_generation: u64,
    expression_error: Option<ComposeError>,
    filter_error: Option<FilterError>,
}

impl<M: ProgramModel> CoverageWorkspace<M> {
    pub fn new(model: M, config: &CovexConfig) -> Self {
        Self::with_parsers(model, ParserRegistry::with_defaults(&config.io), config)
    }

    pub fn with_parsers(model: M, parsers: ParserRegistry, config: &CovexConfig) -> Self {
        Self {
            model,
            parsers,
            mapper: CoverageMapper::new(config.mapping.clone()),
            policies: config.compose.into(),
            traces: Vec::new(),
            next_id: 1,
            active: None,
            expression: String::new(),
            filter: BlockFilter::default(),
            filter_text: String::new(),
            filtered: Vec::new(),
            compose_generation: 0,
            filter_generation: 0,
            expression_error: None,
            filter_error: None,
        }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn into_model(self) -> M {
        self.model
    }

    pub fn traces(&self) -> &[TraceRecord] {
        &self.traces
    }

    pub fn trace(&self, alias: &str) -> Option<&TraceRecord> {
        let alias = alias.to_ascii_uppercase();
        self.traces.iter().find(|t| t.alias == alias)
    }

    /// Expression that produced the active set; an alias after a load.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn filter_text(&self) -> &str {
        &self.filter_text
    }

    pub fn expression_error(&self) -> Option<&ComposeError> {
        self.expression_error.as_ref()
    }

    pub fn filter_error(&self) -> Option<&FilterError> {
        self.filter_error.as_ref()
    }

    pub fn active_index(&self) -> Option<&CoverageIndex> {
        self.active.as_ref()
    }

    pub fn trace_summaries(&self) -> Vec<TraceSummary> {
        self.traces.iter().map(TraceRecord::summary).collect()
    }

    /// Covered blocks of the active set that pass the current filter.
    pub fn block_summaries(&self) -> &[BlockSummary] {
        &self.filtered
    }

    fn next_alias(&self) -> String {
        (0..)
            .map(alias_for_index)
            .find(|alias| self.traces.iter().all(|t| &t.alias != alias))
            .unwrap_or_default()
    }

    /// Parse, map and register a trace file. The new trace becomes the
    /// active set.
    pub fn load_trace_file(&mut self, path: impl AsRef<Path>) -> Result<LoadOutcome> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading coverage file");
        // sniffing swallows read failures, so surface them here
        std::fs::metadata(path)?;

        let Some(trace) = self.parsers.parse_first_match(path)? else {
            warn!(path = %path.display(), "Unsupported coverage file");
            return Ok(LoadOutcome::Unsupported);
        };
        info!(
            spans = trace.spans.len(),
            modules = trace.modules.len(),
            hitcounts = trace.has_hitcounts,
            "Parsed coverage"
        );

        let index = self.mapper.map_trace(&trace, &self.model);
        let diag = &index.diagnostics;
        match (diag.matched_module_id, diag.match_reason) {
            (Some(id), Some(reason)) => info!(
                reason = %reason,
                id,
                slide = diag.slide,
                image_base = diag.image_base,
                path = %diag.matched_module_path,
                "Module match"
            ),
            _ if !trace.modules.is_empty() => {
                warn!("No module matched the image; coverage addresses left as-is")
            }
            _ => {}
        }
        info!(
            total = diag.spans_total,
            mapped = diag.spans_mapped,
            skipped = diag.spans_skipped,
            invalid = index.invalid_addresses.len(),
            unique = index.dataset.stats().unique_addresses,
            hits = index.dataset.stats().total_hits,
            "Mapped spans"
        );

        let alias = self.next_alias();
        let record = TraceRecord {
            id: self.next_id,
            alias: alias.clone(),
            trace,
            index,
        };
        self.next_id += 1;
        let summary = record.summary();

        // a load supersedes any in-flight composition
        self.compose_generation += 1;
        self.expression = alias;
        self.expression_error = None;
        self.install_active(Some(record.index.clone()));
        self.traces.push(record);
        Ok(LoadOutcome::Loaded(summary))
    }

    /// Drop a trace by alias. If the active expression referenced it, the
    /// active set falls back to the union of the remaining traces.
    pub fn remove_trace(&mut self, alias: &str) -> bool {
        let alias = alias.to_ascii_uppercase();
        let Some(pos) = self.traces.iter().position(|t| t.alias == alias) else {
            return false;
        };
        self.traces.remove(pos);
        debug!(alias = %alias, "Removed trace");

        let referenced = match parse_expression(&self.expression) {
            Ok(plan) => plan.aliases.contains(&alias),
            Err(_) => true,
        };
        if referenced {
            // a union has no aliases to resolve, so this cannot fail
            let _ = self.set_expression("");
        }
        true
    }

    /// Parse `expression` and snapshot the datasets it needs. An empty
    /// expression selects the union of every loaded trace.
    pub fn begin_compose(&mut self, expression: &str) -> std::result::Result<ComposeJob, ComposeError> {
        self.compose_generation += 1;
        let generation = self.compose_generation;
        let expression = expression.trim().to_string();

        let work = if expression.is_empty() {
            ComposeWork::UnionAll(
                self.traces
                    .iter()
                    .map(|t| t.index.dataset.clone())
                    .collect(),
            )
        } else {
            let plan = parse_expression(&expression).inspect_err(|e| {
                self.expression_error = Some(e.clone());
            })?;
            let datasets = self
                .traces
                .iter()
                .filter(|t| plan.aliases.contains(&t.alias))
                .map(|t| (t.alias.clone(), t.index.dataset.clone()))
                .collect();
            ComposeWork::Plan { plan, datasets }
        };

        debug!(generation, expression = %expression, "Compose requested");
        Ok(ComposeJob {
            generation,
            expression,
            policies: self.policies,
            work,
        })
    }

    /// Install a finished composition if it is still the newest request.
    pub fn finish_compose(
        &mut self,
        done: ComposeResult,
    ) -> std::result::Result<ApplyOutcome, ComposeError> {
        if done.generation != self.compose_generation {
            debug!(
                generation = done.generation,
                current = self.compose_generation,
                "Discarding stale composition"
            );
            return Ok(ApplyOutcome::Stale);
        }
        let dataset = done.result.inspect_err(|e| {
            self.expression_error = Some(e.clone());
        })?;

        let index = self.mapper.map_dataset(&dataset, &self.model);
        info!(
            expression = %done.expression,
            addresses = index.dataset.stats().unique_addresses,
            blocks = index.blocks.len(),
            "Composed coverage"
        );
        self.expression = done.expression;
        self.expression_error = None;
        self.install_active(Some(index));
        Ok(ApplyOutcome::Applied)
    }

    pub fn set_expression(&mut self, expression: &str) -> std::result::Result<ApplyOutcome, ComposeError> {
        let job = self.begin_compose(expression)?;
        let done = job.run();
        self.finish_compose(done)
    }

    /// Parse a filter and snapshot the active blocks it runs over.
    pub fn begin_filter(&mut self, text: &str) -> std::result::Result<FilterJob, FilterError> {
        self.filter_generation += 1;
        let filter = parse_block_filter(text).inspect_err(|e| {
            self.filter_error = Some(e.clone());
        })?;
        Ok(FilterJob {
            generation: self.filter_generation,
            text: text.to_string(),
            filter,
            blocks: self
                .active
                .as_ref()
                .map(|index| index.blocks.clone())
                .unwrap_or_default(),
        })
    }

    pub fn finish_filter(&mut self, done: FilterResult) -> ApplyOutcome {
        if done.generation != self.filter_generation {
            debug!(generation = done.generation, "Discarding stale filter");
            return ApplyOutcome::Stale;
        }
        debug!(filter = %done.text, rows = done.rows.len(), "Applied block filter");
        self.filter = done.filter;
        self.filter_text = done.text;
        self.filter_error = None;
        self.filtered = done.rows;
        ApplyOutcome::Applied
    }

    pub fn set_block_filter(&mut self, text: &str) -> std::result::Result<ApplyOutcome, FilterError> {
        let job = self.begin_filter(text)?;
        Ok(self.finish_filter(job.run()))
    }

    /// Classify the hits of the active set without touching the model.
    pub fn plan_discovery(&self, config: &DiscoveryConfig) -> DiscoveryPlan {
        match &self.active {
            Some(index) => build_discovery_plan(index, &self.model, config),
            None => DiscoveryPlan::default(),
        }
    }

    /// Create functions for uncovered-by-analysis hits, then re-map the
    /// active set so its blocks reflect them.
    pub fn discover_functions(&mut self, config: &DiscoveryConfig) -> DiscoveryReport {
        let plan = self.plan_discovery(config);
        let report = execute_discovery_plan(&plan, &mut self.model, config);
        if report.created > 0 {
            self.rebuild_active();
        }
        report
    }

    /// Push traces, filtered blocks and error state to a sink.
    pub fn publish(&self, sink: &mut dyn CoverageSink) {
        sink.set_traces(&self.trace_summaries());
        sink.set_blocks(&self.filtered);
        let expression_error = self.expression_error.as_ref().map(ToString::to_string);
        sink.show_expression_error(expression_error.as_deref());
        let filter_error = self.filter_error.as_ref().map(ToString::to_string);
        sink.show_filter_error(filter_error.as_deref());
    }

    fn rebuild_active(&mut self) {
        let Some(active) = &self.active else {
            return;
        };
        let index = self.mapper.map_dataset(&active.dataset, &self.model);
        self.install_active(Some(index));
    }

    fn install_active(&mut self, index: Option<CoverageIndex>) {
        self.active = index;
        // rows computed against the previous set are no longer valid
        self.filter_generation += 1;
        self.filtered = self
            .active
            .as_ref()
            .map(|index| index.blocks.iter())
            .into_iter()
            .flatten()
            .filter(|b| self.filter.matches(b))
            .map(BlockSummary::from)
            .collect();
    }
}
