//! End-to-end: load traces into a workspace, compose, filter and publish.

mod common;

use covex::config::{CovexConfig, DiscoveryConfig};
use covex::query::HitMergePolicy;
use covex::workspace::{
    ApplyOutcome, BlockSummary, CoverageSink, CoverageWorkspace, LoadOutcome, TraceSummary,
};

use common::{sample_drcov, sample_model, write_bytes, write_text};

fn loaded(outcome: LoadOutcome) -> TraceSummary {
    match outcome {
        LoadOutcome::Loaded(summary) => summary,
        LoadOutcome::Unsupported => panic!("expected a supported trace"),
    }
}

#[test]
fn test_mixed_formats_compose_and_filter() {
    let mut ws = CoverageWorkspace::new(sample_model(), &CovexConfig::default());

    let drcov = write_bytes(&sample_drcov(Some(vec![3, 5, 9, 2])).encode());
    let a = loaded(ws.load_trace_file(drcov.path()).unwrap());
    assert_eq!(a.alias, "A");
    assert_eq!(a.spans, 3);
    assert_eq!(a.unique_addresses, 4);
    assert_eq!(a.total_hits, 16);
    assert_eq!(a.unresolved_spans, 1);
    assert_eq!(a.diagnostics.spans_skipped, 1);

    let list = write_text("0x401000 a\n0x401010\n0x401014\n");
    let b = loaded(ws.load_trace_file(list.path()).unwrap());
    assert_eq!(b.alias, "B");
    assert_eq!(b.total_hits, 12);

    assert_eq!(ws.set_expression("A | B").unwrap(), ApplyOutcome::Applied);
    let hits = ws.active_index().unwrap().dataset.hits().clone();
    assert_eq!(hits[&0x401000], 13);
    assert_eq!(hits.len(), 6);

    let rows: Vec<(u64, u64)> = ws.block_summaries().iter().map(|b| (b.address, b.hits)).collect();
    assert_eq!(
        rows,
        vec![(0x401000, 16), (0x401010, 2), (0x401020, 5), (0x401028, 5)]
    );

    ws.set_block_filter("func:MAIN hits>=5 addr>0x401020").unwrap();
    let rows: Vec<u64> = ws.block_summaries().iter().map(|b| b.address).collect();
    assert_eq!(rows, vec![0x401028]);

    // filter survives a new active set
    ws.set_expression("A - B").unwrap();
    let rows: Vec<u64> = ws.block_summaries().iter().map(|b| b.address).collect();
    assert_eq!(rows, vec![0x401028]);
    assert_eq!(
        ws.active_index().unwrap().dataset.addresses().collect::<Vec<_>>(),
        vec![0x401004, 0x401024, 0x401028]
    );
}

#[test]
fn test_configured_merge_policy() {
    let mut config = CovexConfig::default();
    config.compose.union = HitMergePolicy::Max;
    let mut ws = CoverageWorkspace::new(sample_model(), &config);
    let a = write_text("0x401000 4\n");
    let b = write_text("0x401000 9\n");
    ws.load_trace_file(a.path()).unwrap();
    ws.load_trace_file(b.path()).unwrap();
    ws.set_expression("").unwrap();
    assert_eq!(ws.active_index().unwrap().dataset.hits()[&0x401000], 9);
}

#[test]
fn test_malformed_trace_does_not_register() {
    let mut config = CovexConfig::default();
    config.io.sniff_line_limit = 2;
    let mut ws = CoverageWorkspace::new(sample_model(), &config);
    let bad = write_text("0x401000\n0x401004\nnot-hex\n");
    assert!(ws.load_trace_file(bad.path()).is_err());
    assert!(ws.traces().is_empty());
    assert!(ws.active_index().is_none());
}

#[test]
fn test_discovery_through_workspace() {
    let mut ws = CoverageWorkspace::new(sample_model(), &CovexConfig::default());
    let list = write_text("0x401000\n0x403000\n0x403004\n0x408000\n");
    ws.load_trace_file(list.path()).unwrap();
    let report = ws.discover_functions(&DiscoveryConfig::default());
    assert_eq!(report.candidates, 4);
    assert_eq!(report.created, 2);
    assert_eq!(ws.model().created_functions(), &[0x403000, 0x403004]);
    let functions: Vec<&str> = ws
        .block_summaries()
        .iter()
        .map(|b| b.function.as_str())
        .collect();
    assert_eq!(functions, vec!["init_a", "sub_403000", "sub_403004"]);
}

/// Renders everything it receives as JSON, the way a front end would.
#[derive(Default)]
struct JsonSink {
    traces: String,
    blocks: String,
    errors: Vec<String>,
}

impl CoverageSink for JsonSink {
    fn set_traces(&mut self, traces: &[TraceSummary]) {
        self.traces = serde_json::to_string(traces).unwrap();
    }

    fn set_blocks(&mut self, blocks: &[BlockSummary]) {
        self.blocks = serde_json::to_string(blocks).unwrap();
    }

    fn show_expression_error(&mut self, message: Option<&str>) {
        self.errors.extend(message.map(|m| format!("expr: {}", m)));
    }

    fn show_filter_error(&mut self, message: Option<&str>) {
        self.errors.extend(message.map(|m| format!("filter: {}", m)));
    }
}

#[test]
fn test_publish_to_sink() {
    let mut ws = CoverageWorkspace::new(sample_model(), &CovexConfig::default());
    let list = write_text("0x401010\n");
    ws.load_trace_file(list.path()).unwrap();

    let mut sink = JsonSink::default();
    ws.publish(&mut sink);
    assert!(sink.traces.contains("\"alias\":\"A\""));
    assert!(sink.traces.contains("\"has_hitcounts\":false"));
    assert!(sink.blocks.contains("\"function\":\"init_b\""));
    assert!(sink.errors.is_empty());

    assert!(ws.set_block_filter("weight>3").is_err());
    assert!(ws.set_expression("A |").is_err());
    ws.publish(&mut sink);
    assert_eq!(sink.errors.len(), 2);
    assert!(sink.errors[0].starts_with("expr: "));
    assert!(sink.errors[1].contains("Unknown filter field"));
}
