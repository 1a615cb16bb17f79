//! Presentation-facing rows and the sink they are pushed to.

use serde::Serialize;

use crate::core::{CoverageIndex, CoverageTrace, CoveredBlock, MapDiagnostics, TraceFormat};

/// One loaded trace as a presentation layer lists it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceSummary {
    pub alias: String,
    pub name: String,
    pub path: String,
    pub format: TraceFormat,
    pub spans: usize,
    pub unique_addresses: usize,
    pub total_hits: u64,
    pub has_hitcounts: bool,
    pub unresolved_spans: usize,
    pub invalid_addresses: usize,
    pub diagnostics: MapDiagnostics,
}

impl TraceSummary {
    pub fn new(alias: &str, trace: &CoverageTrace, index: &CoverageIndex) -> Self {
        let stats = index.dataset.stats();
        Self {
            alias: alias.to_string(),
            name: trace.name.clone(),
            path: trace.source_path.clone(),
            format: trace.format,
            spans: trace.spans.len(),
            unique_addresses: stats.unique_addresses,
            total_hits: stats.total_hits,
            has_hitcounts: trace.has_hitcounts,
            unresolved_spans: trace.unresolved_spans,
            invalid_addresses: index.invalid_addresses.len(),
            diagnostics: index.diagnostics.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockSummary {
    pub address: u64,
    pub size: u32,
    pub hits: u64,
    pub function: String,
}

impl From<&CoveredBlock> for BlockSummary {
    fn from(block: &CoveredBlock) -> Self {
        Self {
            address: block.start,
            size: block.size,
            hits: block.hits,
            function: block.function.clone(),
        }
    }
}

/// Receiver for workspace state. Implementations render; the workspace
/// never formats for display.
pub trait CoverageSink {
    fn set_traces(&mut self, traces: &[TraceSummary]);

    fn set_blocks(&mut self, blocks: &[BlockSummary]);

    /// `None` clears a previously shown error.
    fn show_expression_error(&mut self, message: Option<&str>);

    fn show_filter_error(&mut self, message: Option<&str>);
}
