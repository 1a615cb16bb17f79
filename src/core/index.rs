//! Mapping output: dataset, covered blocks and reconciliation diagnostics.

use serde::{Deserialize, Serialize};

use crate::analysis::matcher::MatchReason;
use crate::core::dataset::CoverageDataset;

/// A basic block holding at least one hit address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoveredBlock {
    pub start: u64,
    pub size: u32,
    /// Sum of the hit counts of every hit address inside the block
    pub hits: u64,
    pub module_id: Option<u32>,
    /// Resident function name, empty when the model has none
    pub function: String,
}

/// How a trace was reconciled with the image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapDiagnostics {
    pub spans_total: usize,
    pub spans_mapped: usize,
    pub spans_skipped: usize,
    pub matched_module_id: Option<u32>,
    pub matched_module_base: Option<u64>,
    pub matched_module_end: Option<u64>,
    pub matched_module_path: String,
    pub match_reason: Option<MatchReason>,
    pub image_base: u64,
    pub slide: i64,
    pub used_fallback: bool,
}

impl MapDiagnostics {
    pub fn matched(&self) -> bool {
        self.matched_module_id.is_some()
    }
}

/// Result of mapping a trace or a dataset against a program model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoverageIndex {
    pub dataset: CoverageDataset,
    /// Sorted ascending by start address
    pub blocks: Vec<CoveredBlock>,
    /// Sorted, de-duplicated addresses that could not be mapped
    pub invalid_addresses: Vec<u64>,
    pub diagnostics: MapDiagnostics,
}

impl CoverageIndex {
    /// Ascending hit addresses of the mapped dataset.
    pub fn hit_addresses(&self) -> impl Iterator<Item = u64> + '_ {
        self.dataset.addresses()
    }

    pub fn block_at(&self, start: u64) -> Option<&CoveredBlock> {
        self.blocks
            .binary_search_by_key(&start, |b| b.start)
            .ok()
            .map(|i| &self.blocks[i])
    }
}
