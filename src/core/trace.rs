//! Parsed, format-agnostic coverage trace.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::span::{CoverageSpan, ModuleInfo};

/// On-disk format a trace was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TraceFormat {
    /// drcov-style binary block trace with a module table
    BlockTrace,
    /// Address list without explicit hit counts
    AddressList,
    /// Address list where at least one line carried a hit count
    AddressHitList,
}

impl std::fmt::Display for TraceFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TraceFormat::BlockTrace => "block-trace",
            TraceFormat::AddressList => "address-list",
            TraceFormat::AddressHitList => "address-hit-list",
        };
        f.write_str(s)
    }
}

/// The contents of one coverage file before reconciliation with an image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageTrace {
    pub format: TraceFormat,
    pub spans: Vec<CoverageSpan>,
    /// Module table keyed by id. Ordered so that every scan over it (module
    /// matching in particular) is deterministic.
    pub modules: BTreeMap<u32, ModuleInfo>,
    pub source_path: String,
    /// Display name, the file name of `source_path`
    pub name: String,
    /// `false` means every span's `hits` is a synthetic 1
    pub has_hitcounts: bool,
    /// Recorded spans dropped because their module id is not in the table
    pub unresolved_spans: usize,
}

impl CoverageTrace {
    /// Empty trace for `path`, named after its file name.
    pub fn new(format: TraceFormat, path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            format,
            spans: Vec::new(),
            modules: BTreeMap::new(),
            source_path: path.to_string_lossy().into_owned(),
            name,
            has_hitcounts: false,
            unresolved_spans: 0,
        }
    }

    pub fn module(&self, id: u32) -> Option<&ModuleInfo> {
        self.modules.get(&id)
    }

    /// Sum of hits over non-empty spans.
    pub fn total_hits(&self) -> u64 {
        self.spans
            .iter()
            .filter(|s| !s.is_empty())
            .fold(0u64, |acc, s| acc.saturating_add(s.hits))
    }
}
