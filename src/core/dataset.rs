//! Address-indexed coverage dataset, the unit of composition.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::span::CoverageSpan;

/// Address to cumulative hit count. Ordered so spans and block derivation
/// come out sorted without a separate pass.
pub type HitMap = BTreeMap<u64, u64>;

/// Summary statistics, always derived from the hit map.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageStats {
    pub total_spans: usize,
    pub total_hits: u64,
    pub unique_addresses: usize,
}

/// Canonical address-indexed coverage.
///
/// Only constructible from a hit map, so the unit spans and the statistics
/// can never drift from it. Serializes as the bare hit map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "HitMap", into = "HitMap")]
pub struct CoverageDataset {
    hits: HitMap,
    spans: Vec<CoverageSpan>,
    stats: CoverageStats,
}

impl CoverageDataset {
    pub fn from_hits(hits: HitMap) -> Self {
        let spans: Vec<CoverageSpan> = hits
            .iter()
            .map(|(&addr, &count)| CoverageSpan::unit(addr, count))
            .collect();
        let stats = CoverageStats {
            total_spans: spans.len(),
            total_hits: hits.values().fold(0u64, |acc, &c| acc.saturating_add(c)),
            unique_addresses: hits.len(),
        };
        Self { hits, spans, stats }
    }

    pub fn hits(&self) -> &HitMap {
        &self.hits
    }

    pub fn spans(&self) -> &[CoverageSpan] {
        &self.spans
    }

    pub fn stats(&self) -> &CoverageStats {
        &self.stats
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn contains(&self, address: u64) -> bool {
        self.hits.contains_key(&address)
    }

    /// Ascending hit addresses.
    pub fn addresses(&self) -> impl Iterator<Item = u64> + '_ {
        self.hits.keys().copied()
    }

    pub fn into_hits(self) -> HitMap {
        self.hits
    }
}

impl PartialEq for CoverageDataset {
    fn eq(&self, other: &Self) -> bool {
        self.hits == other.hits
    }
}

impl Eq for CoverageDataset {}

impl From<HitMap> for CoverageDataset {
    fn from(hits: HitMap) -> Self {
        Self::from_hits(hits)
    }
}

impl From<CoverageDataset> for HitMap {
    fn from(dataset: CoverageDataset) -> Self {
        dataset.hits
    }
}

impl FromIterator<(u64, u64)> for CoverageDataset {
    /// Collects `(address, hits)` pairs, summing duplicate addresses.
    fn from_iter<I: IntoIterator<Item = (u64, u64)>>(iter: I) -> Self {
        let mut hits = HitMap::new();
        for (addr, count) in iter {
            let entry = hits.entry(addr).or_insert(0);
            *entry = entry.saturating_add(count);
        }
        Self::from_hits(hits)
    }
}
