//! Raw trace vs. mapped dataset, as a single input type.
//!
//! Composition only accepts `CoverageDataset`s, which exist only after
//! mapping, so span coordinates from an unmapped trace can never be combined
//! by accident. `CoverageInput` is what the mapper accepts when either form
//! may arrive.

use crate::core::dataset::CoverageDataset;
use crate::core::trace::CoverageTrace;

#[derive(Debug, Clone)]
pub enum CoverageInput {
    /// Parsed spans in recorded (possibly slid) coordinates
    Trace(CoverageTrace),
    /// Address-indexed hits already in image coordinates
    Dataset(CoverageDataset),
}

impl CoverageInput {
    pub fn is_mapped(&self) -> bool {
        matches!(self, CoverageInput::Dataset(_))
    }
}

impl From<CoverageTrace> for CoverageInput {
    fn from(trace: CoverageTrace) -> Self {
        CoverageInput::Trace(trace)
    }
}

impl From<CoverageDataset> for CoverageInput {
    fn from(dataset: CoverageDataset) -> Self {
        CoverageInput::Dataset(dataset)
    }
}
