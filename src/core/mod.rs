//! Core data types for covex.
//!
//! Plain value types shared by every stage: recorded spans and modules, the
//! parsed trace, the address-indexed dataset, and the mapped index with its
//! covered blocks and diagnostics. None of these hold references back to the
//! component that produced them.

pub mod dataset;
pub mod index;
pub mod input;
pub mod span;
pub mod trace;

pub use dataset::{CoverageDataset, CoverageStats, HitMap};
pub use index::{CoverageIndex, CoveredBlock, MapDiagnostics};
pub use input::CoverageInput;
pub use span::{CoverageSpan, ModuleInfo};
pub use trace::{CoverageTrace, TraceFormat};
