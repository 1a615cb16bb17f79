//! covex: coverage trace ingestion for binary analysis.
//!
//! Traces recorded by external instrumentation (drcov block traces, plain
//! address lists) are parsed, matched to the analyzed image, rebased by the
//! module slide, and mapped onto the image's instructions and basic blocks.
//! Mapped datasets combine through a small set-algebra expression language,
//! covered blocks are selected with a filter language, and hits outside any
//! known function drive function discovery.
//!
//! The program image is reached only through the [`model::ProgramModel`]
//! trait. [`model::ObjectModel`] implements it over ELF/PE/Mach-O files;
//! [`model::MemoryModel`] is a table-driven model for tests and for hosts
//! that already hold their own analysis.

/// Core data types module
pub mod core;

pub mod analysis;
pub mod config;
pub mod disasm;
pub mod error;
pub mod formats;
pub mod logging;
pub mod model;
pub mod query;
pub mod workspace;

pub use crate::config::CovexConfig;
pub use crate::error::{CovexError, Result};
pub use crate::workspace::CoverageWorkspace;
