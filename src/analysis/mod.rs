//! Reconciling traces with a program model.
//!
//! `matcher` finds the trace module that corresponds to the analyzed image,
//! `mapper` turns spans into instruction-granular hits and covered blocks,
//! and `discovery` plans and executes function creation for hits that no
//! known function contains.

pub mod discovery;
pub mod mapper;
pub mod matcher;

pub use discovery::{
    build_discovery_plan, execute_discovery_plan, CandidateOutcome, DiscoveryCandidate,
    DiscoveryPlan, DiscoveryReport, DiscoverySkipReason,
};
pub use mapper::CoverageMapper;
pub use matcher::{apply_slide, find_module_match, MatchReason, ModuleMatch};
