//! Function discovery from covered addresses no function contains.
//!
//! Planning is pure classification against the model; execution creates
//! functions, deduplicating by entrypoint and re-checking the model first
//! since it may have changed since planning.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::DiscoveryConfig;
use crate::core::CoverageIndex;
use crate::model::{ProgramModel, SectionSemantics, SegmentFlags};

const FALLBACK_MAX_INSTRUCTION_LENGTH: u64 = 16;

/// Why a hit address did not become a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DiscoverySkipReason {
    #[serde(rename = "in-function")]
    InFunction,
    #[serde(rename = "invalid-address")]
    InvalidAddress,
    #[serde(rename = "non-exec-segment")]
    NonExecutableSegment,
    #[serde(rename = "deny-exec")]
    DenyExecute,
    #[serde(rename = "section-not-code")]
    SectionNotCode,
    #[serde(rename = "data-variable")]
    DataVariable,
    #[serde(rename = "invalid-instruction")]
    InvalidInstruction,
    #[serde(rename = "create-failed")]
    CreateFailed,
}

impl DiscoverySkipReason {
    pub fn label(&self) -> &'static str {
        match self {
            DiscoverySkipReason::InFunction => "in-function",
            DiscoverySkipReason::InvalidAddress => "invalid-address",
            DiscoverySkipReason::NonExecutableSegment => "non-exec-segment",
            DiscoverySkipReason::DenyExecute => "deny-exec",
            DiscoverySkipReason::SectionNotCode => "section-not-code",
            DiscoverySkipReason::DataVariable => "data-variable",
            DiscoverySkipReason::InvalidInstruction => "invalid-instruction",
            DiscoverySkipReason::CreateFailed => "create-failed",
        }
    }
}

impl fmt::Display for DiscoverySkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CandidateOutcome {
    Accept { entrypoint: u64 },
    Skip(DiscoverySkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryCandidate {
    pub hit_address: u64,
    pub outcome: CandidateOutcome,
}

impl DiscoveryCandidate {
    pub fn entrypoint(&self) -> Option<u64> {
        match self.outcome {
            CandidateOutcome::Accept { entrypoint } => Some(entrypoint),
            CandidateOutcome::Skip(_) => None,
        }
    }

    pub fn skip_reason(&self) -> Option<DiscoverySkipReason> {
        match self.outcome {
            CandidateOutcome::Accept { .. } => None,
            CandidateOutcome::Skip(reason) => Some(reason),
        }
    }
}

/// One classified candidate per hit address, in ascending address order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryPlan {
    pub candidates: Vec<DiscoveryCandidate>,
}

impl DiscoveryPlan {
    pub fn accepted(&self) -> impl Iterator<Item = &DiscoveryCandidate> + '_ {
        self.candidates.iter().filter(|c| c.entrypoint().is_some())
    }

    /// Distinct resolved entrypoints, ascending.
    pub fn entrypoints(&self) -> BTreeSet<u64> {
        self.candidates.iter().filter_map(|c| c.entrypoint()).collect()
    }
}

/// Tallies from executing a plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryReport {
    pub candidates: usize,
    pub created: usize,
    /// Accepted candidates whose entrypoint was already created in this run
    pub duplicates: usize,
    pub skipped: BTreeMap<DiscoverySkipReason, usize>,
    pub created_entrypoints: Vec<u64>,
}

impl DiscoveryReport {
    pub fn skipped_for(&self, reason: DiscoverySkipReason) -> usize {
        self.skipped.get(&reason).copied().unwrap_or(0)
    }

    fn skip(&mut self, reason: DiscoverySkipReason) {
        *self.skipped.entry(reason).or_insert(0) += 1;
    }
}

fn max_instruction_length<M: ProgramModel + ?Sized>(model: &M) -> u64 {
    match model.max_instruction_length() {
        0 => FALLBACK_MAX_INSTRUCTION_LENGTH,
        len => len,
    }
}

fn is_valid_instruction<M: ProgramModel + ?Sized>(model: &M, addr: u64, max_len: u64) -> bool {
    let len = model.instruction_length(addr);
    len != 0 && len <= max_len
}

fn check_segment<M: ProgramModel + ?Sized>(
    model: &M,
    addr: u64,
    config: &DiscoveryConfig,
) -> Option<DiscoverySkipReason> {
    let Some(flags) = model.segment_flags_at(addr) else {
        return Some(DiscoverySkipReason::NonExecutableSegment);
    };
    if flags.contains(SegmentFlags::DENY_EXECUTE) {
        return Some(DiscoverySkipReason::DenyExecute);
    }
    if !flags.contains(SegmentFlags::EXECUTABLE) {
        return Some(DiscoverySkipReason::NonExecutableSegment);
    }
    if config.require_segment_code_flag && !flags.contains(SegmentFlags::CONTAINS_CODE) {
        return Some(DiscoverySkipReason::NonExecutableSegment);
    }
    None
}

/// Lowest address within `budget` bytes before `addr` from which a
/// contiguous instruction walk lands exactly on `addr`. Candidates step by
/// the model's instruction alignment and never go below the image start.
/// Returns `addr` when the budget is 0 or nothing earlier validates.
pub fn find_entrypoint<M: ProgramModel + ?Sized>(model: &M, addr: u64, budget: u64) -> u64 {
    if budget == 0 {
        return addr;
    }
    let max_len = max_instruction_length(model);
    let alignment = model.instruction_alignment().max(1);
    let floor = addr.saturating_sub(budget).max(model.start());

    let walks_to_addr = |candidate: u64| {
        let mut cursor = candidate;
        while cursor < addr {
            let len = model.instruction_length(cursor);
            if len == 0 || len > max_len {
                return false;
            }
            match cursor.checked_add(len) {
                Some(next) if next <= addr => cursor = next,
                _ => return false,
            }
        }
        cursor == addr
    };

    let mut best = addr;
    let mut candidate = addr;
    loop {
        if model.is_valid_offset(candidate)
            && is_valid_instruction(model, candidate, max_len)
            && walks_to_addr(candidate)
        {
            best = candidate;
        }
        if candidate <= floor {
            break;
        }
        match candidate.checked_sub(alignment) {
            Some(next) => candidate = next,
            None => break,
        }
    }
    best
}

/// Classify one hit address. Checks run in a fixed order and the first
/// failing one decides the skip reason.
pub fn classify_hit<M: ProgramModel + ?Sized>(
    model: &M,
    addr: u64,
    config: &DiscoveryConfig,
) -> CandidateOutcome {
    if !model.is_valid_offset(addr) {
        return CandidateOutcome::Skip(DiscoverySkipReason::InvalidAddress);
    }
    if !model.functions_containing(addr).is_empty() {
        return CandidateOutcome::Skip(DiscoverySkipReason::InFunction);
    }
    if let Some(reason) = check_segment(model, addr, config) {
        return CandidateOutcome::Skip(reason);
    }
    if config.require_code_section
        && !model
            .section_semantics_at(addr)
            .contains(&SectionSemantics::ReadOnlyCode)
    {
        return CandidateOutcome::Skip(DiscoverySkipReason::SectionNotCode);
    }
    if model.has_data_variable_at(addr) {
        return CandidateOutcome::Skip(DiscoverySkipReason::DataVariable);
    }
    if !is_valid_instruction(model, addr, max_instruction_length(model)) {
        return CandidateOutcome::Skip(DiscoverySkipReason::InvalidInstruction);
    }
    CandidateOutcome::Accept {
        entrypoint: find_entrypoint(model, addr, config.backward_scan_bytes),
    }
}

/// Classify every hit address of `index`. Does not touch the model.
pub fn build_discovery_plan<M: ProgramModel + ?Sized>(
    index: &CoverageIndex,
    model: &M,
    config: &DiscoveryConfig,
) -> DiscoveryPlan {
    let candidates: Vec<DiscoveryCandidate> = index
        .hit_addresses()
        .map(|hit_address| DiscoveryCandidate {
            hit_address,
            outcome: classify_hit(model, hit_address, config),
        })
        .collect();
    let plan = DiscoveryPlan { candidates };
    debug!(
        candidates = plan.candidates.len(),
        accepted = plan.accepted().count(),
        entrypoints = plan.entrypoints().len(),
        "Built discovery plan"
    );
    plan
}

/// Create functions for the accepted candidates of `plan`.
pub fn execute_discovery_plan<M: ProgramModel + ?Sized>(
    plan: &DiscoveryPlan,
    model: &mut M,
    config: &DiscoveryConfig,
) -> DiscoveryReport {
    let mut report = DiscoveryReport::default();
    let mut seen = BTreeSet::new();

    for candidate in &plan.candidates {
        report.candidates += 1;
        let entrypoint = match candidate.outcome {
            CandidateOutcome::Skip(reason) => {
                report.skip(reason);
                continue;
            }
            CandidateOutcome::Accept { entrypoint } => entrypoint,
        };

        if !model.functions_containing(candidate.hit_address).is_empty() {
            report.skip(DiscoverySkipReason::InFunction);
            continue;
        }
        if seen.contains(&entrypoint) {
            report.duplicates += 1;
            continue;
        }
        if !model.functions_at(entrypoint).is_empty() {
            report.skip(DiscoverySkipReason::InFunction);
            continue;
        }
        if !model.is_valid_offset(entrypoint) {
            report.skip(DiscoverySkipReason::InvalidAddress);
            continue;
        }

        match model.create_function(entrypoint) {
            Ok(func) => {
                debug!(entrypoint, name = %func.name, hit = candidate.hit_address, "Created function");
                seen.insert(entrypoint);
                report.created += 1;
                report.created_entrypoints.push(entrypoint);
                if config.update_analysis_per_function {
                    model.update_analysis();
                }
            }
            Err(e) => {
                debug!(entrypoint, error = %e, "Function creation failed");
                report.skip(DiscoverySkipReason::CreateFailed);
            }
        }
    }

    if report.created > 0 && !config.update_analysis_per_function {
        model.update_analysis();
    }

    info!(
        candidates = report.candidates,
        created = report.created,
        duplicates = report.duplicates,
        skipped = report.skipped.values().sum::<usize>(),
        "Discovery finished"
    );
    report
}
