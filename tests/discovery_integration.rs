//! Discovery planning and execution against the sample image.

mod common;

use covex::analysis::{
    build_discovery_plan, execute_discovery_plan, CandidateOutcome, DiscoverySkipReason,
};
use covex::analysis::CoverageMapper;
use covex::config::DiscoveryConfig;
use covex::core::{CoverageDataset, CoverageIndex};
use covex::model::{MemoryModel, ProgramModel};

use common::sample_model;

fn index(model: &MemoryModel, addrs: &[u64]) -> CoverageIndex {
    let dataset: CoverageDataset = addrs.iter().map(|&a| (a, 1)).collect();
    CoverageMapper::default().map_dataset(&dataset, model)
}

#[test]
fn test_in_function_never_accepted() {
    let model = sample_model();
    let idx = index(&model, &[0x401000, 0x401008, 0x401024]);
    for budget in [0, 1, 4, 16, 0x100, 0x10000] {
        let config = DiscoveryConfig {
            backward_scan_bytes: budget,
            ..DiscoveryConfig::default()
        };
        let plan = build_discovery_plan(&idx, &model, &config);
        assert!(plan.entrypoints().is_empty(), "budget {}", budget);
        assert!(plan
            .candidates
            .iter()
            .all(|c| c.skip_reason() == Some(DiscoverySkipReason::InFunction)));
    }
}

#[test]
fn test_plan_is_pure_and_classifies() {
    let model = sample_model()
        .with_data_variable(0x402000)
        .with_instruction(0x402010, 0);
    let idx = index(&model, &[0x401004, 0x402000, 0x402010, 0x403000, 0x408010]);
    let config = DiscoveryConfig::default();
    let plan = build_discovery_plan(&idx, &model, &config);

    let outcomes: Vec<CandidateOutcome> = plan.candidates.iter().map(|c| c.outcome).collect();
    assert_eq!(
        outcomes,
        vec![
            CandidateOutcome::Skip(DiscoverySkipReason::InFunction),
            CandidateOutcome::Skip(DiscoverySkipReason::DataVariable),
            CandidateOutcome::Skip(DiscoverySkipReason::InvalidInstruction),
            CandidateOutcome::Accept {
                entrypoint: 0x403000
            },
            CandidateOutcome::Skip(DiscoverySkipReason::DenyExecute),
        ]
    );
    assert!(model.created_functions().is_empty());
    assert_eq!(model.analysis_updates(), 0);
}

#[test]
fn test_backward_scan_and_dedupe() {
    let model = sample_model().with_block(0x403000, 0x10, "");
    let idx = index(&model, &[0x403008, 0x40300c]);
    let config = DiscoveryConfig {
        backward_scan_bytes: 8,
        update_analysis_per_function: false,
        ..DiscoveryConfig::default()
    };
    let plan = build_discovery_plan(&idx, &model, &config);
    let entries: Vec<u64> = plan.candidates.iter().filter_map(|c| c.entrypoint()).collect();
    assert_eq!(entries, vec![0x403000, 0x403004]);

    let mut model = model;
    let report = execute_discovery_plan(&plan, &mut model, &config);
    assert_eq!(report.candidates, 2);
    assert_eq!(report.created, 1);
    // 0x40300c now sits inside the function created at 0x403000
    assert_eq!(report.skipped_for(DiscoverySkipReason::InFunction), 1);
    assert_eq!(model.created_functions(), &[0x403000]);
    assert_eq!(model.analysis_updates(), 1);
    assert_eq!(model.functions_at(0x403000).len(), 1);
}

#[test]
fn test_creation_failure_is_counted() {
    let mut model = sample_model().rejecting_creation_at(0x404000);
    let idx = index(&model, &[0x404000, 0x405000]);
    let config = DiscoveryConfig::default();
    let plan = build_discovery_plan(&idx, &model, &config);
    let report = execute_discovery_plan(&plan, &mut model, &config);

    assert_eq!(report.created, 1);
    assert_eq!(report.created_entrypoints, vec![0x405000]);
    assert_eq!(report.skipped_for(DiscoverySkipReason::CreateFailed), 1);
    assert_eq!(model.analysis_updates(), 1);
}

#[test]
fn test_section_requirement() {
    let model = sample_model();
    let idx = index(&model, &[0x400800]);
    let config = DiscoveryConfig {
        require_code_section: true,
        ..DiscoveryConfig::default()
    };
    let plan = build_discovery_plan(&idx, &model, &config);
    assert_eq!(
        plan.candidates[0].skip_reason(),
        Some(DiscoverySkipReason::SectionNotCode)
    );
}
