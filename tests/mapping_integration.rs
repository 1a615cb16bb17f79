//! Module matching, rebasing and instruction-granular mapping.

mod common;

use std::collections::BTreeMap;
use std::path::Path;

use covex::analysis::{apply_slide, find_module_match, CoverageMapper, MatchReason};
use covex::core::{CoverageDataset, CoverageInput, CoverageTrace, ModuleInfo, TraceFormat};
use covex::formats::drcov::DrcovData;

use common::{sample_drcov, sample_model, IMAGE_BASE, RECORDED_BASE};

fn drcov_trace() -> CoverageTrace {
    let data = DrcovData::decode(&sample_drcov(Some(vec![3, 5, 9, 2])).encode()).unwrap();
    data.to_trace(Path::new("/tmp/run.drcov"))
}

#[test]
fn test_apply_slide_never_wraps() {
    assert_eq!(apply_slide(0x10, -0x20), None);
    assert_eq!(apply_slide(u64::MAX - 1, 2), None);
    assert_eq!(apply_slide(0x30, -0x20), Some(0x10));
    assert_eq!(apply_slide(0x30, 0), Some(0x30));
}

#[test]
fn test_single_module_fallback() {
    let mut modules = BTreeMap::new();
    modules.insert(0, ModuleInfo::new(0, 0x10000, 0x20000, "C:\\bin\\a.exe"));
    let m = find_module_match(&modules, "C:\\bin\\b.exe", 0x40000).unwrap();
    assert_eq!(m.reason, MatchReason::SingleModule);
    assert!(m.fallback);
    assert_eq!(m.slide, 0x30000);
}

#[test]
fn test_drcov_trace_rebased_onto_image() {
    let trace = drcov_trace();
    let index = CoverageMapper::default().map_trace(&trace, &sample_model());
    let diag = &index.diagnostics;

    assert_eq!(diag.match_reason, Some(MatchReason::Basename));
    assert_eq!(diag.matched_module_id, Some(0));
    assert_eq!(diag.slide, IMAGE_BASE as i64 - RECORDED_BASE as i64);
    assert!(!diag.used_fallback);
    assert_eq!(diag.spans_total, 3);
    assert_eq!(diag.spans_mapped, 2);
    // the libc span; the span with an unknown module never reached the trace
    assert_eq!(diag.spans_skipped, 1);
    assert_eq!(trace.unresolved_spans, 1);

    let hits: Vec<(u64, u64)> = index.dataset.hits().iter().map(|(&a, &h)| (a, h)).collect();
    assert_eq!(
        hits,
        vec![(0x401000, 3), (0x401004, 3), (0x401024, 5), (0x401028, 5)]
    );

    let blocks: Vec<(u64, u64, &str)> = index
        .blocks
        .iter()
        .map(|b| (b.start, b.hits, b.function.as_str()))
        .collect();
    assert_eq!(
        blocks,
        vec![
            (0x401000, 6, "init_a"),
            (0x401020, 5, "main"),
            (0x401028, 5, "main")
        ]
    );
    assert!(index.blocks.iter().all(|b| b.module_id == Some(0)));
    assert!(index.invalid_addresses.is_empty());
}

#[test]
fn test_unmatched_multi_module_trace_keeps_addresses() {
    let mut trace = drcov_trace();
    for module in trace.modules.values_mut() {
        module.path = format!("/elsewhere/{}", module.id);
    }
    let index = CoverageMapper::default().map_trace(&trace, &sample_model());
    assert!(!index.diagnostics.matched());
    assert_eq!(index.diagnostics.spans_skipped, 0);
    // recorded addresses are far outside the image
    assert!(index.dataset.is_empty());
    assert!(index.invalid_addresses.contains(&(RECORDED_BASE + 0x1000)));
}

#[test]
fn test_address_list_spans_past_image_end() {
    let mut trace = CoverageTrace::new(TraceFormat::AddressList, Path::new("t.log"));
    trace.spans.push(covex::core::CoverageSpan::new(0x40fffc, 8, 1, None));
    trace.spans.push(covex::core::CoverageSpan::new(0x401000, 0, 1, None));
    let index = CoverageMapper::default().map_trace(&trace, &sample_model());
    assert_eq!(index.dataset.addresses().collect::<Vec<_>>(), vec![0x40fffc]);
    assert_eq!(index.invalid_addresses, vec![0x410000]);
    assert_eq!(index.diagnostics.spans_mapped, 1);
}

#[test]
fn test_map_input_dispatches_on_variant() {
    let mapper = CoverageMapper::default();
    let model = sample_model();
    let dataset: CoverageDataset = [(0x401010, 4), (0x500000, 1)].into_iter().collect();

    let from_dataset = mapper.map_input(&CoverageInput::from(dataset), &model);
    assert_eq!(from_dataset.invalid_addresses, vec![0x500000]);
    assert_eq!(from_dataset.blocks.len(), 1);
    assert_eq!(from_dataset.blocks[0].function, "init_b");
    assert!(!from_dataset.diagnostics.matched());

    let from_trace = mapper.map_input(&CoverageInput::from(drcov_trace()), &model);
    assert!(from_trace.diagnostics.matched());
}
