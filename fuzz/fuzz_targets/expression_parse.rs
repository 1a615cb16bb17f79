#![no_main]
use libfuzzer_sys::fuzz_target;
use std::collections::HashMap;

use covex::core::CoverageDataset;
use covex::query::{evaluate_expression, parse_expression, ComposePolicies};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(plan) = parse_expression(text) else {
        return;
    };
    let sets: HashMap<String, CoverageDataset> = plan
        .aliases
        .iter()
        .enumerate()
        .map(|(i, alias)| {
            let i = i as u64;
            (alias.clone(), [(i, 1), (i + 1, 2)].into_iter().collect())
        })
        .collect();
    // a successful parse always yields a well-formed postfix program
    evaluate_expression(&plan, &sets, ComposePolicies::default()).expect("evaluate parsed plan");
});
