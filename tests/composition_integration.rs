//! Set algebra and expression evaluation over datasets.

use std::collections::{BTreeSet, HashMap};

use covex::core::{CoverageDataset, HitMap};
use covex::query::{
    compose, evaluate_expression, parse_expression, ComposeErrorKind, ComposePolicies,
    CompositionOp, HitMergePolicy,
};

const POLICIES: [HitMergePolicy; 4] = [
    HitMergePolicy::Sum,
    HitMergePolicy::Min,
    HitMergePolicy::Max,
    HitMergePolicy::Left,
];

fn dataset(pairs: &[(u64, u64)]) -> CoverageDataset {
    pairs.iter().copied().collect()
}

fn keys(ds: &CoverageDataset) -> BTreeSet<u64> {
    ds.addresses().collect()
}

fn fixtures() -> (CoverageDataset, CoverageDataset) {
    (
        dataset(&[(0x10, 2), (0x20, 7), (0x30, 1)]),
        dataset(&[(0x20, 3), (0x30, 9), (0x40, 4)]),
    )
}

#[test]
fn test_key_sets_for_every_policy() {
    let (a, b) = fixtures();
    let (ka, kb) = (keys(&a), keys(&b));
    for policy in POLICIES {
        let union = compose(&a, &b, CompositionOp::Union, policy);
        assert_eq!(keys(&union), &ka | &kb, "{:?}", policy);
        let inter = compose(&a, &b, CompositionOp::Intersection, policy);
        assert_eq!(keys(&inter), &ka & &kb, "{:?}", policy);
    }
    let diff = compose(&a, &b, CompositionOp::Subtract, HitMergePolicy::Left);
    assert_eq!(keys(&diff), &ka - &kb);
    assert_eq!(diff.hits()[&0x10], 2);
}

#[test]
fn test_commutativity() {
    let (a, b) = fixtures();
    for policy in [HitMergePolicy::Sum, HitMergePolicy::Min, HitMergePolicy::Max] {
        for op in [CompositionOp::Union, CompositionOp::Intersection] {
            assert_eq!(compose(&a, &b, op, policy), compose(&b, &a, op, policy));
        }
    }
    let ab = compose(&a, &b, CompositionOp::Intersection, HitMergePolicy::Left);
    let ba = compose(&b, &a, CompositionOp::Intersection, HitMergePolicy::Left);
    assert_eq!(keys(&ab), keys(&ba));
    assert_ne!(ab, ba);
}

#[test]
fn test_round_trip_from_hits() {
    let mut h = HitMap::new();
    for (i, addr) in [0x9000u64, 0x10, 0xffff_ffff_ffff, 0x4000].iter().enumerate() {
        h.insert(*addr, i as u64 * 3);
    }
    let ds = CoverageDataset::from_hits(h.clone());
    assert_eq!(ds.hits(), &h);
    assert_eq!(ds.stats().unique_addresses, 4);
    assert_eq!(ds.spans().len(), 4);
    assert!(ds.spans().iter().all(|s| s.size == 1));
}

#[test]
fn test_expression_precedence() {
    let sets = HashMap::from([
        ("A".to_string(), dataset(&[(1, 1), (2, 1)])),
        ("B".to_string(), dataset(&[(2, 1), (3, 1)])),
        ("C".to_string(), dataset(&[(5, 1)])),
    ]);
    let plan = parse_expression("A & B | C").unwrap();
    let out = evaluate_expression(&plan, &sets, ComposePolicies::default()).unwrap();
    assert_eq!(keys(&out), BTreeSet::from([2, 5]));

    let plan = parse_expression("a & (b | c)").unwrap();
    let out = evaluate_expression(&plan, &sets, ComposePolicies::default()).unwrap();
    assert_eq!(keys(&out), BTreeSet::from([2]));

    let plan = parse_expression("A - B - C").unwrap();
    let out = evaluate_expression(&plan, &sets, ComposePolicies::default()).unwrap();
    assert_eq!(keys(&out), BTreeSet::from([1]));
}

#[test]
fn test_distinct_parse_errors() {
    let cases = [
        ("A $ B", ComposeErrorKind::UnexpectedCharacter, 2),
        ("(A | B", ComposeErrorKind::UnmatchedParen, 0),
        ("A | B)", ComposeErrorKind::UnmatchedParen, 5),
        ("", ComposeErrorKind::Empty, 0),
        ("A & & B", ComposeErrorKind::MalformedSequence, 4),
    ];
    for (expr, kind, position) in cases {
        let err = parse_expression(expr).unwrap_err();
        assert_eq!((err.kind, err.position), (kind, position), "{:?}", expr);
    }
}

#[test]
fn test_unknown_alias_is_not_a_parse_error() {
    let plan = parse_expression("A | Missing").unwrap();
    let sets = HashMap::from([("A".to_string(), dataset(&[(1, 1)]))]);
    let err = evaluate_expression(&plan, &sets, ComposePolicies::default()).unwrap_err();
    assert_eq!(err.kind, ComposeErrorKind::UnknownAlias);
    assert_eq!(err.message, "Unknown alias: MISSING");
}
