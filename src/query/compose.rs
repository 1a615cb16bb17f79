//! Set algebra over coverage datasets.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::{CoverageDataset, HitMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompositionOp {
    Union,
    Intersection,
    Subtract,
}

impl fmt::Display for CompositionOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompositionOp::Union => "|",
            CompositionOp::Intersection => "&",
            CompositionOp::Subtract => "-",
        };
        f.write_str(s)
    }
}

/// How two hit counts for the same address combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HitMergePolicy {
    /// Saturating addition
    Sum,
    Min,
    Max,
    /// Keep the left operand's count
    Left,
}

impl HitMergePolicy {
    pub fn merge(self, left: u64, right: u64) -> u64 {
        match self {
            HitMergePolicy::Sum => left.saturating_add(right),
            HitMergePolicy::Min => left.min(right),
            HitMergePolicy::Max => left.max(right),
            HitMergePolicy::Left => left,
        }
    }
}

/// Merge policy per operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposePolicies {
    pub union: HitMergePolicy,
    pub intersect: HitMergePolicy,
    pub subtract: HitMergePolicy,
}

impl Default for ComposePolicies {
    fn default() -> Self {
        Self {
            union: HitMergePolicy::Sum,
            intersect: HitMergePolicy::Min,
            subtract: HitMergePolicy::Left,
        }
    }
}

impl ComposePolicies {
    pub fn for_op(&self, op: CompositionOp) -> HitMergePolicy {
        match op {
            CompositionOp::Union => self.union,
            CompositionOp::Intersection => self.intersect,
            CompositionOp::Subtract => self.subtract,
        }
    }
}

/// Combine two datasets.
///
/// Union merges colliding counts with `policy`; intersection keeps shared
/// addresses with merged counts; subtraction keeps left-only addresses with
/// their left counts and ignores `policy`.
pub fn compose(
    left: &CoverageDataset,
    right: &CoverageDataset,
    op: CompositionOp,
    policy: HitMergePolicy,
) -> CoverageDataset {
    let a = left.hits();
    let b = right.hits();
    let result: HitMap = match op {
        CompositionOp::Union => {
            let mut out = a.clone();
            for (&addr, &count) in b {
                out.entry(addr)
                    .and_modify(|existing| *existing = policy.merge(*existing, count))
                    .or_insert(count);
            }
            out
        }
        CompositionOp::Intersection => a
            .iter()
            .filter_map(|(&addr, &count)| b.get(&addr).map(|&rc| (addr, policy.merge(count, rc))))
            .collect(),
        CompositionOp::Subtract => a
            .iter()
            .filter(|(addr, _)| !b.contains_key(*addr))
            .map(|(&addr, &count)| (addr, count))
            .collect(),
    };
    CoverageDataset::from_hits(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn ds(entries: &[(u64, u64)]) -> CoverageDataset {
        entries.iter().copied().collect()
    }

    fn keys(d: &CoverageDataset) -> BTreeSet<u64> {
        d.addresses().collect()
    }

    const ALL: [HitMergePolicy; 4] = [
        HitMergePolicy::Sum,
        HitMergePolicy::Min,
        HitMergePolicy::Max,
        HitMergePolicy::Left,
    ];

    #[test]
    fn test_key_sets_for_every_policy() {
        let a = ds(&[(1, 3), (2, 5), (4, 1)]);
        let b = ds(&[(2, 7), (3, 2), (4, 9)]);
        let ka = keys(&a);
        let kb = keys(&b);
        for policy in ALL {
            let u = compose(&a, &b, CompositionOp::Union, policy);
            assert_eq!(keys(&u), ka.union(&kb).copied().collect());
            let i = compose(&a, &b, CompositionOp::Intersection, policy);
            assert_eq!(keys(&i), ka.intersection(&kb).copied().collect());
            let s = compose(&a, &b, CompositionOp::Subtract, policy);
            assert_eq!(keys(&s), ka.difference(&kb).copied().collect());
            assert_eq!(s.hits().get(&1), Some(&3));
        }
    }

    #[test]
    fn test_merge_values() {
        let a = ds(&[(1, 3), (2, 5)]);
        let b = ds(&[(2, 7), (3, 2)]);
        let sum = compose(&a, &b, CompositionOp::Union, HitMergePolicy::Sum);
        assert_eq!(sum.hits()[&2], 12);
        assert_eq!(sum.hits()[&3], 2);
        let left = compose(&a, &b, CompositionOp::Union, HitMergePolicy::Left);
        assert_eq!(left.hits()[&2], 5);
        let min = compose(&a, &b, CompositionOp::Intersection, HitMergePolicy::Min);
        assert_eq!(min.hits()[&2], 5);
        let max = compose(&a, &b, CompositionOp::Intersection, HitMergePolicy::Max);
        assert_eq!(max.hits()[&2], 7);
        assert_eq!(max.stats().total_hits, 7);
    }

    #[test]
    fn test_commutativity() {
        let a = ds(&[(1, 3), (2, 5)]);
        let b = ds(&[(2, 7), (3, 2)]);
        for policy in [HitMergePolicy::Sum, HitMergePolicy::Min, HitMergePolicy::Max] {
            for op in [CompositionOp::Union, CompositionOp::Intersection] {
                assert_eq!(compose(&a, &b, op, policy), compose(&b, &a, op, policy));
            }
        }
        assert_ne!(
            compose(&a, &b, CompositionOp::Intersection, HitMergePolicy::Left),
            compose(&b, &a, CompositionOp::Intersection, HitMergePolicy::Left)
        );
    }

    #[test]
    fn test_sum_saturates() {
        let a = ds(&[(1, u64::MAX)]);
        let b = ds(&[(1, 5)]);
        let u = compose(&a, &b, CompositionOp::Union, HitMergePolicy::Sum);
        assert_eq!(u.hits()[&1], u64::MAX);
    }

    #[test]
    fn test_policy_serde_names() {
        assert_eq!(serde_json::to_string(&HitMergePolicy::Max).unwrap(), "\"max\"");
        let p: HitMergePolicy = serde_json::from_str("\"left\"").unwrap();
        assert_eq!(p, HitMergePolicy::Left);
        assert_eq!(ComposePolicies::default().for_op(CompositionOp::Intersection), HitMergePolicy::Min);
    }
}
