//! The two embedded mini-languages and the set algebra under them.
//!
//! - `compose`: union/intersect/subtract over datasets with hit merge
//!   policies
//! - `expression`: infix composition expressions over dataset aliases
//! - `filter`: predicate queries over covered block summaries

pub mod compose;
pub mod expression;
pub mod filter;

pub use compose::{compose, ComposePolicies, CompositionOp, HitMergePolicy};
pub use expression::{
    evaluate_expression, parse_expression, ComposeError, ComposeErrorKind, ComposePlan, ExprToken,
};
pub use filter::{
    parse_block_filter, BlockFilter, FilterCondition, FilterError, FilterErrorKind, FilterField,
    FilterOp,
};
