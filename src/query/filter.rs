//! Block filter queries: `hits>=10 func:init size<0x20`.
//!
//! Conditions are separated by whitespace and all must hold. Numeric values
//! are decimal, or hexadecimal with a `0x` prefix. The function field is a
//! case-insensitive substring test whatever operator is written.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::CoveredBlock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterErrorKind {
    MissingOperator,
    UnknownField,
    UnknownOperator,
    InvalidNumber,
}

/// Filter parse failure. `position` is the character offset of the condition.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message} (at position {position})")]
pub struct FilterError {
    pub kind: FilterErrorKind,
    pub message: String,
    pub position: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterField {
    Address,
    Hits,
    Size,
    Function,
}

impl FilterField {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "addr" | "address" => Some(Self::Address),
            "hits" | "count" => Some(Self::Hits),
            "size" => Some(Self::Size),
            "func" | "function" => Some(Self::Function),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Contains,
}

impl FilterOp {
    fn compare(self, lhs: u64, rhs: u64) -> bool {
        match self {
            Self::Eq | Self::Contains => lhs == rhs,
            Self::Ne => lhs != rhs,
            Self::Lt => lhs < rhs,
            Self::Le => lhs <= rhs,
            Self::Gt => lhs > rhs,
            Self::Ge => lhs >= rhs,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FilterCondition {
    Numeric {
        field: FilterField,
        op: FilterOp,
        value: u64,
    },
    /// Lower-cased needle; empty matches every block
    Function { needle: String },
}

impl FilterCondition {
    pub fn field(&self) -> FilterField {
        match self {
            Self::Numeric { field, .. } => *field,
            Self::Function { .. } => FilterField::Function,
        }
    }

    pub fn matches(&self, block: &CoveredBlock) -> bool {
        match self {
            Self::Numeric { field, op, value } => {
                let lhs = match field {
                    FilterField::Address => block.start,
                    FilterField::Hits => block.hits,
                    FilterField::Size => u64::from(block.size),
                    FilterField::Function => return false,
                };
                op.compare(lhs, *value)
            }
            Self::Function { needle } => {
                needle.is_empty() || block.function.to_lowercase().contains(needle.as_str())
            }
        }
    }
}

/// Conjunction of conditions. The empty filter accepts everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockFilter {
    pub conditions: Vec<FilterCondition>,
}

impl BlockFilter {
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn matches(&self, block: &CoveredBlock) -> bool {
        self.conditions.iter().all(|c| c.matches(block))
    }

    pub fn apply<'a>(&'a self, blocks: &'a [CoveredBlock]) -> impl Iterator<Item = &'a CoveredBlock> + 'a {
        blocks.iter().filter(move |b| self.matches(b))
    }
}

const OPERATOR_CHARS: &[char] = &['=', '<', '>', ':', '!'];

fn parse_number(text: &str) -> Option<u64> {
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

fn split_operator(rest: &str) -> Option<(FilterOp, &str)> {
    for (token, op) in [
        (">=", FilterOp::Ge),
        ("<=", FilterOp::Le),
        ("!=", FilterOp::Ne),
        ("==", FilterOp::Eq),
        ("=", FilterOp::Eq),
        (":", FilterOp::Eq),
        ("<", FilterOp::Lt),
        (">", FilterOp::Gt),
    ] {
        if let Some(value) = rest.strip_prefix(token) {
            return Some((op, value));
        }
    }
    None
}

fn parse_condition(token: &str, position: usize) -> Result<FilterCondition, FilterError> {
    let error = |kind, message: String| FilterError {
        kind,
        message,
        position,
    };

    let lowered = token.to_lowercase();
    let op_at = lowered.find(OPERATOR_CHARS).ok_or_else(|| {
        error(
            FilterErrorKind::MissingOperator,
            format!("Missing operator in filter condition '{}'", token),
        )
    })?;
    let (name, rest) = lowered.split_at(op_at);

    let field = FilterField::parse(name).ok_or_else(|| {
        error(
            FilterErrorKind::UnknownField,
            format!("Unknown filter field '{}'", name),
        )
    })?;
    let (op, value) = split_operator(rest).ok_or_else(|| {
        let shown: String = rest.chars().take_while(|c| OPERATOR_CHARS.contains(c)).collect();
        error(
            FilterErrorKind::UnknownOperator,
            format!("Unknown filter operator '{}'", shown),
        )
    })?;

    if field == FilterField::Function {
        return Ok(FilterCondition::Function {
            needle: value.to_string(),
        });
    }
    let value = parse_number(value).ok_or_else(|| {
        error(
            FilterErrorKind::InvalidNumber,
            format!("Invalid number '{}' for field '{}'", value, name),
        )
    })?;
    Ok(FilterCondition::Numeric { field, op, value })
}

pub fn parse_block_filter(text: &str) -> Result<BlockFilter, FilterError> {
    let mut conditions = Vec::new();
    let mut start: Option<(usize, usize)> = None;

    // (char offset, byte offset) of the current token
    for (char_pos, (byte_pos, c)) in text.char_indices().chain([(text.len(), ' ')]).enumerate() {
        match (c.is_whitespace(), start) {
            (false, None) => start = Some((char_pos, byte_pos)),
            (true, Some((token_char, token_byte))) => {
                conditions.push(parse_condition(&text[token_byte..byte_pos], token_char)?);
                start = None;
            }
            _ => {}
        }
    }
    Ok(BlockFilter { conditions })
}
