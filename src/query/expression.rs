//! Composition expressions: `A | B`, `(A - B) & C`, ...
//!
//! Identifiers name datasets by alias and are case-normalized to upper case.
//! `&` binds tighter than `|` and `-`, which share precedence and associate
//! left to right. Parsing produces a postfix plan; evaluation runs it over a
//! map of named datasets.

use std::borrow::Cow;
use std::collections::HashMap;

use thiserror::Error;

use crate::core::CoverageDataset;
use crate::query::compose::{compose, ComposePolicies, CompositionOp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComposeErrorKind {
    UnexpectedCharacter,
    UnmatchedParen,
    Empty,
    /// Operand where an operator belongs, or the other way round
    MalformedSequence,
    UnknownAlias,
    MissingOperand,
    ExtraOperands,
}

/// Parse or evaluation failure with the character position it refers to.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message} (at position {position})")]
pub struct ComposeError {
    pub kind: ComposeErrorKind,
    pub message: String,
    pub position: usize,
}

impl ComposeError {
    fn new(kind: ComposeErrorKind, message: impl Into<String>, position: usize) -> Self {
        Self {
            kind,
            message: message.into(),
            position,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExprToken {
    Alias { name: String, position: usize },
    Op { op: CompositionOp, position: usize },
}

/// Postfix form of a parsed expression.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComposePlan {
    pub rpn: Vec<ExprToken>,
    /// Distinct aliases in order of first appearance
    pub aliases: Vec<String>,
}

enum Pending {
    Op(CompositionOp, usize),
    LParen(usize),
}

fn precedence(op: CompositionOp) -> u8 {
    match op {
        CompositionOp::Intersection => 2,
        CompositionOp::Union | CompositionOp::Subtract => 1,
    }
}

fn is_identifier_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

pub fn parse_expression(expression: &str) -> Result<ComposePlan, ComposeError> {
    use ComposeErrorKind::*;

    let chars: Vec<char> = expression.chars().collect();
    let mut plan = ComposePlan::default();
    let mut ops: Vec<Pending> = Vec::new();
    let mut expect_operand = true;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if is_identifier_start(c) {
            if !expect_operand {
                return Err(ComposeError::new(MalformedSequence, "Expected operator", i));
            }
            let start = i;
            while i < chars.len() && is_identifier_char(chars[i]) {
                i += 1;
            }
            let name: String = chars[start..i].iter().collect::<String>().to_ascii_uppercase();
            if !plan.aliases.contains(&name) {
                plan.aliases.push(name.clone());
            }
            plan.rpn.push(ExprToken::Alias {
                name,
                position: start,
            });
            expect_operand = false;
            continue;
        }

        let op = match c {
            '|' => Some(CompositionOp::Union),
            '&' => Some(CompositionOp::Intersection),
            '-' => Some(CompositionOp::Subtract),
            '(' | ')' => None,
            other => {
                return Err(ComposeError::new(
                    UnexpectedCharacter,
                    format!("Unexpected character '{}'", other),
                    i,
                ))
            }
        };

        match (c, op) {
            (_, Some(op)) => {
                if expect_operand {
                    return Err(ComposeError::new(
                        MalformedSequence,
                        format!("Expected operand before '{}'", op),
                        i,
                    ));
                }
                while let Some(Pending::Op(top, pos)) = ops.last() {
                    if precedence(*top) < precedence(op) {
                        break;
                    }
                    plan.rpn.push(ExprToken::Op {
                        op: *top,
                        position: *pos,
                    });
                    ops.pop();
                }
                ops.push(Pending::Op(op, i));
                expect_operand = true;
            }
            ('(', None) => {
                if !expect_operand {
                    return Err(ComposeError::new(
                        MalformedSequence,
                        "Expected operator before '('",
                        i,
                    ));
                }
                ops.push(Pending::LParen(i));
            }
            _ => {
                if expect_operand {
                    return Err(ComposeError::new(
                        MalformedSequence,
                        "Expected operand before ')'",
                        i,
                    ));
                }
                let mut matched = false;
                while let Some(pending) = ops.pop() {
                    match pending {
                        Pending::LParen(_) => {
                            matched = true;
                            break;
                        }
                        Pending::Op(op, position) => plan.rpn.push(ExprToken::Op { op, position }),
                    }
                }
                if !matched {
                    return Err(ComposeError::new(
                        UnmatchedParen,
                        "Unmatched closing parenthesis",
                        i,
                    ));
                }
            }
        }
        i += 1;
    }

    if plan.rpn.is_empty() && ops.is_empty() {
        return Err(ComposeError::new(Empty, "Empty composition expression", 0));
    }

    while let Some(pending) = ops.pop() {
        match pending {
            Pending::LParen(position) => {
                return Err(ComposeError::new(
                    UnmatchedParen,
                    "Unmatched opening parenthesis",
                    position,
                ))
            }
            Pending::Op(op, position) => plan.rpn.push(ExprToken::Op { op, position }),
        }
    }

    if expect_operand {
        return Err(ComposeError::new(
            MalformedSequence,
            "Expression ends without an operand",
            chars.len(),
        ));
    }
    Ok(plan)
}

/// Run a parsed plan over datasets keyed by upper-case alias.
pub fn evaluate_expression(
    plan: &ComposePlan,
    datasets: &HashMap<String, CoverageDataset>,
    policies: ComposePolicies,
) -> Result<CoverageDataset, ComposeError> {
    let mut stack: Vec<Cow<'_, CoverageDataset>> = Vec::with_capacity(plan.rpn.len());

    for token in &plan.rpn {
        match token {
            ExprToken::Alias { name, position } => {
                let dataset = datasets.get(name).ok_or_else(|| {
                    ComposeError::new(
                        ComposeErrorKind::UnknownAlias,
                        format!("Unknown alias: {}", name),
                        *position,
                    )
                })?;
                stack.push(Cow::Borrowed(dataset));
            }
            ExprToken::Op { op, position } => {
                let (Some(right), Some(left)) = (stack.pop(), stack.pop()) else {
                    return Err(ComposeError::new(
                        ComposeErrorKind::MissingOperand,
                        "Malformed expression: missing operand",
                        *position,
                    ));
                };
                let result = compose(&left, &right, *op, policies.for_op(*op));
                stack.push(Cow::Owned(result));
            }
        }
    }

    match (stack.pop(), stack.is_empty()) {
        (Some(result), true) => Ok(result.into_owned()),
        _ => Err(ComposeError::new(
            ComposeErrorKind::ExtraOperands,
            "Malformed expression: extra operands",
            0,
        )),
    }
}
