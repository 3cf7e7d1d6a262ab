//! Value Expressions
//!
//! Sizes, predicates, addresses and derived data are all described by the
//! same small expression language. An expression evaluates against a parse
//! state to a *list* of optional values, oldest first: name references
//! produce every value bound to the name, and a `None` entry is the
//! not-a-value sentinel marking a result that failed to materialize
//! (division by zero, an out-of-range element pick, a missing operand).
//!
//! Binary operators zip their operand lists tail-aligned: the shorter
//! list is matched against the most recent entries of the longer one and
//! the surplus head of the longer list is dropped. This makes `length[i]
//! op width[i]` line up naturally when both names were bound once per
//! iteration of the same repetition.
//!
//! Evaluation never fails on missing data — that yields sentinels — but
//! it does fail, fatally, when reading already-available bytes fails
//! underneath it.

use std::sync::Arc;

use num_bigint::BigInt;
use serde::{Deserialize, Serialize};

use crate::error::ParseFault;
use crate::state::ParseState;
use crate::value::{Encoding, Value};

/// An expression over a parse state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Expr {
    /// A constant number.
    Const(BigInt),
    /// Literal bytes.
    Bytes(Vec<u8>),
    /// The most recently parsed value anywhere in the graph.
    Current,
    /// The current parse offset, as a number.
    CurrentOffset,
    /// The zero-based iteration count of the innermost enclosing
    /// repetition, or the sentinel outside any repetition.
    CurrentIteration,
    /// Every value bound to `name`, oldest first.
    ///
    /// With a `scope` limit of `n`, only values recorded at most `n`
    /// scope levels above the current depth are visible.
    NameRef {
        /// The bound name to look up.
        name: String,
        /// Optional visibility limit in scope levels.
        scope: Option<u64>,
    },

    /// The oldest result of the operand, as a single-element list.
    First(Arc<Expr>),
    /// The most recent result of the operand, as a single-element list.
    Last(Arc<Expr>),
    /// Element picks from `list` at each index produced by `index`.
    Nth {
        /// The list to pick from.
        list: Arc<Expr>,
        /// Zero-based indices, oldest first.
        index: Arc<Expr>,
    },
    /// The source offset of each operand result.
    Offset(Arc<Expr>),
    /// The number of results of the operand, as a single-element list.
    Count(Arc<Expr>),

    /// Numeric addition, zipped tail-aligned.
    Add(Arc<Expr>, Arc<Expr>),
    /// Numeric subtraction, zipped tail-aligned.
    SubNum(Arc<Expr>, Arc<Expr>),
    /// Numeric multiplication, zipped tail-aligned.
    Mul(Arc<Expr>, Arc<Expr>),
    /// Numeric division; a zero divisor yields the sentinel.
    Div(Arc<Expr>, Arc<Expr>),
    /// Numeric remainder; a zero divisor yields the sentinel.
    Mod(Arc<Expr>, Arc<Expr>),
    /// Numeric negation of each result.
    Neg(Arc<Expr>),

    /// Numeric equality, zipped tail-aligned.
    EqNum(Arc<Expr>, Arc<Expr>),
    /// Numeric strictly-greater-than, zipped tail-aligned.
    GtNum(Arc<Expr>, Arc<Expr>),
    /// Numeric strictly-less-than, zipped tail-aligned.
    LtNum(Arc<Expr>, Arc<Expr>),
    /// Byte-wise equality, zipped tail-aligned.
    Eq(Arc<Expr>, Arc<Expr>),

    /// Boolean conjunction, zipped tail-aligned.
    And(Arc<Expr>, Arc<Expr>),
    /// Boolean disjunction, zipped tail-aligned.
    Or(Arc<Expr>, Arc<Expr>),
    /// Boolean negation of each result.
    Not(Arc<Expr>),

    /// Byte-wise concatenation, zipped tail-aligned.
    Cat(Arc<Expr>, Arc<Expr>),
    /// The left operand, unless it produces nothing at all, in which case
    /// the right operand.
    Elvis(Arc<Expr>, Arc<Expr>),
}

impl Expr {
    /// Evaluate against `state`, rendering computed results under
    /// `encoding`.
    pub fn eval(
        &self,
        state: &ParseState,
        encoding: &Encoding,
    ) -> Result<Vec<Option<Value>>, ParseFault> {
        match self {
            Expr::Const(number) => Ok(vec![Some(Value::from_number(number, *encoding))]),
            Expr::Bytes(bytes) => Ok(vec![Some(Value::from_bytes(bytes.clone(), *encoding))]),

            Expr::Current => Ok(match state.graph().current() {
                Some(value) => vec![Some(value.value().clone())],
                None => Vec::new(),
            }),
            Expr::CurrentOffset => Ok(vec![Some(Value::from_number(
                &BigInt::from(state.offset()),
                *encoding,
            ))]),
            Expr::CurrentIteration => Ok(vec![state
                .current_iteration()
                .map(|count| Value::from_number(&BigInt::from(count), *encoding))]),

            Expr::NameRef { name, scope } => Ok(state
                .lookup(name, *scope)
                .into_iter()
                .map(|parsed| Some(parsed.value().clone()))
                .collect()),

            Expr::First(operand) => {
                let mut results = operand.eval(state, encoding)?;
                results.truncate(1);
                Ok(results)
            }
            Expr::Last(operand) => {
                let results = operand.eval(state, encoding)?;
                Ok(results.into_iter().last().into_iter().collect())
            }
            Expr::Nth { list, index } => {
                let elements = list.eval(state, encoding)?;
                let picks = index.eval(state, encoding)?;
                let mut out = Vec::with_capacity(picks.len());
                for pick in picks {
                    out.push(match pick {
                        Some(value) => pick_element(&elements, &value.as_number()?),
                        None => None,
                    });
                }
                Ok(out)
            }
            Expr::Offset(operand) => Ok(operand
                .eval(state, encoding)?
                .into_iter()
                .map(|result| {
                    result.map(|value| {
                        Value::from_number(&BigInt::from(value.slice().offset()), *encoding)
                    })
                })
                .collect()),
            Expr::Count(operand) => {
                let results = operand.eval(state, encoding)?;
                Ok(vec![Some(Value::from_number(
                    &BigInt::from(results.len()),
                    *encoding,
                ))])
            }

            Expr::Add(left, right) => {
                self.zip_numeric(left, right, state, encoding, |a, b| Some(a + b))
            }
            Expr::SubNum(left, right) => {
                self.zip_numeric(left, right, state, encoding, |a, b| Some(a - b))
            }
            Expr::Mul(left, right) => {
                self.zip_numeric(left, right, state, encoding, |a, b| Some(a * b))
            }
            Expr::Div(left, right) => self.zip_numeric(left, right, state, encoding, |a, b| {
                if b == &BigInt::from(0) {
                    None
                } else {
                    Some(a / b)
                }
            }),
            Expr::Mod(left, right) => self.zip_numeric(left, right, state, encoding, |a, b| {
                if b == &BigInt::from(0) {
                    None
                } else {
                    Some(a % b)
                }
            }),
            Expr::Neg(operand) => {
                let results = operand.eval(state, encoding)?;
                let mut out = Vec::with_capacity(results.len());
                for result in results {
                    out.push(match result {
                        Some(value) => {
                            Some(Value::from_number(&-value.as_number()?, *encoding))
                        }
                        None => None,
                    });
                }
                Ok(out)
            }

            Expr::EqNum(left, right) => {
                self.zip_compare(left, right, state, encoding, |a, b| a == b)
            }
            Expr::GtNum(left, right) => {
                self.zip_compare(left, right, state, encoding, |a, b| a > b)
            }
            Expr::LtNum(left, right) => {
                self.zip_compare(left, right, state, encoding, |a, b| a < b)
            }
            Expr::Eq(left, right) => zip_tail(
                left.eval(state, encoding)?,
                right.eval(state, encoding)?,
                |a, b| Ok(Some(Value::from_bool(a.read()? == b.read()?, *encoding))),
            ),

            Expr::And(left, right) => zip_tail(
                left.eval(state, encoding)?,
                right.eval(state, encoding)?,
                |a, b| {
                    Ok(Some(Value::from_bool(
                        a.as_bool()? && b.as_bool()?,
                        *encoding,
                    )))
                },
            ),
            Expr::Or(left, right) => zip_tail(
                left.eval(state, encoding)?,
                right.eval(state, encoding)?,
                |a, b| {
                    Ok(Some(Value::from_bool(
                        a.as_bool()? || b.as_bool()?,
                        *encoding,
                    )))
                },
            ),
            Expr::Not(operand) => {
                let results = operand.eval(state, encoding)?;
                let mut out = Vec::with_capacity(results.len());
                for result in results {
                    out.push(match result {
                        Some(value) => Some(Value::from_bool(!value.as_bool()?, *encoding)),
                        None => None,
                    });
                }
                Ok(out)
            }

            Expr::Cat(left, right) => zip_tail(
                left.eval(state, encoding)?,
                right.eval(state, encoding)?,
                |a, b| {
                    let mut bytes = a.read()?;
                    bytes.extend_from_slice(&b.read()?);
                    Ok(Some(Value::from_bytes(bytes, *encoding)))
                },
            ),
            Expr::Elvis(left, right) => {
                let results = left.eval(state, encoding)?;
                if results.is_empty() {
                    right.eval(state, encoding)
                } else {
                    Ok(results)
                }
            }
        }
    }

    fn zip_numeric(
        &self,
        left: &Expr,
        right: &Expr,
        state: &ParseState,
        encoding: &Encoding,
        op: impl Fn(&BigInt, &BigInt) -> Option<BigInt>,
    ) -> Result<Vec<Option<Value>>, ParseFault> {
        zip_tail(
            left.eval(state, encoding)?,
            right.eval(state, encoding)?,
            |a, b| {
                Ok(op(&a.as_number()?, &b.as_number()?)
                    .map(|number| Value::from_number(&number, *encoding)))
            },
        )
    }

    fn zip_compare(
        &self,
        left: &Expr,
        right: &Expr,
        state: &ParseState,
        encoding: &Encoding,
        op: impl Fn(&BigInt, &BigInt) -> bool,
    ) -> Result<Vec<Option<Value>>, ParseFault> {
        zip_tail(
            left.eval(state, encoding)?,
            right.eval(state, encoding)?,
            |a, b| {
                Ok(Some(Value::from_bool(
                    op(&a.as_number()?, &b.as_number()?),
                    *encoding,
                )))
            },
        )
    }
}

/// Zip two result lists tail-aligned, applying `op` to defined pairs.
///
/// Any pair with a sentinel operand yields a sentinel; the surplus head of
/// the longer list is dropped.
fn zip_tail(
    left: Vec<Option<Value>>,
    right: Vec<Option<Value>>,
    op: impl Fn(&Value, &Value) -> Result<Option<Value>, ParseFault>,
) -> Result<Vec<Option<Value>>, ParseFault> {
    let paired = left.len().min(right.len());
    let left_tail = &left[left.len() - paired..];
    let right_tail = &right[right.len() - paired..];
    let mut out = Vec::with_capacity(paired);
    for (a, b) in left_tail.iter().zip(right_tail.iter()) {
        out.push(match (a, b) {
            (Some(a), Some(b)) => op(a, b)?,
            _ => None,
        });
    }
    Ok(out)
}

/// Pick `elements[index]`, treating a negative or out-of-range index as
/// the sentinel.
fn pick_element(elements: &[Option<Value>], index: &BigInt) -> Option<Value> {
    let index = usize::try_from(index).ok()?;
    elements.get(index).cloned().flatten()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::{add, con, cur_offset, div, eq_num, last, ref_};
    use crate::source::Source;
    use crate::token::Token;

    fn empty_state() -> ParseState {
        let token = Arc::new(Token::Seq { tokens: Vec::new() });
        ParseState::new(Source::buffer(vec![0u8; 8]), token, 0)
    }

    fn single(results: Vec<Option<Value>>) -> Value {
        assert_eq!(results.len(), 1);
        results.into_iter().next().unwrap().unwrap()
    }

    #[test]
    fn test_const_evaluates_to_one_value() {
        let state = empty_state();
        let results = con(42).eval(&state, &Encoding::new()).unwrap();
        assert_eq!(single(results).as_number().unwrap(), BigInt::from(42));
    }

    #[test]
    fn test_arithmetic_over_constants() {
        let state = empty_state();
        let enc = Encoding::new();
        let sum = add(con(40), con(2)).eval(&state, &enc).unwrap();
        assert_eq!(single(sum).as_number().unwrap(), BigInt::from(42));
    }

    #[test]
    fn test_division_by_zero_yields_sentinel() {
        let state = empty_state();
        let results = div(con(1), con(0)).eval(&state, &Encoding::new()).unwrap();
        assert_eq!(results, vec![None]);
    }

    #[test]
    fn test_current_offset_tracks_state() {
        let token = Arc::new(Token::Seq { tokens: Vec::new() });
        let state = ParseState::new(Source::buffer(vec![0u8; 8]), token, 5);
        let results = cur_offset().eval(&state, &Encoding::new()).unwrap();
        assert_eq!(single(results).as_number().unwrap(), BigInt::from(5));
    }

    #[test]
    fn test_unbound_name_evaluates_to_empty_list() {
        let state = empty_state();
        let results = ref_("missing").eval(&state, &Encoding::new()).unwrap();
        assert!(results.is_empty());
        let latest = last(ref_("missing")).eval(&state, &Encoding::new()).unwrap();
        assert!(latest.is_empty());
    }

    #[test]
    fn test_zip_is_tail_aligned() {
        // [1, 2, 3] zipped with [2, 3] pairs the two most recent entries.
        let enc = Encoding::new();
        let lhs = vec![
            Some(Value::from_number(&BigInt::from(1), enc)),
            Some(Value::from_number(&BigInt::from(2), enc)),
            Some(Value::from_number(&BigInt::from(3), enc)),
        ];
        let rhs = vec![
            Some(Value::from_number(&BigInt::from(2), enc)),
            Some(Value::from_number(&BigInt::from(3), enc)),
        ];
        let zipped = zip_tail(lhs, rhs, |a, b| {
            Ok(Some(Value::from_bool(
                a.as_number()? == b.as_number()?,
                enc,
            )))
        })
        .unwrap();
        assert_eq!(zipped.len(), 2);
        assert!(zipped[0].as_ref().unwrap().as_bool().unwrap());
        assert!(zipped[1].as_ref().unwrap().as_bool().unwrap());
    }

    #[test]
    fn test_comparison_with_sentinel_operand_is_sentinel() {
        let state = empty_state();
        let enc = Encoding::new();
        let results = eq_num(div(con(1), con(0)), con(0)).eval(&state, &enc).unwrap();
        assert_eq!(results, vec![None]);
    }

    #[test]
    fn test_elvis_falls_back_on_empty() {
        let state = empty_state();
        let enc = Encoding::new();
        let results = Expr::Elvis(Arc::new(ref_("missing")), Arc::new(con(7)))
            .eval(&state, &enc)
            .unwrap();
        assert_eq!(single(results).as_number().unwrap(), BigInt::from(7));
    }
}
