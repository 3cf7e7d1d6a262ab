//! Parse Engine
//!
//! The engine interprets a grammar token tree against a parse state. Its
//! result type carries the two failure tiers apart:
//!
//! - `Ok(Some(state))` — the token matched and `state` is the parse after
//!   it;
//! - `Ok(None)` — the token did not match here; the caller backtracks by
//!   continuing from the state it still holds;
//! - `Err(fault)` — the parse itself is broken (contract violation,
//!   failing medium, malformed grammar) and aborts as a whole.
//!
//! Backtracking needs no undo: states are immutable, so an alternative
//! that failed simply never contributed anything.
//!
//! Substructure descents carry cycle detection. Before parsing at a
//! computed address the engine checks whether an equal structure is
//! already being parsed on the current descent path, or was already
//! completed somewhere in the graph; either way it records a
//! back-reference instead of descending, which keeps parses of cyclic
//! data finite.

use std::sync::Arc;

use num_bigint::BigInt;

use crate::dsl::Grammar;
use crate::error::ParseFault;
use crate::expr::Expr;
use crate::source::{Slice, Source};
use crate::state::ParseState;
use crate::token::Token;
use crate::value::{Encoding, ParseReference, ParseValue, Value};

/// Logging macros - no-op when logging feature is disabled
#[cfg(not(feature = "logging"))]
macro_rules! log_debug {
    ($($arg:tt)*) => {};
}

/// Logging macros - use log crate when logging feature is enabled
#[cfg(feature = "logging")]
macro_rules! log_debug {
    ($($arg:tt)*) => { log::debug!($($arg)*) };
}

/// A grammar interpreter over immutable parse states.
pub struct Parser<'g> {
    grammar: &'g Grammar,
    encoding: Encoding,
}

impl<'g> Parser<'g> {
    /// An interpreter for `grammar`, rendering computed values under
    /// `encoding`.
    pub fn new(grammar: &'g Grammar, encoding: Encoding) -> Self {
        Parser { grammar, encoding }
    }

    /// Parse `source` from `offset` with the grammar's root rule.
    pub fn parse(
        &self,
        source: Arc<Source>,
        offset: u64,
    ) -> Result<Option<ParseState>, ParseFault> {
        let root = self.resolve(&self.grammar.root_ref())?;
        log_debug!("starting parse at offset {}", offset);
        let state = ParseState::new(source, Arc::clone(&root), offset);
        let result = self.accept(&root, state)?;
        #[cfg(feature = "logging")]
        match &result {
            Some(state) => log_debug!("parse succeeded at offset {}", state.offset()),
            None => log_debug!("parse failed"),
        }
        Ok(result)
    }

    /// Match one token: resolve rule references, open its scope, dispatch
    /// on its kind, and seal the scope on success.
    fn accept(
        &self,
        token: &Arc<Token>,
        state: ParseState,
    ) -> Result<Option<ParseState>, ParseFault> {
        let token = self.resolve(token)?;
        log_debug!("accept {} at offset {}", token, state.offset());
        let opened = state.open_scope(Arc::clone(&token));
        match self.dispatch(&token, opened)? {
            Some(matched) => Ok(Some(matched.close_scope(&token)?)),
            None => Ok(None),
        }
    }

    fn dispatch(
        &self,
        token: &Arc<Token>,
        state: ParseState,
    ) -> Result<Option<ParseState>, ParseFault> {
        match token.as_ref() {
            Token::Def {
                name,
                size,
                predicate,
            } => self.parse_def(token, name, size, predicate.as_ref(), state),

            Token::Seq { tokens } => {
                let mut s = state;
                for child in tokens {
                    s = match self.accept(child, s)? {
                        Some(next) => next,
                        None => return Ok(None),
                    };
                }
                Ok(Some(s))
            }

            Token::Cho { tokens } => {
                for alternative in tokens {
                    if let Some(matched) = self.accept(alternative, state.clone())? {
                        return Ok(Some(matched));
                    }
                    log_debug!("alternative {} rejected, trying next", alternative);
                }
                Ok(None)
            }

            Token::Rep { token } => {
                let mut s = state.start_iteration();
                loop {
                    match self.accept(token, s.clone())? {
                        Some(next) => s = next.next_iteration(),
                        None => break,
                    }
                }
                Ok(Some(s.end_iteration()))
            }

            Token::RepN { token, count } => {
                let count = self.required_number(count.eval(&state, &self.encoding)?)?;
                let count = u64::try_from(&count).map_err(|_| ParseFault::InvalidSize {
                    value: count.to_string(),
                })?;
                let mut s = state.start_iteration();
                for _ in 0..count {
                    s = match self.accept(token, s)? {
                        Some(next) => next.next_iteration(),
                        None => return Ok(None),
                    };
                }
                Ok(Some(s.end_iteration()))
            }

            Token::Pre { token, predicate } => {
                if !self.predicate_holds(predicate, &state)? {
                    log_debug!("pre-condition false, skipping {}", token);
                    return Ok(Some(state));
                }
                self.accept(token, state)
            }

            Token::Post { token, predicate } => match self.accept(token, state)? {
                Some(matched) if self.predicate_holds(predicate, &matched)? => Ok(Some(matched)),
                _ => Ok(None),
            },

            Token::Opt { token } => match self.accept(token, state.clone())? {
                Some(matched) => Ok(Some(matched)),
                None => Ok(Some(state)),
            },

            Token::Scope { token } => self.accept(token, state),

            Token::Sub { token, address } => self.parse_sub(token, address, state),

            Token::Tie { token, data } => self.parse_tie(token, data, state),

            // resolve() chases references before dispatch
            Token::TokenRef { rule } => Err(ParseFault::UnknownRule { name: rule.clone() }),
        }
    }

    fn parse_def(
        &self,
        token: &Arc<Token>,
        name: &str,
        size: &Arc<Expr>,
        predicate: Option<&Arc<Expr>>,
        state: ParseState,
    ) -> Result<Option<ParseState>, ParseFault> {
        let size = self.required_number(size.eval(&state, &self.encoding)?)?;
        let length = u64::try_from(&size).map_err(|_| ParseFault::InvalidSize {
            value: size.to_string(),
        })?;
        let slice = match Slice::new(Arc::clone(state.source()), state.offset(), length) {
            Some(slice) => slice,
            None => {
                log_debug!("{} bytes unavailable at offset {}", length, state.offset());
                return Ok(None);
            }
        };
        let value = Arc::new(ParseValue::new(name, Arc::clone(token), slice, self.encoding));
        let matched = state.add_value(value).seek(state.offset() + length);
        if let Some(predicate) = predicate {
            if !self.predicate_holds(predicate, &matched)? {
                log_debug!("predicate on {:?} false at offset {}", name, state.offset());
                return Ok(None);
            }
        }
        Ok(Some(matched))
    }

    /// Parse the target once per evaluated address, in order, leaving the
    /// outer cursor where it was.
    fn parse_sub(
        &self,
        operand: &Arc<Token>,
        address: &Arc<Expr>,
        state: ParseState,
    ) -> Result<Option<ParseState>, ParseFault> {
        let addresses = address.eval(&state, &self.encoding)?;
        if addresses.is_empty() {
            return Err(ParseFault::ArityViolation {
                expected: 1,
                actual: 0,
            });
        }
        let target = self.resolve(operand)?;
        let mut s = state;
        for (index, addressed) in addresses.into_iter().enumerate() {
            let value = addressed.ok_or(ParseFault::NotAValue { index })?;
            let location = self.as_location(&value)?;
            s = match self.parse_at(&target, location, s)? {
                Some(next) => next,
                None => return Ok(None),
            };
        }
        Ok(Some(s))
    }

    /// One substructure descent, or a back-reference when an equal parse
    /// is underway or already in the graph.
    fn parse_at(
        &self,
        target: &Arc<Token>,
        location: u64,
        state: ParseState,
    ) -> Result<Option<ParseState>, ParseFault> {
        let reference =
            ParseReference::new(location, Arc::clone(state.source()), Arc::clone(target));
        let revisit = state
            .references()
            .iter()
            .any(|pending| pending == &reference)
            || state.graph().resolve(&reference).is_some();
        if revisit {
            log_debug!("back-reference to offset {}", location);
            return Ok(Some(state.append_reference(reference)));
        }
        let return_offset = state.offset();
        let descended = state.push_pending(reference).seek(location);
        match self.accept(target, descended)? {
            Some(parsed) => Ok(Some(parsed.seek(return_offset))),
            None => Ok(None),
        }
    }

    /// Parse the target once per evaluated data result, each over its own
    /// derived source, restoring the outer cursor afterwards.
    fn parse_tie(
        &self,
        operand: &Arc<Token>,
        data: &Arc<Expr>,
        state: ParseState,
    ) -> Result<Option<ParseState>, ParseFault> {
        let results = data.eval(&state, &self.encoding)?;
        if results.is_empty() {
            return Err(ParseFault::ArityViolation {
                expected: 1,
                actual: 0,
            });
        }
        let outer_source = Arc::clone(state.source());
        let outer_offset = state.offset();
        let snapshot = Arc::new(state.clone());
        let mut s = state;
        for index in 0..results.len() {
            let derived =
                Source::derived(Arc::clone(data), index, Arc::clone(&snapshot), &results)?;
            s = match self.accept(operand, s.with_source(derived, 0))? {
                Some(next) => next,
                None => return Ok(None),
            };
        }
        Ok(Some(s.with_source(outer_source, outer_offset)))
    }

    /// Chase rule references through the grammar's registry.
    fn resolve(&self, token: &Arc<Token>) -> Result<Arc<Token>, ParseFault> {
        let mut current = Arc::clone(token);
        let mut hops = 0usize;
        loop {
            let rule = match current.as_ref() {
                Token::TokenRef { rule } => rule.clone(),
                _ => return Ok(current),
            };
            // A reference chain longer than the registry is circular.
            hops += 1;
            if hops > self.grammar.rule_count() {
                return Err(ParseFault::UnknownRule { name: rule });
            }
            current = match self.grammar.rule(&rule) {
                Some(resolved) => Arc::clone(resolved),
                None => return Err(ParseFault::UnknownRule { name: rule }),
            };
        }
    }

    /// Whether a side condition holds: it must produce at least one
    /// result, with every result defined and true.
    fn predicate_holds(&self, predicate: &Expr, state: &ParseState) -> Result<bool, ParseFault> {
        let results = predicate.eval(state, &self.encoding)?;
        if results.is_empty() {
            return Ok(false);
        }
        for result in results {
            match result {
                Some(value) => {
                    if !value.as_bool()? {
                        return Ok(false);
                    }
                }
                None => return Ok(false),
            }
        }
        Ok(true)
    }

    /// A single defined numeric result, or the matching contract fault.
    fn required_number(&self, results: Vec<Option<Value>>) -> Result<BigInt, ParseFault> {
        if results.len() != 1 {
            return Err(ParseFault::ArityViolation {
                expected: 1,
                actual: results.len(),
            });
        }
        match results.into_iter().next().flatten() {
            Some(value) => value.as_number(),
            None => Err(ParseFault::NotAValue { index: 0 }),
        }
    }

    fn as_location(&self, value: &Value) -> Result<u64, ParseFault> {
        let number = value.as_number()?;
        u64::try_from(&number).map_err(|_| ParseFault::InvalidSize {
            value: number.to_string(),
        })
    }
}
