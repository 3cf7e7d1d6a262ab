//! Grammar DSL
//!
//! Free constructor functions for building token trees and expressions
//! without spelling out the enum variants, plus the [`Grammar`] registry
//! that gives rules names and makes self- and forward-reference possible
//! through [`ref_token`].
//!
//! A small format description reads close to its documentation:
//!
//! ```
//! use byteform::dsl::*;
//!
//! let grammar = GrammarBuilder::new()
//!     .rule("record", seq([
//!         defp("tag", con(1), eq(con(0x4D))),
//!         def("length", con(1)),
//!         def("payload", last(ref_("length"))),
//!     ]))
//!     .build();
//!
//! let parsed = grammar.parse_bytes(&[0x4D, 0x02, 0xAB, 0xCD]).unwrap();
//! assert!(parsed.is_some());
//! ```
//!
//! Grammars serialize to JSON and back, so a format description can live
//! next to the data it describes.

use std::sync::Arc;

use ahash::RandomState;
use hashbrown::HashMap;
use num_bigint::BigInt;
use serde::{Deserialize, Serialize};

use crate::engine::Parser;
use crate::error::ParseFault;
use crate::expr::Expr;
use crate::source::Source;
use crate::state::ParseState;
use crate::token::Token;
use crate::value::Encoding;

/// A named-rule registry with a designated root rule.
///
/// The registry is immutable once built; rule references resolve against
/// it during parsing, never against mutable global state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grammar {
    rules: HashMap<String, Arc<Token>, RandomState>,
    root: String,
}

impl Grammar {
    /// The rule registered under `name`.
    pub fn rule(&self, name: &str) -> Option<&Arc<Token>> {
        self.rules.get(name)
    }

    /// Number of registered rules.
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Name of the root rule.
    pub fn root_name(&self) -> &str {
        &self.root
    }

    /// A reference token for the root rule.
    ///
    /// A missing root surfaces as an unknown-rule fault when the
    /// reference is resolved, like any other dangling reference.
    pub fn root_ref(&self) -> Arc<Token> {
        Arc::new(Token::TokenRef {
            rule: self.root.clone(),
        })
    }

    /// Parse `source` from `offset`, rendering computed values under
    /// `encoding`.
    pub fn parse(
        &self,
        source: Arc<Source>,
        offset: u64,
        encoding: Encoding,
    ) -> Result<Option<ParseState>, ParseFault> {
        Parser::new(self, encoding).parse(source, offset)
    }

    /// Parse an in-memory buffer from its start with the default
    /// big-endian unsigned encoding.
    pub fn parse_bytes(&self, bytes: &[u8]) -> Result<Option<ParseState>, ParseFault> {
        self.parse(Source::buffer(bytes.to_vec()), 0, Encoding::new())
    }

    /// Serialize the grammar to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize a grammar from JSON.
    pub fn from_json(json: &str) -> Result<Grammar, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Builder collecting named rules into a [`Grammar`].
///
/// The first registered rule becomes the root unless
/// [`root`](GrammarBuilder::root) overrides it.
#[derive(Debug, Default)]
pub struct GrammarBuilder {
    rules: HashMap<String, Arc<Token>, RandomState>,
    root: Option<String>,
}

impl GrammarBuilder {
    /// An empty builder.
    pub fn new() -> Self {
        GrammarBuilder::default()
    }

    /// Register `token` under `name`.
    pub fn rule(mut self, name: impl Into<String>, token: Token) -> Self {
        let name = name.into();
        if self.root.is_none() {
            self.root = Some(name.clone());
        }
        self.rules.insert(name, Arc::new(token));
        self
    }

    /// Designate the root rule explicitly.
    pub fn root(mut self, name: impl Into<String>) -> Self {
        self.root = Some(name.into());
        self
    }

    /// Finish the grammar.
    ///
    /// # Panics
    ///
    /// Panics when no rule was registered; a grammar without rules cannot
    /// parse anything.
    pub fn build(self) -> Grammar {
        let root = self
            .root
            .unwrap_or_else(|| panic!("GrammarBuilder::build called with no rules"));
        Grammar {
            rules: self.rules,
            root,
        }
    }
}

// ---------------------------------------------------------------------------
// Token constructors
// ---------------------------------------------------------------------------

/// A field of a computed size.
pub fn def(name: impl Into<String>, size: Expr) -> Token {
    Token::Def {
        name: name.into(),
        size: Arc::new(size),
        predicate: None,
    }
}

/// A field of a computed size with a side condition on the matched value.
pub fn defp(name: impl Into<String>, size: Expr, predicate: Expr) -> Token {
    Token::Def {
        name: name.into(),
        size: Arc::new(size),
        predicate: Some(Arc::new(predicate)),
    }
}

/// Children matched left to right.
pub fn seq(tokens: impl IntoIterator<Item = Token>) -> Token {
    Token::Seq {
        tokens: tokens.into_iter().map(Arc::new).collect(),
    }
}

/// Alternatives tried left to right.
pub fn cho(tokens: impl IntoIterator<Item = Token>) -> Token {
    Token::Cho {
        tokens: tokens.into_iter().map(Arc::new).collect(),
    }
}

/// The body repeated as often as it matches.
pub fn rep(token: Token) -> Token {
    Token::Rep {
        token: Arc::new(token),
    }
}

/// The body repeated an exact computed number of times.
pub fn repn(token: Token, count: Expr) -> Token {
    Token::RepN {
        token: Arc::new(token),
        count: Arc::new(count),
    }
}

/// The body guarded by a pre-condition; a false guard skips it.
pub fn pre(token: Token, predicate: Expr) -> Token {
    Token::Pre {
        token: Arc::new(token),
        predicate: Arc::new(predicate),
    }
}

/// The body followed by a post-condition on its result.
pub fn post(token: Token, predicate: Expr) -> Token {
    Token::Post {
        token: Arc::new(token),
        predicate: Arc::new(predicate),
    }
}

/// The body parsed at each computed address, without consuming the outer
/// stream.
pub fn sub(token: Token, address: Expr) -> Token {
    Token::Sub {
        token: Arc::new(token),
        address: Arc::new(address),
    }
}

/// The body parsed over a source derived from computed data.
pub fn tie(token: Token, data: Expr) -> Token {
    Token::Tie {
        token: Arc::new(token),
        data: Arc::new(data),
    }
}

/// The body matched if possible; its failure is still a success.
pub fn opt(token: Token) -> Token {
    Token::Opt {
        token: Arc::new(token),
    }
}

/// A name-visibility boundary around the body.
pub fn scope(token: Token) -> Token {
    Token::Scope {
        token: Arc::new(token),
    }
}

/// A reference to a rule registered in the grammar.
pub fn ref_token(rule: impl Into<String>) -> Token {
    Token::TokenRef { rule: rule.into() }
}

// ---------------------------------------------------------------------------
// Expression constructors
// ---------------------------------------------------------------------------

/// A constant number.
pub fn con(number: impl Into<BigInt>) -> Expr {
    Expr::Const(number.into())
}

/// Literal bytes.
pub fn lit(bytes: impl Into<Vec<u8>>) -> Expr {
    Expr::Bytes(bytes.into())
}

/// The most recently parsed value.
pub fn current() -> Expr {
    Expr::Current
}

/// The current parse offset.
pub fn cur_offset() -> Expr {
    Expr::CurrentOffset
}

/// The innermost repetition's iteration count.
pub fn cur_iteration() -> Expr {
    Expr::CurrentIteration
}

/// Every value bound to `name`, oldest first.
pub fn ref_(name: impl Into<String>) -> Expr {
    Expr::NameRef {
        name: name.into(),
        scope: None,
    }
}

/// Values bound to `name` at most `levels` visibility levels up.
pub fn ref_within(name: impl Into<String>, levels: u64) -> Expr {
    Expr::NameRef {
        name: name.into(),
        scope: Some(levels),
    }
}

/// The oldest result of `operand`.
pub fn first(operand: Expr) -> Expr {
    Expr::First(Arc::new(operand))
}

/// The most recent result of `operand`.
pub fn last(operand: Expr) -> Expr {
    Expr::Last(Arc::new(operand))
}

/// Element picks from `list` at each result of `index`.
pub fn nth(list: Expr, index: Expr) -> Expr {
    Expr::Nth {
        list: Arc::new(list),
        index: Arc::new(index),
    }
}

/// The source offset of each result of `operand`.
pub fn offset(operand: Expr) -> Expr {
    Expr::Offset(Arc::new(operand))
}

/// The number of results of `operand`.
pub fn count(operand: Expr) -> Expr {
    Expr::Count(Arc::new(operand))
}

/// Numeric addition.
pub fn add(left: Expr, right: Expr) -> Expr {
    Expr::Add(Arc::new(left), Arc::new(right))
}

/// Numeric subtraction.
pub fn sub_num(left: Expr, right: Expr) -> Expr {
    Expr::SubNum(Arc::new(left), Arc::new(right))
}

/// Numeric multiplication.
pub fn mul(left: Expr, right: Expr) -> Expr {
    Expr::Mul(Arc::new(left), Arc::new(right))
}

/// Numeric division; division by zero yields the sentinel.
pub fn div(left: Expr, right: Expr) -> Expr {
    Expr::Div(Arc::new(left), Arc::new(right))
}

/// Numeric remainder; a zero divisor yields the sentinel.
pub fn mod_(left: Expr, right: Expr) -> Expr {
    Expr::Mod(Arc::new(left), Arc::new(right))
}

/// Numeric negation.
pub fn neg(operand: Expr) -> Expr {
    Expr::Neg(Arc::new(operand))
}

/// Side condition comparing the current value numerically to `expected`.
pub fn eq(expected: Expr) -> Expr {
    eq_num(current(), expected)
}

/// Numeric equality.
pub fn eq_num(left: Expr, right: Expr) -> Expr {
    Expr::EqNum(Arc::new(left), Arc::new(right))
}

/// Numeric strictly-greater-than.
pub fn gt_num(left: Expr, right: Expr) -> Expr {
    Expr::GtNum(Arc::new(left), Arc::new(right))
}

/// Numeric strictly-less-than.
pub fn lt_num(left: Expr, right: Expr) -> Expr {
    Expr::LtNum(Arc::new(left), Arc::new(right))
}

/// Byte-wise equality.
pub fn eq_bytes(left: Expr, right: Expr) -> Expr {
    Expr::Eq(Arc::new(left), Arc::new(right))
}

/// Boolean conjunction.
pub fn and(left: Expr, right: Expr) -> Expr {
    Expr::And(Arc::new(left), Arc::new(right))
}

/// Boolean disjunction.
pub fn or(left: Expr, right: Expr) -> Expr {
    Expr::Or(Arc::new(left), Arc::new(right))
}

/// Boolean negation.
pub fn not(operand: Expr) -> Expr {
    Expr::Not(Arc::new(operand))
}

/// Byte-wise concatenation.
pub fn cat(left: Expr, right: Expr) -> Expr {
    Expr::Cat(Arc::new(left), Arc::new(right))
}

/// The left operand, falling back to the right when it produces nothing.
pub fn elvis(left: Expr, right: Expr) -> Expr {
    Expr::Elvis(Arc::new(left), Arc::new(right))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_rule_is_the_default_root() {
        let grammar = GrammarBuilder::new()
            .rule("head", def("head", con(1)))
            .rule("tail", def("tail", con(1)))
            .build();
        assert_eq!(grammar.root_name(), "head");
        assert_eq!(grammar.rule_count(), 2);
    }

    #[test]
    fn test_explicit_root_overrides_the_default() {
        let grammar = GrammarBuilder::new()
            .rule("helper", def("helper", con(1)))
            .rule("entry", def("entry", con(1)))
            .root("entry")
            .build();
        assert_eq!(grammar.root_name(), "entry");
    }

    #[test]
    #[should_panic(expected = "no rules")]
    fn test_build_without_rules_panics() {
        let _ = GrammarBuilder::new().build();
    }

    #[test]
    fn test_grammar_json_round_trip() {
        let grammar = GrammarBuilder::new()
            .rule(
                "record",
                seq([
                    defp("tag", con(1), eq(con(0x4D))),
                    def("length", con(1)),
                    def("payload", last(ref_("length"))),
                ]),
            )
            .build();
        let json = grammar.to_json().unwrap();
        let back = Grammar::from_json(&json).unwrap();
        assert_eq!(grammar, back);
        assert!(back.parse_bytes(&[0x4D, 0x01, 0xFF]).unwrap().is_some());
    }

    #[test]
    fn test_length_prefixed_payload_parses() {
        let grammar = GrammarBuilder::new()
            .rule(
                "record",
                seq([def("length", con(1)), def("payload", last(ref_("length")))]),
            )
            .build();
        let parsed = grammar.parse_bytes(&[3, 10, 11, 12]).unwrap().unwrap();
        assert_eq!(parsed.offset(), 4);
        let payload = &parsed.lookup("payload", None)[0];
        assert_eq!(payload.value().read().unwrap(), vec![10, 11, 12]);
    }
}
