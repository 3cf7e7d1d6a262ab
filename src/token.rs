//! Grammar Tokens
//!
//! A grammar is a tree of combinator nodes. Each node describes how to
//! consume part of the input and what structural result to produce; the
//! engine in [`engine`](crate::engine) interprets the tree against a parse
//! state. Trees are composed programmatically (see [`dsl`](crate::dsl))
//! and shared behind `Arc` — the same node value can appear in many trees
//! and in many parse-graph tags.
//!
//! Equality and hashing are structural. Cycle detection depends on this:
//! two independently constructed but identical sub-trees must be
//! recognized as "the same parse". Self- and forward-reference therefore
//! never use pointers into the tree; they go through [`Token::TokenRef`],
//! resolved against the read-only rule registry a [`Grammar`]
//! (crate::dsl::Grammar) carries.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::expr::Expr;

/// A grammar combinator node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Token {
    /// Match a single field of a computed size at the current offset.
    Def {
        /// Short name the matched value is bound to.
        name: String,
        /// Size in bytes; evaluated against the state at match time.
        size: Arc<Expr>,
        /// Optional side constraint, evaluated with the matched value
        /// already visible as the current value.
        predicate: Option<Arc<Expr>>,
    },

    /// Match child tokens left to right; any child failure fails the whole
    /// sequence.
    Seq {
        /// The children, in match order.
        tokens: Vec<Arc<Token>>,
    },

    /// Try alternatives left to right against the same input state; the
    /// first success wins.
    Cho {
        /// The alternatives, in preference order.
        tokens: Vec<Arc<Token>>,
    },

    /// Match the body as often as it succeeds; zero matches is a success.
    Rep {
        /// The repeated body.
        token: Arc<Token>,
    },

    /// Match the body exactly `count` times; fewer is a failure of the
    /// whole node.
    RepN {
        /// The repeated body.
        token: Arc<Token>,
        /// Iteration count, evaluated once at the start.
        count: Arc<Expr>,
    },

    /// Guard the body with a predicate evaluated beforehand; a false guard
    /// skips the body as a vacuous success.
    Pre {
        /// The guarded body.
        token: Arc<Token>,
        /// The pre-condition.
        predicate: Arc<Expr>,
    },

    /// Run the body, then require a predicate over its result; a false
    /// guard turns the success into a failure.
    Post {
        /// The guarded body.
        token: Arc<Token>,
        /// The post-condition.
        predicate: Arc<Expr>,
    },

    /// Parse the body at a computed offset over the same source, without
    /// consuming the outer stream.
    Sub {
        /// The substructure grammar.
        token: Arc<Token>,
        /// Address expression; every evaluated result is parsed in order.
        address: Arc<Expr>,
    },

    /// Reparent parsing onto a source built from evaluated data, restoring
    /// the outer source and offset on completion.
    Tie {
        /// The grammar to run over the derived source.
        token: Arc<Token>,
        /// Data expression providing the derived bytes.
        data: Arc<Expr>,
    },

    /// Match the body if possible; its failure is still a success.
    Opt {
        /// The optional body.
        token: Arc<Token>,
    },

    /// Limit name-resolution visibility of everything parsed inside.
    Scope {
        /// The delimited body.
        token: Arc<Token>,
    },

    /// Reference a rule by name, resolved against the grammar's registry.
    ///
    /// This is how a grammar refers to itself or to a rule defined later;
    /// a mutable global registry never exists.
    TokenRef {
        /// Name of the referenced rule.
        rule: String,
    },
}

impl Token {
    /// Short label for diagnostics and fault messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Token::Def { .. } => "def",
            Token::Seq { .. } => "seq",
            Token::Cho { .. } => "cho",
            Token::Rep { .. } => "rep",
            Token::RepN { .. } => "repn",
            Token::Pre { .. } => "pre",
            Token::Post { .. } => "post",
            Token::Sub { .. } => "sub",
            Token::Tie { .. } => "tie",
            Token::Opt { .. } => "opt",
            Token::Scope { .. } => "scope",
            Token::TokenRef { .. } => "ref",
        }
    }

    /// Whether structures parsed under this token stay within one
    /// contiguous region of the enclosing parse.
    ///
    /// `Sub` jumps elsewhere in the source, so offset-ordered leaf
    /// searches must not descend through it.
    pub fn is_local(&self) -> bool {
        !matches!(self, Token::Sub { .. })
    }

    /// Whether opening a scope for this token bounds name-resolution
    /// visibility (bumps the scope depth).
    pub fn is_scope_delimiter(&self) -> bool {
        matches!(self, Token::Scope { .. })
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Def { name, .. } => write!(f, "def({:?})", name),
            Token::TokenRef { rule } => write!(f, "ref({:?})", rule),
            other => f.write_str(other.kind()),
        }
    }
}
