//! Prelude module for convenient imports
//!
//! Re-exports the types and constructor functions needed for the common
//! path: describing a format, parsing bytes against it, and walking the
//! result. Importing this module with a wildcard brings them into scope:
//!
//! ```
//! use byteform::prelude::*;
//! ```
//!
//! # Re-exported Items
//!
//! ## Core Types
//! - [`Grammar`] / [`GrammarBuilder`] - named-rule registry and its builder
//! - [`Parser`] - the grammar interpreter
//! - [`ParseState`] - immutable snapshot of a parse
//! - [`ParseGraph`] / [`ParseItem`] - the persistent result structure
//! - [`ParseFault`] - the fatal error tier
//! - [`Source`] / [`Slice`] - byte access
//! - [`Encoding`] - byte order and signedness for value interpretation
//!
//! ## Grammar DSL
//! Every token constructor ([`def`], [`seq`], [`cho`], [`rep`], [`sub`],
//! [`tie`], ...) and expression constructor ([`con`], [`ref_`], [`last`],
//! [`add`], [`eq`], ...) from [`dsl`](crate::dsl).

// ============================================================================
// Core Types
// ============================================================================

pub use crate::engine::Parser;
pub use crate::error::ParseFault;
pub use crate::graph::{ParseGraph, ParseItem};
pub use crate::source::{ByteStream, Slice, Source};
pub use crate::state::ParseState;
pub use crate::token::Token;
pub use crate::value::{ByteOrder, Encoding, ParseReference, ParseValue, Signedness, Value};

// ============================================================================
// Grammar DSL
// ============================================================================

pub use crate::dsl::{
    add, and, cat, cho, con, count, cur_iteration, cur_offset, current, def, defp, div, elvis, eq,
    eq_bytes, eq_num, first, gt_num, last, lit, lt_num, mod_, mul, neg, not, nth, offset, opt,
    or, post, pre, ref_, ref_token, ref_within, rep, repn, scope, seq, sub, sub_num, tie, Grammar,
    GrammarBuilder,
};
