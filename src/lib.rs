//! Byteform - Declarative Binary Format Parsing
//!
//! Byteform parses binary data against a declarative grammar of
//! combinators and produces a persistent, structurally-shared parse
//! graph. It is built for data that ordinary parsers give up on:
//!
//! - Field sizes, addresses and repeat counts computed from values parsed
//!   earlier
//! - Substructures at absolute offsets, linked lists, and *cyclic*
//!   structures, kept finite through back-references
//! - Sources that are partially available (streams) or assembled from
//!   fragments of other parses
//! - Free backtracking: failed alternatives are dropped states, never
//!   undone mutations
//! - Arbitrary recursion depth without stack overflow, through a
//!   trampolined recursion primitive
//!
//! ## Quick Start
//!
//! ```rust
//! use byteform::prelude::*;
//!
//! // A record: a magic byte, a length, and that many payload bytes.
//! let grammar = GrammarBuilder::new()
//!     .rule("record", seq([
//!         defp("magic", con(1), eq(con(0x42))),
//!         def("length", con(1)),
//!         def("payload", last(ref_("length"))),
//!     ]))
//!     .build();
//!
//! let parsed = grammar.parse_bytes(&[0x42, 0x03, 1, 2, 3]).unwrap().unwrap();
//! assert_eq!(parsed.offset(), 5);
//! assert_eq!(parsed.lookup("payload", None)[0].value().read().unwrap(), vec![1, 2, 3]);
//! ```
//!
//! ## Linked structures
//!
//! [`sub`](dsl::sub) parses a structure at a computed address over the
//! same source. When the addressed structure is already being parsed, or
//! already sits in the graph, a back-reference is recorded instead — a
//! self-referential structure parses in finite time and the cycle is
//! recoverable from the graph afterwards.
//!
//! ## Feature Flags
//!
//! - `logging` - Enable debug logging using the `log` crate

// Lint configuration for production quality
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![warn(clippy::all)]
#![allow(clippy::new_without_default)]

// Prelude module for convenient imports
pub mod prelude;

pub mod dsl;
pub mod engine;
pub mod error;
pub mod expr;
pub mod graph;
pub mod list;
pub mod source;
pub mod state;
pub mod token;
pub mod trampoline;
pub mod value;

/// Re-export commonly used types for convenience
pub use crate::{
    dsl::{Grammar, GrammarBuilder},
    engine::Parser,
    error::ParseFault,
    expr::Expr,
    graph::{ParseGraph, ParseItem},
    list::ImmutableList,
    source::{ByteStream, Slice, Source},
    state::ParseState,
    token::Token,
    trampoline::Trampoline,
    value::{ByteOrder, Encoding, ParseReference, ParseValue, Signedness, Value},
};
