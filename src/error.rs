//! Fatal Parse Faults
//!
//! Failure in this engine is two-tiered. Ordinary grammar mismatches — a
//! predicate that does not hold, too few bytes for a declared length, an
//! unmet repetition bound — are represented as an *absence* (`Ok(None)`
//! from the engine) and handled by the surrounding combinators through
//! backtracking. They never appear here.
//!
//! This module covers the second tier: violated structural invariants and
//! broken expression contracts. These indicate a grammar-authoring or
//! configuration bug, abort the whole parse immediately, and are never
//! coerced into "try another alternative".

use std::fmt;

/// A fatal, non-recoverable condition identified by its offending values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseFault {
    /// A scope was closed with a token that does not match the open scope
    MismatchedScopeClose {
        /// Name of the token that opened the innermost scope
        expected: String,
        /// Name of the token the close was attempted with
        found: String,
    },

    /// A scope close was attempted while no scope was open
    CloseWithoutOpenScope,

    /// A scope was closed while nested scope depth had not returned to zero
    UnbalancedScope {
        /// Remaining scope depth at the attempted close
        depth: u64,
    },

    /// A read past a source's declared availability
    ReadOutOfBounds {
        /// Requested start offset
        offset: u64,
        /// Requested length
        length: u64,
    },

    /// The underlying byte medium failed while reading an available region
    IoFailure {
        /// Offset of the failed read
        offset: u64,
        /// Description from the medium
        message: String,
    },

    /// An expression required to be single-valued yielded zero or many results
    ArityViolation {
        /// Number of results the caller required
        expected: usize,
        /// Number of results actually produced
        actual: usize,
    },

    /// An expression result required to be defined was the not-a-value sentinel
    NotAValue {
        /// Index of the offending result in the evaluated list
        index: usize,
    },

    /// A size or offset expression produced a value outside the addressable range
    InvalidSize {
        /// Decimal rendering of the offending value
        value: String,
    },

    /// A token reference named a rule absent from the grammar registry
    UnknownRule {
        /// The unresolved rule name
        name: String,
    },

    /// A derived source's expression can never produce its requested result
    DerivedSourceUnavailable {
        /// Requested result index
        index: usize,
        /// Number of results the expression produced
        produced: usize,
    },
}

impl fmt::Display for ParseFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseFault::MismatchedScopeClose { expected, found } => {
                write!(
                    f,
                    "Mismatched scope close: open scope is {}, close attempted with {}",
                    expected, found
                )
            }
            ParseFault::CloseWithoutOpenScope => {
                write!(f, "Scope close attempted while no scope is open")
            }
            ParseFault::UnbalancedScope { depth } => {
                write!(
                    f,
                    "Scope closed with nested depth {} still outstanding",
                    depth
                )
            }
            ParseFault::ReadOutOfBounds { offset, length } => {
                write!(
                    f,
                    "Read of {} bytes at offset {} exceeds source availability",
                    length, offset
                )
            }
            ParseFault::IoFailure { offset, message } => {
                write!(f, "Byte source failed at offset {}: {}", offset, message)
            }
            ParseFault::ArityViolation { expected, actual } => {
                write!(
                    f,
                    "Expression arity violation: required {} result(s), got {}",
                    expected, actual
                )
            }
            ParseFault::NotAValue { index } => {
                write!(
                    f,
                    "Expression result at index {} is not a value",
                    index
                )
            }
            ParseFault::InvalidSize { value } => {
                write!(f, "Size or offset {} is outside the addressable range", value)
            }
            ParseFault::UnknownRule { name } => {
                write!(f, "Unknown rule {:?} referenced from grammar", name)
            }
            ParseFault::DerivedSourceUnavailable { index, produced } => {
                write!(
                    f,
                    "Derived source requires result index {} but expression produced {} result(s)",
                    index, produced
                )
            }
        }
    }
}

impl std::error::Error for ParseFault {}
