//! Values, Encodings and Leaf Results
//!
//! A [`Value`] is a slice plus the [`Encoding`] it was captured under; its
//! numeric interpretation is an arbitrary-precision [`BigInt`], so parsed
//! fields are never silently truncated to a machine word. A [`ParseValue`]
//! is the named leaf result a successful field match produces: created
//! exactly once, never mutated, and referenced — never copied — by every
//! graph that contains it. A [`ParseReference`] is the back-pointer the
//! engine records instead of re-parsing a structure it has already derived
//! at the same location.

use std::sync::Arc;

use num_bigint::{BigInt, Sign as BigSign};
use serde::{Deserialize, Serialize};

use crate::error::ParseFault;
use crate::source::{Slice, Source};
use crate::token::Token;

/// Byte order used when interpreting a value numerically.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ByteOrder {
    /// Most significant byte first.
    #[default]
    BigEndian,
    /// Least significant byte first.
    LittleEndian,
}

/// Signedness used when interpreting a value numerically.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Signedness {
    /// Bytes denote a non-negative magnitude.
    #[default]
    Unsigned,
    /// Bytes denote a two's complement signed number.
    Signed,
}

/// Numeric interpretation conventions for parsed bytes.
///
/// One encoding is supplied per parse run; the charset and per-field
/// convention machinery of a full format library is a collaborator outside
/// this engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Encoding {
    /// Byte order for numeric interpretation.
    pub byte_order: ByteOrder,
    /// Signedness for numeric interpretation.
    pub sign: Signedness,
}

impl Encoding {
    /// Big-endian unsigned, the default convention.
    #[inline]
    pub fn new() -> Self {
        Encoding::default()
    }

    /// This encoding with little-endian byte order.
    #[inline]
    pub fn little_endian(mut self) -> Self {
        self.byte_order = ByteOrder::LittleEndian;
        self
    }

    /// This encoding with signed interpretation.
    #[inline]
    pub fn signed(mut self) -> Self {
        self.sign = Signedness::Signed;
        self
    }

    /// Interpret `bytes` as a number under this encoding.
    ///
    /// An empty byte run interprets as zero.
    pub fn interpret(&self, bytes: &[u8]) -> BigInt {
        match (self.sign, self.byte_order) {
            (Signedness::Unsigned, ByteOrder::BigEndian) => {
                BigInt::from_bytes_be(BigSign::Plus, bytes)
            }
            (Signedness::Unsigned, ByteOrder::LittleEndian) => {
                BigInt::from_bytes_le(BigSign::Plus, bytes)
            }
            (Signedness::Signed, ByteOrder::BigEndian) => BigInt::from_signed_bytes_be(bytes),
            (Signedness::Signed, ByteOrder::LittleEndian) => BigInt::from_signed_bytes_le(bytes),
        }
    }

    /// Render `number` as bytes under this encoding.
    ///
    /// A signed encoding renders minimal two's complement, padding a
    /// leading zero byte where the bare magnitude would read back
    /// negative. An unsigned encoding renders minimal magnitude bytes;
    /// a negative number still renders as two's complement, which only a
    /// signed encoding reads back.
    pub fn render(&self, number: &BigInt) -> Vec<u8> {
        let twos_complement =
            self.sign == Signedness::Signed || number.sign() == BigSign::Minus;
        let mut bytes = match (twos_complement, self.byte_order) {
            (true, ByteOrder::BigEndian) => number.to_signed_bytes_be(),
            (true, ByteOrder::LittleEndian) => number.to_signed_bytes_le(),
            (false, ByteOrder::BigEndian) => number.magnitude().to_bytes_be(),
            (false, ByteOrder::LittleEndian) => number.magnitude().to_bytes_le(),
        };
        if bytes.is_empty() {
            bytes.push(0);
        }
        bytes
    }
}

/// A slice of bytes together with the encoding it is interpreted under.
///
/// Values are immutable and cheap to clone; the bytes stay in the source
/// until read.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Value {
    slice: Slice,
    encoding: Encoding,
}

impl Value {
    /// A value over an existing slice.
    #[inline]
    pub fn new(slice: Slice, encoding: Encoding) -> Self {
        Value { slice, encoding }
    }

    /// A value holding the rendering of `number` in a fresh buffer source.
    ///
    /// Used for computed results of expression evaluation. The value
    /// carries a signed interpretation whatever the run's convention for
    /// parsed fields is, so it reads back as exactly `number` — negative
    /// computed sizes and offsets included, which must stay negative to
    /// be rejected downstream.
    pub fn from_number(number: &BigInt, encoding: Encoding) -> Self {
        let encoding = encoding.signed();
        let bytes = encoding.render(number);
        let length = bytes.len() as u64;
        let source = Source::buffer(bytes);
        // A fresh buffer always covers its own bytes.
        let slice = Slice::new(source, 0, length)
            .unwrap_or_else(|| unreachable!("buffer source covers its own length"));
        Value { slice, encoding }
    }

    /// A value holding literal `bytes` in a fresh buffer source.
    pub fn from_bytes(bytes: Vec<u8>, encoding: Encoding) -> Self {
        let length = bytes.len() as u64;
        let source = Source::buffer(bytes);
        let slice = Slice::new(source, 0, length)
            .unwrap_or_else(|| unreachable!("buffer source covers its own length"));
        Value { slice, encoding }
    }

    /// A boolean rendered as a single byte, 1 for true and 0 for false.
    pub fn from_bool(truth: bool, encoding: Encoding) -> Self {
        Value::from_bytes(vec![u8::from(truth)], encoding)
    }

    /// The underlying slice.
    #[inline]
    pub fn slice(&self) -> &Slice {
        &self.slice
    }

    /// The encoding this value is interpreted under.
    #[inline]
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Read the value's bytes.
    pub fn read(&self) -> Result<Vec<u8>, ParseFault> {
        self.slice.read()
    }

    /// The numeric interpretation of the value's bytes.
    pub fn as_number(&self) -> Result<BigInt, ParseFault> {
        Ok(self.encoding.interpret(&self.read()?))
    }

    /// Whether the value is numerically non-zero.
    pub fn as_bool(&self) -> Result<bool, ParseFault> {
        Ok(self.as_number()? != BigInt::from(0))
    }
}

/// A named, typed leaf result produced by a successful field match.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParseValue {
    name: String,
    token: Arc<Token>,
    value: Value,
}

impl ParseValue {
    /// Record a matched field.
    pub fn new(name: impl Into<String>, token: Arc<Token>, slice: Slice, encoding: Encoding) -> Self {
        ParseValue {
            name: name.into(),
            token,
            value: Value::new(slice, encoding),
        }
    }

    /// The field's short name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The combinator that matched this field.
    #[inline]
    pub fn token(&self) -> &Arc<Token> {
        &self.token
    }

    /// The matched bytes as a value.
    #[inline]
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// The matched region.
    #[inline]
    pub fn slice(&self) -> &Slice {
        self.value.slice()
    }

    /// The numeric interpretation of the matched bytes.
    pub fn as_number(&self) -> Result<BigInt, ParseFault> {
        self.value.as_number()
    }
}

/// A back-pointer recorded instead of re-deriving a structure already
/// parsed at exactly this `(location, source, token)` triple.
///
/// A reference is dereferenced on demand, never eagerly; resolution walks
/// the closed sub-graphs for its token and returns the one whose
/// lowest-offset leaf matches the location.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParseReference {
    location: u64,
    source: Arc<Source>,
    token: Arc<Token>,
}

impl ParseReference {
    /// Record a back-pointer to `location` within `source` for `token`.
    pub fn new(location: u64, source: Arc<Source>, token: Arc<Token>) -> Self {
        ParseReference {
            location,
            source,
            token,
        }
    }

    /// The byte offset the reference points at.
    #[inline]
    pub fn location(&self) -> u64 {
        self.location
    }

    /// The source the reference points into.
    #[inline]
    pub fn source(&self) -> &Arc<Source> {
        &self.source
    }

    /// The token identity of the referenced structure.
    #[inline]
    pub fn token(&self) -> &Arc<Token> {
        &self.token
    }
}
