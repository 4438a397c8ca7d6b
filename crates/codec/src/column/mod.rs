//! Per-column encoding strategies.
//!
//! A [`ColumnCodec`] binds a column's [`TypeCode`] to one of two encoding
//! regimes:
//!
//! - the *value* regime is length-prefixed and fast to skip: interior
//!   columns carry their own length, the last column in a group omits it;
//! - the *key* regime is order-preserving: `memcmp` over encoded bytes
//!   agrees with logical comparison, honoring the declared direction and
//!   null placement.
//!
//! Codecs are stateless; callers hold one per column of a row layout and
//! drive it with an offset into the encoded bytes.

use core::cmp::Ordering;

use rowstore_primitives::{PlainType, TypeCode};

use crate::error::CodecError;
use crate::value::Value;

mod array;
mod big;
mod primitive;
mod string;

pub use array::ArrayCodec;
pub use big::{BigDecimalCodec, BigIntCodec};
pub use primitive::PrimitiveCodec;
pub use string::Utf8Codec;

/// Where in a group the encoded column sits, and which family of encoding
/// applies.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Regime {
    /// Order-preserving lexicographic encoding (key columns).
    Key,
    /// Length-prefixed encoding with self-length (all but the last value
    /// column).
    ValueInterior,
    /// Length-prefixed encoding for the last column in a group, which runs
    /// to the end of the buffer instead of framing itself.
    ValueLast,
}

impl Regime {
    pub fn is_key(self) -> bool {
        matches!(self, Regime::Key)
    }
}

/// Reserved null-header sentinel bytes for the key regime.
pub const NULL_HIGH: u8 = 0xff;
pub const NOT_NULL_HIGH: u8 = 0xfe;
pub const NULL_LOW: u8 = 0x00;
pub const NOT_NULL_LOW: u8 = 0x01;

/// Picks the `(null, not_null)` header pair for a key column.
///
/// The low pair is chosen when exactly one of `descending` and `null_low`
/// is set; a descending complement over the payload then lands nulls on the
/// declared side without touching the header.
#[inline]
pub(crate) fn null_header(descending: bool, null_low: bool) -> (u8, u8) {
    if descending ^ null_low {
        (NULL_LOW, NOT_NULL_LOW)
    } else {
        (NULL_HIGH, NOT_NULL_HIGH)
    }
}

/// How a codec participates in quick filtering (comparing a filter argument
/// against a still-encoded column).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum QuickMode {
    /// Decode to a stack [`Value`] and compare typed (fixed-width
    /// primitives).
    Typed,
    /// Locate the encoded span and `memcmp` it against the pre-encoded
    /// argument. `reversed` flips the result for descending key columns.
    Memcmp { reversed: bool },
    /// The encoded form only supports equality comparison (value-regime
    /// arrays, whose little-endian elements do not memcmp in order).
    MemcmpEqOnly,
    /// No quick form; decode the column fully before comparing.
    Decode,
}

/// A located, still-encoded column: either a decoded primitive or the byte
/// span of a variable-length value.
#[derive(Debug, PartialEq)]
pub enum QuickCol<'a> {
    Null,
    Value(Value),
    Bytes(&'a [u8]),
}

/// A column encoder/decoder bound to a type code and regime.
#[derive(Clone, Debug, PartialEq)]
pub enum ColumnCodec {
    Primitive(PrimitiveCodec),
    Utf8(Utf8Codec),
    BigInt(BigIntCodec),
    BigDecimal(BigDecimalCodec),
    Array(ArrayCodec),
}

impl ColumnCodec {
    /// Builds the codec for `code` under `regime`.
    ///
    /// Join columns have no codec of their own (they are resolved
    /// recursively by the schema layer), and arrays require a fixed-width
    /// primitive element type.
    pub fn new(code: TypeCode, regime: Regime) -> Result<ColumnCodec, CodecError> {
        // Value-regime encodings ignore direction.
        let descending = regime.is_key() && code.is_descending();
        let nullable = code.is_nullable();
        let null_low = code.is_null_low();
        let plain = code.plain();

        if code.is_array() {
            if !plain.is_primitive() {
                return Err(CodecError::UnsupportedType { code });
            }
            return Ok(ColumnCodec::Array(ArrayCodec::new(
                plain, nullable, descending, null_low, regime,
            )));
        }
        Ok(match plain {
            PlainType::Join => return Err(CodecError::UnsupportedType { code }),
            PlainType::Utf8 => {
                ColumnCodec::Utf8(Utf8Codec::new(nullable, descending, null_low, regime))
            }
            PlainType::BigInt => {
                ColumnCodec::BigInt(BigIntCodec::new(nullable, descending, null_low, regime))
            }
            PlainType::BigDecimal => ColumnCodec::BigDecimal(BigDecimalCodec::new(
                nullable, descending, null_low, regime,
            )),
            _ => ColumnCodec::Primitive(PrimitiveCodec::new(
                plain, nullable, descending, null_low, regime,
            )),
        })
    }

    /// Bytes always present in the encoding, independent of the value.
    pub fn min_size(&self) -> usize {
        match self {
            ColumnCodec::Primitive(c) => c.min_size(),
            ColumnCodec::Utf8(c) => c.min_size(),
            ColumnCodec::BigInt(c) => c.min_size(),
            ColumnCodec::BigDecimal(c) => c.min_size(),
            ColumnCodec::Array(c) => c.min_size(),
        }
    }

    /// Bytes `encode` will emit for `v` beyond `min_size`.
    pub fn encode_size(&self, v: &Value) -> Result<usize, CodecError> {
        match self {
            ColumnCodec::Primitive(c) => c.encode_size(v),
            ColumnCodec::Utf8(c) => c.encode_size(v),
            ColumnCodec::BigInt(c) => c.encode_size(v),
            ColumnCodec::BigDecimal(c) => c.encode_size(v),
            ColumnCodec::Array(c) => c.encode_size(v),
        }
    }

    pub fn encode(&self, v: &Value, dst: &mut Vec<u8>) -> Result<(), CodecError> {
        match self {
            ColumnCodec::Primitive(c) => c.encode(v, dst),
            ColumnCodec::Utf8(c) => c.encode(v, dst),
            ColumnCodec::BigInt(c) => c.encode(v, dst),
            ColumnCodec::BigDecimal(c) => c.encode(v, dst),
            ColumnCodec::Array(c) => c.encode(v, dst),
        }
    }

    pub fn decode(&self, src: &[u8], offset: &mut usize) -> Result<Value, CodecError> {
        match self {
            ColumnCodec::Primitive(c) => c.decode(src, offset),
            ColumnCodec::Utf8(c) => c.decode(src, offset),
            ColumnCodec::BigInt(c) => c.decode(src, offset),
            ColumnCodec::BigDecimal(c) => c.decode(src, offset),
            ColumnCodec::Array(c) => c.decode(src, offset),
        }
    }

    /// Advances `*offset` past the encoded column without materialising it.
    pub fn skip(&self, src: &[u8], offset: &mut usize) -> Result<(), CodecError> {
        match self {
            ColumnCodec::Primitive(c) => c.skip(src, offset),
            ColumnCodec::Utf8(c) => c.skip(src, offset),
            ColumnCodec::BigInt(c) => c.skip(src, offset),
            ColumnCodec::BigDecimal(c) => c.skip(src, offset),
            ColumnCodec::Array(c) => c.skip(src, offset),
        }
    }

    pub fn quick_mode(&self) -> QuickMode {
        match self {
            ColumnCodec::Primitive(_) => QuickMode::Typed,
            ColumnCodec::Utf8(c) => QuickMode::Memcmp {
                reversed: c.descending(),
            },
            ColumnCodec::BigInt(c) => c.quick_mode(),
            ColumnCodec::BigDecimal(c) => c.quick_mode(),
            ColumnCodec::Array(c) => c.quick_mode(),
        }
    }

    /// Locates the column at `*offset` for quick comparison, advancing past
    /// it. Only valid when [`quick_mode`](Self::quick_mode) is not
    /// [`QuickMode::Decode`].
    pub fn quick_decode<'a>(
        &self,
        src: &'a [u8],
        offset: &mut usize,
    ) -> Result<QuickCol<'a>, CodecError> {
        match self {
            ColumnCodec::Primitive(c) => c.decode(src, offset).map(|v| match v {
                Value::Null => QuickCol::Null,
                v => QuickCol::Value(v),
            }),
            ColumnCodec::Utf8(c) => c.quick_decode(src, offset),
            ColumnCodec::BigInt(c) => c.quick_decode(src, offset),
            ColumnCodec::BigDecimal(c) => c.quick_decode(src, offset),
            ColumnCodec::Array(c) => c.quick_decode(src, offset),
        }
    }

    /// Encodes a non-null filter argument into the byte form `memcmp`-style
    /// quick comparison expects: the same encoding as the column, without
    /// any null header.
    pub fn encode_for_compare(&self, v: &Value) -> Result<Vec<u8>, CodecError> {
        let mut buf = Vec::new();
        match self {
            ColumnCodec::Primitive(_) => {
                return Err(CodecError::Invalid {
                    offset: 0,
                    reason: "primitive columns compare typed, not by bytes",
                })
            }
            ColumnCodec::Utf8(c) => c.encode_payload(v, &mut buf)?,
            ColumnCodec::BigInt(c) => c.encode_payload(v, &mut buf)?,
            ColumnCodec::BigDecimal(c) => c.encode_payload(v, &mut buf)?,
            ColumnCodec::Array(c) => c.encode_payload(v, &mut buf)?,
        }
        Ok(buf)
    }

    /// Compares a located column against a pre-encoded argument under the
    /// codec's quick mode. Null compares per the column's null placement.
    pub fn quick_compare(
        &self,
        col: &QuickCol<'_>,
        arg_bytes: &[u8],
        arg_is_null: bool,
    ) -> Option<Ordering> {
        let (reversed, null_low) = match self {
            ColumnCodec::Primitive(_) => return None,
            ColumnCodec::Utf8(c) => (c.descending(), c.null_low()),
            ColumnCodec::BigInt(c) => (c.descending(), c.null_low()),
            ColumnCodec::BigDecimal(c) => (c.descending(), c.null_low()),
            ColumnCodec::Array(c) => (c.descending(), c.null_low()),
        };
        let ord = match (col, arg_is_null) {
            (QuickCol::Null, true) => Ordering::Equal,
            (QuickCol::Null, false) => {
                if null_low {
                    Ordering::Less
                } else {
                    Ordering::Greater
                }
            }
            (_, true) => {
                if null_low {
                    Ordering::Greater
                } else {
                    Ordering::Less
                }
            }
            (QuickCol::Bytes(bytes), false) => {
                let raw = bytes.cmp(&arg_bytes);
                if reversed {
                    raw.reverse()
                } else {
                    raw
                }
            }
            (QuickCol::Value(_), false) => return None,
        };
        Some(ord)
    }

    /// Whether two codecs produce interchangeable encodings.
    ///
    /// Direction is irrelevant in the value regime, so it is masked there;
    /// in the key regime the full type code must match. Used to detect when
    /// a secondary-index column can reuse primary-key bytes verbatim.
    pub fn encoding_eq(&self, other: &ColumnCodec) -> bool {
        fn fingerprint(codec: &ColumnCodec) -> (u8, PlainType, bool, bool, bool, Regime) {
            match codec {
                ColumnCodec::Primitive(c) => (
                    0,
                    c.plain(),
                    c.nullable(),
                    c.null_low(),
                    c.key_descending(),
                    c.regime(),
                ),
                ColumnCodec::Utf8(c) => (
                    1,
                    PlainType::Utf8,
                    c.nullable(),
                    c.null_low(),
                    c.key_descending(),
                    c.regime(),
                ),
                ColumnCodec::BigInt(c) => (
                    2,
                    PlainType::BigInt,
                    c.nullable(),
                    c.null_low(),
                    c.key_descending(),
                    c.regime(),
                ),
                ColumnCodec::BigDecimal(c) => (
                    3,
                    PlainType::BigDecimal,
                    c.nullable(),
                    c.null_low(),
                    c.key_descending(),
                    c.regime(),
                ),
                ColumnCodec::Array(c) => (
                    4,
                    c.elem(),
                    c.nullable(),
                    c.null_low(),
                    c.key_descending(),
                    c.regime(),
                ),
            }
        }
        fingerprint(self) == fingerprint(other)
    }
}
