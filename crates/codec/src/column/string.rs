//! UTF-8 string column codec.
//!
//! Interior value columns are PF-framed; the last value column in a group
//! runs to the end of the buffer. Key columns use base-32768 framing so
//! shared prefixes sort correctly under `memcmp`.

use crate::error::CodecError;
use crate::lex::{decode_b32768, encode_b32768, size_b32768, skip_b32768};
use crate::pf::{decode_prefix_pf, encode_prefix_pf, length_prefix_pf};
use crate::value::Value;

use super::{null_header, QuickCol, Regime, NOT_NULL_LOW, NULL_LOW};

#[derive(Clone, Debug, PartialEq)]
pub struct Utf8Codec {
    nullable: bool,
    descending: bool,
    null_low: bool,
    regime: Regime,
}

impl Utf8Codec {
    pub(crate) fn new(nullable: bool, descending: bool, null_low: bool, regime: Regime) -> Utf8Codec {
        Utf8Codec {
            nullable,
            descending,
            null_low,
            regime,
        }
    }

    pub fn nullable(&self) -> bool {
        self.nullable
    }

    pub fn descending(&self) -> bool {
        self.descending
    }

    pub fn null_low(&self) -> bool {
        self.null_low
    }

    pub fn regime(&self) -> Regime {
        self.regime
    }

    pub fn is_key(&self) -> bool {
        self.regime.is_key()
    }

    pub fn key_descending(&self) -> bool {
        self.descending
    }

    pub fn min_size(&self) -> usize {
        match self.regime {
            // Null header; the terminator is value-dependent (absent for
            // null), so it counts toward encode_size.
            Regime::Key => self.nullable as usize,
            // The PF prefix always contributes at least one byte.
            Regime::ValueInterior => 1,
            Regime::ValueLast => self.nullable as usize,
        }
    }

    fn expect_str<'v>(&self, v: &'v Value) -> Result<&'v str, CodecError> {
        v.as_str().ok_or(CodecError::ValueType {
            expected: rowstore_primitives::PlainType::Utf8,
            found: v.kind_name(),
        })
    }

    pub fn encode_size(&self, v: &Value) -> Result<usize, CodecError> {
        if v.is_null() {
            return Ok(0);
        }
        let len = self.expect_str(v)?.len();
        Ok(match self.regime {
            Regime::Key => size_b32768(len),
            Regime::ValueInterior => {
                let framed = len + self.nullable as usize;
                length_prefix_pf(framed) + len - 1
            }
            Regime::ValueLast => len,
        })
    }

    pub fn encode(&self, v: &Value, dst: &mut Vec<u8>) -> Result<(), CodecError> {
        match self.regime {
            Regime::Key => {
                if v.is_null() {
                    if !self.nullable {
                        return Err(CodecError::UnexpectedNull);
                    }
                    dst.push(null_header(self.descending, self.null_low).0);
                    return Ok(());
                }
                let s = self.expect_str(v)?;
                if self.nullable {
                    dst.push(null_header(self.descending, self.null_low).1);
                }
                encode_b32768(s.as_bytes(), self.descending, dst);
                Ok(())
            }
            Regime::ValueInterior => {
                if v.is_null() {
                    if !self.nullable {
                        return Err(CodecError::UnexpectedNull);
                    }
                    encode_prefix_pf(0, dst)?;
                    return Ok(());
                }
                let s = self.expect_str(v)?;
                encode_prefix_pf(s.len() + self.nullable as usize, dst)?;
                dst.extend_from_slice(s.as_bytes());
                Ok(())
            }
            Regime::ValueLast => {
                if v.is_null() {
                    if !self.nullable {
                        return Err(CodecError::UnexpectedNull);
                    }
                    dst.push(NULL_LOW);
                    return Ok(());
                }
                let s = self.expect_str(v)?;
                if self.nullable {
                    dst.push(NOT_NULL_LOW);
                }
                dst.extend_from_slice(s.as_bytes());
                Ok(())
            }
        }
    }

    pub fn decode(&self, src: &[u8], offset: &mut usize) -> Result<Value, CodecError> {
        match self.locate(src, offset)? {
            QuickCol::Null => Ok(Value::Null),
            QuickCol::Value(v) => Ok(v),
            QuickCol::Bytes(bytes) => {
                let s = core::str::from_utf8(bytes).map_err(|_| CodecError::Invalid {
                    offset: *offset,
                    reason: "invalid UTF-8 in string column",
                })?;
                Ok(Value::Str(s.into()))
            }
        }
    }

    pub fn skip(&self, src: &[u8], offset: &mut usize) -> Result<(), CodecError> {
        match self.regime {
            Regime::Key => {
                if self.nullable {
                    let (null_b, _) = null_header(self.descending, self.null_low);
                    let header = *src.get(*offset).ok_or(CodecError::Truncated(*offset))?;
                    *offset += 1;
                    if header == null_b {
                        return Ok(());
                    }
                }
                skip_b32768(src, offset, self.descending)
            }
            Regime::ValueInterior => {
                if self.nullable {
                    crate::pf::skip_nullable_bytes_pf(src, offset)
                } else {
                    crate::pf::skip_bytes_pf(src, offset)
                }
            }
            Regime::ValueLast => {
                *offset = src.len();
                Ok(())
            }
        }
    }

    /// Locates the string payload without copying. Key-regime strings are
    /// returned as their encoded (framed) span, which memcmps in order;
    /// value-regime strings as the raw UTF-8 bytes, which also do.
    fn locate<'a>(&self, src: &'a [u8], offset: &mut usize) -> Result<QuickCol<'a>, CodecError> {
        match self.regime {
            Regime::Key => {
                if self.nullable {
                    let (null_b, not_null_b) = null_header(self.descending, self.null_low);
                    let header = *src.get(*offset).ok_or(CodecError::Truncated(*offset))?;
                    *offset += 1;
                    if header == null_b {
                        return Ok(QuickCol::Null);
                    }
                    if header != not_null_b {
                        return Err(CodecError::Invalid {
                            offset: *offset - 1,
                            reason: "invalid null header byte",
                        });
                    }
                }
                // Key-regime decode has to undo the framing, so the result
                // is an owned value rather than a borrowed span.
                let start = *offset;
                let bytes = decode_b32768(src, offset, self.descending)?;
                let s = String::from_utf8(bytes).map_err(|_| CodecError::Invalid {
                    offset: start,
                    reason: "invalid UTF-8 in string column",
                })?;
                Ok(QuickCol::Value(Value::Str(s.into())))
            }
            Regime::ValueInterior => {
                let framed = decode_prefix_pf(src, offset)?;
                let len = if self.nullable {
                    if framed == 0 {
                        return Ok(QuickCol::Null);
                    }
                    framed - 1
                } else {
                    framed
                };
                let end = offset
                    .checked_add(len)
                    .filter(|&end| end <= src.len())
                    .ok_or(CodecError::Truncated(src.len()))?;
                let bytes = &src[*offset..end];
                *offset = end;
                Ok(QuickCol::Bytes(bytes))
            }
            Regime::ValueLast => {
                if self.nullable {
                    let header = *src.get(*offset).ok_or(CodecError::Truncated(*offset))?;
                    *offset += 1;
                    if header == NULL_LOW {
                        return Ok(QuickCol::Null);
                    }
                }
                let bytes = &src[*offset..];
                *offset = src.len();
                Ok(QuickCol::Bytes(bytes))
            }
        }
    }

    /// Locates the column for quick comparison: the encoded key span (which
    /// memcmps in declared order) or the raw value-regime bytes.
    pub fn quick_decode<'a>(
        &self,
        src: &'a [u8],
        offset: &mut usize,
    ) -> Result<QuickCol<'a>, CodecError> {
        match self.regime {
            Regime::Key => {
                if self.nullable {
                    let (null_b, not_null_b) = null_header(self.descending, self.null_low);
                    let header = *src.get(*offset).ok_or(CodecError::Truncated(*offset))?;
                    *offset += 1;
                    if header == null_b {
                        return Ok(QuickCol::Null);
                    }
                    if header != not_null_b {
                        return Err(CodecError::Invalid {
                            offset: *offset - 1,
                            reason: "invalid null header byte",
                        });
                    }
                }
                let start = *offset;
                skip_b32768(src, offset, self.descending)?;
                Ok(QuickCol::Bytes(&src[start..*offset]))
            }
            _ => self.locate(src, offset),
        }
    }

    /// Encodes a non-null argument the way quick comparison expects: the
    /// framed key span, or the raw UTF-8 bytes for the value regimes.
    pub fn encode_payload(&self, v: &Value, dst: &mut Vec<u8>) -> Result<(), CodecError> {
        let s = self.expect_str(v)?;
        match self.regime {
            Regime::Key => encode_b32768(s.as_bytes(), self.descending, dst),
            Regime::ValueInterior | Regime::ValueLast => dst.extend_from_slice(s.as_bytes()),
        }
        Ok(())
    }
}
