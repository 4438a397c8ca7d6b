//! Primitive-array column codec.
//!
//! Value regime: a length prefix (in bytes) followed by little-endian
//! elements; the last column in a group drops the prefix. Key regime: the
//! elements are re-encoded big-endian with the same sign/float transforms
//! as the scalar codec, and the resulting byte stream is base-32768 framed
//! so arrays of different lengths sort like their element sequences.

use rowstore_primitives::PlainType;

use crate::error::CodecError;
use crate::lex::{
    decode_b32768, encode_b32768, f32_from_lex_bits, f32_to_lex_bits, f64_from_lex_bits,
    f64_to_lex_bits, size_b32768, skip_b32768,
};
use crate::pf::{decode_prefix_pf, encode_prefix_pf, length_prefix_pf};
use crate::value::{ArrayValue, Value};

use super::{null_header, QuickCol, QuickMode, Regime, NOT_NULL_LOW, NULL_LOW};

#[derive(Clone, Debug, PartialEq)]
pub struct ArrayCodec {
    elem: PlainType,
    width: usize,
    nullable: bool,
    descending: bool,
    null_low: bool,
    regime: Regime,
}

macro_rules! le_bytes {
    ($arr:expr, $dst:expr) => {
        match $arr {
            ArrayValue::Bool(v) => $dst.extend(v.iter().map(|&b| b as u8)),
            ArrayValue::U8(v) => $dst.extend_from_slice(v),
            ArrayValue::U16(v) => v.iter().for_each(|n| $dst.extend_from_slice(&n.to_le_bytes())),
            ArrayValue::U32(v) => v.iter().for_each(|n| $dst.extend_from_slice(&n.to_le_bytes())),
            ArrayValue::U64(v) => v.iter().for_each(|n| $dst.extend_from_slice(&n.to_le_bytes())),
            ArrayValue::U128(v) => v.iter().for_each(|n| $dst.extend_from_slice(&n.to_le_bytes())),
            ArrayValue::I8(v) => $dst.extend(v.iter().map(|&n| n as u8)),
            ArrayValue::I16(v) => v.iter().for_each(|n| $dst.extend_from_slice(&n.to_le_bytes())),
            ArrayValue::I32(v) => v.iter().for_each(|n| $dst.extend_from_slice(&n.to_le_bytes())),
            ArrayValue::I64(v) => v.iter().for_each(|n| $dst.extend_from_slice(&n.to_le_bytes())),
            ArrayValue::I128(v) => v.iter().for_each(|n| $dst.extend_from_slice(&n.to_le_bytes())),
            ArrayValue::F32(v) => v
                .iter()
                .for_each(|f| $dst.extend_from_slice(&f.to_bits().to_le_bytes())),
            ArrayValue::F64(v) => v
                .iter()
                .for_each(|f| $dst.extend_from_slice(&f.to_bits().to_le_bytes())),
        }
    };
}

macro_rules! key_bytes {
    ($arr:expr, $dst:expr) => {
        match $arr {
            ArrayValue::Bool(v) => $dst.extend(v.iter().map(|&b| b as u8)),
            ArrayValue::U8(v) => $dst.extend_from_slice(v),
            ArrayValue::U16(v) => v.iter().for_each(|n| $dst.extend_from_slice(&n.to_be_bytes())),
            ArrayValue::U32(v) => v.iter().for_each(|n| $dst.extend_from_slice(&n.to_be_bytes())),
            ArrayValue::U64(v) => v.iter().for_each(|n| $dst.extend_from_slice(&n.to_be_bytes())),
            ArrayValue::U128(v) => v.iter().for_each(|n| $dst.extend_from_slice(&n.to_be_bytes())),
            ArrayValue::I8(v) => $dst.extend(v.iter().map(|&n| (n as u8) ^ 0x80)),
            ArrayValue::I16(v) => v
                .iter()
                .for_each(|n| $dst.extend_from_slice(&((*n as u16) ^ (1 << 15)).to_be_bytes())),
            ArrayValue::I32(v) => v
                .iter()
                .for_each(|n| $dst.extend_from_slice(&((*n as u32) ^ (1 << 31)).to_be_bytes())),
            ArrayValue::I64(v) => v
                .iter()
                .for_each(|n| $dst.extend_from_slice(&((*n as u64) ^ (1 << 63)).to_be_bytes())),
            ArrayValue::I128(v) => v
                .iter()
                .for_each(|n| $dst.extend_from_slice(&((*n as u128) ^ (1 << 127)).to_be_bytes())),
            ArrayValue::F32(v) => v
                .iter()
                .for_each(|f| $dst.extend_from_slice(&f32_to_lex_bits(*f).to_be_bytes())),
            ArrayValue::F64(v) => v
                .iter()
                .for_each(|f| $dst.extend_from_slice(&f64_to_lex_bits(*f).to_be_bytes())),
        }
    };
}

fn chunk<const N: usize>(bytes: &[u8], i: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[i * N..(i + 1) * N]);
    out
}

fn elems_from_bytes(plain: PlainType, bytes: &[u8], key: bool) -> Result<ArrayValue, CodecError> {
    let width = plain.fixed_width().expect("array element is primitive");
    if bytes.len() % width != 0 {
        return Err(CodecError::Invalid {
            offset: 0,
            reason: "array byte length not a multiple of element width",
        });
    }
    let n = bytes.len() / width;
    macro_rules! gather {
        ($variant:ident, $w:literal, $from:expr) => {
            ArrayValue::$variant((0..n).map(|i| $from(chunk::<$w>(bytes, i))).collect())
        };
    }
    use PlainType::*;
    Ok(match (plain, key) {
        (Bool, _) => ArrayValue::Bool(bytes.iter().map(|&b| b != 0).collect()),
        (U8, _) => ArrayValue::U8(bytes.to_vec()),
        (U16, false) => gather!(U16, 2, u16::from_le_bytes),
        (U16, true) => gather!(U16, 2, u16::from_be_bytes),
        (U32, false) => gather!(U32, 4, u32::from_le_bytes),
        (U32, true) => gather!(U32, 4, u32::from_be_bytes),
        (U64, false) => gather!(U64, 8, u64::from_le_bytes),
        (U64, true) => gather!(U64, 8, u64::from_be_bytes),
        (U128, false) => gather!(U128, 16, u128::from_le_bytes),
        (U128, true) => gather!(U128, 16, u128::from_be_bytes),
        (I8, false) => ArrayValue::I8(bytes.iter().map(|&b| b as i8).collect()),
        (I8, true) => ArrayValue::I8(bytes.iter().map(|&b| (b ^ 0x80) as i8).collect()),
        (I16, false) => gather!(I16, 2, i16::from_le_bytes),
        (I16, true) => gather!(I16, 2, |b| (u16::from_be_bytes(b) ^ (1 << 15)) as i16),
        (I32, false) => gather!(I32, 4, i32::from_le_bytes),
        (I32, true) => gather!(I32, 4, |b| (u32::from_be_bytes(b) ^ (1 << 31)) as i32),
        (I64, false) => gather!(I64, 8, i64::from_le_bytes),
        (I64, true) => gather!(I64, 8, |b| (u64::from_be_bytes(b) ^ (1 << 63)) as i64),
        (I128, false) => gather!(I128, 16, i128::from_le_bytes),
        (I128, true) => gather!(I128, 16, |b| (u128::from_be_bytes(b) ^ (1 << 127)) as i128),
        (F32, false) => gather!(F32, 4, |b| f32::from_bits(u32::from_le_bytes(b))),
        (F32, true) => gather!(F32, 4, |b| f32_from_lex_bits(u32::from_be_bytes(b))),
        (F64, false) => gather!(F64, 8, |b| f64::from_bits(u64::from_le_bytes(b))),
        (F64, true) => gather!(F64, 8, |b| f64_from_lex_bits(u64::from_be_bytes(b))),
        (Utf8 | BigInt | BigDecimal | Join, _) => unreachable!("array element is primitive"),
    })
}

impl ArrayCodec {
    pub(crate) fn new(
        elem: PlainType,
        nullable: bool,
        descending: bool,
        null_low: bool,
        regime: Regime,
    ) -> ArrayCodec {
        let width = elem.fixed_width().expect("array element is primitive");
        ArrayCodec {
            elem,
            width,
            nullable,
            descending,
            null_low,
            regime,
        }
    }

    pub fn elem(&self) -> PlainType {
        self.elem
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

    pub fn key_descending(&self) -> bool {
        self.descending
    }

    pub fn regime(&self) -> Regime {
        self.regime
    }

    pub fn is_key(&self) -> bool {
        self.regime.is_key()
    }

    pub fn quick_mode(&self) -> QuickMode {
        if self.regime.is_key() {
            QuickMode::Memcmp {
                reversed: self.descending,
            }
        } else {
            // Little-endian element bytes only memcmp for equality.
            QuickMode::MemcmpEqOnly
        }
    }

    pub fn min_size(&self) -> usize {
        match self.regime {
            Regime::Key => self.nullable as usize,
            Regime::ValueInterior => 1,
            Regime::ValueLast => self.nullable as usize,
        }
    }

    fn expect_array<'v>(&self, v: &'v Value) -> Result<&'v ArrayValue, CodecError> {
        match v {
            Value::Array(a) if a.elem_type() == self.elem => Ok(a),
            _ => Err(CodecError::ValueType {
                expected: self.elem,
                found: v.kind_name(),
            }),
        }
    }

    pub fn encode_size(&self, v: &Value) -> Result<usize, CodecError> {
        if v.is_null() {
            return Ok(0);
        }
        let byte_len = self.expect_array(v)?.len() * self.width;
        Ok(match self.regime {
            Regime::Key => size_b32768(byte_len),
            Regime::ValueInterior => {
                let framed = byte_len + self.nullable as usize;
                length_prefix_pf(framed) + byte_len - 1
            }
            Regime::ValueLast => byte_len,
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
                if self.nullable {
                    dst.push(null_header(self.descending, self.null_low).1);
                }
                self.encode_payload(v, dst)
            }
            Regime::ValueInterior => {
                if v.is_null() {
                    if !self.nullable {
                        return Err(CodecError::UnexpectedNull);
                    }
                    encode_prefix_pf(0, dst)?;
                    return Ok(());
                }
                let arr = self.expect_array(v)?;
                let byte_len = arr.len() * self.width;
                encode_prefix_pf(byte_len + self.nullable as usize, dst)?;
                le_bytes!(arr, dst);
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
                if self.nullable {
                    dst.push(NOT_NULL_LOW);
                }
                le_bytes!(self.expect_array(v)?, dst);
                Ok(())
            }
        }
    }

    pub fn decode(&self, src: &[u8], offset: &mut usize) -> Result<Value, CodecError> {
        match self.regime {
            Regime::Key => {
                if self.nullable {
                    let (null_b, not_null_b) = null_header(self.descending, self.null_low);
                    let header = *src.get(*offset).ok_or(CodecError::Truncated(*offset))?;
                    *offset += 1;
                    if header == null_b {
                        return Ok(Value::Null);
                    }
                    if header != not_null_b {
                        return Err(CodecError::Invalid {
                            offset: *offset - 1,
                            reason: "invalid null header byte",
                        });
                    }
                }
                let stream = decode_b32768(src, offset, self.descending)?;
                elems_from_bytes(self.elem, &stream, true).map(Value::Array)
            }
            Regime::ValueInterior => {
                let framed = decode_prefix_pf(src, offset)?;
                let byte_len = if self.nullable {
                    if framed == 0 {
                        return Ok(Value::Null);
                    }
                    framed - 1
                } else {
                    framed
                };
                let end = offset
                    .checked_add(byte_len)
                    .filter(|&end| end <= src.len())
                    .ok_or(CodecError::Truncated(src.len()))?;
                let arr = elems_from_bytes(self.elem, &src[*offset..end], false)?;
                *offset = end;
                Ok(Value::Array(arr))
            }
            Regime::ValueLast => {
                if self.nullable {
                    let header = *src.get(*offset).ok_or(CodecError::Truncated(*offset))?;
                    *offset += 1;
                    if header == NULL_LOW {
                        return Ok(Value::Null);
                    }
                }
                let arr = elems_from_bytes(self.elem, &src[*offset..], false)?;
                *offset = src.len();
                Ok(Value::Array(arr))
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
            Regime::ValueInterior => {
                let framed = decode_prefix_pf(src, offset)?;
                let byte_len = if self.nullable {
                    if framed == 0 {
                        return Ok(QuickCol::Null);
                    }
                    framed - 1
                } else {
                    framed
                };
                let end = offset
                    .checked_add(byte_len)
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

    /// Encodes a non-null argument into the byte form quick comparison
    /// expects: the framed key stream, or raw little-endian elements.
    pub fn encode_payload(&self, v: &Value, dst: &mut Vec<u8>) -> Result<(), CodecError> {
        let arr = self.expect_array(v)?;
        if self.regime.is_key() {
            let mut stream = Vec::with_capacity(arr.len() * self.width);
            key_bytes!(arr, stream);
            encode_b32768(&stream, self.descending, dst);
        } else {
            le_bytes!(arr, dst);
        }
        Ok(())
    }
}
