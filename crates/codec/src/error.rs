use rowstore_primitives::{PlainType, TypeCode};
use thiserror::Error;

/// Errors raised while encoding or decoding column values.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodecError {
    #[error("unexpected end of input at offset {0}")]
    Truncated(usize),
    #[error("invalid encoding at offset {offset}: {reason}")]
    Invalid { offset: usize, reason: &'static str },
    #[error("length {0} exceeds the maximum encodable length")]
    TooLarge(usize),
    #[error("column type `{code}` cannot be encoded")]
    UnsupportedType { code: TypeCode },
    #[error("expected a `{expected}` value, found `{found}`")]
    ValueType {
        expected: PlainType,
        found: &'static str,
    },
    #[error("null value for non-nullable column")]
    UnexpectedNull,
}

/// Errors raised while converting filter arguments to column types.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConvertError {
    #[error("cannot convert `{from}` to `{to}`")]
    Unsupported { from: &'static str, to: PlainType },
    #[error("conversion of `{from}` to `{to}` loses information")]
    Lossy { from: &'static str, to: PlainType },
    #[error("null argument for non-nullable comparison")]
    NullArgument,
}
