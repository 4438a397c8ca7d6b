//! Shared identifiers and column type codes.
//!
//! Everything in here is a plain value type: the id newtypes keep index,
//! column and schema-version numbers from being mixed up at call sites, and
//! [`TypeCode`] packs a column's logical type together with its encoding
//! flags into the 9-bit code that the codec layer and the schema catalog
//! both understand.

use core::fmt;

use bitflags::bitflags;
use derive_more::{Display, From, Into};

/// The position of a column within a row type.
///
/// Key columns are numbered first, in declared key order, followed by value
/// columns in encode order. The assignment is stable for the lifetime of a
/// schema version.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Display, From, Into)]
pub struct ColumnId(pub u16);

impl ColumnId {
    pub fn idx(self) -> usize {
        self.0 as usize
    }
}

impl From<ColumnId> for usize {
    fn from(id: ColumnId) -> usize {
        id.0 as usize
    }
}

/// Identifies an index within the underlying key/value store.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Display, From, Into)]
pub struct IndexId(pub u64);

/// A monotonically assigned integer identifying a historical row layout.
///
/// Version `0` is reserved; the first registered layout gets version `1`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Display, From, Into)]
pub struct SchemaVersion(pub u32);

impl SchemaVersion {
    pub const UNSET: SchemaVersion = SchemaVersion(0);

    pub fn next(self) -> SchemaVersion {
        SchemaVersion(self.0 + 1)
    }
}

/// The logical type of a column, stored in the low 5 bits of a [`TypeCode`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PlainType {
    Bool = 0,
    U8 = 1,
    U16 = 2,
    U32 = 3,
    U64 = 4,
    U128 = 5,
    I8 = 6,
    I16 = 7,
    I32 = 8,
    I64 = 9,
    I128 = 10,
    F32 = 11,
    F64 = 12,
    Utf8 = 13,
    BigInt = 14,
    BigDecimal = 15,
    /// A non-scalar reference to another row type, resolved recursively by
    /// name. Joins never have a codec of their own.
    Join = 16,
}

impl PlainType {
    pub const MAX_CODE: u8 = PlainType::Join as u8;

    pub fn from_code(code: u8) -> Option<PlainType> {
        use PlainType::*;
        Some(match code {
            0 => Bool,
            1 => U8,
            2 => U16,
            3 => U32,
            4 => U64,
            5 => U128,
            6 => I8,
            7 => I16,
            8 => I32,
            9 => I64,
            10 => I128,
            11 => F32,
            12 => F64,
            13 => Utf8,
            14 => BigInt,
            15 => BigDecimal,
            16 => Join,
            _ => return None,
        })
    }

    /// Encoded width in bytes for fixed-width primitives, `None` for
    /// variable-length and non-scalar types.
    pub fn fixed_width(self) -> Option<usize> {
        use PlainType::*;
        Some(match self {
            Bool | U8 | I8 => 1,
            U16 | I16 => 2,
            U32 | I32 | F32 => 4,
            U64 | I64 | F64 => 8,
            U128 | I128 => 16,
            Utf8 | BigInt | BigDecimal | Join => return None,
        })
    }

    pub fn is_primitive(self) -> bool {
        self.fixed_width().is_some()
    }

    pub fn is_signed_int(self) -> bool {
        use PlainType::*;
        matches!(self, I8 | I16 | I32 | I64 | I128)
    }

    pub fn is_unsigned_int(self) -> bool {
        use PlainType::*;
        matches!(self, U8 | U16 | U32 | U64 | U128)
    }

    pub fn is_float(self) -> bool {
        matches!(self, PlainType::F32 | PlainType::F64)
    }

    pub fn name(self) -> &'static str {
        use PlainType::*;
        match self {
            Bool => "bool",
            U8 => "u8",
            U16 => "u16",
            U32 => "u32",
            U64 => "u64",
            U128 => "u128",
            I8 => "i8",
            I16 => "i16",
            I32 => "i32",
            I64 => "i64",
            I128 => "i128",
            F32 => "f32",
            F64 => "f64",
            Utf8 => "utf8",
            BigInt => "bigint",
            BigDecimal => "bigdecimal",
            Join => "join",
        }
    }
}

impl fmt::Display for PlainType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

bitflags! {
    /// Encoding flags occupying the high bits of a [`TypeCode`].
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
    pub struct TypeFlags: u16 {
        /// The column admits null.
        const NULLABLE = 1 << 5;
        /// Key ordering is reversed for this column.
        const DESCENDING = 1 << 6;
        /// Nulls order before all non-null values instead of after.
        const NULL_LOW = 1 << 7;
        /// The column holds an array of the primitive element type.
        const ARRAY = 1 << 8;
    }
}

/// A column's 9-bit type code: low 5 bits are the [`PlainType`], the rest
/// are [`TypeFlags`].
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct TypeCode(u16);

const PLAIN_MASK: u16 = 0x1f;

impl TypeCode {
    pub fn new(plain: PlainType, flags: TypeFlags) -> TypeCode {
        TypeCode(plain as u16 | flags.bits())
    }

    pub fn scalar(plain: PlainType) -> TypeCode {
        TypeCode::new(plain, TypeFlags::empty())
    }

    pub fn from_bits(bits: u16) -> Option<TypeCode> {
        let plain = PlainType::from_code((bits & PLAIN_MASK) as u8)?;
        let flags = TypeFlags::from_bits(bits & !PLAIN_MASK)?;
        Some(TypeCode::new(plain, flags))
    }

    pub fn bits(self) -> u16 {
        self.0
    }

    pub fn plain(self) -> PlainType {
        // Construction guarantees the low bits hold a valid code.
        PlainType::from_code((self.0 & PLAIN_MASK) as u8).unwrap()
    }

    pub fn flags(self) -> TypeFlags {
        TypeFlags::from_bits_truncate(self.0 & !PLAIN_MASK)
    }

    pub fn is_nullable(self) -> bool {
        self.flags().contains(TypeFlags::NULLABLE)
    }

    pub fn is_descending(self) -> bool {
        self.flags().contains(TypeFlags::DESCENDING)
    }

    pub fn is_null_low(self) -> bool {
        self.flags().contains(TypeFlags::NULL_LOW)
    }

    pub fn is_array(self) -> bool {
        self.flags().contains(TypeFlags::ARRAY)
    }

    /// The code with the descending flag cleared.
    ///
    /// Value-regime encodings ignore direction, so two codecs that differ
    /// only in `DESCENDING` produce identical value encodings.
    pub fn without_descending(self) -> TypeCode {
        TypeCode(self.0 & !TypeFlags::DESCENDING.bits())
    }

    pub fn with_flags(self, flags: TypeFlags) -> TypeCode {
        TypeCode(self.0 | flags.bits())
    }
}

impl fmt::Debug for TypeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeCode({}", self.plain())?;
        let flags = self.flags();
        if !flags.is_empty() {
            write!(f, ", {flags:?}")?;
        }
        write!(f, ")")
    }
}

impl fmt::Display for TypeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_array() {
            write!(f, "[{}]", self.plain())?;
        } else {
            write!(f, "{}", self.plain())?;
        }
        if self.is_nullable() {
            f.write_str("?")?;
        }
        Ok(())
    }
}
