//! Row-type descriptors and the reflected column layout.
//!
//! A user supplies a [`RowDescriptor`] once per row type: the column list
//! with logical types and flags, plus the ordered key designation.
//! Validation reflects it into a [`RowInfo`]: column numbers assigned keys
//! first (in declared key order) then value columns in encode order, with
//! one codec per column. The `RowInfo` is the decode program for its schema
//! version; the registry in [`registry`] dispatches between versions.

use std::collections::HashMap;
use std::sync::Arc;

use rowstore_codec::{ColumnCodec, Regime, Value};
use rowstore_primitives::{ColumnId, PlainType, TypeCode, TypeFlags};

use crate::error::SchemaError;

pub mod registry;
pub mod row;

pub use registry::SchemaRegistry;
pub use row::{ColumnState, Row};

/// Range for automatic key-column assignment; unset auto columns receive
/// the next sequence value on insert.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AutoRange {
    pub min: i64,
    pub max: i64,
}

/// One column of a row-type descriptor.
#[derive(Clone, Debug, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub type_code: TypeCode,
    pub hidden: bool,
    pub read_only: bool,
    pub auto: Option<AutoRange>,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, plain: PlainType) -> ColumnDef {
        ColumnDef {
            name: name.into(),
            type_code: TypeCode::scalar(plain),
            hidden: false,
            read_only: false,
            auto: None,
        }
    }

    pub fn with_flags(mut self, flags: TypeFlags) -> ColumnDef {
        self.type_code = self.type_code.with_flags(flags);
        self
    }

    pub fn nullable(self) -> ColumnDef {
        self.with_flags(TypeFlags::NULLABLE)
    }

    pub fn descending(self) -> ColumnDef {
        self.with_flags(TypeFlags::DESCENDING)
    }

    pub fn null_low(self) -> ColumnDef {
        self.with_flags(TypeFlags::NULL_LOW)
    }

    pub fn array(self) -> ColumnDef {
        self.with_flags(TypeFlags::ARRAY)
    }

    pub fn hidden(mut self) -> ColumnDef {
        self.hidden = true;
        self
    }

    pub fn read_only(mut self) -> ColumnDef {
        self.read_only = true;
        self
    }

    pub fn auto(mut self, min: i64, max: i64) -> ColumnDef {
        self.auto = Some(AutoRange { min, max });
        self
    }
}

/// The declarative description of a row type.
#[derive(Clone, Debug, PartialEq)]
pub struct RowDescriptor {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub key: Vec<String>,
}

impl RowDescriptor {
    pub fn new(name: impl Into<String>) -> RowDescriptor {
        RowDescriptor {
            name: name.into(),
            columns: Vec::new(),
            key: Vec::new(),
        }
    }

    pub fn column(mut self, def: ColumnDef) -> RowDescriptor {
        self.columns.push(def);
        self
    }

    pub fn key(mut self, names: &[&str]) -> RowDescriptor {
        self.key = names.iter().map(|s| s.to_string()).collect();
        self
    }
}

/// A reflected column: descriptor data plus the assigned column number.
#[derive(Clone, Debug)]
pub struct ColumnInfo {
    pub name: Box<str>,
    pub type_code: TypeCode,
    pub num: ColumnId,
    pub hidden: bool,
    pub read_only: bool,
    pub auto: Option<AutoRange>,
}

/// The reflected layout of a row type: key columns (ordered), value
/// columns (ordered), and the codec per column.
pub struct RowInfo {
    name: Box<str>,
    columns: Box<[Arc<ColumnInfo>]>,
    key_count: usize,
    by_name: HashMap<Box<str>, ColumnId>,
    key_codecs: Box<[ColumnCodec]>,
    value_codecs: Box<[ColumnCodec]>,
}

impl RowInfo {
    pub fn from_descriptor(desc: &RowDescriptor) -> Result<Arc<RowInfo>, SchemaError> {
        let row_type = desc.name.clone();
        let err_col = |column: &str, f: fn(String, String) -> SchemaError| {
            f(row_type.clone(), column.to_owned())
        };

        if desc.key.is_empty() {
            return Err(SchemaError::NoKeyColumns { row_type });
        }

        let mut defs: HashMap<&str, &ColumnDef> = HashMap::with_capacity(desc.columns.len());
        for def in &desc.columns {
            if defs.insert(def.name.as_str(), def).is_some() {
                return Err(err_col(&def.name, |row_type, column| {
                    SchemaError::DuplicateColumn { row_type, column }
                }));
            }
        }

        // Keys first, in declared key order.
        let mut ordered: Vec<&ColumnDef> = Vec::with_capacity(desc.columns.len());
        for name in &desc.key {
            let def = defs.remove(name.as_str()).ok_or_else(|| {
                err_col(name, |row_type, column| SchemaError::UnknownColumn {
                    row_type,
                    column,
                })
            })?;
            if def.type_code.plain() == PlainType::Join {
                return Err(err_col(name, |row_type, column| {
                    SchemaError::IncompatibleKeyColumn { row_type, column }
                }));
            }
            ordered.push(def);
        }
        let key_count = ordered.len();
        // Then value columns, in declared order.
        ordered.extend(desc.columns.iter().filter(|def| defs.contains_key(def.name.as_str())));

        let mut columns = Vec::with_capacity(ordered.len());
        let mut by_name = HashMap::with_capacity(ordered.len());
        for (num, def) in ordered.iter().enumerate() {
            let code = def.type_code;
            if code.is_array() && !code.plain().is_primitive() {
                return Err(err_col(&def.name, |row_type, column| {
                    SchemaError::NonPrimitiveArray { row_type, column }
                }));
            }
            if let Some(auto) = def.auto {
                let is_int =
                    code.plain().is_signed_int() || code.plain().is_unsigned_int();
                if !is_int || code.is_array() || num >= key_count || auto.min > auto.max {
                    return Err(err_col(&def.name, |row_type, column| {
                        SchemaError::InvalidAutoColumn { row_type, column }
                    }));
                }
            }
            let info = Arc::new(ColumnInfo {
                name: def.name.clone().into_boxed_str(),
                type_code: code,
                num: ColumnId(num as u16),
                hidden: def.hidden,
                read_only: def.read_only,
                auto: def.auto,
            });
            by_name.insert(info.name.clone(), info.num);
            columns.push(info);
        }

        let mut key_codecs = Vec::with_capacity(key_count);
        for info in &columns[..key_count] {
            key_codecs.push(
                ColumnCodec::new(info.type_code, Regime::Key).map_err(|_| {
                    err_col(&info.name, |row_type, column| {
                        SchemaError::IncompatibleKeyColumn { row_type, column }
                    })
                })?,
            );
        }
        let value_count = columns.len() - key_count;
        let mut value_codecs = Vec::with_capacity(value_count);
        for (i, info) in columns[key_count..].iter().enumerate() {
            let regime = if i + 1 == value_count {
                Regime::ValueLast
            } else {
                Regime::ValueInterior
            };
            value_codecs.push(ColumnCodec::new(info.type_code, regime).map_err(|_| {
                err_col(&info.name, |row_type, column| SchemaError::UnsupportedColumn {
                    row_type,
                    column,
                })
            })?);
        }

        Ok(Arc::new(RowInfo {
            name: desc.name.clone().into_boxed_str(),
            columns: columns.into_boxed_slice(),
            key_count,
            by_name,
            key_codecs: key_codecs.into_boxed_slice(),
            value_codecs: value_codecs.into_boxed_slice(),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key_count(&self) -> usize {
        self.key_count
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn key_columns(&self) -> &[Arc<ColumnInfo>] {
        &self.columns[..self.key_count]
    }

    pub fn value_columns(&self) -> &[Arc<ColumnInfo>] {
        &self.columns[self.key_count..]
    }

    pub fn all_columns(&self) -> &[Arc<ColumnInfo>] {
        &self.columns
    }

    pub fn column(&self, num: ColumnId) -> Option<&Arc<ColumnInfo>> {
        self.columns.get(num.idx())
    }

    pub fn column_by_name(&self, name: &str) -> Option<&Arc<ColumnInfo>> {
        self.by_name.get(name).map(|num| &self.columns[num.idx()])
    }

    pub fn key_codecs(&self) -> &[ColumnCodec] {
        &self.key_codecs
    }

    pub fn value_codecs(&self) -> &[ColumnCodec] {
        &self.value_codecs
    }

    /// The key codec for key column `i`.
    pub fn key_codec(&self, i: usize) -> &ColumnCodec {
        &self.key_codecs[i]
    }

    /// Whether two layouts encode identically, making a version reusable.
    pub fn layout_eq(&self, other: &RowInfo) -> bool {
        self.name == other.name
            && self.key_count == other.key_count
            && self.columns.len() == other.columns.len()
            && self
                .columns
                .iter()
                .zip(other.columns.iter())
                .all(|(a, b)| a.name == b.name && a.type_code == b.type_code)
    }

    /// Whether two layouts share the same key columns. Value columns may
    /// evolve across schema versions; the key layout never does, which is
    /// what lets stored keys decode with the current key codecs.
    pub fn key_layout_eq(&self, other: &RowInfo) -> bool {
        self.key_count == other.key_count
            && self
                .key_columns()
                .iter()
                .zip(other.key_columns())
                .all(|(a, b)| a.name == b.name && a.type_code == b.type_code)
    }

    /// Encodes the primary key from a column lookup function.
    pub fn encode_key_with<'v>(
        &self,
        get: impl Fn(usize) -> Result<&'v Value, SchemaError>,
    ) -> Result<Vec<u8>, crate::error::DbError> {
        let mut key = Vec::new();
        for (i, codec) in self.key_codecs.iter().enumerate() {
            codec.encode(get(i)?, &mut key)?;
        }
        Ok(key)
    }

    /// Decodes a primary key into its column values, in key order.
    pub fn decode_key(&self, key: &[u8]) -> Result<Vec<Value>, crate::error::DbError> {
        let mut offset = 0;
        let mut out = Vec::with_capacity(self.key_count);
        for codec in self.key_codecs.iter() {
            out.push(codec.decode(key, &mut offset)?);
        }
        Ok(out)
    }

    /// Encodes the value columns (no schema-version prefix).
    pub fn encode_value_cols_with<'v>(
        &self,
        dst: &mut Vec<u8>,
        get: impl Fn(usize) -> Result<&'v Value, SchemaError>,
    ) -> Result<(), crate::error::DbError> {
        for (i, codec) in self.value_codecs.iter().enumerate() {
            codec.encode(get(i)?, dst)?;
        }
        Ok(())
    }

    /// Decodes the value columns from `src[offset..]` (no version prefix).
    pub fn decode_value_cols(
        &self,
        src: &[u8],
        mut offset: usize,
    ) -> Result<Vec<Value>, crate::error::DbError> {
        let mut out = Vec::with_capacity(self.value_codecs.len());
        for codec in self.value_codecs.iter() {
            out.push(codec.decode(src, &mut offset)?);
        }
        Ok(out)
    }

    pub(crate) fn unset_err(&self, column: &str) -> SchemaError {
        SchemaError::UnsetColumn {
            row_type: self.name.to_string(),
            column: column.to_owned(),
        }
    }
}

impl std::fmt::Debug for RowInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowInfo")
            .field("name", &self.name)
            .field("key", &self.key_columns().iter().map(|c| &c.name).collect::<Vec<_>>())
            .field(
                "values",
                &self.value_columns().iter().map(|c| &c.name).collect::<Vec<_>>(),
            )
            .finish()
    }
}
