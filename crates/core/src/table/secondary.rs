//! Secondary-index descriptors and entry encoding.
//!
//! A secondary key is the lexicographic concatenation of the declared
//! columns followed by whatever primary-key columns are still needed for
//! uniqueness. An *alternate key* is unique on its own columns: nothing is
//! appended, and the remaining primary-key columns move into the entry's
//! value instead. Secondary values never carry a schema version.

use std::sync::Arc;

use rowstore_codec::{ColumnCodec, Regime};
use rowstore_primitives::ColumnId;

use crate::error::{Result, SchemaError};
use crate::kv::Index;
use crate::schema::{Row, RowInfo};

/// Declarative description of a secondary index.
#[derive(Clone, Debug)]
pub struct SecondaryDef {
    pub name: String,
    pub columns: Vec<String>,
    /// Alternate keys are unique on their own columns.
    pub alternate: bool,
}

impl SecondaryDef {
    pub fn new(name: impl Into<String>, columns: &[&str]) -> SecondaryDef {
        SecondaryDef {
            name: name.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            alternate: false,
        }
    }

    pub fn alternate(mut self) -> SecondaryDef {
        self.alternate = true;
        self
    }
}

pub struct SecondaryIndex {
    name: String,
    index: Arc<dyn Index>,
    alternate: bool,
    /// Declared columns, then appended primary-key columns (empty for
    /// alternate keys), with one key codec each.
    key_cols: Vec<ColumnId>,
    key_codecs: Vec<ColumnCodec>,
    /// Columns stored in the entry value (the leftover primary-key columns
    /// of an alternate key).
    value_cols: Vec<ColumnId>,
    value_codecs: Vec<ColumnCodec>,
}

impl SecondaryIndex {
    pub(crate) fn build(
        info: &RowInfo,
        index: Arc<dyn Index>,
        def: &SecondaryDef,
    ) -> Result<Arc<SecondaryIndex>> {
        let mut key_cols = Vec::with_capacity(def.columns.len());
        let mut key_codecs = Vec::with_capacity(def.columns.len());
        for name in &def.columns {
            let col = info
                .column_by_name(name)
                .ok_or_else(|| SchemaError::UnknownColumn {
                    row_type: info.name().to_owned(),
                    column: name.clone(),
                })?;
            key_cols.push(col.num);
            key_codecs.push(ColumnCodec::new(col.type_code, Regime::Key).map_err(|_| {
                SchemaError::UnsupportedColumn {
                    row_type: info.name().to_owned(),
                    column: name.clone(),
                }
            })?);
        }

        // Primary-key columns not already present. For an ordinary
        // secondary they extend the key; for an alternate key they become
        // the entry value. When an appended column's codec equals the
        // primary codec, the encoding is byte-compatible with the primary
        // key, which keeps entries comparable across both indexes.
        let leftover: Vec<ColumnId> = info
            .key_columns()
            .iter()
            .map(|col| col.num)
            .filter(|num| !key_cols.contains(num))
            .collect();

        let mut value_cols = Vec::new();
        let mut value_codecs = Vec::new();
        if def.alternate {
            for (i, &num) in leftover.iter().enumerate() {
                let col = info.column(num).expect("key column exists");
                let regime = if i + 1 == leftover.len() {
                    Regime::ValueLast
                } else {
                    Regime::ValueInterior
                };
                value_codecs.push(ColumnCodec::new(col.type_code, regime).map_err(|_| {
                    SchemaError::UnsupportedColumn {
                        row_type: info.name().to_owned(),
                        column: col.name.to_string(),
                    }
                })?);
                value_cols.push(num);
            }
        } else {
            for &num in &leftover {
                let col = info.column(num).expect("key column exists");
                let codec = ColumnCodec::new(col.type_code, Regime::Key).map_err(|_| {
                    SchemaError::UnsupportedColumn {
                        row_type: info.name().to_owned(),
                        column: col.name.to_string(),
                    }
                })?;
                debug_assert!(
                    codec.encoding_eq(&info.key_codecs()[num.idx()]),
                    "appended primary-key column must share the primary encoding"
                );
                key_cols.push(num);
                key_codecs.push(codec);
            }
        }

        Ok(Arc::new(SecondaryIndex {
            name: def.name.clone(),
            index,
            alternate: def.alternate,
            key_cols,
            key_codecs,
            value_cols,
            value_codecs,
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> &Arc<dyn Index> {
        &self.index
    }

    pub fn is_alternate(&self) -> bool {
        self.alternate
    }

    /// Computes the `(key, value)` entry for one primary row.
    pub fn entry_for(&self, row: &Row) -> Result<(Vec<u8>, Vec<u8>)> {
        let mut key = Vec::new();
        for (num, codec) in self.key_cols.iter().zip(&self.key_codecs) {
            codec.encode(row.get(*num)?, &mut key)?;
        }
        let mut value = Vec::new();
        for (num, codec) in self.value_cols.iter().zip(&self.value_codecs) {
            codec.encode(row.get(*num)?, &mut value)?;
        }
        Ok((key, value))
    }
}
