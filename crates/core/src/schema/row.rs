//! The open row record and its per-column state bits.
//!
//! Each column carries a 2-bit state packed 16 columns per `u32` word:
//! `00` unset, `01` clean (holds a decoded value), `11` dirty (mutated
//! since load). Mutators set dirty; decode paths set clean; reading an
//! unset column is an error.

use std::sync::Arc;

use rowstore_codec::Value;
use rowstore_primitives::ColumnId;
use smallvec::SmallVec;

use crate::error::SchemaError;
use crate::schema::RowInfo;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ColumnState {
    Unset,
    Clean,
    Dirty,
}

impl ColumnState {
    fn bits(self) -> u32 {
        match self {
            ColumnState::Unset => 0b00,
            ColumnState::Clean => 0b01,
            ColumnState::Dirty => 0b11,
        }
    }

    fn from_bits(bits: u32) -> ColumnState {
        match bits & 0b11 {
            0b00 => ColumnState::Unset,
            0b01 => ColumnState::Clean,
            _ => ColumnState::Dirty,
        }
    }
}

pub struct Row {
    info: Arc<RowInfo>,
    values: Box<[Value]>,
    state: SmallVec<[u32; 2]>,
}

impl Row {
    pub fn new(info: Arc<RowInfo>) -> Row {
        let count = info.column_count();
        let words = count.div_ceil(16);
        Row {
            info,
            values: std::iter::repeat_with(|| Value::Null).take(count).collect(),
            state: smallvec::smallvec![0; words],
        }
    }

    pub fn info(&self) -> &Arc<RowInfo> {
        &self.info
    }

    pub fn state(&self, num: ColumnId) -> ColumnState {
        let i = num.idx();
        ColumnState::from_bits(self.state[i / 16] >> ((i % 16) * 2))
    }

    pub(crate) fn set_state(&mut self, num: ColumnId, state: ColumnState) {
        let i = num.idx();
        let shift = (i % 16) * 2;
        let word = &mut self.state[i / 16];
        *word = (*word & !(0b11 << shift)) | (state.bits() << shift);
    }

    fn column_name(&self, num: ColumnId) -> &str {
        self.info
            .column(num)
            .map(|c| &*c.name)
            .unwrap_or("<out of range>")
    }

    /// The value of a set column; unset columns are an error, per the
    /// required-column rule.
    pub fn get(&self, num: ColumnId) -> Result<&Value, SchemaError> {
        if self.state(num) == ColumnState::Unset {
            return Err(self.info.unset_err(self.column_name(num)));
        }
        Ok(&self.values[num.idx()])
    }

    pub fn get_by_name(&self, name: &str) -> Result<&Value, SchemaError> {
        let num = self.column_num(name)?;
        self.get(num)
    }

    pub fn column_num(&self, name: &str) -> Result<ColumnId, SchemaError> {
        self.info
            .column_by_name(name)
            .map(|c| c.num)
            .ok_or_else(|| SchemaError::UnknownColumn {
                row_type: self.info.name().to_owned(),
                column: name.to_owned(),
            })
    }

    /// Sets a column value, marking it dirty. Read-only columns and type
    /// mismatches are rejected.
    pub fn set(&mut self, num: ColumnId, value: Value) -> Result<(), SchemaError> {
        let info = self
            .info
            .column(num)
            .ok_or_else(|| SchemaError::UnknownColumn {
                row_type: self.info.name().to_owned(),
                column: format!("#{num}"),
            })?;
        if info.read_only {
            return Err(SchemaError::ReadOnlyColumn {
                row_type: self.info.name().to_owned(),
                column: info.name.to_string(),
            });
        }
        let matches_type = match &value {
            Value::Null => info.type_code.is_nullable(),
            Value::Array(a) => {
                info.type_code.is_array() && a.elem_type() == info.type_code.plain()
            }
            v => !info.type_code.is_array() && v.plain_type() == Some(info.type_code.plain()),
        };
        if !matches_type {
            return Err(SchemaError::ColumnType {
                row_type: self.info.name().to_owned(),
                column: info.name.to_string(),
                found: value.kind_name(),
            });
        }
        self.values[num.idx()] = value;
        self.set_state(num, ColumnState::Dirty);
        Ok(())
    }

    pub fn set_by_name(&mut self, name: &str, value: Value) -> Result<(), SchemaError> {
        let num = self.column_num(name)?;
        self.set(num, value)
    }

    /// Installs a decoded value, marking the column clean. Bypasses the
    /// read-only check; decode paths own the row.
    pub(crate) fn install(&mut self, num: ColumnId, value: Value) {
        self.values[num.idx()] = value;
        self.set_state(num, ColumnState::Clean);
    }

    /// Downgrades every dirty column to clean, after a successful write.
    pub fn mark_all_clean(&mut self) {
        for i in 0..self.values.len() {
            let num = ColumnId(i as u16);
            if self.state(num) == ColumnState::Dirty {
                self.set_state(num, ColumnState::Clean);
            }
        }
    }

    pub fn is_dirty(&self, num: ColumnId) -> bool {
        self.state(num) == ColumnState::Dirty
    }

    /// Whether any key column is dirty, which forces delete + insert on
    /// update.
    pub fn key_dirty(&self) -> bool {
        (0..self.info.key_count()).any(|i| self.is_dirty(ColumnId(i as u16)))
    }

    /// Clears every column back to unset.
    pub fn unset_all(&mut self) {
        for v in self.values.iter_mut() {
            *v = Value::Null;
        }
        self.state.fill(0);
    }
}

impl Clone for Row {
    fn clone(&self) -> Row {
        Row {
            info: Arc::clone(&self.info),
            values: self.values.clone(),
            state: self.state.clone(),
        }
    }
}

impl std::fmt::Debug for Row {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct(self.info.name());
        for info in self.info.all_columns() {
            match self.state(info.num) {
                ColumnState::Unset => s.field(&info.name, &"<unset>"),
                _ => s.field(&info.name, &self.values[info.num.idx()]),
            };
        }
        s.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnDef, RowDescriptor};
    use rowstore_primitives::PlainType;

    fn wide_info() -> Arc<RowInfo> {
        // More than 16 columns to cross a state-word boundary.
        let mut desc = RowDescriptor::new("Wide").key(&["c0"]);
        for i in 0..20 {
            desc = desc.column(ColumnDef::new(format!("c{i}"), PlainType::I32));
        }
        RowInfo::from_descriptor(&desc).unwrap()
    }

    #[test]
    fn state_bits_track_set_and_clean() {
        let mut row = Row::new(wide_info());
        let c17 = row.column_num("c17").unwrap();
        assert_eq!(row.state(c17), ColumnState::Unset);
        assert!(row.get(c17).is_err());

        row.set(c17, Value::I32(9)).unwrap();
        assert_eq!(row.state(c17), ColumnState::Dirty);
        assert_eq!(row.get(c17).unwrap(), &Value::I32(9));

        row.mark_all_clean();
        assert_eq!(row.state(c17), ColumnState::Clean);
        // Neighbors stay unset.
        assert_eq!(row.state(row.column_num("c16").unwrap()), ColumnState::Unset);
        assert_eq!(row.state(row.column_num("c18").unwrap()), ColumnState::Unset);
    }

    #[test]
    fn type_mismatch_is_rejected() {
        let mut row = Row::new(wide_info());
        let c1 = row.column_num("c1").unwrap();
        assert!(row.set(c1, Value::from("nope")).is_err());
        assert!(row.set(c1, Value::Null).is_err()); // not nullable
    }
}
