//! Schema-version registry and catalog persistence.
//!
//! Every primary value starts with a PF-framed schema version. The
//! registry maps `(row type, version)` to the [`RowInfo`] in force when
//! that version was written; lookups hit a read-mostly map, and versions
//! registered by an earlier process are reloaded from the catalog index on
//! demand. Version numbers are assigned monotonically per row type,
//! starting at 1.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use rowstore_codec::pf::{decode_prefix_pf, encode_prefix_pf};
use rowstore_codec::CodecError;
use rowstore_primitives::{SchemaVersion, TypeCode};

use crate::error::{DbError, Result, SchemaError};
use crate::kv::{Database, Index};
use crate::schema::{AutoRange, ColumnDef, RowDescriptor, RowInfo};

const FLAG_HIDDEN: u8 = 1 << 0;
const FLAG_READ_ONLY: u8 = 1 << 1;
const FLAG_AUTO: u8 = 1 << 2;

pub struct SchemaRegistry {
    row_type: Box<str>,
    meta: Arc<dyn Index>,
    db: Arc<dyn Database>,
    inner: RwLock<Inner>,
}

impl std::fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaRegistry")
            .field("row_type", &self.row_type)
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
struct Inner {
    versions: HashMap<SchemaVersion, Arc<RowInfo>>,
    current: SchemaVersion,
}

impl SchemaRegistry {
    /// Registers `desc` against the catalog: if a persisted version has the
    /// identical layout it becomes current, otherwise the next version is
    /// assigned and persisted.
    pub fn open(
        db: Arc<dyn Database>,
        meta: Arc<dyn Index>,
        desc: &RowDescriptor,
    ) -> Result<Arc<SchemaRegistry>> {
        let info = RowInfo::from_descriptor(desc)?;
        let txn = db.bogus_transaction();

        let mut versions = HashMap::new();
        let mut max_version = SchemaVersion::UNSET;
        let mut current = SchemaVersion::UNSET;
        let mut prior: Option<Arc<RowInfo>> = None;
        {
            let mut cursor = meta.new_cursor(txn.as_ref())?;
            let prefix = catalog_prefix(&desc.name);
            let mut positioned = cursor.find_ge(&prefix)?;
            while positioned {
                let Some(key) = cursor.key() else { break };
                if !key.starts_with(&prefix) {
                    break;
                }
                let version = version_from_catalog_key(key, prefix.len())
                    .ok_or_else(|| corrupt(&desc.name))?;
                let value = cursor.value().ok_or_else(|| corrupt(&desc.name))?;
                let stored = decode_descriptor(&desc.name, value)?;
                let stored_info = RowInfo::from_descriptor(&stored)?;
                if stored_info.layout_eq(&info) {
                    current = version;
                }
                max_version = max_version.max(version);
                prior = Some(Arc::clone(&stored_info));
                versions.insert(version, stored_info);
                positioned = cursor.next()?;
            }
            cursor.reset();
        }

        if current == SchemaVersion::UNSET {
            // Value columns may evolve; the key layout never does. A row
            // type whose key columns changed cannot decode its stored
            // keys, so it is rejected here instead of corrupting reads.
            if let Some(prior) = &prior {
                if !prior.key_layout_eq(&info) {
                    return Err(SchemaError::KeyLayoutChanged {
                        row_type: desc.name.clone(),
                    }
                    .into());
                }
            }
            current = max_version.next();
            let mut key = catalog_prefix(&desc.name);
            key.extend_from_slice(&current.0.to_be_bytes());
            meta.store(txn.as_ref(), &key, &encode_descriptor(desc)?)?;
            versions.insert(current, Arc::clone(&info));
        } else {
            // Reuse the freshly reflected info for the current slot so the
            // caller's flags (hidden, read-only) win over the stored copy.
            versions.insert(current, Arc::clone(&info));
        }

        log::debug!(
            "schema registry for `{}`: current version {current}, {} known",
            desc.name,
            versions.len()
        );

        Ok(Arc::new(SchemaRegistry {
            row_type: desc.name.clone().into_boxed_str(),
            meta,
            db,
            inner: RwLock::new(Inner { versions, current }),
        }))
    }

    pub fn row_type(&self) -> &str {
        &self.row_type
    }

    pub fn current(&self) -> (SchemaVersion, Arc<RowInfo>) {
        let inner = self.inner.read();
        let info = Arc::clone(&inner.versions[&inner.current]);
        (inner.current, info)
    }

    pub fn current_info(&self) -> Arc<RowInfo> {
        self.current().1
    }

    /// The layout in force for `version`. A miss re-reads the catalog once
    /// (another process may have registered the version) before failing.
    pub fn row_info(&self, version: SchemaVersion) -> Result<Arc<RowInfo>> {
        if let Some(info) = self.inner.read().versions.get(&version) {
            return Ok(Arc::clone(info));
        }

        let mut key = catalog_prefix(&self.row_type);
        key.extend_from_slice(&version.0.to_be_bytes());
        let txn = self.db.bogus_transaction();
        let stored = self
            .meta
            .load(txn.as_ref(), &key)?
            .ok_or_else(|| SchemaError::VersionMissing {
                row_type: self.row_type.to_string(),
                version,
            })?;
        let desc = decode_descriptor(&self.row_type, &stored)?;
        let info = RowInfo::from_descriptor(&desc)?;

        let mut inner = self.inner.write();
        let info = Arc::clone(inner.versions.entry(version).or_insert(info));
        Ok(info)
    }

    /// Decodes a stored row, dispatching on its schema version.
    ///
    /// Key layout is stable across versions — [`open`](Self::open) rejects
    /// a registration that changes it — so key columns always decode with
    /// the current codecs. Value columns written under an older version
    /// are decoded with that version's layout and mapped into the current
    /// row by name; columns the old version lacked stay unset, and a
    /// column whose type changed is converted when exact conversion is
    /// possible.
    pub fn decode_row(&self, key: &[u8], value: &[u8]) -> Result<crate::schema::Row> {
        use rowstore_primitives::ColumnId;

        let (version, value_start) = Self::split_value(value)?;
        let (current_version, current) = self.current();
        let mut row = crate::schema::Row::new(Arc::clone(&current));

        let mut offset = 0;
        for (i, codec) in current.key_codecs().iter().enumerate() {
            let decoded = codec.decode(key, &mut offset)?;
            row.install(ColumnId(i as u16), decoded);
        }

        if version == current_version {
            let values = current.decode_value_cols(value, value_start)?;
            for (i, decoded) in values.into_iter().enumerate() {
                row.install(ColumnId((current.key_count() + i) as u16), decoded);
            }
        } else {
            let old = self.row_info(version)?;
            let values = old.decode_value_cols(value, value_start)?;
            for (info, decoded) in old.value_columns().iter().zip(values) {
                let Some(col) = current.column_by_name(&info.name) else {
                    continue;
                };
                if col.num.idx() < current.key_count() {
                    continue;
                }
                if col.type_code.plain() == info.type_code.plain()
                    && col.type_code.is_array() == info.type_code.is_array()
                {
                    row.install(col.num, decoded);
                } else if let Ok(converted) =
                    rowstore_codec::convert_value(&decoded, col.type_code.plain())
                {
                    row.install(col.num, converted);
                }
            }
        }
        Ok(row)
    }

    /// Splits a primary value into its schema version and the offset where
    /// the value columns begin.
    pub fn split_value(src: &[u8]) -> core::result::Result<(SchemaVersion, usize), CodecError> {
        let mut offset = 0;
        let version = decode_prefix_pf(src, &mut offset)?;
        let version =
            u32::try_from(version).map_err(|_| CodecError::TooLarge(version))?;
        Ok((SchemaVersion(version), offset))
    }

    /// Prepends the version prefix to a value encoding.
    pub fn encode_version(
        version: SchemaVersion,
        dst: &mut Vec<u8>,
    ) -> core::result::Result<(), CodecError> {
        encode_prefix_pf(version.0 as usize, dst)
    }
}

fn corrupt(row_type: &str) -> DbError {
    SchemaError::CorruptCatalog {
        row_type: row_type.to_owned(),
    }
    .into()
}

fn catalog_prefix(row_type: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(row_type.len() + 1);
    prefix.extend_from_slice(row_type.as_bytes());
    prefix.push(0);
    prefix
}

fn version_from_catalog_key(key: &[u8], prefix_len: usize) -> Option<SchemaVersion> {
    let bytes: [u8; 4] = key.get(prefix_len..)?.try_into().ok()?;
    Some(SchemaVersion(u32::from_be_bytes(bytes)))
}

fn encode_descriptor(desc: &RowDescriptor) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    encode_prefix_pf(desc.key.len(), &mut out).map_err(DbError::Codec)?;
    encode_prefix_pf(desc.columns.len(), &mut out).map_err(DbError::Codec)?;
    // Keys first, the same order RowInfo numbers them.
    let keyed = desc
        .key
        .iter()
        .filter_map(|name| desc.columns.iter().find(|c| &c.name == name))
        .chain(
            desc.columns
                .iter()
                .filter(|c| !desc.key.contains(&c.name)),
        );
    for col in keyed {
        encode_prefix_pf(col.name.len(), &mut out).map_err(DbError::Codec)?;
        out.extend_from_slice(col.name.as_bytes());
        out.extend_from_slice(&col.type_code.bits().to_be_bytes());
        let mut flags = 0u8;
        if col.hidden {
            flags |= FLAG_HIDDEN;
        }
        if col.read_only {
            flags |= FLAG_READ_ONLY;
        }
        if col.auto.is_some() {
            flags |= FLAG_AUTO;
        }
        out.push(flags);
        if let Some(auto) = col.auto {
            out.extend_from_slice(&auto.min.to_be_bytes());
            out.extend_from_slice(&auto.max.to_be_bytes());
        }
    }
    Ok(out)
}

fn decode_descriptor(row_type: &str, src: &[u8]) -> Result<RowDescriptor> {
    let fail = || corrupt(row_type);
    let mut offset = 0;
    let key_count = decode_prefix_pf(src, &mut offset).map_err(|_| fail())?;
    let column_count = decode_prefix_pf(src, &mut offset).map_err(|_| fail())?;
    if key_count > column_count {
        return Err(fail());
    }

    let mut desc = RowDescriptor::new(row_type);
    for i in 0..column_count {
        let name_len = decode_prefix_pf(src, &mut offset).map_err(|_| fail())?;
        let name_end = offset.checked_add(name_len).filter(|&e| e <= src.len()).ok_or_else(fail)?;
        let name = core::str::from_utf8(&src[offset..name_end]).map_err(|_| fail())?;
        offset = name_end;

        let code_bytes: [u8; 2] = src.get(offset..offset + 2).and_then(|b| b.try_into().ok()).ok_or_else(fail)?;
        offset += 2;
        let type_code = TypeCode::from_bits(u16::from_be_bytes(code_bytes)).ok_or_else(fail)?;

        let flags = *src.get(offset).ok_or_else(fail)?;
        offset += 1;

        let auto = if flags & FLAG_AUTO != 0 {
            let min: [u8; 8] = src.get(offset..offset + 8).and_then(|b| b.try_into().ok()).ok_or_else(fail)?;
            offset += 8;
            let max: [u8; 8] = src.get(offset..offset + 8).and_then(|b| b.try_into().ok()).ok_or_else(fail)?;
            offset += 8;
            Some(AutoRange {
                min: i64::from_be_bytes(min),
                max: i64::from_be_bytes(max),
            })
        } else {
            None
        };

        let def = ColumnDef {
            name: name.to_owned(),
            type_code,
            hidden: flags & FLAG_HIDDEN != 0,
            read_only: flags & FLAG_READ_ONLY != 0,
            auto,
        };
        if i < key_count {
            desc.key.push(def.name.clone());
        }
        desc.columns.push(def);
    }
    Ok(desc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::mem::MemDatabase;
    use crate::schema::ColumnDef;
    use rowstore_primitives::PlainType;

    fn descriptor_v1() -> RowDescriptor {
        RowDescriptor::new("Item")
            .column(ColumnDef::new("id", PlainType::U64))
            .column(ColumnDef::new("label", PlainType::Utf8))
            .key(&["id"])
    }

    fn descriptor_v2() -> RowDescriptor {
        RowDescriptor::new("Item")
            .column(ColumnDef::new("id", PlainType::U64))
            .column(ColumnDef::new("label", PlainType::Utf8))
            .column(ColumnDef::new("count", PlainType::I32).nullable())
            .key(&["id"])
    }

    #[test]
    fn identical_layout_reuses_version() {
        let db = MemDatabase::new();
        let meta = db.open_index("__meta").unwrap();
        let r1 = SchemaRegistry::open(db.clone(), meta.clone(), &descriptor_v1()).unwrap();
        assert_eq!(r1.current().0, SchemaVersion(1));
        let r2 = SchemaRegistry::open(db.clone(), meta, &descriptor_v1()).unwrap();
        assert_eq!(r2.current().0, SchemaVersion(1));
    }

    #[test]
    fn layout_change_assigns_next_version_and_keeps_old() {
        let db = MemDatabase::new();
        let meta = db.open_index("__meta").unwrap();
        let r1 = SchemaRegistry::open(db.clone(), meta.clone(), &descriptor_v1()).unwrap();
        assert_eq!(r1.current().0, SchemaVersion(1));

        let r2 = SchemaRegistry::open(db.clone(), meta, &descriptor_v2()).unwrap();
        assert_eq!(r2.current().0, SchemaVersion(2));

        let old = r2.row_info(SchemaVersion(1)).unwrap();
        assert_eq!(old.column_count(), 2);
        let new = r2.row_info(SchemaVersion(2)).unwrap();
        assert_eq!(new.column_count(), 3);
        assert!(matches!(
            r2.row_info(SchemaVersion(9)),
            Err(DbError::Schema(SchemaError::VersionMissing { .. }))
        ));
    }

    #[test]
    fn key_layout_change_is_rejected() {
        let db = MemDatabase::new();
        let meta = db.open_index("__meta").unwrap();
        SchemaRegistry::open(db.clone(), meta.clone(), &descriptor_v1()).unwrap();

        // Same row type, but the key column's type changed: stored keys
        // would decode wrongly, so registration must fail.
        let altered = RowDescriptor::new("Item")
            .column(ColumnDef::new("id", PlainType::I64))
            .column(ColumnDef::new("label", PlainType::Utf8))
            .key(&["id"]);
        assert!(matches!(
            SchemaRegistry::open(db.clone(), meta.clone(), &altered).unwrap_err(),
            DbError::Schema(SchemaError::KeyLayoutChanged { .. })
        ));

        // Adding a key column is just as much a key-layout change.
        let widened = RowDescriptor::new("Item")
            .column(ColumnDef::new("id", PlainType::U64))
            .column(ColumnDef::new("sub", PlainType::U64))
            .column(ColumnDef::new("label", PlainType::Utf8))
            .key(&["id", "sub"]);
        assert!(matches!(
            SchemaRegistry::open(db.clone(), meta.clone(), &widened).unwrap_err(),
            DbError::Schema(SchemaError::KeyLayoutChanged { .. })
        ));

        // Value-column evolution is still fine.
        let r2 = SchemaRegistry::open(db, meta, &descriptor_v2()).unwrap();
        assert_eq!(r2.current().0, SchemaVersion(2));
    }

    #[test]
    fn version_prefix_roundtrip() {
        let mut buf = Vec::new();
        SchemaRegistry::encode_version(SchemaVersion(300), &mut buf).unwrap();
        buf.extend_from_slice(b"rest");
        let (version, offset) = SchemaRegistry::split_value(&buf).unwrap();
        assert_eq!(version, SchemaVersion(300));
        assert_eq!(&buf[offset..], b"rest");
    }

    #[test]
    fn descriptor_encoding_roundtrip() {
        let desc = RowDescriptor::new("T")
            .column(ColumnDef::new("k", PlainType::I64).auto(1, 1000))
            .column(ColumnDef::new("s", PlainType::Utf8).nullable().hidden())
            .column(ColumnDef::new("f", PlainType::F64).read_only())
            .key(&["k"]);
        let bytes = encode_descriptor(&desc).unwrap();
        let back = decode_descriptor("T", &bytes).unwrap();
        assert_eq!(back.key, vec!["k".to_owned()]);
        assert_eq!(back.columns.len(), 3);
        let info_a = RowInfo::from_descriptor(&desc).unwrap();
        let info_b = RowInfo::from_descriptor(&back).unwrap();
        assert!(info_a.layout_eq(&info_b));
        assert!(back.columns[1].hidden);
        assert!(back.columns[2].read_only);
        assert_eq!(back.columns[0].auto, Some(AutoRange { min: 1, max: 1000 }));
    }
}
