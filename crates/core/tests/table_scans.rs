//! End-to-end table behavior over the in-memory store: point operations,
//! filtered range scans, updaters, predicate locks, and schema evolution.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use rowstore_codec::Value;
use rowstore_core::error::{DbError, KvError, TableError};
use rowstore_core::kv::mem::MemDatabase;
use rowstore_core::kv::{LockMode, Transaction};
use rowstore_core::schema::{ColumnDef, RowDescriptor};
use rowstore_core::table::{Table, TableOptions};
use rowstore_primitives::PlainType;

fn descriptor() -> RowDescriptor {
    RowDescriptor::new("Num")
        .column(ColumnDef::new("k", PlainType::I64))
        .column(ColumnDef::new("label", PlainType::Utf8))
        .column(ColumnDef::new("rank", PlainType::I32).nullable())
        .key(&["k"])
}

fn open_table(options: TableOptions) -> (Arc<MemDatabase>, Arc<Table>) {
    let db = MemDatabase::new();
    let table = Table::open(db.clone(), &descriptor(), options).unwrap();
    (db, table)
}

fn put(table: &Table, txn: &dyn Transaction, k: i64, label: &str) {
    let mut row = table.new_row();
    row.set_by_name("k", Value::I64(k)).unwrap();
    row.set_by_name("label", Value::from(label)).unwrap();
    row.set_by_name("rank", Value::Null).unwrap();
    table.store(txn, &mut row).unwrap();
}

fn seed_1_to_5(table: &Table) {
    let txn = table.new_transaction();
    for k in 1..=5 {
        put(table, txn.as_ref(), k, &format!("row{k}"));
    }
    txn.commit().unwrap();
}

fn collect_keys(table: &Table, filter: &str, args: &[Value]) -> Vec<i64> {
    let txn = table.new_transaction();
    let mut scanner = table.new_scanner(txn.as_ref(), filter, args).unwrap();
    let mut keys = Vec::new();
    while let Some(row) = scanner.row() {
        match row.get_by_name("k").unwrap() {
            Value::I64(k) => keys.push(*k),
            other => panic!("unexpected key value {other:?}"),
        }
        if !scanner.step().unwrap() {
            break;
        }
    }
    scanner.close();
    keys
}

#[test]
fn range_scan_yields_bounded_keys_in_order() {
    let (_db, table) = open_table(TableOptions::default());
    seed_1_to_5(&table);
    assert_eq!(
        collect_keys(&table, "k >= ?0 && k <= ?1", &[Value::I64(2), Value::I64(4)]),
        vec![2, 3, 4]
    );
}

#[test]
fn disjunction_yields_terms_in_controller_order() {
    let (_db, table) = open_table(TableOptions::default());
    seed_1_to_5(&table);
    assert_eq!(
        collect_keys(&table, "k == ?0 || k == ?1", &[Value::I64(1), Value::I64(5)]),
        vec![1, 5]
    );
    // Term order, not key order.
    assert_eq!(
        collect_keys(&table, "k == ?0 || k == ?1", &[Value::I64(5), Value::I64(1)]),
        vec![5, 1]
    );
}

#[test]
fn value_column_filter_runs_the_quick_path() {
    let (_db, table) = open_table(TableOptions::default());
    seed_1_to_5(&table);
    assert_eq!(
        collect_keys(&table, "label == ?0", &[Value::from("row3")]),
        vec![3]
    );
    assert_eq!(
        collect_keys(&table, "label != ?0 && k < ?1", &[Value::from("row1"), Value::I64(4)]),
        vec![2, 3]
    );
}

#[test]
fn empty_and_false_filters() {
    let (_db, table) = open_table(TableOptions::default());
    seed_1_to_5(&table);
    assert_eq!(
        collect_keys(&table, "k == ?0 && k != ?0", &[Value::I64(3)]),
        Vec::<i64>::new()
    );
    assert_eq!(
        collect_keys(&table, "k > ?0", &[Value::I64(99)]),
        Vec::<i64>::new()
    );
}

#[test]
fn point_operations_roundtrip() {
    let (_db, table) = open_table(TableOptions::default());
    let txn = table.new_transaction();

    let mut row = table.new_row();
    row.set_by_name("k", Value::I64(10)).unwrap();
    row.set_by_name("label", Value::from("ten")).unwrap();
    row.set_by_name("rank", Value::I32(1)).unwrap();
    table.insert(txn.as_ref(), &mut row).unwrap();

    // Duplicate insert fails.
    let mut dup = table.new_row();
    dup.set_by_name("k", Value::I64(10)).unwrap();
    dup.set_by_name("label", Value::from("other")).unwrap();
    dup.set_by_name("rank", Value::Null).unwrap();
    assert!(matches!(
        table.insert(txn.as_ref(), &mut dup).unwrap_err(),
        DbError::Table(TableError::KeyExists { .. })
    ));

    // Load by key.
    let mut probe = table.new_row();
    probe.set_by_name("k", Value::I64(10)).unwrap();
    assert!(table.load(txn.as_ref(), &mut probe).unwrap());
    assert_eq!(probe.get_by_name("label").unwrap(), &Value::from("ten"));

    // Update merges dirty value columns.
    let mut patch = table.new_row();
    patch.set_by_name("k", Value::I64(10)).unwrap();
    patch.set_by_name("rank", Value::I32(7)).unwrap();
    table.update(txn.as_ref(), &mut patch).unwrap();
    assert_eq!(patch.get_by_name("label").unwrap(), &Value::from("ten"));
    assert_eq!(patch.get_by_name("rank").unwrap(), &Value::I32(7));

    // Replace requires existence.
    let mut missing = table.new_row();
    missing.set_by_name("k", Value::I64(99)).unwrap();
    missing.set_by_name("label", Value::from("x")).unwrap();
    missing.set_by_name("rank", Value::Null).unwrap();
    assert!(matches!(
        table.replace(txn.as_ref(), &mut missing).unwrap_err(),
        DbError::Table(TableError::NoSuchRow { .. })
    ));

    // Delete reports presence.
    assert!(table.delete(txn.as_ref(), &probe).unwrap());
    assert!(!table.delete(txn.as_ref(), &probe).unwrap());
    txn.commit().unwrap();
}

#[test]
fn updater_rewrites_and_deletes_rows() {
    let (_db, table) = open_table(TableOptions::default());
    seed_1_to_5(&table);

    let txn = table.new_transaction();
    let mut updater = table
        .new_updater(Some(txn.as_ref()), "k >= ?0", &[Value::I64(4)])
        .unwrap();
    // Rows 4 and 5: relabel 4, delete 5.
    let row = updater.row_mut().unwrap();
    row.set_by_name("label", Value::from("patched")).unwrap();
    assert!(updater.update().unwrap());
    assert!(!updater.delete().unwrap());
    updater.close().unwrap();
    txn.commit().unwrap();

    assert_eq!(collect_keys(&table, "k >= ?0", &[Value::I64(1)]), vec![1, 2, 3, 4]);
    assert_eq!(
        collect_keys(&table, "label == ?0", &[Value::from("patched")]),
        vec![4]
    );
}

#[test]
fn auto_commit_updater_runs_without_caller_transaction() {
    let (_db, table) = open_table(TableOptions::default());
    seed_1_to_5(&table);

    let mut updater = table
        .new_updater(None, "k == ?0", &[Value::I64(2)])
        .unwrap();
    let row = updater.row_mut().unwrap();
    row.set_by_name("rank", Value::I32(42)).unwrap();
    updater.update().unwrap();
    updater.close().unwrap();

    let txn = table.new_transaction();
    let mut probe = table.new_row();
    probe.set_by_name("k", Value::I64(2)).unwrap();
    assert!(table.load(txn.as_ref(), &mut probe).unwrap());
    assert_eq!(probe.get_by_name("rank").unwrap(), &Value::I32(42));
}

#[test]
fn failed_updater_open_leaves_caller_transaction_untouched() {
    let (_db, table) = open_table(TableOptions::default());
    seed_1_to_5(&table);

    let txn = table.new_transaction();
    txn.set_lock_mode(LockMode::ReadCommitted);

    // A malformed filter and an unknown column both fail before any
    // scope entry or mode escalation.
    assert!(table.new_updater(Some(txn.as_ref()), "k ==", &[]).is_err());
    assert_eq!(txn.lock_mode(), LockMode::ReadCommitted);
    assert!(table
        .new_updater(Some(txn.as_ref()), "nope == ?0", &[Value::I64(1)])
        .is_err());
    assert_eq!(txn.lock_mode(), LockMode::ReadCommitted);
    // A bad argument fails in controller construction, same guarantee.
    assert!(table
        .new_updater(Some(txn.as_ref()), "k == ?0", &[Value::from("not an int")])
        .is_err());
    assert_eq!(txn.lock_mode(), LockMode::ReadCommitted);

    // The transaction is still fully usable afterwards.
    let mut updater = table
        .new_updater(Some(txn.as_ref()), "k == ?0", &[Value::I64(1)])
        .unwrap();
    let row = updater.row_mut().unwrap();
    row.set_by_name("rank", Value::I32(5)).unwrap();
    updater.update().unwrap();
    updater.close().unwrap();
    assert_eq!(txn.lock_mode(), LockMode::ReadCommitted);
    txn.commit().unwrap();

    let probe_txn = table.new_transaction();
    let mut probe = table.new_row();
    probe.set_by_name("k", Value::I64(1)).unwrap();
    assert!(table.load(probe_txn.as_ref(), &mut probe).unwrap());
    assert_eq!(probe.get_by_name("rank").unwrap(), &Value::I32(5));
}

#[test]
fn updater_moves_row_when_key_changes() {
    let (_db, table) = open_table(TableOptions::default());
    seed_1_to_5(&table);

    let txn = table.new_transaction();
    let mut updater = table
        .new_updater(Some(txn.as_ref()), "k == ?0", &[Value::I64(3)])
        .unwrap();
    let row = updater.row_mut().unwrap();
    row.set_by_name("k", Value::I64(30)).unwrap();
    updater.update().unwrap();
    updater.close().unwrap();
    txn.commit().unwrap();

    assert_eq!(
        collect_keys(&table, "k >= ?0", &[Value::I64(1)]),
        vec![1, 2, 4, 5, 30]
    );
}

#[test]
fn filter_factories_are_cached_by_canonical_string() {
    let (_db, table) = open_table(TableOptions::default());
    let a = table.scan_factory("k == ?0 && k == ?0").unwrap();
    let b = table.scan_factory("k == ?0").unwrap();
    assert!(Arc::ptr_eq(&a, &b), "canonical forms must share a factory");
    assert_eq!(a.canonical(), "k == ?0");
}

#[test]
fn predicate_lock_blocks_conflicting_writer_until_release() {
    let (_db, table) = open_table(TableOptions {
        predicate_locks: true,
        ..TableOptions::default()
    });
    seed_1_to_5(&table);

    let scan_txn = table.new_transaction();
    // Read-committed: row locks come and go; only the predicate lock
    // protects the range.
    scan_txn.set_lock_mode(LockMode::ReadCommitted);
    let mut scanner = table
        .new_scanner(scan_txn.as_ref(), "k >= ?0 && k <= ?1", &[Value::I64(2), Value::I64(4)])
        .unwrap();
    assert!(scanner.row().is_some());

    // A write inside the scanned range conflicts while the scan lives.
    let write_txn = table.new_transaction();
    write_txn.set_lock_timeout(Duration::from_millis(30));
    let mut row = table.new_row();
    row.set_by_name("k", Value::I64(3)).unwrap();
    row.set_by_name("label", Value::from("intruder")).unwrap();
    row.set_by_name("rank", Value::Null).unwrap();
    assert!(matches!(
        table.store(write_txn.as_ref(), &mut row).unwrap_err(),
        DbError::Kv(KvError::LockTimeout { .. })
    ));

    // Outside the predicate there is no conflict.
    let mut outside = table.new_row();
    outside.set_by_name("k", Value::I64(9)).unwrap();
    outside.set_by_name("label", Value::from("fine")).unwrap();
    outside.set_by_name("rank", Value::Null).unwrap();
    table.store(write_txn.as_ref(), &mut outside).unwrap();

    // Releasing the scanner releases the predicate lock.
    scanner.close();
    table.store(write_txn.as_ref(), &mut row).unwrap();
    write_txn.commit().unwrap();
}

#[test]
fn rejected_rows_release_read_locks_under_repeatable_read() {
    let (_db, table) = open_table(TableOptions::default());
    seed_1_to_5(&table);

    let scan_txn = table.new_transaction();
    scan_txn.set_lock_mode(LockMode::RepeatableRead);
    let mut scanner = table
        .new_scanner(scan_txn.as_ref(), "label == ?0", &[Value::from("row5")])
        .unwrap();
    assert!(scanner.row().is_some());

    // Row 2 was visited and rejected; its lock must be gone, so another
    // transaction can write it immediately.
    let write_txn = table.new_transaction();
    write_txn.set_lock_timeout(Duration::from_millis(50));
    put(&table, write_txn.as_ref(), 2, "rewritten");
    write_txn.commit().unwrap();
    scanner.close();
}

#[test]
fn schema_evolution_decodes_old_rows() {
    let db = MemDatabase::new();
    let table = Table::open(db.clone(), &descriptor(), TableOptions::default()).unwrap();
    seed_1_to_5(&table);
    drop(table);

    // The same row type grows a column; old rows must still decode, with
    // the new column unset.
    let evolved = RowDescriptor::new("Num")
        .column(ColumnDef::new("k", PlainType::I64))
        .column(ColumnDef::new("label", PlainType::Utf8))
        .column(ColumnDef::new("rank", PlainType::I32).nullable())
        .column(ColumnDef::new("extra", PlainType::Utf8).nullable())
        .key(&["k"]);
    let table = Table::open(db, &evolved, TableOptions::default()).unwrap();

    let txn = table.new_transaction();
    let mut probe = table.new_row();
    probe.set_by_name("k", Value::I64(3)).unwrap();
    assert!(table.load(txn.as_ref(), &mut probe).unwrap());
    assert_eq!(probe.get_by_name("label").unwrap(), &Value::from("row3"));
    assert!(probe.get_by_name("extra").is_err(), "new column is unset in old rows");

    // Writes under the new version coexist with old-version rows.
    let mut row = table.new_row();
    row.set_by_name("k", Value::I64(6)).unwrap();
    row.set_by_name("label", Value::from("row6")).unwrap();
    row.set_by_name("rank", Value::Null).unwrap();
    row.set_by_name("extra", Value::from("fresh")).unwrap();
    table.store(txn.as_ref(), &mut row).unwrap();
    txn.commit().unwrap();

    assert_eq!(
        collect_keys(&table, "label != ?0", &[Value::from("nope")]),
        vec![1, 2, 3, 4, 5, 6]
    );
}

#[test]
fn auto_column_assigns_sequence_values() {
    let db = MemDatabase::new();
    let desc = RowDescriptor::new("Auto")
        .column(ColumnDef::new("id", PlainType::I64).auto(1, i64::MAX))
        .column(ColumnDef::new("body", PlainType::Utf8))
        .key(&["id"]);
    let table = Table::open(db, &desc, TableOptions::default()).unwrap();

    let txn = table.new_transaction();
    for body in ["a", "b"] {
        let mut row = table.new_row();
        row.set_by_name("body", Value::from(body)).unwrap();
        table.insert(txn.as_ref(), &mut row).unwrap();
        // The assigned key is visible on the row after insert.
        assert!(matches!(row.get_by_name("id").unwrap(), Value::I64(_)));
    }
    txn.commit().unwrap();

    let scan_txn = table.new_transaction();
    let mut scanner = table
        .new_scanner(scan_txn.as_ref(), "id >= ?0", &[Value::I64(0)])
        .unwrap();
    let mut ids = Vec::new();
    while let Some(row) = scanner.row() {
        if let Value::I64(id) = row.get_by_name("id").unwrap() {
            ids.push(*id);
        }
        if !scanner.step().unwrap() {
            break;
        }
    }
    assert_eq!(ids, vec![1, 2]);
}
