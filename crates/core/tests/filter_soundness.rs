//! Range-extraction soundness: for every row, the rows delivered by the
//! combined extracted ranges are exactly the rows satisfying the filter.
//!
//! Random filters over a two-column key plus one value column are scanned
//! against a fixed small table and compared with a brute-force evaluation
//! of the same filter over every row. Overlapping ranges may deliver
//! duplicates, so the comparison is on sets.

use std::collections::BTreeSet;
use std::sync::Arc;

use proptest::prelude::*;
use rowstore_codec::Value;
use rowstore_core::kv::mem::MemDatabase;
use rowstore_core::kv::LockMode;
use rowstore_core::schema::{ColumnDef, RowDescriptor};
use rowstore_core::table::{Table, TableOptions};
use rowstore_primitives::PlainType;

fn open_table() -> Arc<Table> {
    let db = MemDatabase::new();
    let desc = RowDescriptor::new("Grid")
        .column(ColumnDef::new("k1", PlainType::I64))
        .column(ColumnDef::new("k2", PlainType::I64))
        .column(ColumnDef::new("v", PlainType::I64))
        .key(&["k1", "k2"]);
    Table::open(db, &desc, TableOptions::default()).unwrap()
}

/// Every (k1, k2) in a small grid, with v = k1 - k2.
fn seed(table: &Table) -> Vec<(i64, i64, i64)> {
    let txn = table.new_transaction();
    let mut rows = Vec::new();
    for k1 in -2..=2i64 {
        for k2 in -2..=2i64 {
            let v = k1 - k2;
            let mut row = table.new_row();
            row.set_by_name("k1", Value::I64(k1)).unwrap();
            row.set_by_name("k2", Value::I64(k2)).unwrap();
            row.set_by_name("v", Value::I64(v)).unwrap();
            table.store(txn.as_ref(), &mut row).unwrap();
            rows.push((k1, k2, v));
        }
    }
    txn.commit().unwrap();
    rows
}

#[derive(Clone, Debug)]
struct Leaf {
    column: &'static str,
    op: &'static str,
    arg: usize,
}

fn leaf_strategy() -> impl Strategy<Value = Leaf> {
    (
        prop_oneof![Just("k1"), Just("k2"), Just("v")],
        prop_oneof![Just("=="), Just("!="), Just("<"), Just("<="), Just(">"), Just(">=")],
        0usize..4,
    )
        .prop_map(|(column, op, arg)| Leaf { column, op, arg })
}

/// Filters shaped `(l && l) || (l && l)` or flat conjunctions, which is
/// enough to drive multi-range extraction and remainders.
fn filter_strategy() -> impl Strategy<Value = String> {
    let term = proptest::collection::vec(leaf_strategy(), 1..3).prop_map(|leaves| {
        leaves
            .iter()
            .map(|l| format!("{} {} ?{}", l.column, l.op, l.arg))
            .collect::<Vec<_>>()
            .join(" && ")
    });
    proptest::collection::vec(term, 1..3).prop_map(|terms| {
        terms
            .into_iter()
            .map(|t| format!("({t})"))
            .collect::<Vec<_>>()
            .join(" || ")
    })
}

fn eval_leaf(actual: i64, op: &str, arg: i64) -> bool {
    match op {
        "==" => actual == arg,
        "!=" => actual != arg,
        "<" => actual < arg,
        "<=" => actual <= arg,
        ">" => actual > arg,
        ">=" => actual >= arg,
        other => panic!("unknown op {other}"),
    }
}

/// Brute-force evaluation of the generated filter shape against one row.
fn eval_filter(filter: &str, args: &[i64], row: (i64, i64, i64)) -> bool {
    filter.split(" || ").any(|term| {
        term.trim_matches(|c| c == '(' || c == ')')
            .split(" && ")
            .all(|leaf| {
                let mut parts = leaf.split_whitespace();
                let column = parts.next().unwrap();
                let op = parts.next().unwrap();
                let arg: usize = parts.next().unwrap()[1..].parse().unwrap();
                let actual = match column {
                    "k1" => row.0,
                    "k2" => row.1,
                    _ => row.2,
                };
                eval_leaf(actual, op, args[arg])
            })
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn scan_results_match_brute_force(
        filter in filter_strategy(),
        args in proptest::collection::vec(-3i64..=3, 4),
    ) {
        let table = open_table();
        let rows = seed(&table);

        let arg_values: Vec<Value> = args.iter().map(|&a| Value::I64(a)).collect();
        let txn = table.new_transaction();
        txn.set_lock_mode(LockMode::ReadCommitted);
        let mut scanner = table.new_scanner(txn.as_ref(), &filter, &arg_values).unwrap();

        let mut scanned: BTreeSet<(i64, i64)> = BTreeSet::new();
        while let Some(row) = scanner.row() {
            let k1 = match row.get_by_name("k1").unwrap() {
                Value::I64(v) => *v,
                other => panic!("bad k1 {other:?}"),
            };
            let k2 = match row.get_by_name("k2").unwrap() {
                Value::I64(v) => *v,
                other => panic!("bad k2 {other:?}"),
            };
            scanned.insert((k1, k2));
            if !scanner.step().unwrap() {
                break;
            }
        }
        scanner.close();

        let expected: BTreeSet<(i64, i64)> = rows
            .iter()
            .filter(|&&row| eval_filter(&filter, &args, row))
            .map(|&(k1, k2, _)| (k1, k2))
            .collect();

        prop_assert_eq!(scanned, expected, "filter `{}` args {:?}", filter, args);
    }
}
