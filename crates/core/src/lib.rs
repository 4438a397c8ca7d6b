//! Row/table engine over a transactional, ordered key/value store.
//!
//! The engine turns declarative row types and textual query filters into
//! a compact self-describing binary row format with schema evolution,
//! compiled range scans whose predicates run against still-encoded bytes,
//! and transactionally maintained secondary indexes with online backfill.
//!
//! The store itself is an external collaborator consumed through the
//! [`kv`] traits; [`kv::mem`] ships the in-memory reference
//! implementation the tests run against.
//!
//! ```
//! use rowstore_codec::Value;
//! use rowstore_core::kv::mem::MemDatabase;
//! use rowstore_core::schema::{ColumnDef, RowDescriptor};
//! use rowstore_core::table::{Table, TableOptions};
//! use rowstore_primitives::PlainType;
//!
//! let db = MemDatabase::new();
//! let desc = RowDescriptor::new("Event")
//!     .column(ColumnDef::new("id", PlainType::U64))
//!     .column(ColumnDef::new("kind", PlainType::Utf8))
//!     .key(&["id"]);
//! let table = Table::open(db, &desc, TableOptions::default()).unwrap();
//!
//! let txn = table.new_transaction();
//! let mut row = table.new_row();
//! row.set_by_name("id", Value::U64(1)).unwrap();
//! row.set_by_name("kind", Value::from("login")).unwrap();
//! table.insert(txn.as_ref(), &mut row).unwrap();
//! txn.commit().unwrap();
//!
//! let scan_txn = table.new_transaction();
//! let mut scanner = table
//!     .new_scanner(scan_txn.as_ref(), "kind == ?0", &[Value::from("login")])
//!     .unwrap();
//! assert!(scanner.row().is_some());
//! ```

pub mod error;
pub mod filter;
pub mod kv;
pub mod predicate;
pub mod scan;
pub mod schema;
pub mod table;

pub use error::{DbError, Result};
pub use predicate::RowPredicate;
pub use scan::{EvalResult, MultiScanController, RowScanner, ScanControllerFactory};
pub use schema::{ColumnDef, Row, RowDescriptor, RowInfo, SchemaRegistry};
pub use table::{RowUpdater, SecondaryDef, Table, TableOptions};
