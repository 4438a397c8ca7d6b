//! The underlying key/value store contract.
//!
//! The engine consumes the store strictly through these traits: ordered
//! [`Cursor`]s over byte keys, [`Transaction`]s with nested scopes and row
//! locks, an external [`Sorter`] for index builds, and temporary indexes
//! for backfill bookkeeping. The in-memory reference implementation lives
//! in [`mem`]; a persistent store plugs in the same way.
//!
//! Cursors are single-transaction, single-thread. Everything else is
//! thread-safe per the documented rules.

use std::sync::Arc;
use std::time::Duration;

use rowstore_primitives::IndexId;

use crate::error::KvError;

pub mod lock;
pub mod mem;

/// Row-lock acquisition behavior of reads and writes inside a transaction.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LockMode {
    /// No locking at all; reads see whatever is committed at the moment.
    Unsafe,
    /// Writes lock; reads do not, and may observe uncommitted state.
    ReadUncommitted,
    /// Reads take a shared lock and release it immediately after the read.
    ReadCommitted,
    /// Reads take shared locks held to the end of the transaction.
    RepeatableRead,
    /// Reads take upgradable locks held to the end of the transaction.
    UpgradableRead,
}

impl LockMode {
    /// Whether locks acquired by reads outlive the read itself.
    pub fn retains_read_locks(self) -> bool {
        matches!(self, LockMode::RepeatableRead | LockMode::UpgradableRead)
    }
}

/// Commit durability pass-through; the engine never interprets this beyond
/// handing it to the store.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum DurabilityMode {
    #[default]
    Sync,
    NoSync,
}

/// A transaction handle. All methods take `&self`; implementations use
/// interior mutability so handles can be shared across the engine's
/// scanner/updater plumbing.
pub trait Transaction: Send + Sync {
    /// A store-unique identifier; lock owners are compared by it.
    fn id(&self) -> u64;

    /// Enters a nested scope. Every `enter` is paired with `exit` or
    /// `commit` on all exit paths.
    fn enter(&self) -> Result<(), KvError>;

    /// Rolls back and leaves the current scope.
    fn exit(&self) -> Result<(), KvError>;

    /// Commits the current scope; the outermost commit makes the writes
    /// durable per the durability mode and releases the locks.
    fn commit(&self) -> Result<(), KvError>;

    /// Rolls back every scope, returning the transaction to a fresh state.
    fn reset(&self) -> Result<(), KvError>;

    fn lock_mode(&self) -> LockMode;
    fn set_lock_mode(&self, mode: LockMode);
    fn lock_timeout(&self) -> Duration;
    fn set_lock_timeout(&self, timeout: Duration);
    fn durability_mode(&self) -> DurabilityMode;

    /// Releases a read lock acquired earlier in this transaction, if the
    /// lock is not protecting a write. Scanners use this to drop locks on
    /// rows a filter rejected.
    fn unlock(&self, index: IndexId, key: &[u8]);

    /// A bogus transaction performs lock-less, self-committing operations;
    /// cursors linked to it never block.
    fn is_bogus(&self) -> bool {
        false
    }

    /// Recovers the concrete transaction type; stores use this to reject
    /// handles that belong to a different store implementation.
    fn as_any(&self) -> &dyn std::any::Any;
}

/// An ordered cursor over one index, linked to one transaction.
pub trait Cursor {
    /// When off, `value()` is not populated by positioning operations;
    /// `load_value` fetches it on demand.
    fn autoload(&mut self, on: bool);

    fn first(&mut self) -> Result<bool, KvError>;
    fn last(&mut self) -> Result<bool, KvError>;
    fn next(&mut self) -> Result<bool, KvError>;
    fn previous(&mut self) -> Result<bool, KvError>;

    /// Positions at `key` exactly; `false` when absent (the cursor is then
    /// unpositioned).
    fn find(&mut self, key: &[u8]) -> Result<bool, KvError>;

    /// Positions at the first key `>= key` / `> key`.
    fn find_ge(&mut self, key: &[u8]) -> Result<bool, KvError>;
    fn find_gt(&mut self, key: &[u8]) -> Result<bool, KvError>;

    /// `find` with a locality hint; equivalent semantics.
    fn find_nearby(&mut self, key: &[u8]) -> Result<bool, KvError> {
        self.find(key)
    }

    fn key(&self) -> Option<&[u8]>;
    fn value(&self) -> Option<&[u8]>;
    fn load_value(&mut self) -> Result<Option<&[u8]>, KvError>;

    /// Stores `Some(value)` or deletes (`None`) at the current position,
    /// committing through the linked transaction.
    fn commit(&mut self, value: Option<&[u8]>) -> Result<(), KvError>;

    fn delete(&mut self) -> Result<(), KvError>;

    /// Unpositions the cursor and releases its resources. Idempotent.
    fn reset(&mut self);
}

/// A named ordered index.
pub trait Index: Send + Sync {
    fn id(&self) -> IndexId;
    fn name(&self) -> &str;

    fn new_cursor<'a>(&'a self, txn: &'a dyn Transaction) -> Result<Box<dyn Cursor + 'a>, KvError>;

    fn load(&self, txn: &dyn Transaction, key: &[u8]) -> Result<Option<Vec<u8>>, KvError>;
    fn exists(&self, txn: &dyn Transaction, key: &[u8]) -> Result<bool, KvError>;
    fn store(&self, txn: &dyn Transaction, key: &[u8], value: &[u8]) -> Result<(), KvError>;

    /// Returns whether a value was present.
    fn delete(&self, txn: &dyn Transaction, key: &[u8]) -> Result<bool, KvError>;

    fn is_closed(&self) -> bool;
}

/// External sorter: ingest unordered batches, then drain one sorted,
/// last-wins-deduplicated stream.
pub trait Sorter: Send {
    fn add_batch(&mut self, pairs: Vec<(Vec<u8>, Vec<u8>)>) -> Result<(), KvError>;

    /// Finishes ingestion and yields the sorted stream. The sorter is spent
    /// afterwards until `reset`.
    fn finish_scan(
        &mut self,
    ) -> Result<Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + Send>, KvError>;

    /// Discards all ingested data; used on cancellation.
    fn reset(&mut self) -> Result<(), KvError>;
}

/// Diagnostic events the engine emits; backfill progress and failures are
/// reported here with the secondary index's symbolic name.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EventType {
    IndexBuildBegin,
    IndexBuildComplete,
    IndexBuildFailed,
    Debug,
}

pub trait EventListener: Send + Sync {
    fn notify(&self, event: EventType, message: &str);
}

/// Default listener routing events to the `log` facade.
#[derive(Default)]
pub struct LogListener;

impl EventListener for LogListener {
    fn notify(&self, event: EventType, message: &str) {
        match event {
            EventType::IndexBuildFailed => log::error!("{event:?}: {message}"),
            EventType::Debug => log::debug!("{message}"),
            _ => log::info!("{event:?}: {message}"),
        }
    }
}

/// The database: index namespace, transactions, sorters, temporaries.
pub trait Database: Send + Sync {
    /// Opens the named index, creating it if missing.
    fn open_index(&self, name: &str) -> Result<Arc<dyn Index>, KvError>;

    fn find_index(&self, name: &str) -> Result<Option<Arc<dyn Index>>, KvError>;

    /// Creates an anonymous temporary index, dropped with `delete_index`.
    fn new_temporary_index(&self) -> Result<Arc<dyn Index>, KvError>;

    fn delete_index(&self, id: IndexId) -> Result<(), KvError>;

    fn new_transaction(&self, durability: DurabilityMode) -> Arc<dyn Transaction>;

    /// The shared lock-less transaction; operations through it self-commit.
    fn bogus_transaction(&self) -> Arc<dyn Transaction>;

    fn new_sorter(&self) -> Result<Box<dyn Sorter>, KvError>;

    fn event_listener(&self) -> Arc<dyn EventListener>;
    fn set_event_listener(&self, listener: Arc<dyn EventListener>);

    fn is_closed(&self) -> bool;
}
