//! Online secondary-index backfill.
//!
//! While a backfill runs, the table's trigger routes writes through
//! [`IndexBackfill::live_insert`]/[`live_delete`]: inserts always hit the
//! live secondary; deletes additionally land in the deleted-tracker when
//! the merge has not yet passed their key. The build itself scans the
//! primary in read-committed batches into the external sorter, then merges
//! the sorted stream under upgradable locks, inserting only keys that
//! neither the live secondary nor the tracker accounts for. Progress is
//! recorded after each merge commit, before the tracker entry is cleared,
//! so no update is lost in the handoff.
//!
//! Invariant (B1): at all times the union of the live secondary, the
//! sorted output at or below the progress key, and the deleted-tracker
//! equals a correct secondary projection of the primary.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{DbError, KvError, Result};
use crate::kv::{Database, DurabilityMode, EventType, Index, LockMode, Sorter, Transaction};
use crate::schema::{Row, SchemaRegistry};
use crate::table::secondary::SecondaryIndex;

struct BackfillState {
    sorter: Option<Box<dyn Sorter>>,
    tracker: Option<Arc<dyn Index>>,
    closed: bool,
}

pub struct IndexBackfill {
    db: Arc<dyn Database>,
    primary: Arc<dyn Index>,
    registry: Arc<SchemaRegistry>,
    secondary: Arc<SecondaryIndex>,
    state: Mutex<BackfillState>,
    /// Highest secondary key the merge has committed, `None` before the
    /// merge starts.
    progress: Mutex<Option<Vec<u8>>>,
    batch_size: usize,
}

impl IndexBackfill {
    pub(crate) fn new(
        db: Arc<dyn Database>,
        primary: Arc<dyn Index>,
        registry: Arc<SchemaRegistry>,
        secondary: Arc<SecondaryIndex>,
        batch_size: usize,
    ) -> Result<Arc<IndexBackfill>> {
        let sorter = db.new_sorter()?;
        let tracker = db.new_temporary_index()?;
        Ok(Arc::new(IndexBackfill {
            db,
            primary,
            registry,
            secondary,
            state: Mutex::new(BackfillState {
                sorter: Some(sorter),
                tracker: Some(tracker),
                closed: false,
            }),
            progress: Mutex::new(None),
            batch_size: batch_size.max(1),
        }))
    }

    /// An insert always goes through the live secondary directly.
    pub(crate) fn live_insert(&self, txn: &dyn Transaction, row: &Row) -> Result<()> {
        let (key, value) = self.secondary.entry_for(row)?;
        self.secondary.index().store(txn, &key, &value)?;
        Ok(())
    }

    /// A delete hits the live secondary, and is tracked when the merge has
    /// not yet visited the key; a visited key's live delete is sufficient
    /// on its own.
    pub(crate) fn live_delete(&self, txn: &dyn Transaction, old: &Row) -> Result<()> {
        let (key, _) = self.secondary.entry_for(old)?;
        self.delete_entry(txn, &key)
    }

    pub(crate) fn live_update(&self, txn: &dyn Transaction, old: &Row, new: &Row) -> Result<()> {
        let (old_key, _) = self.secondary.entry_for(old)?;
        let (new_key, new_value) = self.secondary.entry_for(new)?;
        if old_key != new_key {
            self.delete_entry(txn, &old_key)?;
        }
        self.secondary.index().store(txn, &new_key, &new_value)?;
        Ok(())
    }

    fn delete_entry(&self, txn: &dyn Transaction, key: &[u8]) -> Result<()> {
        self.secondary.index().delete(txn, key)?;
        let beyond_progress = {
            let progress = self.progress.lock();
            progress.as_deref().map_or(true, |p| key > p)
        };
        if beyond_progress {
            // The tracker write rides the writer's transaction, so a
            // rolled-back delete takes its tracking entry with it.
            let tracker = self.state.lock().tracker.clone();
            if let Some(tracker) = tracker {
                tracker.store(txn, key, &[])?;
            }
        }
        Ok(())
    }

    fn check_open(&self) -> Result<()> {
        if self.state.lock().closed {
            return Err(KvError::Closed.into());
        }
        Ok(())
    }

    /// Phase 1: scan the primary index in key order with read-committed
    /// locking, feeding secondary entries to the sorter in batches. The
    /// closed flag is observed at batch boundaries.
    pub(crate) fn scan_primary(&self) -> Result<()> {
        let txn = self.db.new_transaction(DurabilityMode::NoSync);
        txn.set_lock_mode(LockMode::ReadCommitted);

        let mut batch: Vec<(Vec<u8>, Vec<u8>)> = Vec::with_capacity(self.batch_size);
        let mut cursor = self.primary.new_cursor(txn.as_ref())?;
        let mut positioned = cursor.first()?;
        while positioned {
            if let (Some(key), Some(value)) = (cursor.key(), cursor.value()) {
                let row = self.registry.decode_row(key, value)?;
                batch.push(self.secondary.entry_for(&row)?);
            }
            if batch.len() >= self.batch_size {
                self.flush_batch(&mut batch)?;
            }
            positioned = cursor.next()?;
        }
        cursor.reset();
        drop(cursor);
        self.flush_batch(&mut batch)?;
        txn.commit()?;
        Ok(())
    }

    fn flush_batch(&self, batch: &mut Vec<(Vec<u8>, Vec<u8>)>) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            if let Some(sorter) = state.sorter.as_mut() {
                sorter.reset()?;
            }
            return Err(KvError::SorterReset.into());
        }
        if !batch.is_empty() {
            let sorter = state.sorter.as_mut().ok_or(KvError::SorterReset)?;
            sorter.add_batch(std::mem::take(batch))?;
        }
        Ok(())
    }

    /// Phase 2: drain the sorted stream. Each entry is inserted under an
    /// upgradable lock unless the live secondary or the tracker already
    /// accounts for it; progress is recorded after the commit, before the
    /// tracker entry is cleared.
    pub(crate) fn merge(&self) -> Result<()> {
        let (stream, tracker) = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(KvError::SorterReset.into());
            }
            let sorter = state.sorter.as_mut().ok_or(KvError::SorterReset)?;
            (
                sorter.finish_scan()?,
                state.tracker.clone().ok_or(KvError::SorterReset)?,
            )
        };

        let bogus = self.db.bogus_transaction();
        for (key, value) in stream {
            self.check_open()?;

            let txn = self.db.new_transaction(DurabilityMode::NoSync);
            txn.set_lock_mode(LockMode::UpgradableRead);
            let absent = !self.secondary.index().exists(txn.as_ref(), &key)?
                && !tracker.exists(txn.as_ref(), &key)?;
            if absent {
                self.secondary.index().store(txn.as_ref(), &key, &value)?;
            }
            txn.commit()?;

            *self.progress.lock() = Some(key.clone());
            tracker.delete(bogus.as_ref(), &key)?;
        }
        Ok(())
    }

    /// Tears down sorter and tracker after activation or failure.
    pub(crate) fn finish(&self) {
        let mut state = self.state.lock();
        state.sorter = None;
        if let Some(tracker) = state.tracker.take() {
            let _ = self.db.delete_index(tracker.id());
        }
    }

    /// Cancellation: flips the state flag, resets the sorter, and eagerly
    /// deletes the tracker. In-flight batches observe the flag and abort;
    /// no background work touches the store afterwards.
    pub(crate) fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        if let Some(sorter) = state.sorter.as_mut() {
            let _ = sorter.reset();
        }
        state.sorter = None;
        if let Some(tracker) = state.tracker.take() {
            let _ = self.db.delete_index(tracker.id());
        }
    }

    pub(crate) fn notify(&self, event: EventType, message: &str) {
        self.db.event_listener().notify(event, message);
    }

    pub(crate) fn fail(&self, err: &DbError) {
        self.notify(
            EventType::IndexBuildFailed,
            &format!("backfill of `{}` failed: {err}", self.secondary.name()),
        );
        self.close();
    }
}
