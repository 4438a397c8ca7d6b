//! Write triggers and their drained handoff.
//!
//! Each table holds one swappable [`Trigger`]. A trigger is in one of
//! three states: *skip* (nothing to maintain), *active* (propagates writes
//! to secondary indexes and backfill tracking), or *disabled* (drained
//! during a swap, rejecting new users). Writers acquire the current
//! trigger once per operation; [`TriggerSet::swap`] publishes the new
//! trigger and then waits for the old one's use count to drain, so both
//! may run concurrently during the transition window — each is correct on
//! its own.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex, RwLock};

use crate::error::Result;
use crate::kv::Transaction;
use crate::schema::Row;
use crate::table::backfill::IndexBackfill;
use crate::table::secondary::SecondaryIndex;

pub struct Trigger {
    secondaries: Vec<Arc<SecondaryIndex>>,
    building: Vec<Arc<IndexBackfill>>,
    use_count: Mutex<usize>,
    drained: Condvar,
    disabled: AtomicBool,
}

impl Trigger {
    pub(crate) fn skip() -> Arc<Trigger> {
        Trigger::new(Vec::new(), Vec::new())
    }

    pub(crate) fn new(
        secondaries: Vec<Arc<SecondaryIndex>>,
        building: Vec<Arc<IndexBackfill>>,
    ) -> Arc<Trigger> {
        Arc::new(Trigger {
            secondaries,
            building,
            use_count: Mutex::new(0),
            drained: Condvar::new(),
            disabled: AtomicBool::new(false),
        })
    }

    /// Whether the trigger has nothing to do, letting writers skip the
    /// old-row lookup.
    pub(crate) fn is_skip(&self) -> bool {
        self.secondaries.is_empty() && self.building.is_empty()
    }

    fn used(&self) -> bool {
        let mut count = self.use_count.lock();
        if self.disabled.load(Ordering::Acquire) {
            return false;
        }
        *count += 1;
        true
    }

    fn unused(&self) {
        let mut count = self.use_count.lock();
        *count -= 1;
        if *count == 0 {
            self.drained.notify_all();
        }
    }

    /// Disables the trigger and blocks until every in-flight user is gone.
    fn disable_and_drain(&self) {
        self.disabled.store(true, Ordering::Release);
        let mut count = self.use_count.lock();
        while *count != 0 {
            self.drained.wait(&mut count);
        }
    }

    pub(crate) fn row_inserted(&self, txn: &dyn Transaction, row: &Row) -> Result<()> {
        for secondary in &self.secondaries {
            let (key, value) = secondary.entry_for(row)?;
            secondary.index().store(txn, &key, &value)?;
        }
        for backfill in &self.building {
            backfill.live_insert(txn, row)?;
        }
        Ok(())
    }

    pub(crate) fn row_deleted(&self, txn: &dyn Transaction, old: &Row) -> Result<()> {
        for secondary in &self.secondaries {
            let (key, _) = secondary.entry_for(old)?;
            secondary.index().delete(txn, &key)?;
        }
        for backfill in &self.building {
            backfill.live_delete(txn, old)?;
        }
        Ok(())
    }

    pub(crate) fn row_updated(&self, txn: &dyn Transaction, old: &Row, new: &Row) -> Result<()> {
        for secondary in &self.secondaries {
            let (old_key, _) = secondary.entry_for(old)?;
            let (new_key, new_value) = secondary.entry_for(new)?;
            if old_key != new_key {
                secondary.index().delete(txn, &old_key)?;
            }
            secondary.index().store(txn, &new_key, &new_value)?;
        }
        for backfill in &self.building {
            backfill.live_update(txn, old, new)?;
        }
        Ok(())
    }
}

/// Guard for one trigger use; pairs `used` with `unused` on every exit
/// path.
pub(crate) struct TriggerGuard {
    trigger: Arc<Trigger>,
}

impl TriggerGuard {
    pub(crate) fn trigger(&self) -> &Trigger {
        &self.trigger
    }
}

impl Drop for TriggerGuard {
    fn drop(&mut self) {
        self.trigger.unused();
    }
}

/// The table's trigger slot: acquire-on-read, drain-on-swap.
pub(crate) struct TriggerSet {
    current: RwLock<Arc<Trigger>>,
}

impl TriggerSet {
    pub(crate) fn new() -> TriggerSet {
        TriggerSet {
            current: RwLock::new(Trigger::skip()),
        }
    }

    /// Acquires the current trigger for one write. `None` means the
    /// trigger was disabled in the transition window; the caller re-reads
    /// and retries once.
    pub(crate) fn acquire(&self) -> Option<TriggerGuard> {
        let trigger = Arc::clone(&self.current.read());
        trigger.used().then(|| TriggerGuard { trigger })
    }

    /// Publishes `new` and drains the previous trigger before returning.
    pub(crate) fn swap(&self, new: Arc<Trigger>) {
        let old = std::mem::replace(&mut *self.current.write(), new);
        old.disable_and_drain();
    }
}
