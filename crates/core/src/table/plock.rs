//! Predicate locks.
//!
//! A scanner with predicate locking enabled registers its compiled
//! predicate for its lifetime. A write whose row would satisfy any
//! registered predicate blocks until the owning scanner finishes, which is
//! what makes range scans serializable. Writes by the scanner's own
//! transaction never conflict with its own predicate.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use rowstore_primitives::IndexId;

use crate::error::{KvError, Result};
use crate::predicate::RowPredicate;

struct Entry {
    id: u64,
    owner_txn: u64,
    predicate: Arc<RowPredicate>,
}

#[derive(Default)]
pub struct PredicateLockSet {
    entries: Mutex<Vec<Entry>>,
    next_id: Mutex<u64>,
    released: Condvar,
}

impl PredicateLockSet {
    pub fn new() -> Arc<PredicateLockSet> {
        Arc::new(PredicateLockSet::default())
    }

    /// Registers `predicate` on behalf of `owner_txn`; the returned guard
    /// holds the lock until dropped.
    pub fn register(
        self: &Arc<Self>,
        owner_txn: u64,
        predicate: Arc<RowPredicate>,
    ) -> PredicateLockGuard {
        let id = {
            let mut next = self.next_id.lock();
            *next += 1;
            *next
        };
        self.entries.lock().push(Entry {
            id,
            owner_txn,
            predicate,
        });
        PredicateLockGuard {
            set: Arc::clone(self),
            id,
        }
    }

    /// Blocks while any foreign predicate accepts the written row. Inserts
    /// and stores test the full key/value; deletes carry no new value and
    /// test the key conservatively.
    pub fn check_write(
        &self,
        writer_txn: u64,
        index: IndexId,
        key: &[u8],
        value: Option<&[u8]>,
        timeout: Duration,
    ) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut entries = self.entries.lock();
        loop {
            let mut conflict = false;
            for entry in entries.iter() {
                if entry.owner_txn == writer_txn {
                    continue;
                }
                let hit = match value {
                    Some(value) => entry.predicate.test_kv(key, value)?,
                    None => entry.predicate.test_key(key)?,
                };
                if hit {
                    conflict = true;
                    break;
                }
            }
            if !conflict {
                return Ok(());
            }
            if self.released.wait_until(&mut entries, deadline).timed_out() {
                return Err(KvError::LockTimeout {
                    index,
                    millis: timeout.as_millis() as u64,
                }
                .into());
            }
        }
    }

    fn release(&self, id: u64) {
        let mut entries = self.entries.lock();
        entries.retain(|entry| entry.id != id);
        self.released.notify_all();
    }

    pub fn held_count(&self) -> usize {
        self.entries.lock().len()
    }
}

/// Releases the registered predicate on drop; the scanner's `finished()`
/// path drops it explicitly.
pub struct PredicateLockGuard {
    set: Arc<PredicateLockSet>,
    id: u64,
}

impl Drop for PredicateLockGuard {
    fn drop(&mut self) {
        self.set.release(self.id);
    }
}
