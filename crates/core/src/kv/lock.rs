//! Row-lock table for the in-memory store.
//!
//! Locks come in three strengths. Shared locks coexist; an upgradable lock
//! coexists with shared locks but excludes other upgradables; an exclusive
//! lock excludes everything. A transaction re-acquiring at equal or lower
//! strength is a no-op; acquiring higher strength upgrades in place once
//! conflicting holders drain.
//!
//! There is no deadlock graph: conflicting waits are bounded by the lock
//! timeout and surface as [`KvError::LockTimeout`].

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use rowstore_primitives::IndexId;

use crate::error::KvError;

pub type TxnId = u64;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LockStrength {
    Shared,
    Upgradable,
    Exclusive,
}

#[derive(Default)]
struct Entry {
    exclusive: Option<TxnId>,
    upgradable: Option<TxnId>,
    shared: HashSet<TxnId>,
}

impl Entry {
    fn strength_of(&self, txn: TxnId) -> Option<LockStrength> {
        if self.exclusive == Some(txn) {
            Some(LockStrength::Exclusive)
        } else if self.upgradable == Some(txn) {
            Some(LockStrength::Upgradable)
        } else if self.shared.contains(&txn) {
            Some(LockStrength::Shared)
        } else {
            None
        }
    }

    fn grantable(&self, txn: TxnId, want: LockStrength) -> bool {
        let other = |holder: Option<TxnId>| holder.is_some_and(|h| h != txn);
        match want {
            LockStrength::Shared => !other(self.exclusive),
            LockStrength::Upgradable => !other(self.exclusive) && !other(self.upgradable),
            LockStrength::Exclusive => {
                !other(self.exclusive)
                    && !other(self.upgradable)
                    && self.shared.iter().all(|&h| h == txn)
            }
        }
    }

    fn grant(&mut self, txn: TxnId, want: LockStrength) {
        match want {
            LockStrength::Shared => {
                self.shared.insert(txn);
            }
            LockStrength::Upgradable => {
                self.shared.remove(&txn);
                self.upgradable = Some(txn);
            }
            LockStrength::Exclusive => {
                self.shared.remove(&txn);
                if self.upgradable == Some(txn) {
                    self.upgradable = None;
                }
                self.exclusive = Some(txn);
            }
        }
    }

    fn remove(&mut self, txn: TxnId) {
        if self.exclusive == Some(txn) {
            self.exclusive = None;
        }
        if self.upgradable == Some(txn) {
            self.upgradable = None;
        }
        self.shared.remove(&txn);
    }

    fn is_empty(&self) -> bool {
        self.exclusive.is_none() && self.upgradable.is_none() && self.shared.is_empty()
    }
}

type LockKey = (IndexId, Box<[u8]>);

/// Outcome of an acquisition attempt that succeeded.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Acquired {
    /// The transaction now holds the key and must remember to release it.
    New,
    /// The transaction already held the key at sufficient strength.
    AlreadyHeld,
}

#[derive(Default)]
pub struct LockTable {
    entries: Mutex<HashMap<LockKey, Entry>>,
    released: Condvar,
}

impl LockTable {
    pub fn new() -> LockTable {
        LockTable::default()
    }

    /// Blocks until `txn` holds `key` at `want` strength or the timeout
    /// elapses.
    pub fn acquire(
        &self,
        txn: TxnId,
        index: IndexId,
        key: &[u8],
        want: LockStrength,
        timeout: Duration,
    ) -> Result<Acquired, KvError> {
        let deadline = Instant::now() + timeout;
        let mut entries = self.entries.lock();
        loop {
            let entry = entries.entry((index, key.into())).or_default();
            let held = entry.strength_of(txn);
            if held >= Some(want) {
                return Ok(Acquired::AlreadyHeld);
            }
            if entry.grantable(txn, want) {
                entry.grant(txn, want);
                return Ok(if held.is_some() {
                    // Upgrades keep the original ownership record.
                    Acquired::AlreadyHeld
                } else {
                    Acquired::New
                });
            }
            if self.released.wait_until(&mut entries, deadline).timed_out() {
                return Err(KvError::LockTimeout {
                    index,
                    millis: timeout.as_millis() as u64,
                });
            }
        }
    }

    /// Drops whatever `txn` holds on `key`.
    pub fn release(&self, txn: TxnId, index: IndexId, key: &[u8]) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(&(index, key.into())) {
            entry.remove(txn);
            if entry.is_empty() {
                entries.remove(&(index, key.into()));
            }
            self.released.notify_all();
        }
    }

    /// Drops every lock in `keys`; used at commit/rollback.
    pub fn release_all<'k>(&self, txn: TxnId, keys: impl Iterator<Item = &'k LockKey>) {
        let mut entries = self.entries.lock();
        for key in keys {
            if let Some(entry) = entries.get_mut(key) {
                entry.remove(txn);
                if entry.is_empty() {
                    entries.remove(key);
                }
            }
        }
        self.released.notify_all();
    }

    /// The strength `txn` currently holds on `key`.
    pub fn held(&self, txn: TxnId, index: IndexId, key: &[u8]) -> Option<LockStrength> {
        self.entries
            .lock()
            .get(&(index, key.into()))
            .and_then(|entry| entry.strength_of(txn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const IDX: IndexId = IndexId(1);
    const SHORT: Duration = Duration::from_millis(20);
    const LONG: Duration = Duration::from_secs(5);

    #[test]
    fn shared_locks_coexist() {
        let table = LockTable::new();
        assert_eq!(
            table.acquire(1, IDX, b"k", LockStrength::Shared, SHORT).unwrap(),
            Acquired::New
        );
        assert_eq!(
            table.acquire(2, IDX, b"k", LockStrength::Shared, SHORT).unwrap(),
            Acquired::New
        );
        // Exclusive blocked while another holder remains.
        assert!(matches!(
            table.acquire(1, IDX, b"k", LockStrength::Exclusive, SHORT),
            Err(KvError::LockTimeout { .. })
        ));
        table.release(2, IDX, b"k");
        assert_eq!(
            table.acquire(1, IDX, b"k", LockStrength::Exclusive, SHORT).unwrap(),
            Acquired::AlreadyHeld
        );
    }

    #[test]
    fn upgradable_excludes_upgradable_but_not_shared() {
        let table = LockTable::new();
        table.acquire(1, IDX, b"k", LockStrength::Upgradable, SHORT).unwrap();
        table.acquire(2, IDX, b"k", LockStrength::Shared, SHORT).unwrap();
        assert!(table.acquire(2, IDX, b"k", LockStrength::Upgradable, SHORT).is_err());
    }

    #[test]
    fn reacquire_is_idempotent() {
        let table = LockTable::new();
        table.acquire(7, IDX, b"k", LockStrength::Exclusive, SHORT).unwrap();
        assert_eq!(
            table.acquire(7, IDX, b"k", LockStrength::Shared, SHORT).unwrap(),
            Acquired::AlreadyHeld
        );
        assert_eq!(table.held(7, IDX, b"k"), Some(LockStrength::Exclusive));
    }

    #[test]
    fn waiter_wakes_on_release() {
        let table = Arc::new(LockTable::new());
        table.acquire(1, IDX, b"k", LockStrength::Exclusive, SHORT).unwrap();

        let t2 = {
            let table = Arc::clone(&table);
            std::thread::spawn(move || table.acquire(2, IDX, b"k", LockStrength::Exclusive, LONG))
        };
        std::thread::sleep(Duration::from_millis(10));
        table.release(1, IDX, b"k");
        assert_eq!(t2.join().unwrap().unwrap(), Acquired::New);
    }
}
