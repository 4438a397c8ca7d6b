//! Factory cache keyed by canonical filter strings.
//!
//! Two-level lookup: a ready map, and a per-key in-progress latch that
//! guarantees at most one concurrent compilation per canonical string. The
//! first thread to miss inserts the latch and compiles outside the map
//! lock; others wait on the condvar and re-read. A failed compilation
//! releases the latch and rethrows, so a later caller can retry.
//!
//! The cache owns its entries and is dropped with the owning table; there
//! is no weak-reference second level.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::error::{DbError, Result};

enum Slot<T> {
    Ready(Arc<T>),
    Pending,
}

pub struct FilterCache<T> {
    slots: Mutex<HashMap<String, Slot<T>>>,
    published: Condvar,
}

impl<T> Default for FilterCache<T> {
    fn default() -> FilterCache<T> {
        FilterCache {
            slots: Mutex::new(HashMap::new()),
            published: Condvar::new(),
        }
    }
}

impl<T> FilterCache<T> {
    pub fn new() -> FilterCache<T> {
        FilterCache::default()
    }

    /// Returns the cached value for `key`, computing it at most once per
    /// concurrent set of callers.
    pub fn get_or_compute(
        &self,
        key: &str,
        compute: impl FnOnce() -> Result<T>,
    ) -> Result<Arc<T>> {
        {
            let mut slots = self.slots.lock();
            loop {
                match slots.get(key) {
                    Some(Slot::Ready(value)) => return Ok(Arc::clone(value)),
                    Some(Slot::Pending) => {
                        self.published.wait(&mut slots);
                    }
                    None => {
                        slots.insert(key.to_owned(), Slot::Pending);
                        break;
                    }
                }
            }
        }

        // Compile outside the map lock.
        match compute() {
            Ok(value) => {
                let value = Arc::new(value);
                let mut slots = self.slots.lock();
                slots.insert(key.to_owned(), Slot::Ready(Arc::clone(&value)));
                self.published.notify_all();
                Ok(value)
            }
            Err(err) => {
                let mut slots = self.slots.lock();
                slots.remove(key);
                self.published.notify_all();
                Err(err)
            }
        }
    }

    /// Number of ready entries; pending latches do not count.
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|slot| matches!(slot, Slot::Ready(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// DbError is not Clone, so waiters retry computation after a failure
// rather than sharing the error.
const _: fn() = || {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<FilterCache<usize>>();
};
