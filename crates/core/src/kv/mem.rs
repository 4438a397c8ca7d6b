//! In-memory reference implementation of the store contract.
//!
//! Indexes are ordered maps behind a `RwLock`. Writes apply directly to the
//! map under an exclusive row lock and record an undo entry; rollback
//! replays the undo log in reverse. Readers acquire row locks per the
//! transaction's [`LockMode`], which is what gives read-committed its
//! blocking behavior: a writer's exclusive lock is held until commit.
//!
//! Lock acquisition order: row locks are always taken before the tree
//! `RwLock`, and the tree lock is never held across a row-lock wait.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rowstore_primitives::IndexId;

use crate::error::KvError;
use crate::kv::lock::{Acquired, LockStrength, LockTable, TxnId};
use crate::kv::{
    Cursor, Database, DurabilityMode, EventListener, Index, LockMode, LogListener, Sorter,
    Transaction,
};

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(1);

/// Extension the memory store needs to recover its own transaction type
/// from a `&dyn Transaction`.
trait AnyTransaction {
    fn as_mem(&self) -> Option<&MemTransaction>;
}

impl AnyTransaction for dyn Transaction + '_ {
    fn as_mem(&self) -> Option<&MemTransaction> {
        // Bogus transactions are MemTransactions too; the distinction is
        // the `bogus` flag, not the type.
        self.as_any().downcast_ref::<MemTransaction>()
    }
}

pub struct MemDatabase {
    indexes: Mutex<IndexRegistry>,
    locks: Arc<LockTable>,
    listener: Mutex<Arc<dyn EventListener>>,
    next_txn: AtomicU64,
    bogus: Mutex<Option<Arc<MemTransaction>>>,
    closed: AtomicBool,
}

#[derive(Default)]
struct IndexRegistry {
    by_name: HashMap<String, Arc<MemIndex>>,
    by_id: HashMap<IndexId, Arc<MemIndex>>,
    next_id: u64,
}

impl MemDatabase {
    pub fn new() -> Arc<MemDatabase> {
        Arc::new(MemDatabase {
            indexes: Mutex::new(IndexRegistry::default()),
            locks: Arc::new(LockTable::new()),
            listener: Mutex::new(Arc::new(LogListener)),
            next_txn: AtomicU64::new(1),
            bogus: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    fn check_open(&self) -> Result<(), KvError> {
        if self.closed.load(Ordering::Acquire) {
            Err(KvError::Closed)
        } else {
            Ok(())
        }
    }

    fn make_txn(&self, durability: DurabilityMode, bogus: bool) -> Arc<MemTransaction> {
        Arc::new(MemTransaction {
            id: self.next_txn.fetch_add(1, Ordering::Relaxed),
            locks: Arc::clone(&self.locks),
            bogus,
            state: Mutex::new(TxnState {
                lock_mode: LockMode::UpgradableRead,
                timeout: DEFAULT_LOCK_TIMEOUT,
                durability,
                scopes: vec![Scope::default()],
            }),
        })
    }

    /// Marks the database closed; subsequent operations fail with
    /// [`KvError::Closed`].
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

impl Database for MemDatabase {
    fn open_index(&self, name: &str) -> Result<Arc<dyn Index>, KvError> {
        self.check_open()?;
        let mut registry = self.indexes.lock();
        if let Some(index) = registry.by_name.get(name) {
            return Ok(Arc::clone(index) as Arc<dyn Index>);
        }
        registry.next_id += 1;
        let index = MemIndex::new(IndexId(registry.next_id), name.to_owned(), &self.locks);
        registry.by_name.insert(name.to_owned(), Arc::clone(&index));
        registry.by_id.insert(index.id, Arc::clone(&index));
        Ok(index)
    }

    fn find_index(&self, name: &str) -> Result<Option<Arc<dyn Index>>, KvError> {
        self.check_open()?;
        Ok(self
            .indexes
            .lock()
            .by_name
            .get(name)
            .map(|index| Arc::clone(index) as Arc<dyn Index>))
    }

    fn new_temporary_index(&self) -> Result<Arc<dyn Index>, KvError> {
        self.check_open()?;
        let mut registry = self.indexes.lock();
        registry.next_id += 1;
        let index = MemIndex::new(
            IndexId(registry.next_id),
            format!("#temp.{}", registry.next_id),
            &self.locks,
        );
        registry
            .by_name
            .insert(index.name.clone(), Arc::clone(&index));
        registry.by_id.insert(index.id, Arc::clone(&index));
        Ok(index)
    }

    fn delete_index(&self, id: IndexId) -> Result<(), KvError> {
        let mut registry = self.indexes.lock();
        if let Some(index) = registry.by_id.remove(&id) {
            registry.by_name.remove(&index.name);
            index.closed.store(true, Ordering::Release);
            index.tree.write().clear();
        }
        Ok(())
    }

    fn new_transaction(&self, durability: DurabilityMode) -> Arc<dyn Transaction> {
        self.make_txn(durability, false)
    }

    fn bogus_transaction(&self) -> Arc<dyn Transaction> {
        let mut bogus = self.bogus.lock();
        let txn = bogus.get_or_insert_with(|| self.make_txn(DurabilityMode::NoSync, true));
        Arc::clone(txn) as Arc<dyn Transaction>
    }

    fn new_sorter(&self) -> Result<Box<dyn Sorter>, KvError> {
        self.check_open()?;
        Ok(Box::new(MemSorter::default()))
    }

    fn event_listener(&self) -> Arc<dyn EventListener> {
        Arc::clone(&self.listener.lock())
    }

    fn set_event_listener(&self, listener: Arc<dyn EventListener>) {
        *self.listener.lock() = listener;
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

struct UndoOp {
    index: Arc<MemIndex>,
    key: Box<[u8]>,
    prev: Option<Arc<[u8]>>,
}

#[derive(Default)]
struct Scope {
    undo: Vec<UndoOp>,
    locks: Vec<(IndexId, Box<[u8]>)>,
}

struct TxnState {
    lock_mode: LockMode,
    timeout: Duration,
    durability: DurabilityMode,
    scopes: Vec<Scope>,
}

pub struct MemTransaction {
    id: TxnId,
    locks: Arc<LockTable>,
    bogus: bool,
    state: Mutex<TxnState>,
}

impl MemTransaction {
    fn record_lock(&self, index: IndexId, key: &[u8]) {
        let mut state = self.state.lock();
        let scope = state.scopes.last_mut().expect("root scope always present");
        scope.locks.push((index, key.into()));
    }

    fn record_undo(&self, op: UndoOp) {
        let mut state = self.state.lock();
        let scope = state.scopes.last_mut().expect("root scope always present");
        scope.undo.push(op);
    }

    /// Takes an exclusive row lock for a write, remembering newly acquired
    /// ownership in the current scope.
    fn lock_for_write(&self, index: IndexId, key: &[u8]) -> Result<(), KvError> {
        if self.bogus {
            return Ok(());
        }
        let timeout = self.state.lock().timeout;
        if self
            .locks
            .acquire(self.id, index, key, LockStrength::Exclusive, timeout)?
            == Acquired::New
        {
            self.record_lock(index, key);
        }
        Ok(())
    }

    /// Takes whatever row lock the current mode demands for a read.
    /// Read-committed releases immediately; retained modes record the lock.
    fn lock_for_read(&self, index: IndexId, key: &[u8]) -> Result<(), KvError> {
        if self.bogus {
            return Ok(());
        }
        let (mode, timeout) = {
            let state = self.state.lock();
            (state.lock_mode, state.timeout)
        };
        let strength = match mode {
            LockMode::Unsafe | LockMode::ReadUncommitted => return Ok(()),
            LockMode::ReadCommitted | LockMode::RepeatableRead => LockStrength::Shared,
            LockMode::UpgradableRead => LockStrength::Upgradable,
        };
        let acquired = self.locks.acquire(self.id, index, key, strength, timeout)?;
        if mode == LockMode::ReadCommitted {
            if acquired == Acquired::New {
                self.locks.release(self.id, index, key);
            }
        } else if acquired == Acquired::New {
            self.record_lock(index, key);
        }
        Ok(())
    }

    fn rollback_scope(&self, scope: Scope) {
        for op in scope.undo.into_iter().rev() {
            let mut tree = op.index.tree.write();
            match op.prev {
                Some(prev) => tree.insert(op.key, prev),
                None => tree.remove(&op.key),
            };
        }
        self.locks.release_all(self.id, scope.locks.iter());
    }
}

impl Transaction for MemTransaction {
    fn id(&self) -> u64 {
        self.id
    }

    fn enter(&self) -> Result<(), KvError> {
        if self.bogus {
            return Ok(());
        }
        self.state.lock().scopes.push(Scope::default());
        Ok(())
    }

    fn exit(&self) -> Result<(), KvError> {
        if self.bogus {
            return Ok(());
        }
        let scope = {
            let mut state = self.state.lock();
            if state.scopes.len() == 1 {
                // Exiting the root scope resets the transaction.
                std::mem::take(&mut state.scopes[0])
            } else {
                state.scopes.pop().ok_or(KvError::ScopeUnderflow)?
            }
        };
        self.rollback_scope(scope);
        Ok(())
    }

    fn commit(&self) -> Result<(), KvError> {
        if self.bogus {
            return Ok(());
        }
        let root = {
            let mut state = self.state.lock();
            if state.scopes.len() > 1 {
                // A nested commit folds its effects into the parent, which
                // now owns the undo entries and the locks.
                let scope = state.scopes.pop().ok_or(KvError::ScopeUnderflow)?;
                let parent = state.scopes.last_mut().expect("parent scope exists");
                parent.undo.extend(scope.undo);
                parent.locks.extend(scope.locks);
                None
            } else {
                Some(std::mem::take(&mut state.scopes[0]))
            }
        };
        if let Some(root) = root {
            self.locks.release_all(self.id, root.locks.iter());
        }
        Ok(())
    }

    fn reset(&self) -> Result<(), KvError> {
        if self.bogus {
            return Ok(());
        }
        let scopes = {
            let mut state = self.state.lock();
            let scopes = std::mem::take(&mut state.scopes);
            state.scopes.push(Scope::default());
            scopes
        };
        for scope in scopes.into_iter().rev() {
            self.rollback_scope(scope);
        }
        Ok(())
    }

    fn lock_mode(&self) -> LockMode {
        self.state.lock().lock_mode
    }

    fn set_lock_mode(&self, mode: LockMode) {
        self.state.lock().lock_mode = mode;
    }

    fn lock_timeout(&self) -> Duration {
        self.state.lock().timeout
    }

    fn set_lock_timeout(&self, timeout: Duration) {
        self.state.lock().timeout = timeout;
    }

    fn durability_mode(&self) -> DurabilityMode {
        self.state.lock().durability
    }

    fn unlock(&self, index: IndexId, key: &[u8]) {
        if self.bogus {
            return;
        }
        // Never drop a lock protecting this transaction's own write.
        if self.locks.held(self.id, index, key) == Some(LockStrength::Exclusive) {
            return;
        }
        self.locks.release(self.id, index, key);
        let mut state = self.state.lock();
        for scope in state.scopes.iter_mut() {
            scope.locks.retain(|(i, k)| !(*i == index && **k == *key));
        }
    }

    fn is_bogus(&self) -> bool {
        self.bogus
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct MemIndex {
    id: IndexId,
    name: String,
    tree: RwLock<BTreeMap<Box<[u8]>, Arc<[u8]>>>,
    locks: Arc<LockTable>,
    closed: AtomicBool,
    // Lets undo entries hold the tree alive even if the index is dropped
    // from the registry mid-transaction.
    self_ref: std::sync::Weak<MemIndex>,
}

impl MemIndex {
    fn new(id: IndexId, name: String, locks: &Arc<LockTable>) -> Arc<MemIndex> {
        Arc::new_cyclic(|self_ref| MemIndex {
            id,
            name,
            tree: RwLock::new(BTreeMap::new()),
            locks: Arc::clone(locks),
            closed: AtomicBool::new(false),
            self_ref: self_ref.clone(),
        })
    }

    fn arc(&self) -> Arc<MemIndex> {
        // The upgrade cannot fail while `&self` is alive.
        self.self_ref.upgrade().expect("index allocation alive")
    }

    fn check_open(&self) -> Result<(), KvError> {
        if self.closed.load(Ordering::Acquire) {
            Err(KvError::IndexClosed(self.id))
        } else {
            Ok(())
        }
    }

    fn mem_txn<'a>(&self, txn: &'a dyn Transaction) -> Result<&'a MemTransaction, KvError> {
        txn.as_mem().ok_or(KvError::ForeignTransaction)
    }
}

impl Index for MemIndex {
    fn id(&self) -> IndexId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn new_cursor<'a>(&'a self, txn: &'a dyn Transaction) -> Result<Box<dyn Cursor + 'a>, KvError> {
        self.check_open()?;
        let mem_txn = self.mem_txn(txn)?;
        Ok(Box::new(MemCursor {
            index: self,
            txn: mem_txn,
            key: None,
            value: None,
            autoload: true,
        }))
    }

    fn load(&self, txn: &dyn Transaction, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        self.check_open()?;
        self.mem_txn(txn)?.lock_for_read(self.id, key)?;
        Ok(self.tree.read().get(key).map(|v| v.to_vec()))
    }

    fn exists(&self, txn: &dyn Transaction, key: &[u8]) -> Result<bool, KvError> {
        self.check_open()?;
        self.mem_txn(txn)?.lock_for_read(self.id, key)?;
        Ok(self.tree.read().contains_key(key))
    }

    fn store(&self, txn: &dyn Transaction, key: &[u8], value: &[u8]) -> Result<(), KvError> {
        self.check_open()?;
        let mem_txn = self.mem_txn(txn)?;
        mem_txn.lock_for_write(self.id, key)?;
        let prev = self
            .tree
            .write()
            .insert(key.into(), Arc::from(value.to_vec().into_boxed_slice()));
        if !mem_txn.bogus {
            mem_txn.record_undo(UndoOp {
                index: self.arc(),
                key: key.into(),
                prev,
            });
        }
        Ok(())
    }

    fn delete(&self, txn: &dyn Transaction, key: &[u8]) -> Result<bool, KvError> {
        self.check_open()?;
        let mem_txn = self.mem_txn(txn)?;
        mem_txn.lock_for_write(self.id, key)?;
        let prev = self.tree.write().remove(key);
        let was_present = prev.is_some();
        if !mem_txn.bogus && was_present {
            mem_txn.record_undo(UndoOp {
                index: self.arc(),
                key: key.into(),
                prev,
            });
        }
        Ok(was_present)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

pub struct MemCursor<'a> {
    index: &'a MemIndex,
    txn: &'a MemTransaction,
    key: Option<Box<[u8]>>,
    value: Option<Arc<[u8]>>,
    autoload: bool,
}

impl MemCursor<'_> {
    /// Positions at the entry selected by `pick` under the tree lock, then
    /// row-locks and publishes it.
    fn position<F>(&mut self, pick: F) -> Result<bool, KvError>
    where
        F: FnOnce(&BTreeMap<Box<[u8]>, Arc<[u8]>>) -> Option<(Box<[u8]>, Arc<[u8]>)>,
    {
        self.index.check_open()?;
        let found = pick(&self.index.tree.read());
        match found {
            Some((key, value)) => {
                // Row lock after releasing the tree lock; re-read the value
                // afterwards in case a writer got in between.
                self.txn.lock_for_read(self.index.id, &key)?;
                let value = self.index.tree.read().get(&key).cloned();
                match value {
                    Some(value) => {
                        self.value = self.autoload.then_some(value);
                        self.key = Some(key);
                        Ok(true)
                    }
                    // Deleted while we waited; continue from here.
                    None => {
                        self.key = Some(key);
                        self.value = None;
                        self.next()
                    }
                }
            }
            None => {
                self.key = None;
                self.value = None;
                Ok(false)
            }
        }
    }
}

impl Cursor for MemCursor<'_> {
    fn autoload(&mut self, on: bool) {
        self.autoload = on;
    }

    fn first(&mut self) -> Result<bool, KvError> {
        self.position(|tree| tree.iter().next().map(|(k, v)| (k.clone(), v.clone())))
    }

    fn last(&mut self) -> Result<bool, KvError> {
        self.position(|tree| tree.iter().next_back().map(|(k, v)| (k.clone(), v.clone())))
    }

    fn next(&mut self) -> Result<bool, KvError> {
        match self.key.take() {
            None => self.first(),
            Some(key) => self.position(move |tree| {
                tree.range((Bound::Excluded(key), Bound::Unbounded))
                    .next()
                    .map(|(k, v)| (k.clone(), v.clone()))
            }),
        }
    }

    fn previous(&mut self) -> Result<bool, KvError> {
        match self.key.take() {
            None => self.last(),
            Some(key) => self.position(move |tree| {
                tree.range((Bound::Unbounded, Bound::Excluded(key)))
                    .next_back()
                    .map(|(k, v)| (k.clone(), v.clone()))
            }),
        }
    }

    fn find(&mut self, key: &[u8]) -> Result<bool, KvError> {
        let probe: Box<[u8]> = key.into();
        let found = self.position(move |tree| {
            tree.get_key_value(&probe).map(|(k, v)| (k.clone(), v.clone()))
        })?;
        Ok(found)
    }

    fn find_ge(&mut self, key: &[u8]) -> Result<bool, KvError> {
        let probe: Box<[u8]> = key.into();
        self.position(move |tree| {
            tree.range((Bound::Included(probe), Bound::Unbounded))
                .next()
                .map(|(k, v)| (k.clone(), v.clone()))
        })
    }

    fn find_gt(&mut self, key: &[u8]) -> Result<bool, KvError> {
        let probe: Box<[u8]> = key.into();
        self.position(move |tree| {
            tree.range((Bound::Excluded(probe), Bound::Unbounded))
                .next()
                .map(|(k, v)| (k.clone(), v.clone()))
        })
    }

    fn key(&self) -> Option<&[u8]> {
        self.key.as_deref()
    }

    fn value(&self) -> Option<&[u8]> {
        self.value.as_deref()
    }

    fn load_value(&mut self) -> Result<Option<&[u8]>, KvError> {
        if self.value.is_none() {
            if let Some(key) = &self.key {
                self.value = self.index.tree.read().get(key.as_ref()).cloned();
            }
        }
        Ok(self.value.as_deref())
    }

    fn commit(&mut self, value: Option<&[u8]>) -> Result<(), KvError> {
        let key = self.key.clone().ok_or(KvError::CursorUnpositioned)?;
        match value {
            Some(value) => {
                self.index.store(self.txn as &dyn Transaction, &key, value)?;
                self.value = Some(Arc::from(value.to_vec().into_boxed_slice()));
            }
            None => {
                self.index.delete(self.txn as &dyn Transaction, &key)?;
                self.value = None;
            }
        }
        Ok(())
    }

    fn delete(&mut self) -> Result<(), KvError> {
        self.commit(None)
    }

    fn reset(&mut self) {
        self.key = None;
        self.value = None;
    }
}

/// In-memory sorter: batches accumulate unordered, `finish_scan` sorts once
/// and deduplicates with last-wins semantics.
#[derive(Default)]
pub struct MemSorter {
    pairs: Vec<(Vec<u8>, Vec<u8>)>,
}

impl Sorter for MemSorter {
    fn add_batch(&mut self, mut pairs: Vec<(Vec<u8>, Vec<u8>)>) -> Result<(), KvError> {
        self.pairs.append(&mut pairs);
        Ok(())
    }

    fn finish_scan(
        &mut self,
    ) -> Result<Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + Send>, KvError> {
        let mut pairs = std::mem::take(&mut self.pairs);
        // Stable sort keeps insertion order among duplicates, so keeping
        // the last occurrence per key gives last-wins.
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        let mut deduped: Vec<(Vec<u8>, Vec<u8>)> = Vec::with_capacity(pairs.len());
        for pair in pairs {
            match deduped.last_mut() {
                Some(last) if last.0 == pair.0 => *last = pair,
                _ => deduped.push(pair),
            }
        }
        Ok(Box::new(deduped.into_iter()))
    }

    fn reset(&mut self) -> Result<(), KvError> {
        self.pairs.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn db_index() -> (Arc<MemDatabase>, Arc<dyn Index>) {
        let db = MemDatabase::new();
        let index = db.open_index("t").unwrap();
        (db, index)
    }

    #[test]
    fn store_load_roundtrip() {
        let (db, index) = db_index();
        let txn = db.new_transaction(DurabilityMode::NoSync);
        index.store(txn.as_ref(), b"a", b"1").unwrap();
        assert_eq!(index.load(txn.as_ref(), b"a").unwrap(), Some(b"1".to_vec()));
        txn.commit().unwrap();
        let txn2 = db.new_transaction(DurabilityMode::NoSync);
        assert_eq!(index.load(txn2.as_ref(), b"a").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn rollback_restores_previous_values() {
        let (db, index) = db_index();
        let txn = db.new_transaction(DurabilityMode::NoSync);
        index.store(txn.as_ref(), b"a", b"1").unwrap();
        txn.commit().unwrap();

        let txn = db.new_transaction(DurabilityMode::NoSync);
        index.store(txn.as_ref(), b"a", b"2").unwrap();
        index.store(txn.as_ref(), b"b", b"3").unwrap();
        index.delete(txn.as_ref(), b"a").unwrap();
        txn.reset().unwrap();

        let txn = db.new_transaction(DurabilityMode::NoSync);
        assert_eq!(index.load(txn.as_ref(), b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(index.load(txn.as_ref(), b"b").unwrap(), None);
    }

    #[test]
    fn nested_scope_commit_folds_into_parent() {
        let (db, index) = db_index();
        let txn = db.new_transaction(DurabilityMode::NoSync);
        txn.enter().unwrap();
        index.store(txn.as_ref(), b"k", b"v").unwrap();
        txn.commit().unwrap(); // nested commit
        txn.reset().unwrap(); // outer rollback undoes the nested write

        let txn = db.new_transaction(DurabilityMode::NoSync);
        assert_eq!(index.load(txn.as_ref(), b"k").unwrap(), None);
    }

    #[test]
    fn nested_scope_exit_rolls_back_only_inner_writes() {
        let (db, index) = db_index();
        let txn = db.new_transaction(DurabilityMode::NoSync);
        index.store(txn.as_ref(), b"outer", b"1").unwrap();
        txn.enter().unwrap();
        index.store(txn.as_ref(), b"inner", b"2").unwrap();
        txn.exit().unwrap();
        txn.commit().unwrap();

        let txn = db.new_transaction(DurabilityMode::NoSync);
        assert_eq!(index.load(txn.as_ref(), b"outer").unwrap(), Some(b"1".to_vec()));
        assert_eq!(index.load(txn.as_ref(), b"inner").unwrap(), None);
    }

    #[test]
    fn cursor_iterates_in_key_order() {
        let (db, index) = db_index();
        let txn = db.bogus_transaction();
        for key in [b"c", b"a", b"b"] {
            index.store(txn.as_ref(), key, b"x").unwrap();
        }
        let txn = db.new_transaction(DurabilityMode::NoSync);
        let mut cursor = index.new_cursor(txn.as_ref()).unwrap();
        let mut seen = Vec::new();
        let mut has = cursor.first().unwrap();
        while has {
            seen.push(cursor.key().unwrap().to_vec());
            has = cursor.next().unwrap();
        }
        assert_eq!(seen, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn exclusive_write_blocks_read_committed_reader() {
        let (db, index) = db_index();
        let writer = db.new_transaction(DurabilityMode::NoSync);
        index.store(writer.as_ref(), b"k", b"new").unwrap();

        let reader = db.new_transaction(DurabilityMode::NoSync);
        reader.set_lock_mode(LockMode::ReadCommitted);
        reader.set_lock_timeout(Duration::from_millis(20));
        assert!(matches!(
            index.load(reader.as_ref(), b"k"),
            Err(KvError::LockTimeout { .. })
        ));

        writer.commit().unwrap();
        assert_eq!(index.load(reader.as_ref(), b"k").unwrap(), Some(b"new".to_vec()));
    }

    #[test]
    fn sorter_sorts_and_dedupes_last_wins() {
        let mut sorter = MemSorter::default();
        sorter
            .add_batch(vec![
                (b"b".to_vec(), b"1".to_vec()),
                (b"a".to_vec(), b"2".to_vec()),
            ])
            .unwrap();
        sorter
            .add_batch(vec![(b"b".to_vec(), b"3".to_vec())])
            .unwrap();
        let drained: Vec<_> = sorter.finish_scan().unwrap().collect();
        assert_eq!(
            drained,
            vec![
                (b"a".to_vec(), b"2".to_vec()),
                (b"b".to_vec(), b"3".to_vec()),
            ]
        );
    }
}
