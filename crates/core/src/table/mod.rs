//! The table layer: public row operations over one primary index.
//!
//! A [`Table`] binds a row type to its primary index, the schema-version
//! registry, the filter-factory cache, the swappable write trigger, and
//! whatever secondary indexes exist. Point operations and updaters route
//! every write through the active trigger so secondaries stay consistent;
//! scanners compile their filter once per canonical string and reuse the
//! cached factory.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rowstore_codec::{convert_value, Value};
use rowstore_primitives::ColumnId;

use crate::error::{DbError, Result, TableError};
use crate::filter::normalize::reduce;
use crate::filter::{parse, FilterCache};
use crate::kv::{Database, DurabilityMode, EventType, Index, LockMode, Transaction};
use crate::scan::{RowScanner, ScanControllerFactory};
use crate::schema::{Row, RowDescriptor, RowInfo, SchemaRegistry};

pub mod backfill;
pub mod plock;
pub mod secondary;
pub mod sequence;
pub mod trigger;

pub use plock::PredicateLockSet;
pub use secondary::{SecondaryDef, SecondaryIndex};

use backfill::IndexBackfill;
use sequence::SequenceAllocator;
use trigger::{Trigger, TriggerSet};

const META_INDEX: &str = "__meta";

/// Table-level knobs; everything has a workable default.
#[derive(Clone, Debug)]
pub struct TableOptions {
    /// Register scanner predicates as predicate locks, making range scans
    /// conflict with matching writes.
    pub predicate_locks: bool,
    /// Rows per sorter batch during index backfill.
    pub backfill_batch: usize,
    pub durability: DurabilityMode,
}

impl Default for TableOptions {
    fn default() -> TableOptions {
        TableOptions {
            predicate_locks: false,
            backfill_batch: 256,
            durability: DurabilityMode::default(),
        }
    }
}

pub struct Table {
    db: Arc<dyn Database>,
    name: String,
    primary: Arc<dyn Index>,
    meta: Arc<dyn Index>,
    registry: Arc<SchemaRegistry>,
    trigger: TriggerSet,
    secondaries: RwLock<Vec<Arc<SecondaryIndex>>>,
    factories: FilterCache<ScanControllerFactory>,
    plocks: Arc<PredicateLockSet>,
    sequences: Mutex<HashMap<ColumnId, Arc<SequenceAllocator>>>,
    bogus: Arc<dyn Transaction>,
    options: TableOptions,
}

impl Table {
    /// Opens (creating if needed) the table for `desc`, registering its
    /// schema version against the catalog.
    pub fn open(
        db: Arc<dyn Database>,
        desc: &RowDescriptor,
        options: TableOptions,
    ) -> Result<Arc<Table>> {
        let meta = db.open_index(META_INDEX)?;
        let registry = SchemaRegistry::open(Arc::clone(&db), Arc::clone(&meta), desc)?;
        let primary = db.open_index(&desc.name)?;
        let bogus = db.bogus_transaction();
        Ok(Arc::new(Table {
            db,
            name: desc.name.clone(),
            primary,
            meta,
            registry,
            trigger: TriggerSet::new(),
            secondaries: RwLock::new(Vec::new()),
            factories: FilterCache::new(),
            plocks: PredicateLockSet::new(),
            sequences: Mutex::new(HashMap::new()),
            bogus,
            options,
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn row_info(&self) -> Arc<RowInfo> {
        self.registry.current_info()
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    pub fn new_row(&self) -> Row {
        Row::new(self.row_info())
    }

    /// A fresh transaction with the table's durability mode.
    pub fn new_transaction(&self) -> Arc<dyn Transaction> {
        self.db.new_transaction(self.options.durability)
    }

    // --- encoding helpers ---

    fn encode_key(&self, row: &Row) -> Result<Vec<u8>> {
        let info = row.info();
        info.encode_key_with(|i| row.get(ColumnId(i as u16)))
    }

    fn encode_value(&self, row: &Row) -> Result<Vec<u8>> {
        let (version, info) = self.registry.current();
        let mut out = Vec::new();
        SchemaRegistry::encode_version(version, &mut out).map_err(DbError::Codec)?;
        let key_count = info.key_count();
        info.encode_value_cols_with(&mut out, |i| row.get(ColumnId((key_count + i) as u16)))?;
        Ok(out)
    }

    fn load_old(&self, txn: &dyn Transaction, key: &[u8]) -> Result<Option<Row>> {
        match self.primary.load(txn, key)? {
            Some(value) => Ok(Some(self.registry.decode_row(key, &value)?)),
            None => Ok(None),
        }
    }

    /// Runs `op` under the current trigger. A trigger disabled by a
    /// concurrent swap is re-acquired and retried once.
    fn with_trigger<R>(&self, mut op: impl FnMut(&Trigger) -> Result<R>) -> Result<R> {
        for _ in 0..2 {
            if let Some(guard) = self.trigger.acquire() {
                return op(guard.trigger());
            }
        }
        Err(TableError::TriggerUnavailable {
            row_type: self.name.clone(),
        }
        .into())
    }

    /// Runs `op` inside a nested transaction scope, committing on success
    /// and rolling the scope back on failure.
    fn in_scope<R>(
        &self,
        txn: &dyn Transaction,
        op: impl FnOnce() -> Result<R>,
    ) -> Result<R> {
        txn.enter()?;
        match op() {
            Ok(out) => {
                txn.commit()?;
                Ok(out)
            }
            Err(err) => {
                txn.exit()?;
                Err(err)
            }
        }
    }

    fn plock_check(&self, txn: &dyn Transaction, key: &[u8], value: Option<&[u8]>) -> Result<()> {
        self.plocks
            .check_write(txn.id(), self.primary.id(), key, value, txn.lock_timeout())
    }

    // --- point operations ---

    /// Fills the row's value columns from the stored row with the same
    /// key; `false` leaves them unset.
    pub fn load(&self, txn: &dyn Transaction, row: &mut Row) -> Result<bool> {
        let key = self.encode_key(row)?;
        match self.primary.load(txn, &key)? {
            Some(value) => {
                *row = self.registry.decode_row(&key, &value)?;
                Ok(true)
            }
            None => {
                let key_count = row.info().key_count();
                let mut cleared = Row::new(Arc::clone(row.info()));
                for i in 0..key_count {
                    let num = ColumnId(i as u16);
                    cleared.install(num, row.get(num)?.clone());
                }
                *row = cleared;
                Ok(false)
            }
        }
    }

    pub fn exists(&self, txn: &dyn Transaction, row: &Row) -> Result<bool> {
        let key = self.encode_key(row)?;
        Ok(self.primary.exists(txn, &key)?)
    }

    /// Unconditional upsert.
    pub fn store(&self, txn: &dyn Transaction, row: &mut Row) -> Result<()> {
        self.assign_auto(row)?;
        let key = self.encode_key(row)?;
        let value = self.encode_value(row)?;
        self.plock_check(txn, &key, Some(&value))?;
        self.with_trigger(|trigger| {
            self.in_scope(txn, || {
                let old = if trigger.is_skip() {
                    None
                } else {
                    self.load_old(txn, &key)?
                };
                self.primary.store(txn, &key, &value)?;
                match &old {
                    Some(old_row) => trigger.row_updated(txn, old_row, row)?,
                    None => trigger.row_inserted(txn, row)?,
                }
                Ok(())
            })
        })?;
        row.mark_all_clean();
        Ok(())
    }

    /// Insert that fails when the key already exists.
    pub fn insert(&self, txn: &dyn Transaction, row: &mut Row) -> Result<()> {
        self.assign_auto(row)?;
        let key = self.encode_key(row)?;
        let value = self.encode_value(row)?;
        self.plock_check(txn, &key, Some(&value))?;
        self.with_trigger(|trigger| {
            self.in_scope(txn, || {
                if self.primary.exists(txn, &key)? {
                    return Err(TableError::KeyExists {
                        row_type: self.name.clone(),
                    }
                    .into());
                }
                self.primary.store(txn, &key, &value)?;
                trigger.row_inserted(txn, row)
            })
        })?;
        row.mark_all_clean();
        Ok(())
    }

    /// Replacement that fails when no row exists for the key.
    pub fn replace(&self, txn: &dyn Transaction, row: &mut Row) -> Result<()> {
        let key = self.encode_key(row)?;
        let value = self.encode_value(row)?;
        self.plock_check(txn, &key, Some(&value))?;
        self.with_trigger(|trigger| {
            self.in_scope(txn, || {
                let old = self.load_old(txn, &key)?.ok_or_else(|| TableError::NoSuchRow {
                    row_type: self.name.clone(),
                })?;
                self.primary.store(txn, &key, &value)?;
                trigger.row_updated(txn, &old, row)
            })
        })?;
        row.mark_all_clean();
        Ok(())
    }

    /// Read-modify-write: merges the row's dirty value columns over the
    /// stored row identified by its key columns.
    pub fn update(&self, txn: &dyn Transaction, row: &mut Row) -> Result<()> {
        let key = self.encode_key(row)?;
        let merged = self.with_trigger(|trigger| {
            self.in_scope(txn, || {
                let old = self.load_old(txn, &key)?.ok_or_else(|| TableError::NoSuchRow {
                    row_type: self.name.clone(),
                })?;
                let mut merged = old.clone();
                let info = self.row_info();
                for col in info.value_columns() {
                    if row.is_dirty(col.num) {
                        merged.install(col.num, row.get(col.num)?.clone());
                    }
                }
                let value = self.encode_value(&merged)?;
                self.plock_check(txn, &key, Some(&value))?;
                self.primary.store(txn, &key, &value)?;
                trigger.row_updated(txn, &old, &merged)?;
                Ok(merged)
            })
        })?;
        *row = merged;
        row.mark_all_clean();
        Ok(())
    }

    /// Deletes by the row's key columns; `false` when nothing was stored.
    pub fn delete(&self, txn: &dyn Transaction, row: &Row) -> Result<bool> {
        let key = self.encode_key(row)?;
        self.plock_check(txn, &key, None)?;
        self.with_trigger(|trigger| {
            self.in_scope(txn, || {
                let old = if trigger.is_skip() {
                    None
                } else {
                    self.load_old(txn, &key)?
                };
                let present = self.primary.delete(txn, &key)?;
                if present {
                    if let Some(old_row) = &old {
                        trigger.row_deleted(txn, old_row)?;
                    }
                }
                Ok(present)
            })
        })
    }

    fn assign_auto(&self, row: &mut Row) -> Result<()> {
        let info = self.row_info();
        for col in info.key_columns() {
            let Some(range) = col.auto else { continue };
            if row.state(col.num) != crate::schema::ColumnState::Unset {
                continue;
            }
            let allocator = {
                let mut sequences = self.sequences.lock();
                Arc::clone(sequences.entry(col.num).or_insert_with(|| {
                    Arc::new(SequenceAllocator::new(
                        Arc::clone(&self.meta),
                        &self.name,
                        &col.name,
                        range,
                    ))
                }))
            };
            let next = allocator.next(&*self.db)?;
            let value = convert_value(&Value::I64(next), col.type_code.plain())
                .map_err(|_| TableError::SequenceExhausted {
                    row_type: self.name.clone(),
                    column: col.name.to_string(),
                })?;
            row.install(col.num, value);
        }
        Ok(())
    }

    // --- scans ---

    /// The compiled factory for `filter`, from the canonical-string cache.
    pub fn scan_factory(&self, filter: &str) -> Result<Arc<ScanControllerFactory>> {
        let canonical = reduce(&parse(filter)?).to_string();
        self.factories.get_or_compute(&canonical, || {
            ScanControllerFactory::compile(
                Arc::clone(&self.registry),
                filter,
                self.options.predicate_locks,
            )
        })
    }

    /// Opens a scanner positioned at the first matching row.
    pub fn new_scanner<'t>(
        &'t self,
        txn: &'t dyn Transaction,
        filter: &str,
        args: &[Value],
    ) -> Result<RowScanner<'t>> {
        let factory = self.scan_factory(filter)?;
        let multi = factory.scan_controller(args)?;
        let mut scanner = RowScanner::new(&*self.primary, txn, multi);
        if let Some(predicate) = scanner.predicate().cloned() {
            let guard = self.plocks.register(txn.id(), predicate);
            scanner.set_finisher(Box::new(move || drop(guard)));
        }
        scanner.init()?;
        Ok(scanner)
    }

    /// Opens an updater. `txn: None` runs each update in its own
    /// single-statement transaction.
    pub fn new_updater<'t>(
        &'t self,
        txn: Option<&'t dyn Transaction>,
        filter: &str,
        args: &[Value],
    ) -> Result<RowUpdater<'t>> {
        RowUpdater::open(self, txn, filter, args)
    }

    // --- secondary indexes ---

    pub fn secondary(&self, name: &str) -> Option<Arc<SecondaryIndex>> {
        self.secondaries
            .read()
            .iter()
            .find(|s| s.name() == name)
            .cloned()
    }

    /// Builds a secondary index online: scan, merge, activate. Concurrent
    /// writes observe the backfill trigger throughout.
    pub fn create_secondary_index(&self, def: SecondaryDef) -> Result<()> {
        let mut build = self.begin_secondary_index(def)?;
        match build.scan().and_then(|_| build.merge()) {
            Ok(()) => build.activate(),
            Err(err) => {
                build.abort(Some(&err));
                Err(err)
            }
        }
    }

    /// Starts an online index build, publishing the backfill trigger. The
    /// returned handle drives the phases; dropping it unbuilt cancels.
    pub fn begin_secondary_index(&self, def: SecondaryDef) -> Result<IndexBuild<'_>> {
        if self.secondary(&def.name).is_some() {
            return Err(crate::error::IndexError::Exists(def.name).into());
        }
        let index = self
            .db
            .open_index(&format!("{}.ix.{}", self.name, def.name))?;
        let secondary = SecondaryIndex::build(&self.row_info(), index, &def)?;
        let backfill = IndexBackfill::new(
            Arc::clone(&self.db),
            Arc::clone(&self.primary),
            Arc::clone(&self.registry),
            Arc::clone(&secondary),
            self.options.backfill_batch,
        )?;
        backfill.notify(
            EventType::IndexBuildBegin,
            &format!("building secondary index `{}` on `{}`", secondary.name(), self.name),
        );

        let live = self.secondaries.read().clone();
        self.trigger
            .swap(Trigger::new(live.clone(), vec![Arc::clone(&backfill)]));
        Ok(IndexBuild {
            table: self,
            backfill,
            secondary,
            live,
            finished: false,
        })
    }

    pub fn drop_secondary_index(&self, name: &str) -> Result<()> {
        let removed = {
            let mut secondaries = self.secondaries.write();
            let before = secondaries.len();
            secondaries.retain(|s| s.name() != name);
            if secondaries.len() == before {
                return Err(crate::error::IndexError::NotFound(name.to_owned()).into());
            }
            secondaries.clone()
        };
        self.trigger.swap(Trigger::new(removed, Vec::new()));
        if let Some(index) = self
            .db
            .find_index(&format!("{}.ix.{name}", self.name))?
        {
            self.db.delete_index(index.id())?;
        }
        Ok(())
    }
}

/// Handle over one in-progress index build; phases run on the caller's
/// thread. Dropping the handle before activation cancels the build and
/// restores the live trigger.
pub struct IndexBuild<'t> {
    table: &'t Table,
    backfill: Arc<IndexBackfill>,
    secondary: Arc<SecondaryIndex>,
    live: Vec<Arc<SecondaryIndex>>,
    finished: bool,
}

impl IndexBuild<'_> {
    /// Phase 1: feed the primary's rows through the sorter.
    pub fn scan(&self) -> Result<()> {
        self.backfill.scan_primary()
    }

    /// Phase 2: merge the sorted stream into the secondary.
    pub fn merge(&self) -> Result<()> {
        self.backfill.merge()
    }

    /// Phase 3: swap in the fully-live trigger and tear down the build.
    pub fn activate(mut self) -> Result<()> {
        let all = {
            let mut secondaries = self.table.secondaries.write();
            secondaries.push(Arc::clone(&self.secondary));
            secondaries.clone()
        };
        self.table.trigger.swap(Trigger::new(all, Vec::new()));
        self.backfill.finish();
        self.backfill.notify(
            EventType::IndexBuildComplete,
            &format!(
                "secondary index `{}` on `{}` is live",
                self.secondary.name(),
                self.table.name
            ),
        );
        self.finished = true;
        Ok(())
    }

    /// Cancels the build: the live trigger is restored, tracking state is
    /// dropped, and the half-built secondary is deleted.
    pub fn cancel(mut self) {
        self.abort(None);
    }

    pub fn secondary_name(&self) -> &str {
        self.secondary.name()
    }

    fn abort(&mut self, err: Option<&DbError>) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.table
            .trigger
            .swap(Trigger::new(self.live.clone(), Vec::new()));
        match err {
            Some(err) => self.backfill.fail(err),
            None => {
                self.backfill.notify(
                    EventType::IndexBuildFailed,
                    &format!("backfill of `{}` cancelled", self.secondary.name()),
                );
                self.backfill.close();
            }
        }
        let _ = self.table.db.delete_index(self.secondary.index().id());
    }
}

impl Drop for IndexBuild<'_> {
    fn drop(&mut self) {
        self.abort(None);
    }
}

/// Which transaction strategy an updater runs under, chosen from the
/// caller transaction's lock mode.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum UpdaterKind {
    /// No caller transaction: every update runs in its own
    /// single-statement transaction.
    AutoCommit,
    /// The caller's transaction is already strong enough.
    Basic,
    /// Repeatable-read caller: reads escalate to upgradable locks for the
    /// updater's lifetime.
    Upgradable,
    /// Read-committed or weaker: a nested scope with upgradable reads.
    NonRepeatable,
}

pub struct RowUpdater<'t> {
    table: &'t Table,
    scanner: RowScanner<'t>,
    caller: Option<&'t dyn Transaction>,
    kind: UpdaterKind,
    /// The unmodified image of the current row, for old-entry computation
    /// when the caller mutates the row in place.
    pristine: Option<Row>,
    restore_mode: Option<LockMode>,
    closed: bool,
}

impl<'t> RowUpdater<'t> {
    fn open(
        table: &'t Table,
        txn: Option<&'t dyn Transaction>,
        filter: &str,
        args: &[Value],
    ) -> Result<RowUpdater<'t>> {
        // Compile the scan before touching the caller's transaction, so a
        // malformed filter or argument leaves it exactly as it was.
        let factory = table.scan_factory(filter)?;
        let multi = factory.scan_controller(args)?;

        let (scan_txn, kind, restore_mode): (&'t dyn Transaction, _, _) = match txn {
            None => (&*table.bogus, UpdaterKind::AutoCommit, None),
            Some(txn) => {
                let mode = txn.lock_mode();
                match mode {
                    LockMode::UpgradableRead => (txn, UpdaterKind::Basic, None),
                    LockMode::RepeatableRead => {
                        txn.set_lock_mode(LockMode::UpgradableRead);
                        (txn, UpdaterKind::Upgradable, Some(mode))
                    }
                    LockMode::ReadCommitted | LockMode::ReadUncommitted | LockMode::Unsafe => {
                        txn.enter()?;
                        txn.set_lock_mode(LockMode::UpgradableRead);
                        (txn, UpdaterKind::NonRepeatable, Some(mode))
                    }
                }
            }
        };

        // From here until the updater exists, a failed cursor positioning
        // must unwind the scope entry and mode escalation above; every
        // entered scope is paired with a release on all exit paths.
        let restore = scopeguard::guard((), |()| {
            if let Some(txn) = txn {
                if kind == UpdaterKind::NonRepeatable {
                    let _ = txn.exit();
                }
                if let Some(mode) = restore_mode {
                    txn.set_lock_mode(mode);
                }
            }
        });

        // Updaters rely on upgradable row locks rather than predicate
        // locks; an auto-commit updater writes under per-row transactions
        // that would otherwise conflict with its own scan predicate.
        let mut scanner = RowScanner::new(&*table.primary, scan_txn, multi);
        scanner.init()?;
        scopeguard::ScopeGuard::into_inner(restore);

        let pristine = scanner.row().cloned();
        Ok(RowUpdater {
            table,
            scanner,
            caller: txn,
            kind,
            pristine,
            restore_mode,
            closed: false,
        })
    }

    pub fn row(&self) -> Option<&Row> {
        self.scanner.row()
    }

    pub fn row_mut(&mut self) -> Option<&mut Row> {
        self.scanner.row_mut()
    }

    /// Advances without writing, discarding staged changes.
    pub fn step(&mut self) -> Result<bool> {
        let advanced = self.scanner.step()?;
        self.pristine = self.scanner.row().cloned();
        Ok(advanced)
    }

    fn no_row(&self) -> DbError {
        TableError::NoCurrentRow {
            row_type: self.table.name.clone(),
        }
        .into()
    }

    /// Runs one write under the updater's transaction strategy.
    fn write(&mut self, op: impl FnOnce(&Table, &dyn Transaction) -> Result<()>) -> Result<()> {
        match self.kind {
            UpdaterKind::AutoCommit => {
                let txn = self.table.new_transaction();
                match op(self.table, txn.as_ref()) {
                    Ok(()) => txn.commit().map_err(DbError::from),
                    Err(err) => {
                        let _ = txn.reset();
                        Err(err)
                    }
                }
            }
            UpdaterKind::Basic | UpdaterKind::Upgradable => {
                let txn = self.caller.ok_or_else(|| self.no_row())?;
                op(self.table, txn)
            }
            UpdaterKind::NonRepeatable => {
                // Commit row by row: fold the scope into the parent and
                // open a fresh one.
                let txn = self.caller.ok_or_else(|| self.no_row())?;
                op(self.table, txn)?;
                txn.commit()?;
                txn.enter()?;
                Ok(())
            }
        }
    }

    /// Writes the staged changes of the current row, then advances.
    /// A dirty key column turns the update into a delete + insert.
    pub fn update(&mut self) -> Result<bool> {
        let mut row = self.scanner.take_row().ok_or_else(|| self.no_row())?;
        let old = self.pristine.take().ok_or_else(|| self.no_row())?;
        self.write(|table, txn| {
            if row.key_dirty() {
                table.delete(txn, &old)?;
                table.insert(txn, &mut row)
            } else {
                table.store(txn, &mut row)
            }
        })?;
        self.step()
    }

    /// Deletes the current row, then advances.
    pub fn delete(&mut self) -> Result<bool> {
        let old = self.pristine.take().ok_or_else(|| self.no_row())?;
        self.scanner.take_row();
        self.write(|table, txn| table.delete(txn, &old).map(|_| ()))?;
        self.step()
    }

    /// Closes the scan and restores the caller transaction's mode/scope.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.scanner.close();
        if let Some(txn) = self.caller {
            if self.kind == UpdaterKind::NonRepeatable {
                txn.commit()?;
            }
            if let Some(mode) = self.restore_mode.take() {
                txn.set_lock_mode(mode);
            }
        }
        Ok(())
    }
}

impl Drop for RowUpdater<'_> {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
