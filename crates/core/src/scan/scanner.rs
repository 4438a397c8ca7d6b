//! The range scanner state machine.
//!
//! A scanner binds a [`MultiScanController`] to a transaction and walks
//! the primary index range by range:
//!
//! ```text
//!   InitPending --init--> Positioned --step--> Positioned
//!        |                    |                    |
//!        \--------------------+------> Finished    |
//!                             \------> Closed <----/
//! ```
//!
//! Rows are delivered in ascending key order within a range and in
//! controller order across ranges. A row the filter rejects releases its
//! read lock (retained lock modes only); the stop signal collapses the
//! current range silently.

use crate::error::Result;
use crate::kv::{Cursor, Index, LockMode, Transaction};
use crate::scan::{EvalResult, MultiScanController};
use crate::schema::Row;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum ScanState {
    InitPending,
    Positioned,
    Finished,
    Closed,
}

/// Called when the scanner finishes or closes; used by the table layer to
/// release predicate locks.
type Finisher = Box<dyn FnOnce() + Send>;

pub struct RowScanner<'a> {
    index: &'a dyn Index,
    txn: &'a dyn Transaction,
    multi: MultiScanController,
    cursor: Option<Box<dyn Cursor + 'a>>,
    state: ScanState,
    current: Option<Row>,
    finisher: Option<Finisher>,
}

impl<'a> RowScanner<'a> {
    pub fn new(
        index: &'a dyn Index,
        txn: &'a dyn Transaction,
        multi: MultiScanController,
    ) -> RowScanner<'a> {
        RowScanner {
            index,
            txn,
            multi,
            cursor: None,
            state: ScanState::InitPending,
            current: None,
            finisher: None,
        }
    }

    pub(crate) fn set_finisher(&mut self, finisher: Finisher) {
        self.finisher = Some(finisher);
    }

    /// The controller's shared predicate, when predicate locking is on.
    pub fn predicate(&self) -> Option<&std::sync::Arc<crate::predicate::RowPredicate>> {
        self.multi.predicate()
    }

    /// Positions at the first accepted row. Idempotent once initialized.
    pub fn init(&mut self) -> Result<()> {
        if self.state != ScanState::InitPending {
            return Ok(());
        }
        self.open_range()?;
        Ok(())
    }

    /// The row the scanner is positioned on.
    pub fn row(&self) -> Option<&Row> {
        self.current.as_ref()
    }

    /// Mutable access to the current row; updaters stage changes here.
    pub fn row_mut(&mut self) -> Option<&mut Row> {
        self.current.as_mut()
    }

    pub(crate) fn take_row(&mut self) -> Option<Row> {
        self.current.take()
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, ScanState::Finished | ScanState::Closed)
    }

    /// Advances to the next accepted row; `false` at the end of the scan.
    pub fn step(&mut self) -> Result<bool> {
        match self.state {
            ScanState::InitPending => {
                self.init()?;
                return Ok(self.state == ScanState::Positioned);
            }
            ScanState::Positioned => {}
            ScanState::Finished | ScanState::Closed => return Ok(false),
        }
        self.current = None;
        let positioned = match self.cursor.as_mut() {
            Some(cursor) => cursor.next()?,
            None => false,
        };
        if self.scan_range(positioned)? {
            return Ok(true);
        }
        self.next_range()
    }

    /// Opens the current range's cursor and scans forward; falls through
    /// to later ranges until a row is accepted or the controller runs dry.
    fn open_range(&mut self) -> Result<()> {
        loop {
            let Some(ctrl) = self.multi.current() else {
                self.finish();
                return Ok(());
            };
            let (cursor, positioned) = ctrl.new_cursor(self.index, self.txn)?;
            self.cursor = Some(cursor);
            if self.scan_range(positioned)? {
                self.state = ScanState::Positioned;
                return Ok(());
            }
            if !self.multi.next() {
                self.finish();
                return Ok(());
            }
        }
    }

    fn next_range(&mut self) -> Result<bool> {
        if !self.multi.next() {
            self.finish();
            return Ok(false);
        }
        self.open_range()?;
        Ok(self.state == ScanState::Positioned)
    }

    /// Walks the positioned cursor forward until a row is accepted or the
    /// range ends. Returns whether a row was published.
    fn scan_range(&mut self, mut positioned: bool) -> Result<bool> {
        let Some(ctrl) = self.multi.current() else {
            return Ok(false);
        };
        let cursor = match self.cursor.as_mut() {
            Some(cursor) => cursor,
            None => return Ok(false),
        };
        let index_id = self.index.id();
        // Locks on rows the filter rejects are released in the retained
        // read modes; upgradable locks belong to updaters and are kept.
        let release_rejected = self.txn.lock_mode() == LockMode::RepeatableRead;

        while positioned {
            let (key, value) = match (cursor.key(), cursor.value()) {
                (Some(key), Some(value)) => (key, value),
                _ => break,
            };
            if !ctrl.within_high(key) {
                break;
            }
            match ctrl.evaluator().evaluate(key, value)? {
                EvalResult::Match(row) => {
                    self.current = Some(*row);
                    self.state = ScanState::Positioned;
                    return Ok(true);
                }
                EvalResult::Reject => {
                    if release_rejected {
                        self.txn.unlock(index_id, key);
                    }
                }
                EvalResult::EndOfRange => break,
            }
            positioned = cursor.next()?;
        }
        Ok(false)
    }

    fn finish(&mut self) {
        self.state = ScanState::Finished;
        self.current = None;
        if let Some(mut cursor) = self.cursor.take() {
            cursor.reset();
        }
        if let Some(finisher) = self.finisher.take() {
            finisher();
        }
    }

    /// Resets the cursor and releases resources. Idempotent; safe to call
    /// at any point in the scan.
    pub fn close(&mut self) {
        if self.state == ScanState::Closed {
            return;
        }
        if let Some(mut cursor) = self.cursor.take() {
            cursor.reset();
        }
        self.current = None;
        self.state = ScanState::Closed;
        if let Some(finisher) = self.finisher.take() {
            finisher();
        }
    }
}

impl Drop for RowScanner<'_> {
    fn drop(&mut self) {
        self.close();
    }
}
