//! Scan controllers: compiled range scans over the primary index.
//!
//! A [`ScanControllerFactory`] is compiled once per canonical filter and
//! cached by the table. Binding an argument array produces a
//! [`MultiScanController`]: one [`ScanController`] per extracted range, in
//! DNF term order, each carrying encoded cursor bounds and a row evaluator
//! that quick-filters against still-encoded bytes. Overlapping ranges are
//! executed sequentially and may deliver duplicate rows; the planner keeps
//! ranges disjoint where it can, and the behavior is documented rather
//! than hidden.

use std::sync::Arc;

use rowstore_codec::{convert_value, Value};

use crate::error::{DbError, FilterError, Result};
use crate::filter::normalize::{dnf, reduce, ComplexFilter};
use crate::filter::range::{multi_range_extract, ExtractedRange};
use crate::filter::{parse, RowFilter};
use crate::kv::{Cursor, Index, Transaction};
use crate::predicate::RowPredicate;
use crate::schema::{Row, RowInfo, SchemaRegistry};

pub mod scanner;

pub use scanner::RowScanner;

/// Outcome of evaluating one stored entry.
///
/// `EndOfRange` is the stop-cursor signal: the scanner collapses the
/// current range without surfacing anything to the caller.
pub enum EvalResult {
    Match(Box<Row>),
    Reject,
    EndOfRange,
}

/// Per-filter compiled object, cached by canonical string. Thread-safe and
/// immutable; controllers are minted per scan with their argument arrays.
#[derive(Debug)]
pub struct ScanControllerFactory {
    registry: Arc<SchemaRegistry>,
    row_info: Arc<RowInfo>,
    canonical: String,
    reduced: RowFilter,
    ranges: Vec<ExtractedRange>,
    predicate_lock: bool,
}

impl ScanControllerFactory {
    /// Parses and compiles `filter`. Range extraction runs over the DNF;
    /// if normalization blows up the factory falls back to a single wide
    /// range with the reduced filter as remainder, and logs the event.
    pub fn compile(
        registry: Arc<SchemaRegistry>,
        filter: &str,
        predicate_lock: bool,
    ) -> Result<ScanControllerFactory> {
        let parsed = parse(filter)?;
        let reduced = reduce(&parsed);
        let canonical = reduced.to_string();
        let row_info = registry.current_info();

        // Column references fail fast, before any scan binds arguments.
        let mut unknown: Option<String> = None;
        reduced.for_each_leaf(&mut |leaf| {
            let mut check = |column: &crate::filter::ColumnRef| {
                if unknown.is_none()
                    && (!column.is_simple() || row_info.column_by_name(column.head()).is_none())
                {
                    unknown = Some(column.to_string());
                }
            };
            match leaf {
                RowFilter::ColumnToArg { column, .. } => check(column),
                RowFilter::ColumnToColumn { column, other, .. } => {
                    check(column);
                    check(other);
                }
                _ => {}
            }
        });
        if let Some(column) = unknown {
            return Err(FilterError::UnknownColumn {
                filter: canonical,
                column,
            }
            .into());
        }

        let ranges = match dnf(&reduced) {
            Ok(normal) => multi_range_extract(&normal, &row_info),
            Err(ComplexFilter) => {
                log::warn!(
                    "filter `{canonical}` on `{}` is too complex to normalize; \
                     falling back to a full scan with the reduced filter",
                    row_info.name()
                );
                vec![ExtractedRange {
                    remainder: reduced.clone(),
                    eq_prefix: Vec::new(),
                    low: None,
                    high: None,
                }]
            }
        };

        Ok(ScanControllerFactory {
            registry,
            row_info,
            canonical,
            reduced,
            ranges,
            predicate_lock,
        })
    }

    /// The canonical filter string, which keys the factory cache.
    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    pub fn ranges(&self) -> &[ExtractedRange] {
        &self.ranges
    }

    /// Binds an argument array, producing the controller for one scan.
    pub fn scan_controller(&self, args: &[Value]) -> Result<MultiScanController> {
        // The full predicate validates and converts every argument, so the
        // per-range bound encodings below cannot hit a fresh conversion
        // failure.
        let predicate = RowPredicate::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.row_info),
            &self.reduced,
            args,
        )?;

        let mut controllers = Vec::with_capacity(self.ranges.len());
        for range in &self.ranges {
            let remainder = RowPredicate::new(
                Arc::clone(&self.registry),
                Arc::clone(&self.row_info),
                &range.remainder,
                args,
            )?;
            let (low, high, stop_prefix) = self.encode_bounds(range, args)?;
            controllers.push(ScanController {
                low,
                high,
                evaluator: RowEvaluator {
                    registry: Arc::clone(&self.registry),
                    remainder,
                    stop_prefix,
                },
            });
        }

        Ok(MultiScanController {
            controllers,
            position: 0,
            predicate: self.predicate_lock.then_some(predicate),
        })
    }

    /// Encodes a range's cursor bounds: the equality prefix, then the
    /// terminating inequality. On a descending key column the logical low
    /// becomes the encoded high and vice versa. A prefix with no upper
    /// inequality is bounded by its byte successor; if the successor
    /// cannot be formed the range falls back to a wide upper bound and the
    /// evaluator's stop prefix takes over.
    #[allow(clippy::type_complexity)]
    fn encode_bounds(
        &self,
        range: &ExtractedRange,
        args: &[Value],
    ) -> Result<(Option<(Vec<u8>, bool)>, Option<(Vec<u8>, bool)>, Vec<u8>)> {
        let mut prefix = Vec::new();
        for (i, &arg) in range.eq_prefix.iter().enumerate() {
            let value = self.bound_arg(i, arg, args)?;
            self.row_info.key_codec(i).encode(&value, &mut prefix)?;
        }

        let ineq_idx = range.eq_prefix.len();
        let encode_ineq = |bound: Option<(usize, bool)>| -> Result<Option<(Vec<u8>, bool)>> {
            let Some((arg, inclusive)) = bound else {
                return Ok(None);
            };
            let value = self.bound_arg(ineq_idx, arg, args)?;
            let mut bytes = prefix.clone();
            self.row_info.key_codec(ineq_idx).encode(&value, &mut bytes)?;
            Ok(Some((bytes, inclusive)))
        };

        let descending = self
            .row_info
            .key_columns()
            .get(ineq_idx)
            .map(|col| col.type_code.is_descending())
            .unwrap_or(false);
        let (logical_low, logical_high) = if descending {
            (range.high, range.low)
        } else {
            (range.low, range.high)
        };

        let low = match encode_ineq(logical_low)? {
            Some(bound) => Some(bound),
            None if !prefix.is_empty() => Some((prefix.clone(), true)),
            None => None,
        };
        let high = match encode_ineq(logical_high)? {
            Some(bound) => Some(bound),
            None if !prefix.is_empty() => key_successor(&prefix).map(|bytes| (bytes, false)),
            None => None,
        };

        Ok((low, high, prefix))
    }

    fn bound_arg(&self, key_idx: usize, arg: usize, args: &[Value]) -> Result<Value> {
        let col = &self.row_info.key_columns()[key_idx];
        let raw = args.get(arg).ok_or_else(|| FilterError::MissingArgument {
            filter: self.canonical.clone(),
            arg,
        })?;
        convert_value(raw, col.type_code.plain()).map_err(|source| {
            FilterError::ArgumentConvert {
                filter: self.canonical.clone(),
                arg,
                column: col.name.to_string(),
                source,
            }
            .into()
        })
    }
}

/// The smallest byte string greater than every key starting with `prefix`,
/// or `None` when the prefix is all `0xff` and no such bound exists.
fn key_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut bytes = prefix.to_vec();
    while let Some(last) = bytes.last_mut() {
        if *last < 0xff {
            *last += 1;
            return Some(bytes);
        }
        bytes.pop();
    }
    None
}

/// Bounds plus evaluator for one extracted range.
pub struct ScanController {
    low: Option<(Vec<u8>, bool)>,
    high: Option<(Vec<u8>, bool)>,
    evaluator: RowEvaluator,
}

impl ScanController {
    /// Opens a cursor over `index` positioned at the first in-bound entry.
    pub fn new_cursor<'a>(
        &self,
        index: &'a dyn Index,
        txn: &'a dyn Transaction,
    ) -> Result<(Box<dyn Cursor + 'a>, bool)> {
        let mut cursor = index.new_cursor(txn)?;
        let positioned = match &self.low {
            None => cursor.first()?,
            Some((key, true)) => cursor.find_ge(key)?,
            Some((key, false)) => cursor.find_gt(key)?,
        };
        Ok((cursor, positioned))
    }

    /// Whether `key` is still inside the upper bound.
    pub fn within_high(&self, key: &[u8]) -> bool {
        match &self.high {
            None => true,
            Some((bound, true)) => key <= bound.as_slice(),
            Some((bound, false)) => key < bound.as_slice(),
        }
    }

    pub fn evaluator(&self) -> &RowEvaluator {
        &self.evaluator
    }

    pub fn low_bound(&self) -> Option<(&[u8], bool)> {
        self.low.as_ref().map(|(k, inc)| (k.as_slice(), *inc))
    }

    pub fn high_bound(&self) -> Option<(&[u8], bool)> {
        self.high.as_ref().map(|(k, inc)| (k.as_slice(), *inc))
    }
}

/// The per-row decode/filter routine of one range.
pub struct RowEvaluator {
    registry: Arc<SchemaRegistry>,
    remainder: Arc<RowPredicate>,
    stop_prefix: Vec<u8>,
}

impl RowEvaluator {
    /// Decides one stored entry: the stop prefix collapses the range as
    /// soon as the key leaves it, the remainder predicate runs against the
    /// encoded bytes, and only accepted rows are fully decoded.
    pub fn evaluate(&self, key: &[u8], value: &[u8]) -> Result<EvalResult> {
        if !key.starts_with(&self.stop_prefix) {
            return Ok(EvalResult::EndOfRange);
        }
        if !self.remainder.test_kv(key, value)? {
            return Ok(EvalResult::Reject);
        }
        let row = self.registry.decode_row(key, value)?;
        Ok(EvalResult::Match(Box::new(row)))
    }
}

/// Concatenates per-range controllers in DNF term order.
pub struct MultiScanController {
    controllers: Vec<ScanController>,
    position: usize,
    predicate: Option<Arc<RowPredicate>>,
}

impl MultiScanController {
    pub fn current(&self) -> Option<&ScanController> {
        self.controllers.get(self.position)
    }

    /// Advances to the next range; `false` when all ranges are exhausted.
    pub fn next(&mut self) -> bool {
        self.position += 1;
        self.position < self.controllers.len()
    }

    /// The shared predicate, present only when predicate locking is
    /// enabled for the owning table.
    pub fn predicate(&self) -> Option<&Arc<RowPredicate>> {
        self.predicate.as_ref()
    }

    pub fn range_count(&self) -> usize {
        self.controllers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::mem::MemDatabase;
    use crate::kv::Database;
    use crate::schema::{ColumnDef, RowDescriptor};
    use pretty_assertions::assert_eq;
    use rowstore_primitives::PlainType;

    fn registry() -> Arc<SchemaRegistry> {
        let db = MemDatabase::new();
        let meta = db.open_index("__meta").unwrap();
        let desc = RowDescriptor::new("T")
            .column(ColumnDef::new("k", PlainType::U32))
            .column(ColumnDef::new("v", PlainType::Utf8))
            .key(&["k"]);
        SchemaRegistry::open(db, meta, &desc).unwrap()
    }

    fn encode_key(registry: &SchemaRegistry, k: u32) -> Vec<u8> {
        let info = registry.current_info();
        let value = Value::U32(k);
        let mut out = Vec::new();
        info.key_codec(0).encode(&value, &mut out).unwrap();
        out
    }

    #[test]
    fn equality_extracts_inclusive_point_bounds() {
        let registry = registry();
        let factory =
            ScanControllerFactory::compile(Arc::clone(&registry), "k == ?0", false).unwrap();
        let multi = factory.scan_controller(&[Value::U32(7)]).unwrap();
        let ctrl = multi.current().unwrap();
        let expected = encode_key(&registry, 7);
        assert_eq!(ctrl.low_bound(), Some((expected.as_slice(), true)));
        // The high bound is the prefix successor, exclusive.
        let successor = ctrl.high_bound().unwrap();
        assert!(!successor.1);
        assert!(successor.0 > expected.as_slice());
    }

    #[test]
    fn between_filter_extracts_both_bounds() {
        let registry = registry();
        let factory =
            ScanControllerFactory::compile(Arc::clone(&registry), "k >= ?0 && k <= ?1", false)
                .unwrap();
        let multi = factory
            .scan_controller(&[Value::U32(2), Value::U32(4)])
            .unwrap();
        let ctrl = multi.current().unwrap();
        assert_eq!(
            ctrl.low_bound(),
            Some((encode_key(&registry, 2).as_slice(), true))
        );
        assert_eq!(
            ctrl.high_bound(),
            Some((encode_key(&registry, 4).as_slice(), true))
        );
    }

    #[test]
    fn disjunction_produces_controllers_in_term_order() {
        let registry = registry();
        let factory =
            ScanControllerFactory::compile(Arc::clone(&registry), "k == ?0 || k == ?1", false)
                .unwrap();
        let mut multi = factory
            .scan_controller(&[Value::U32(1), Value::U32(5)])
            .unwrap();
        assert_eq!(multi.range_count(), 2);
        let first = multi.current().unwrap().low_bound().unwrap().0.to_vec();
        assert!(multi.next());
        let second = multi.current().unwrap().low_bound().unwrap().0.to_vec();
        assert_eq!(first, encode_key(&registry, 1));
        assert_eq!(second, encode_key(&registry, 5));
        assert!(!multi.next());
    }

    #[test]
    fn unknown_column_fails_at_compile() {
        let err = ScanControllerFactory::compile(registry(), "nope == ?0", false).unwrap_err();
        assert!(matches!(
            err,
            DbError::Filter(FilterError::UnknownColumn { .. })
        ));
    }

    #[test]
    fn key_successor_carries_and_saturates() {
        assert_eq!(key_successor(&[1, 2, 3]), Some(vec![1, 2, 4]));
        assert_eq!(key_successor(&[1, 0xff, 0xff]), Some(vec![2]));
        assert_eq!(key_successor(&[0xff, 0xff]), None);
    }
}
