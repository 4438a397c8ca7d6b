//! Key-range extraction and predicate splitting.
//!
//! Given the ordered key columns of a row type and a filter in DNF,
//! [`multi_range_extract`] turns each disjunct into a range: a run of
//! key-column prefix equalities, at most one terminating inequality pair,
//! and the remainder predicate that must still run per row. Equality
//! bindings on shorter prefixes always beat inequalities on the same
//! column. Overlapping ranges are not merged; they execute sequentially
//! and may deliver duplicate rows.

use crate::filter::{CmpOp, ColumnRef, RowFilter};
use crate::filter::normalize::reduce;
use crate::schema::RowInfo;

/// One extracted range: `eq_prefix[i]` is the argument bound by equality to
/// key column `i`; `low`/`high` are `(argument, inclusive)` inequalities on
/// the key column directly after the prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedRange {
    pub remainder: RowFilter,
    pub eq_prefix: Vec<usize>,
    pub low: Option<(usize, bool)>,
    pub high: Option<(usize, bool)>,
}

impl ExtractedRange {
    fn wide(remainder: RowFilter) -> ExtractedRange {
        ExtractedRange {
            remainder,
            eq_prefix: Vec::new(),
            low: None,
            high: None,
        }
    }

    /// Whether the range constrains the key at all.
    pub fn is_wide(&self) -> bool {
        self.eq_prefix.is_empty() && self.low.is_none() && self.high.is_none()
    }
}

/// Extracts one range per DNF term. `filter` must be reduced; a filter that
/// is not a disjunction is treated as a single term. Ranges come out in
/// term order, which is the order the scan controller visits them.
pub fn multi_range_extract(filter: &RowFilter, info: &RowInfo) -> Vec<ExtractedRange> {
    match filter {
        RowFilter::Or(terms) => terms.iter().map(|term| extract_term(term, info)).collect(),
        RowFilter::False => Vec::new(),
        term => vec![extract_term(term, info)],
    }
}

fn extract_term(term: &RowFilter, info: &RowInfo) -> ExtractedRange {
    let leaves: Vec<&RowFilter> = match term {
        RowFilter::And(children) => children.iter().collect(),
        leaf => vec![leaf],
    };
    // Anything nested deeper than And-of-leaves is not a DNF term; keep the
    // whole thing as remainder.
    if leaves.iter().any(|leaf| !leaf.is_leaf()) {
        return ExtractedRange::wide(term.clone());
    }

    let mut consumed = vec![false; leaves.len()];
    let mut range = ExtractedRange::wide(RowFilter::True);

    let leaf_on = |leaf: &RowFilter, key_name: &str| -> Option<(CmpOp, usize)> {
        match leaf {
            RowFilter::ColumnToArg { column, op, arg }
                if column.is_simple() && column.head() == key_name =>
            {
                Some((*op, *arg))
            }
            _ => None,
        }
    };

    'keys: for key_col in info.key_columns() {
        // Equality first; it extends the prefix and the scan descends to
        // the next key column.
        for (i, leaf) in leaves.iter().enumerate() {
            if consumed[i] {
                continue;
            }
            if let Some((CmpOp::Eq, arg)) = leaf_on(leaf, &key_col.name) {
                range.eq_prefix.push(arg);
                consumed[i] = true;
                continue 'keys;
            }
        }
        // No equality: claim one inequality per direction and stop.
        for (i, leaf) in leaves.iter().enumerate() {
            if consumed[i] {
                continue;
            }
            match leaf_on(leaf, &key_col.name) {
                Some((CmpOp::Gt, arg)) if range.low.is_none() => {
                    range.low = Some((arg, false));
                    consumed[i] = true;
                }
                Some((CmpOp::Ge, arg)) if range.low.is_none() => {
                    range.low = Some((arg, true));
                    consumed[i] = true;
                }
                Some((CmpOp::Lt, arg)) if range.high.is_none() => {
                    range.high = Some((arg, false));
                    consumed[i] = true;
                }
                Some((CmpOp::Le, arg)) if range.high.is_none() => {
                    range.high = Some((arg, true));
                    consumed[i] = true;
                }
                _ => {}
            }
        }
        break;
    }

    let rest: Vec<RowFilter> = leaves
        .iter()
        .zip(&consumed)
        .filter(|(_, &used)| !used)
        .map(|(leaf, _)| (*leaf).clone())
        .collect();
    range.remainder = reduce(&RowFilter::And(rest));
    range
}

/// Splits a predicate for a derived (aggregated/mapped) table: returns
/// `[pushable, post]` where `pushable` references only columns accepted by
/// `is_source` and `post` is everything else. The conjunction of the two
/// is equivalent to the input. If CNF conversion blows up, the split is
/// all-or-nothing.
pub fn split(filter: &RowFilter, is_source: impl Fn(&ColumnRef) -> bool) -> [RowFilter; 2] {
    let references_only_source = |f: &RowFilter| {
        let mut ok = true;
        f.for_each_leaf(&mut |leaf| match leaf {
            RowFilter::ColumnToArg { column, .. } => ok &= is_source(column),
            RowFilter::ColumnToColumn { column, other, .. } => {
                ok &= is_source(column) && is_source(other)
            }
            _ => {}
        });
        ok
    };

    let cnf = match crate::filter::normalize::cnf(filter) {
        Ok(cnf) => cnf,
        Err(_) => {
            let reduced = reduce(filter);
            return if references_only_source(&reduced) {
                [reduced, RowFilter::True]
            } else {
                [RowFilter::True, reduced]
            };
        }
    };

    let conjuncts: Vec<RowFilter> = match cnf {
        RowFilter::And(children) => children,
        other => vec![other],
    };
    let (pushable, post): (Vec<RowFilter>, Vec<RowFilter>) = conjuncts
        .into_iter()
        .partition(references_only_source);
    [
        reduce(&RowFilter::And(pushable)),
        reduce(&RowFilter::And(post)),
    ]
}
