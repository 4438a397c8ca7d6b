//! Row filters: the AST, its canonical printed form, and the compiler
//! pipeline from filter strings to scan-controller factories.
//!
//! The canonical form of a filter is the `Display` output of its reduced
//! AST; it is stable, is the factory-cache key, and rides along in every
//! filter-related error.

use std::fmt;

pub mod cache;
pub mod normalize;
pub mod parser;
pub mod range;

pub use cache::FilterCache;
pub use parser::parse;

/// Comparison operators of the filter grammar.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
}

impl CmpOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::In => "in",
            CmpOp::NotIn => "!in",
        }
    }

    /// The operator accepting exactly the complementary rows.
    pub fn complement(self) -> CmpOp {
        match self {
            CmpOp::Eq => CmpOp::Ne,
            CmpOp::Ne => CmpOp::Eq,
            CmpOp::Lt => CmpOp::Ge,
            CmpOp::Le => CmpOp::Gt,
            CmpOp::Gt => CmpOp::Le,
            CmpOp::Ge => CmpOp::Lt,
            CmpOp::In => CmpOp::NotIn,
            CmpOp::NotIn => CmpOp::In,
        }
    }

    /// The operator with sides swapped (`a < b` ⇔ `b > a`).
    pub fn reversed(self) -> CmpOp {
        match self {
            CmpOp::Lt => CmpOp::Gt,
            CmpOp::Le => CmpOp::Ge,
            CmpOp::Gt => CmpOp::Lt,
            CmpOp::Ge => CmpOp::Le,
            other => other,
        }
    }
}

/// A (possibly dotted) column reference. Multi-segment paths traverse join
/// columns.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColumnRef {
    pub path: Vec<Box<str>>,
}

impl ColumnRef {
    pub fn simple(name: &str) -> ColumnRef {
        ColumnRef {
            path: vec![name.into()],
        }
    }

    /// The head segment; for non-join columns this is the whole reference.
    pub fn head(&self) -> &str {
        &self.path[0]
    }

    pub fn is_simple(&self) -> bool {
        self.path.len() == 1
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, seg) in self.path.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            f.write_str(seg)?;
        }
        Ok(())
    }
}

/// The filter AST. [`normalize::reduce`] brings it to the canonical form
/// whose `Display` output keys the factory cache.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum RowFilter {
    True,
    False,
    /// `column op ?arg`
    ColumnToArg {
        column: ColumnRef,
        op: CmpOp,
        arg: usize,
    },
    /// `column op other`
    ColumnToColumn {
        column: ColumnRef,
        op: CmpOp,
        other: ColumnRef,
    },
    And(Vec<RowFilter>),
    Or(Vec<RowFilter>),
}

impl RowFilter {
    /// Logical negation, with De Morgan applied structurally.
    pub fn not(&self) -> RowFilter {
        match self {
            RowFilter::True => RowFilter::False,
            RowFilter::False => RowFilter::True,
            RowFilter::ColumnToArg { column, op, arg } => RowFilter::ColumnToArg {
                column: column.clone(),
                op: op.complement(),
                arg: *arg,
            },
            RowFilter::ColumnToColumn { column, op, other } => RowFilter::ColumnToColumn {
                column: column.clone(),
                op: op.complement(),
                other: other.clone(),
            },
            RowFilter::And(children) => {
                RowFilter::Or(children.iter().map(RowFilter::not).collect())
            }
            RowFilter::Or(children) => {
                RowFilter::And(children.iter().map(RowFilter::not).collect())
            }
        }
    }

    /// Whether this is a leaf (no logical children).
    pub fn is_leaf(&self) -> bool {
        !matches!(self, RowFilter::And(_) | RowFilter::Or(_))
    }

    /// Visits every leaf.
    pub fn for_each_leaf<'f>(&'f self, f: &mut impl FnMut(&'f RowFilter)) {
        match self {
            RowFilter::And(children) | RowFilter::Or(children) => {
                for child in children {
                    child.for_each_leaf(f);
                }
            }
            leaf => f(leaf),
        }
    }

    /// The highest `?N` argument number referenced, if any.
    pub fn max_arg(&self) -> Option<usize> {
        let mut max = None;
        self.for_each_leaf(&mut |leaf| {
            if let RowFilter::ColumnToArg { arg, .. } = leaf {
                max = Some(max.map_or(*arg, |m: usize| m.max(*arg)));
            }
        });
        max
    }

    fn fmt_prec(&self, f: &mut fmt::Formatter<'_>, inside_and: bool) -> fmt::Result {
        match self {
            RowFilter::True => f.write_str("true"),
            RowFilter::False => f.write_str("false"),
            RowFilter::ColumnToArg { column, op, arg } => {
                write!(f, "{column} {} ?{arg}", op.symbol())
            }
            RowFilter::ColumnToColumn { column, op, other } => {
                write!(f, "{column} {} {other}", op.symbol())
            }
            RowFilter::And(children) => {
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" && ")?;
                    }
                    child.fmt_prec(f, true)?;
                }
                Ok(())
            }
            RowFilter::Or(children) => {
                if inside_and {
                    f.write_str("(")?;
                }
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" || ")?;
                    }
                    child.fmt_prec(f, false)?;
                }
                if inside_and {
                    f.write_str(")")?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for RowFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_prec(f, false)
    }
}
