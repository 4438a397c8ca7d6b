//! Compiled row predicates.
//!
//! A [`RowPredicate`] is the interpreted program for one filter and one
//! argument array: arguments are converted to their columns' types up
//! front (exactly or not at all), and columns compared by bytes get a
//! pre-encoded form of each argument. Evaluation runs against a decoded
//! row, against encoded key/value bytes (the quick filter), or against the
//! key alone (conservative three-valued logic for range locks).
//!
//! Column offsets located while walking the encoded bytes are memoized per
//! evaluation, so a column referenced by several leaves parses its prefix
//! once.

use std::cmp::Ordering;
use std::sync::Arc;

use rowstore_codec::{convert_value, ColumnCodec, QuickCol, QuickMode, Value};
use rowstore_primitives::ColumnId;
use smallvec::SmallVec;

use crate::error::{DbError, FilterError, Result};
use crate::filter::{CmpOp, RowFilter};
use crate::schema::{Row, RowInfo, SchemaRegistry};

/// The compiled program tree: leaves index into the leaf table.
#[derive(Debug)]
enum Node {
    True,
    False,
    Leaf(usize),
    And(Vec<Node>),
    Or(Vec<Node>),
}

#[derive(Debug)]
enum LeafKind {
    /// `column op ?arg`, with the argument(s) converted and pre-encoded.
    ColArg {
        col: ColumnId,
        op: CmpOp,
        null_low: bool,
        /// One entry for scalar comparisons; the array elements for
        /// `in`/`!in`.
        args: SmallVec<[Value; 1]>,
        /// Per argument: the byte form quick comparison memcmps against
        /// (`None` for null arguments).
        encoded: SmallVec<[Option<Box<[u8]>>; 1]>,
    },
    /// `column op other_column`.
    ColCol {
        col: ColumnId,
        op: CmpOp,
        other: ColumnId,
        null_low: bool,
    },
}

#[derive(Debug)]
pub struct RowPredicate {
    registry: Arc<SchemaRegistry>,
    row_info: Arc<RowInfo>,
    program: Node,
    leaves: Vec<LeafKind>,
    filter_string: String,
}

impl RowPredicate {
    /// Compiles `filter` against `args`. The filter must be reduced; its
    /// canonical string rides along for diagnostics.
    pub fn new(
        registry: Arc<SchemaRegistry>,
        row_info: Arc<RowInfo>,
        filter: &RowFilter,
        args: &[Value],
    ) -> Result<Arc<RowPredicate>> {
        let mut compiler = Compiler {
            row_info: &row_info,
            filter_string: filter.to_string(),
            args,
            leaves: Vec::new(),
        };
        let program = compiler.node(filter)?;
        Ok(Arc::new(RowPredicate {
            registry,
            row_info: row_info.clone(),
            program,
            leaves: compiler.leaves,
            filter_string: compiler.filter_string,
        }))
    }

    pub fn filter_string(&self) -> &str {
        &self.filter_string
    }

    pub fn row_info(&self) -> &Arc<RowInfo> {
        &self.row_info
    }

    /// Evaluates against a fully decoded row.
    pub fn test_row(&self, row: &Row) -> Result<bool> {
        self.eval_node(&self.program, &mut |leaf| self.leaf_on_row(leaf, row))
    }

    /// Evaluates against encoded key/value bytes, decoding as little as
    /// possible. Values written under an older schema version are decoded
    /// fully and tested as rows.
    pub fn test_kv(&self, key: &[u8], value: &[u8]) -> Result<bool> {
        let (version, value_start) = SchemaRegistry::split_value(value)?;
        if version != self.registry.current().0 {
            let row = self.registry.decode_row(key, value)?;
            return self.test_row(&row);
        }
        let mut locator = Locator::new(&self.row_info, key, value, value_start);
        self.eval_node(&self.program, &mut |leaf| {
            self.leaf_on_encoded(leaf, &mut locator)
        })
    }

    /// Evaluates against the key alone. Leaves over value columns are
    /// indeterminate; the result errs toward `true`, which is the
    /// conservative answer for acquiring range locks.
    pub fn test_key(&self, key: &[u8]) -> Result<bool> {
        let mut locator = Locator::new(&self.row_info, key, &[], 0);
        Ok(
            self.eval_node_tri(&self.program, &mut |leaf| {
                let col = match leaf {
                    LeafKind::ColArg { col, .. } => *col,
                    LeafKind::ColCol { col, other, .. } => {
                        if other.idx() >= self.row_info.key_count() {
                            return Ok(Tri::Unknown);
                        }
                        *col
                    }
                };
                if col.idx() >= self.row_info.key_count() {
                    return Ok(Tri::Unknown);
                }
                self.leaf_on_encoded(leaf, &mut locator).map(Tri::from)
            })? != Tri::False,
        )
    }

    fn eval_node(
        &self,
        node: &Node,
        leaf_eval: &mut impl FnMut(&LeafKind) -> Result<bool>,
    ) -> Result<bool> {
        Ok(match node {
            Node::True => true,
            Node::False => false,
            Node::Leaf(i) => leaf_eval(&self.leaves[*i])?,
            Node::And(children) => {
                for child in children {
                    if !self.eval_node(child, leaf_eval)? {
                        return Ok(false);
                    }
                }
                true
            }
            Node::Or(children) => {
                for child in children {
                    if self.eval_node(child, leaf_eval)? {
                        return Ok(true);
                    }
                }
                false
            }
        })
    }

    fn eval_node_tri(
        &self,
        node: &Node,
        leaf_eval: &mut impl FnMut(&LeafKind) -> Result<Tri>,
    ) -> Result<Tri> {
        Ok(match node {
            Node::True => Tri::True,
            Node::False => Tri::False,
            Node::Leaf(i) => leaf_eval(&self.leaves[*i])?,
            Node::And(children) => {
                let mut out = Tri::True;
                for child in children {
                    match self.eval_node_tri(child, leaf_eval)? {
                        Tri::False => return Ok(Tri::False),
                        Tri::Unknown => out = Tri::Unknown,
                        Tri::True => {}
                    }
                }
                out
            }
            Node::Or(children) => {
                let mut out = Tri::False;
                for child in children {
                    match self.eval_node_tri(child, leaf_eval)? {
                        Tri::True => return Ok(Tri::True),
                        Tri::Unknown => out = Tri::Unknown,
                        Tri::False => {}
                    }
                }
                out
            }
        })
    }

    fn leaf_on_row(&self, leaf: &LeafKind, row: &Row) -> Result<bool> {
        match leaf {
            LeafKind::ColArg {
                col,
                op,
                null_low,
                args,
                ..
            } => {
                let actual = row.get(*col)?;
                Ok(accepts_typed(*op, actual, args, *null_low))
            }
            LeafKind::ColCol {
                col,
                op,
                other,
                null_low,
            } => {
                let a = row.get(*col)?;
                let b = row.get(*other)?;
                let ord = cmp_with_null(a, b, *null_low);
                Ok(op_accepts(*op, ord))
            }
        }
    }

    fn leaf_on_encoded(&self, leaf: &LeafKind, locator: &mut Locator<'_>) -> Result<bool> {
        match leaf {
            LeafKind::ColArg {
                col,
                op,
                null_low,
                args,
                encoded,
            } => {
                let codec = locator.codec(*col);
                match codec.quick_mode() {
                    QuickMode::Typed | QuickMode::Decode => {
                        let actual = locator.decode(*col)?;
                        Ok(accepts_typed(*op, &actual, args, *null_low))
                    }
                    QuickMode::Memcmp { .. } => {
                        let quick = locator.quick(*col)?;
                        self.accepts_bytes(codec, *op, &quick, encoded)
                    }
                    QuickMode::MemcmpEqOnly => {
                        if matches!(op, CmpOp::Eq | CmpOp::Ne | CmpOp::In | CmpOp::NotIn) {
                            let quick = locator.quick(*col)?;
                            self.accepts_bytes(codec, *op, &quick, encoded)
                        } else {
                            let actual = locator.decode(*col)?;
                            Ok(accepts_typed(*op, &actual, args, *null_low))
                        }
                    }
                }
            }
            LeafKind::ColCol {
                col,
                op,
                other,
                null_low,
            } => {
                let a = locator.decode(*col)?;
                let b = locator.decode(*other)?;
                let ord = cmp_with_null(&a, &b, *null_low);
                Ok(op_accepts(*op, ord))
            }
        }
    }

    /// Compares a located, still-encoded column against the pre-encoded
    /// argument forms. Null placement and descending reversal are baked
    /// into [`ColumnCodec::quick_compare`].
    fn accepts_bytes(
        &self,
        codec: &ColumnCodec,
        op: CmpOp,
        quick: &QuickCol<'_>,
        encoded: &[Option<Box<[u8]>>],
    ) -> Result<bool> {
        let cmp_one = |arg_bytes: &Option<Box<[u8]>>| -> Ordering {
            match arg_bytes {
                Some(bytes) => codec
                    .quick_compare(quick, bytes, false)
                    .unwrap_or(Ordering::Equal),
                None => codec.quick_compare(quick, &[], true).unwrap_or(Ordering::Equal),
            }
        };
        Ok(match op {
            CmpOp::In => encoded.iter().any(|e| cmp_one(e) == Ordering::Equal),
            CmpOp::NotIn => encoded.iter().all(|e| cmp_one(e) != Ordering::Equal),
            _ => {
                debug_assert_eq!(encoded.len(), 1);
                op_accepts(op, cmp_one(&encoded[0]))
            }
        })
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Tri {
    False,
    Unknown,
    True,
}

impl From<bool> for Tri {
    fn from(b: bool) -> Tri {
        if b {
            Tri::True
        } else {
            Tri::False
        }
    }
}

/// Logical comparison honoring the column's null placement.
fn cmp_with_null(a: &Value, b: &Value, null_low: bool) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => {
            if null_low {
                Ordering::Less
            } else {
                Ordering::Greater
            }
        }
        (false, true) => {
            if null_low {
                Ordering::Greater
            } else {
                Ordering::Less
            }
        }
        (false, false) => a.cmp(b),
    }
}

fn op_accepts(op: CmpOp, ord: Ordering) -> bool {
    match op {
        CmpOp::Eq => ord == Ordering::Equal,
        CmpOp::Ne => ord != Ordering::Equal,
        CmpOp::Lt => ord == Ordering::Less,
        CmpOp::Le => ord != Ordering::Greater,
        CmpOp::Gt => ord == Ordering::Greater,
        CmpOp::Ge => ord != Ordering::Less,
        CmpOp::In | CmpOp::NotIn => unreachable!("membership handled by caller"),
    }
}

fn accepts_typed(op: CmpOp, actual: &Value, args: &[Value], null_low: bool) -> bool {
    match op {
        CmpOp::In => args
            .iter()
            .any(|arg| cmp_with_null(actual, arg, null_low) == Ordering::Equal),
        CmpOp::NotIn => args
            .iter()
            .all(|arg| cmp_with_null(actual, arg, null_low) != Ordering::Equal),
        _ => op_accepts(op, cmp_with_null(actual, &args[0], null_low)),
    }
}

/// Lazily computed start offsets of encoded columns; the memo is shared by
/// every leaf of one evaluation.
struct Locator<'a> {
    info: &'a RowInfo,
    key: &'a [u8],
    value: &'a [u8],
    key_starts: SmallVec<[usize; 8]>,
    value_starts: SmallVec<[usize; 8]>,
}

impl<'a> Locator<'a> {
    fn new(info: &'a RowInfo, key: &'a [u8], value: &'a [u8], value_start: usize) -> Locator<'a> {
        Locator {
            info,
            key,
            value,
            key_starts: smallvec::smallvec![0],
            value_starts: smallvec::smallvec![value_start],
        }
    }

    fn codec(&self, col: ColumnId) -> &'a ColumnCodec {
        let i = col.idx();
        let key_count = self.info.key_count();
        if i < key_count {
            &self.info.key_codecs()[i]
        } else {
            &self.info.value_codecs()[i - key_count]
        }
    }

    /// The start offset of column `col`, extending the memo by skipping
    /// earlier columns as needed.
    fn start(&mut self, col: ColumnId) -> Result<(usize, &'a [u8]), DbError> {
        let i = col.idx();
        let key_count = self.info.key_count();
        let (src, starts, codecs, target) = if i < key_count {
            (self.key, &mut self.key_starts, self.info.key_codecs(), i)
        } else {
            (
                self.value,
                &mut self.value_starts,
                self.info.value_codecs(),
                i - key_count,
            )
        };
        while starts.len() <= target {
            let done = starts.len() - 1;
            let mut offset = starts[done];
            codecs[done].skip(src, &mut offset)?;
            starts.push(offset);
        }
        Ok((starts[target], src))
    }

    fn quick(&mut self, col: ColumnId) -> Result<QuickCol<'a>, DbError> {
        let codec = self.codec(col);
        let (start, src) = self.start(col)?;
        let mut offset = start;
        Ok(codec.quick_decode(src, &mut offset)?)
    }

    fn decode(&mut self, col: ColumnId) -> Result<Value, DbError> {
        let codec = self.codec(col);
        let (start, src) = self.start(col)?;
        let mut offset = start;
        Ok(codec.decode(src, &mut offset)?)
    }
}

struct Compiler<'a> {
    row_info: &'a RowInfo,
    filter_string: String,
    args: &'a [Value],
    leaves: Vec<LeafKind>,
}

impl Compiler<'_> {
    fn node(&mut self, filter: &RowFilter) -> Result<Node> {
        Ok(match filter {
            RowFilter::True => Node::True,
            RowFilter::False => Node::False,
            RowFilter::And(children) => Node::And(
                children
                    .iter()
                    .map(|c| self.node(c))
                    .collect::<Result<_>>()?,
            ),
            RowFilter::Or(children) => Node::Or(
                children
                    .iter()
                    .map(|c| self.node(c))
                    .collect::<Result<_>>()?,
            ),
            RowFilter::ColumnToArg { column, op, arg } => {
                let info = self.resolve(column)?;
                let leaf = self.compile_col_arg(info, *op, *arg)?;
                self.leaves.push(leaf);
                Node::Leaf(self.leaves.len() - 1)
            }
            RowFilter::ColumnToColumn { column, op, other } => {
                let a = self.resolve(column)?;
                let b = self.resolve(other)?;
                self.leaves.push(LeafKind::ColCol {
                    col: a.num,
                    op: *op,
                    other: b.num,
                    null_low: a.type_code.is_null_low(),
                });
                Node::Leaf(self.leaves.len() - 1)
            }
        })
    }

    fn resolve(&self, column: &crate::filter::ColumnRef) -> Result<&Arc<crate::schema::ColumnInfo>> {
        // Dotted paths traverse join columns, which this row type would
        // have to declare; unresolvable paths fail here.
        if !column.is_simple() {
            return Err(FilterError::UnknownColumn {
                filter: self.filter_string.clone(),
                column: column.to_string(),
            }
            .into());
        }
        self.row_info
            .column_by_name(column.head())
            .ok_or_else(|| {
                FilterError::UnknownColumn {
                    filter: self.filter_string.clone(),
                    column: column.to_string(),
                }
                .into()
            })
    }

    fn compile_col_arg(
        &self,
        info: &Arc<crate::schema::ColumnInfo>,
        op: CmpOp,
        arg: usize,
    ) -> Result<LeafKind> {
        let raw = self.args.get(arg).ok_or_else(|| FilterError::MissingArgument {
            filter: self.filter_string.clone(),
            arg,
        })?;

        let convert_one = |value: &Value| -> Result<Value> {
            if info.type_code.is_array() {
                // Array-typed columns compare whole arrays; the argument
                // must already carry matching elements.
                match value {
                    Value::Array(a) if a.elem_type() == info.type_code.plain() => {
                        Ok(value.clone())
                    }
                    Value::Null => Ok(Value::Null),
                    other => Err(FilterError::ArgumentConvert {
                        filter: self.filter_string.clone(),
                        arg,
                        column: info.name.to_string(),
                        source: rowstore_codec::ConvertError::Unsupported {
                            from: other.kind_name(),
                            to: info.type_code.plain(),
                        },
                    }
                    .into()),
                }
            } else {
                convert_value(value, info.type_code.plain()).map_err(|source| {
                    FilterError::ArgumentConvert {
                        filter: self.filter_string.clone(),
                        arg,
                        column: info.name.to_string(),
                        source,
                    }
                    .into()
                })
            }
        };

        let args: SmallVec<[Value; 1]> = if matches!(op, CmpOp::In | CmpOp::NotIn) {
            // `in` requires an array (or ordered set) of the column type.
            match raw {
                Value::Array(elements) => elements
                    .iter()
                    .map(|v| convert_one(&v))
                    .collect::<Result<_>>()?,
                other => {
                    return Err(FilterError::InArgumentType {
                        filter: self.filter_string.clone(),
                        arg,
                        found: other.kind_name(),
                    }
                    .into())
                }
            }
        } else {
            smallvec::smallvec![convert_one(raw)?]
        };

        // Pre-encode for byte-oriented quick comparison.
        let codec = if info.num.idx() < self.row_info.key_count() {
            &self.row_info.key_codecs()[info.num.idx()]
        } else {
            &self.row_info.value_codecs()[info.num.idx() - self.row_info.key_count()]
        };
        let needs_bytes = !matches!(codec.quick_mode(), QuickMode::Typed | QuickMode::Decode);
        let encoded = args
            .iter()
            .map(|value| {
                if !needs_bytes || value.is_null() {
                    Ok(None)
                } else {
                    codec.encode_for_compare(value).map(|b| Some(b.into_boxed_slice()))
                }
            })
            .collect::<core::result::Result<_, _>>()
            .map_err(DbError::Codec)?;

        Ok(LeafKind::ColArg {
            col: info.num,
            op,
            null_low: info.type_code.is_null_low(),
            args,
            encoded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::normalize::reduce;
    use crate::filter::parse;
    use crate::kv::mem::MemDatabase;
    use crate::kv::Database;
    use crate::schema::{ColumnDef, RowDescriptor};
    use rowstore_codec::ArrayValue;
    use rowstore_primitives::PlainType;

    fn registry() -> Arc<SchemaRegistry> {
        let db = MemDatabase::new();
        let meta = db.open_index("__meta").unwrap();
        let desc = RowDescriptor::new("T")
            .column(ColumnDef::new("k", PlainType::I64))
            .column(ColumnDef::new("name", PlainType::Utf8))
            .column(ColumnDef::new("score", PlainType::I32).nullable())
            .key(&["k"]);
        SchemaRegistry::open(db, meta, &desc).unwrap()
    }

    fn predicate(filter: &str, args: &[Value]) -> Arc<RowPredicate> {
        let registry = registry();
        let info = registry.current_info();
        let reduced = reduce(&parse(filter).unwrap());
        RowPredicate::new(registry, info, &reduced, args).unwrap()
    }

    fn encode_row(registry: &SchemaRegistry, k: i64, name: &str, score: Option<i32>) -> (Vec<u8>, Vec<u8>) {
        let (version, info) = registry.current();
        let mut row = Row::new(Arc::clone(&info));
        row.set_by_name("k", Value::I64(k)).unwrap();
        row.set_by_name("name", Value::from(name)).unwrap();
        row.set_by_name("score", score.map(Value::I32).unwrap_or(Value::Null))
            .unwrap();
        let key = info
            .encode_key_with(|i| row.get(ColumnId(i as u16)))
            .unwrap();
        let mut value = Vec::new();
        SchemaRegistry::encode_version(version, &mut value).unwrap();
        info.encode_value_cols_with(&mut value, |i| {
            row.get(ColumnId((info.key_count() + i) as u16))
        })
        .unwrap();
        (key, value)
    }

    #[test]
    fn typed_and_quick_paths_agree() {
        let registry = registry();
        let pred = predicate(
            "k >= ?0 && name == ?1 && score != ?2",
            &[Value::I64(5), Value::from("abc"), Value::I32(9)],
        );
        let (key, value) = encode_row(&registry, 7, "abc", Some(10));
        assert!(pred.test_kv(&key, &value).unwrap());
        let row = registry.decode_row(&key, &value).unwrap();
        assert!(pred.test_row(&row).unwrap());

        let (key, value) = encode_row(&registry, 4, "abc", Some(10));
        assert!(!pred.test_kv(&key, &value).unwrap());
        let (key, value) = encode_row(&registry, 7, "abd", Some(10));
        assert!(!pred.test_kv(&key, &value).unwrap());
        let (key, value) = encode_row(&registry, 7, "abc", Some(9));
        assert!(!pred.test_kv(&key, &value).unwrap());
    }

    #[test]
    fn null_compares_high_by_default() {
        let registry = registry();
        let pred = predicate("score > ?0", &[Value::I32(100)]);
        let (key, value) = encode_row(&registry, 1, "x", None);
        // null orders above every value under the default placement.
        assert!(pred.test_kv(&key, &value).unwrap());
    }

    #[test]
    fn in_requires_array_argument() {
        let err = RowPredicate::new(
            registry(),
            registry().current_info(),
            &reduce(&parse("k in ?0").unwrap()),
            &[Value::I64(3)],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            DbError::Filter(FilterError::InArgumentType { .. })
        ));
    }

    #[test]
    fn in_matches_membership() {
        let registry = registry();
        let pred = predicate("k in ?0", &[Value::Array(ArrayValue::I64(vec![1, 5, 9]))]);
        let (key, value) = encode_row(&registry, 5, "x", None);
        assert!(pred.test_kv(&key, &value).unwrap());
        let (key, value) = encode_row(&registry, 6, "x", None);
        assert!(!pred.test_kv(&key, &value).unwrap());
    }

    #[test]
    fn test_key_is_conservative_over_value_columns() {
        let registry = registry();
        let pred = predicate("k == ?0 && name == ?1", &[Value::I64(7), Value::from("abc")]);
        let (key, _) = encode_row(&registry, 7, "whatever", None);
        // The name column is indeterminate from the key alone.
        assert!(pred.test_key(&key).unwrap());
        let (key, _) = encode_row(&registry, 8, "abc", None);
        assert!(!pred.test_key(&key).unwrap());
    }

    #[test]
    fn lossy_argument_conversion_is_rejected() {
        let err = RowPredicate::new(
            registry(),
            registry().current_info(),
            &reduce(&parse("score == ?0").unwrap()),
            &[Value::I64(1 << 40)],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            DbError::Filter(FilterError::ArgumentConvert { .. })
        ));
    }
}
