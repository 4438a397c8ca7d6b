use enum_as_inner::EnumAsInner;
use rowstore_codec::{CodecError, ConvertError};
use rowstore_primitives::{IndexId, SchemaVersion};
use thiserror::Error;

/// Top-level engine error, folding the per-subsystem kinds together.
#[derive(Error, Debug, EnumAsInner)]
pub enum DbError {
    #[error("SchemaError: {0}")]
    Schema(#[from] SchemaError),
    #[error("FilterError: {0}")]
    Filter(#[from] FilterError),
    #[error("TableError: {0}")]
    Table(#[from] TableError),
    #[error("IndexError: {0}")]
    Index(#[from] IndexError),
    #[error("store error: {0}")]
    Kv(#[from] KvError),
    #[error("CodecError: {0}")]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Row-type descriptor and version-registry failures. Raised synchronously;
/// never leaves persistent effects.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SchemaError {
    #[error("row type `{row_type}` has no column named `{column}`")]
    UnknownColumn { row_type: String, column: String },
    #[error("row type `{row_type}` declares column `{column}` twice")]
    DuplicateColumn { row_type: String, column: String },
    #[error("row type `{row_type}` has no key columns")]
    NoKeyColumns { row_type: String },
    #[error("key column `{column}` of `{row_type}` cannot be a join")]
    IncompatibleKeyColumn { row_type: String, column: String },
    #[error("array column `{column}` of `{row_type}` requires a primitive element type")]
    NonPrimitiveArray { row_type: String, column: String },
    #[error("column `{column}` of `{row_type}` has an unsupported type")]
    UnsupportedColumn { row_type: String, column: String },
    #[error("auto-range column `{column}` of `{row_type}` must be an integer key column")]
    InvalidAutoColumn { row_type: String, column: String },
    #[error("column `{column}` of `{row_type}` is unset")]
    UnsetColumn { row_type: String, column: String },
    #[error("column `{column}` of `{row_type}` is read-only")]
    ReadOnlyColumn { row_type: String, column: String },
    #[error("column `{column}` of `{row_type}` cannot hold a `{found}` value")]
    ColumnType {
        row_type: String,
        column: String,
        found: &'static str,
    },
    #[error("key columns of `{row_type}` cannot change across schema versions")]
    KeyLayoutChanged { row_type: String },
    #[error("schema version {version} of `{row_type}` is not registered")]
    VersionMissing {
        row_type: String,
        version: SchemaVersion,
    },
    #[error("stored schema catalog entry for `{row_type}` is corrupt")]
    CorruptCatalog { row_type: String },
}

/// Filter parsing, normalization and argument failures. The offending
/// filter string always rides along.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum FilterError {
    #[error("filter `{filter}`: parse error at byte {position}: {message}")]
    Parse {
        filter: String,
        position: usize,
        message: String,
    },
    #[error("filter `{filter}`: unknown column `{column}`")]
    UnknownColumn { filter: String, column: String },
    #[error("filter `{filter}`: normalization exceeds the term bound")]
    ComplexFilter { filter: String },
    #[error("filter `{filter}`: argument ?{arg} is missing")]
    MissingArgument { filter: String, arg: usize },
    #[error("filter `{filter}`: argument ?{arg} for column `{column}`: {source}")]
    ArgumentConvert {
        filter: String,
        arg: usize,
        column: String,
        source: ConvertError,
    },
    #[error("filter `{filter}`: `in` requires an array argument for ?{arg}, found `{found}`")]
    InArgumentType {
        filter: String,
        arg: usize,
        found: &'static str,
    },
}

/// Table-layer failures.
#[derive(Error, Debug)]
pub enum TableError {
    #[error("row of `{row_type}` already exists for this key")]
    KeyExists { row_type: String },
    #[error("no row of `{row_type}` exists for this key")]
    NoSuchRow { row_type: String },
    #[error("table `{0}` is closed")]
    Closed(String),
    #[error("write to `{row_type}` raced a trigger transition and could not be retried")]
    TriggerUnavailable { row_type: String },
    #[error("updater for `{row_type}` has no current row")]
    NoCurrentRow { row_type: String },
    #[error("auto-range column `{column}` of `{row_type}` has no values left")]
    SequenceExhausted { row_type: String, column: String },
}

/// Secondary-index failures.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("secondary index `{0}` already exists")]
    Exists(String),
    #[error("secondary index `{0}` not found")]
    NotFound(String),
    #[error("secondary index `{name}` build failed: {message}")]
    BuildFailed { name: String, message: String },
    #[error("alternate key `{name}` duplicates value {value} already present")]
    AlternateKeyViolation { name: String, value: String },
}

/// Failures surfaced by the underlying key/value store. Transient kinds
/// leave scanners in a recoverable state: the cursor is reset and the
/// transaction unwound.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum KvError {
    #[error("lock timeout after {millis} ms on index {index}")]
    LockTimeout { index: IndexId, millis: u64 },
    #[error("deadlock avoided on index {index}")]
    Deadlock { index: IndexId },
    #[error("database is closed")]
    Closed,
    #[error("index {0} is closed")]
    IndexClosed(IndexId),
    #[error("index `{0}` not found")]
    NoSuchIndex(String),
    #[error("sorter was reset while in use")]
    SorterReset,
    #[error("transaction scope underflow")]
    ScopeUnderflow,
    #[error("cursor is not positioned on an entry")]
    CursorUnpositioned,
    #[error("transaction type is foreign to this store")]
    ForeignTransaction,
}

pub type Result<T, E = DbError> = core::result::Result<T, E>;
