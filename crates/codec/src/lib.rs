//! Column value model and binary codecs for the rowstore engine.
//!
//! Two encoding regimes cover every column:
//!
//! - the **value regime** is a compact length-prefixed form used for the
//!   non-key columns of a row; interior columns frame themselves, the last
//!   column of a group runs to the end of the buffer;
//! - the **key regime** is order-preserving: `memcmp` over encoded bytes
//!   agrees with logical comparison, which is what lets range scans and
//!   quick filters work on still-encoded rows.
//!
//! The crate also carries the dynamic [`Value`] model rows are made of,
//! the PF length framing shared with the schema-version prefix, and the
//! exact-or-error argument conversion used by the filter compiler.

pub mod column;
pub mod convert;
pub mod error;
pub mod lex;
pub mod pf;
pub mod value;

pub use column::{ColumnCodec, QuickCol, QuickMode, Regime};
pub use convert::convert_value;
pub use error::{CodecError, ConvertError};
pub use value::{ArrayValue, Value};
