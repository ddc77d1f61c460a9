//! Row values and buffered query results for the relational adapters.

use std::collections::BTreeMap;
use std::fmt;

/// A single column value in a relational result row.
///
/// Both relational adapters decode their driver's native column types into
/// this set. Anything outside it surfaces as [`Error::Decode`] naming the
/// column rather than a silently mangled value.
///
/// [`Error::Decode`]: crate::error::Error::Decode
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// The value as a string slice, if text-typed.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// The value as an integer, if integer-typed.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            SqlValue::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => f.write_str("NULL"),
            SqlValue::Bool(b) => write!(f, "{b}"),
            SqlValue::Int(i) => write!(f, "{i}"),
            SqlValue::Float(v) => write!(f, "{v}"),
            SqlValue::Text(s) => f.write_str(s),
            SqlValue::Bytes(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

/// Dictionary-style result record: column name → value.
///
/// The row shape is fixed; callers never receive positional tuples.
pub type Row = BTreeMap<String, SqlValue>;

/// Result of a buffered (non-streamed) relational execute.
///
/// The owning connection is always closed before a `QueryOutput` is handed
/// to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOutput {
    /// Rows affected, as reported by the driver.
    pub rows_affected: u64,
    /// Last generated identifier, when the engine reports one.
    pub last_insert_id: Option<u64>,
    /// All rows of the result set, fully drained.
    pub rows: Vec<Row>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        assert!(SqlValue::Null.is_null());
        assert_eq!(SqlValue::Int(7).as_int(), Some(7));
        assert_eq!(SqlValue::Text("a".to_string()).as_text(), Some("a"));
        assert_eq!(SqlValue::Bool(true).as_int(), None);
    }
}
