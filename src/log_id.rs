//! Per-operation correlation identifier.

use std::fmt;

use uuid::Uuid;

/// Opaque identifier generated once per execute call.
///
/// Every log line emitted during that call carries the id, so the lines of
/// one unit of work can be grouped during an audit. It has no effect on
/// behavior.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogId(String);

impl LogId {
    /// Generate a fresh identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for LogId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
