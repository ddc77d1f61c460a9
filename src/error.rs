//! Error types for the access layer.
//!
//! Driver failures are wrapped, not translated: whatever the native client
//! raised while connecting or executing is carried unchanged as the source
//! and can be matched on. The layer only adds [`Error::Configuration`] for
//! problems detected before any connection attempt, and [`Error::Decode`]
//! for result columns it cannot represent.

use thiserror::Error;

/// Errors that can occur while connecting to or querying a backend.
#[derive(Debug, Error)]
pub enum Error {
    /// MySQL driver failure (connect or execute).
    #[error("mysql driver error: {0}")]
    MySql(#[from] mysql::Error),

    /// PostgreSQL driver failure (connect or execute).
    #[error("postgres driver error: {0}")]
    Postgres(#[from] postgres::Error),

    /// MongoDB driver failure (connect or execute).
    #[error("mongodb driver error: {0}")]
    Mongo(#[from] mongodb::error::Error),

    /// Invalid or missing call parameters, detected before connecting.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// A result column whose type the row model cannot represent.
    #[error("cannot decode column `{column}`: {reason}")]
    Decode { column: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_display() {
        let err = Error::Configuration("'collection' is required".to_string());
        assert_eq!(
            err.to_string(),
            "invalid configuration: 'collection' is required"
        );
    }

    #[test]
    fn test_decode_display_names_column() {
        let err = Error::Decode {
            column: "payload".to_string(),
            reason: "unsupported type `macaddr`".to_string(),
        };
        assert!(err.to_string().contains("payload"));
        assert!(err.to_string().contains("macaddr"));
    }
}
