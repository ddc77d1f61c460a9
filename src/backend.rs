//! Backend contract and connection lifecycle management.
//!
//! A backend is an adapter exposing the connect/execute contract for one
//! database engine. The only capability shared across engines is producing
//! a live connection from stored parameters; execution signatures are
//! deliberately engine-specific (an enumerated operation plus target scope
//! for the document store, a query string plus positional parameters for
//! the relational engines) and live on the concrete types.
//!
//! [`with_connection`] is the scoped-acquisition helper every execute path
//! goes through. Connection states move `unconnected → connecting →
//! connected → closing → closed`; a connect failure is terminal
//! (`connecting → failed`, no connection produced), and scope exit moves a
//! connected handle to `closing` unconditionally, whatever the unit of work
//! returned.

pub mod mongo;
pub mod mysql;
pub mod postgres;

pub use mongo::MongoBackend;
pub use mysql::MySqlBackend;
pub use postgres::PostgresBackend;

use crate::error::Error;
use crate::log_id::LogId;

/// A live, engine-specific connection handle.
pub trait Connection {
    /// Close the connection, releasing its resources.
    fn close(self) -> Result<(), Error>;
}

/// One database engine behind the connect/execute contract.
pub trait Backend {
    type Conn: Connection;

    /// Produce a fresh connection from the stored parameters.
    ///
    /// Called once per operation; no connection is cached between calls.
    fn connect(&self) -> Result<Self::Conn, Error>;
}

/// Run one unit of work against a freshly acquired connection.
///
/// Guarantees, in order:
///
/// 1. the connect attempt is logged before it happens;
/// 2. a connect failure is logged with full detail and returned unchanged —
///    no retry, retries are an external policy decision;
/// 3. whatever `work` does — return a value, return an error, bail early —
///    the connection's close is invoked exactly once afterwards;
/// 4. a close failure is logged and swallowed, so it can never mask the
///    outcome of the unit of work; the closure event is logged either way.
///
/// Every lifecycle event carries the operation's correlation id.
pub fn with_connection<B, T, F>(backend: &B, log_id: &LogId, work: F) -> Result<T, Error>
where
    B: Backend,
    F: FnOnce(&mut B::Conn) -> Result<T, Error>,
{
    tracing::info!(log_id = %log_id, "connecting to database");
    let mut conn = match backend.connect() {
        Ok(conn) => conn,
        Err(err) => {
            tracing::error!(log_id = %log_id, error = %err, "cannot connect to database");
            return Err(err);
        }
    };

    let result = work(&mut conn);

    match conn.close() {
        Ok(()) => tracing::info!(log_id = %log_id, "closed connection to database"),
        Err(err) => {
            tracing::warn!(log_id = %log_id, error = %err, "error closing connection, ignoring");
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeConn {
        closes: Arc<AtomicUsize>,
        fail_close: bool,
    }

    impl Connection for FakeConn {
        fn close(self) -> Result<(), Error> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            if self.fail_close {
                Err(Error::Configuration("close failed".to_string()))
            } else {
                Ok(())
            }
        }
    }

    struct FakeBackend {
        closes: Arc<AtomicUsize>,
        fail_connect: bool,
        fail_close: bool,
    }

    impl FakeBackend {
        fn new() -> Self {
            Self {
                closes: Arc::new(AtomicUsize::new(0)),
                fail_connect: false,
                fail_close: false,
            }
        }
    }

    impl Backend for FakeBackend {
        type Conn = FakeConn;

        fn connect(&self) -> Result<FakeConn, Error> {
            if self.fail_connect {
                return Err(Error::Configuration("connect refused".to_string()));
            }
            Ok(FakeConn {
                closes: Arc::clone(&self.closes),
                fail_close: self.fail_close,
            })
        }
    }

    #[test]
    fn test_close_invoked_once_on_success() {
        let backend = FakeBackend::new();
        let out = with_connection(&backend, &LogId::new(), |_conn| Ok(42)).unwrap();
        assert_eq!(out, 42);
        assert_eq!(backend.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_close_invoked_once_on_work_failure() {
        let backend = FakeBackend::new();
        let err = with_connection(&backend, &LogId::new(), |_conn| -> Result<(), Error> {
            Err(Error::Configuration("work blew up".to_string()))
        })
        .unwrap_err();
        assert!(matches!(err, Error::Configuration(msg) if msg == "work blew up"));
        assert_eq!(backend.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_close_failure_never_masks_work_result() {
        let mut backend = FakeBackend::new();
        backend.fail_close = true;
        let out = with_connection(&backend, &LogId::new(), |_conn| Ok("kept")).unwrap();
        assert_eq!(out, "kept");
        assert_eq!(backend.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_connect_failure_propagates_without_close() {
        let mut backend = FakeBackend::new();
        backend.fail_connect = true;
        let err = with_connection(&backend, &LogId::new(), |_conn| Ok(())).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert_eq!(backend.closes.load(Ordering::SeqCst), 0);
    }
}
