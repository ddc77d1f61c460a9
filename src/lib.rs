//! Trident - Unified Database Access Layer
//!
//! A thin, opinionated wrapper unifying three database drivers — MongoDB,
//! PostgreSQL and MySQL — behind one "connect, execute, optionally stream"
//! contract with structured per-operation logging. Everything hard —
//! protocol, cursors, transactions — stays in the native drivers; this
//! layer only decides between a buffered result and a lazily streamed one,
//! scopes every connection to exactly one unit of work, and tags all log
//! lines of a call with a shared correlation id.
//!
//! # Architecture
//!
//! - **Backends**: one adapter per engine ([`MongoBackend`],
//!   [`PostgresBackend`], [`MySqlBackend`]), each holding only the
//!   connection parameters it was built with.
//! - **Lifecycle**: [`with_connection`] acquires a fresh connection per
//!   operation and guarantees it is closed on every exit path.
//! - **Streaming**: [`RowStream`] / [`DocumentStream`] hold their
//!   connection open until the consumer drains or drops them.
//!
//! # Example
//!
//! ```rust,ignore
//! use trident_db::{MySqlBackend, SqlValue};
//!
//! let db = MySqlBackend::builder()
//!     .host("localhost")
//!     .user("app")
//!     .password("secret")
//!     .build();
//!
//! // Buffered: connection is closed before the result returns.
//! let output = db.execute_buffered("SELECT 1 AS one", &[])?;
//! assert_eq!(output.rows.len(), 1);
//!
//! // Streamed: connection stays open until the stream is drained.
//! for row in db.execute_streamed("SELECT * FROM salaries", &[]) {
//!     let row = row?;
//!     // ...
//! }
//! # Ok::<(), trident_db::Error>(())
//! ```
//!
//! Log level and destination are the host process's business: install a
//! `tracing` subscriber (or don't) — this crate only emits events.

pub mod backend;
pub mod error;
pub mod log_id;
pub mod params;
pub mod stream;
pub mod types;

pub use backend::mongo::{
    DocumentOperation, DocumentResult, DocumentStream, DocumentTarget, MongoBackend,
    MongoBackendBuilder,
};
pub use backend::mysql::{MySqlBackend, MySqlBackendBuilder, MySqlConnection};
pub use backend::postgres::{PostgresBackend, PostgresBackendBuilder};
pub use backend::{Backend, Connection, with_connection};
pub use error::Error;
pub use log_id::LogId;
pub use params::{ConnectionParams, ParamValue};
pub use stream::RowStream;
pub use types::{QueryOutput, Row, SqlValue};
