//! PostgreSQL adapter.
//!
//! Connection parameters are rendered into a libpq-style keyword/value
//! string, so extra parameters pass through to the driver verbatim under
//! their native names (`connect_timeout`, `application_name`, ...); an
//! unknown key is rejected by the driver itself. Each operation acquires
//! its own connection and result rows are decoded into dictionary-style
//! records.

use std::time::Instant;

use postgres::fallible_iterator::FallibleIterator;
use postgres::types::{ToSql, Type};
use postgres::{Client, Config, NoTls};

use crate::backend::{Backend, Connection};
use crate::error::Error;
use crate::log_id::LogId;
use crate::params::{ConnectionParams, ParamValue};
use crate::stream::RowStream;
use crate::types::{QueryOutput, Row, SqlValue};

/// PostgreSQL backend over the blocking `postgres` driver.
///
/// Holds connection parameters only; a fresh connection is made per
/// operation and closed before (buffered) or at exhaustion of (streamed)
/// the returned result.
#[derive(Debug, Clone)]
pub struct PostgresBackend {
    params: ConnectionParams,
}

impl PostgresBackend {
    pub fn builder() -> PostgresBackendBuilder {
        PostgresBackendBuilder::default()
    }

    /// The assembled connection parameters.
    pub fn params(&self) -> &ConnectionParams {
        &self.params
    }

    /// Execute a query, buffering the full result.
    ///
    /// The connection is closed before the result is returned. The engine
    /// has no session-global last-inserted-id, so `last_insert_id` is
    /// always `None`; use a `RETURNING` clause to read generated keys.
    pub fn execute_buffered(&self, query: &str, params: &[SqlValue]) -> Result<QueryOutput, Error> {
        let log_id = LogId::new();
        tracing::debug!(log_id = %log_id, params = %self.params, "connection parameters");
        crate::backend::with_connection(self, &log_id, |client| {
            let started = Instant::now();
            tracing::info!(log_id = %log_id, query = %query, "starting query execution");
            tracing::info!(log_id = %log_id, params = ?params, "query parameters");
            tracing::info!(log_id = %log_id, "not streaming results");

            let mut iter = client
                .query_raw(query, pg_params(params))
                .map_err(|err| log_execute_error(&log_id, err))?;

            let mut rows = Vec::new();
            while let Some(row) = iter
                .next()
                .map_err(|err| log_execute_error(&log_id, err))?
            {
                rows.push(decode_row(&row)?);
            }
            let rows_affected = iter.rows_affected().unwrap_or(0);
            drop(iter);

            tracing::info!(
                log_id = %log_id,
                rows_affected,
                elapsed_secs = started.elapsed().as_secs_f64(),
                "query execution finished"
            );

            Ok(QueryOutput {
                rows_affected,
                last_insert_id: None,
                rows,
            })
        })
    }

    /// Execute a query, streaming rows one at a time.
    ///
    /// The producing scope owns the connection for the lifetime of the
    /// returned stream; it is closed when the stream is exhausted or
    /// dropped. Failures — including connect failures — arrive as `Err`
    /// items of the sequence.
    pub fn execute_streamed(&self, query: &str, params: &[SqlValue]) -> RowStream<Row> {
        let backend = self.clone();
        let query = query.to_string();
        let params = params.to_vec();

        RowStream::spawn(move |sink| {
            let log_id = LogId::new();
            tracing::debug!(log_id = %log_id, params = %backend.params, "connection parameters");
            let outcome = crate::backend::with_connection(&backend, &log_id, |client| {
                let started = Instant::now();
                tracing::info!(log_id = %log_id, query = %query, "starting query execution");
                tracing::info!(log_id = %log_id, params = ?params, "query parameters");
                tracing::info!(log_id = %log_id, "streaming results");

                let mut iter = client
                    .query_raw(query.as_str(), pg_params(&params))
                    .map_err(|err| log_execute_error(&log_id, err))?;

                let mut yielded = 0u64;
                while let Some(row) = iter
                    .next()
                    .map_err(|err| log_execute_error(&log_id, err))?
                {
                    if !sink.emit(decode_row(&row)?) {
                        tracing::info!(log_id = %log_id, rows = yielded, "stream abandoned by consumer");
                        return Ok(());
                    }
                    yielded += 1;
                }

                tracing::info!(
                    log_id = %log_id,
                    rows = yielded,
                    elapsed_secs = started.elapsed().as_secs_f64(),
                    "query execution finished"
                );
                Ok(())
            });

            if let Err(err) = outcome {
                sink.fail(err);
            }
        })
    }

    /// Run driver-level work against one scoped connection.
    ///
    /// For operations the execute contract does not cover, such as batch
    /// inserts under an explicit transaction. The connection is closed when
    /// `work` returns, whatever it returns.
    pub fn with_connection<T, F>(&self, work: F) -> Result<T, Error>
    where
        F: FnOnce(&mut Client) -> Result<T, Error>,
    {
        let log_id = LogId::new();
        tracing::debug!(log_id = %log_id, params = %self.params, "connection parameters");
        crate::backend::with_connection(self, &log_id, work)
    }

    fn config(&self) -> Result<Config, Error> {
        let mut rendered = String::new();
        for (name, value) in self.params.iter() {
            if !rendered.is_empty() {
                rendered.push(' ');
            }
            rendered.push_str(name);
            rendered.push('=');
            rendered.push_str(&kv_escape(&value.to_string()));
        }
        rendered.parse::<Config>().map_err(Error::from)
    }
}

impl Backend for PostgresBackend {
    type Conn = Client;

    fn connect(&self) -> Result<Client, Error> {
        let config = self.config()?;
        config.connect(NoTls).map_err(Error::from)
    }
}

impl Connection for Client {
    fn close(self) -> Result<(), Error> {
        Client::close(self).map_err(Error::from)
    }
}

/// Builder for [`PostgresBackend`].
///
/// Named parameters that are never set (or set to an empty string) are
/// omitted from the parameter map entirely.
#[derive(Debug, Default)]
pub struct PostgresBackendBuilder {
    host: Option<String>,
    user: Option<String>,
    password: Option<String>,
    dbname: Option<String>,
    port: Option<u16>,
    extras: Vec<(String, ParamValue)>,
}

impl PostgresBackendBuilder {
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn dbname(mut self, dbname: impl Into<String>) -> Self {
        self.dbname = Some(dbname.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Pass an additional driver parameter through verbatim, under its
    /// libpq name (for example `connect_timeout` or `application_name`).
    pub fn extra(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.extras.push((name.into(), value.into()));
        self
    }

    pub fn build(self) -> PostgresBackend {
        let mut params = ConnectionParams::new();
        params.set_if_some("host", self.host);
        params.set_if_some("user", self.user);
        params.set_if_some("password", self.password);
        params.set_if_some("dbname", self.dbname);
        params.set_if_some("port", self.port);
        for (name, value) in self.extras {
            params.set(&name, value);
        }
        PostgresBackend { params }
    }
}

fn log_execute_error(log_id: &LogId, err: postgres::Error) -> Error {
    tracing::error!(log_id = %log_id, error = %err, "query execution failed");
    Error::from(err)
}

const PG_NULL: Option<i64> = None;

fn pg_params(params: &[SqlValue]) -> Vec<&(dyn ToSql + Sync)> {
    params
        .iter()
        .map(|value| match value {
            SqlValue::Null => &PG_NULL as &(dyn ToSql + Sync),
            SqlValue::Bool(v) => v,
            SqlValue::Int(v) => v,
            SqlValue::Float(v) => v,
            SqlValue::Text(v) => v,
            SqlValue::Bytes(v) => v,
        })
        .collect()
}

fn decode_row(row: &postgres::Row) -> Result<Row, Error> {
    let mut out = Row::new();
    for idx in 0..row.columns().len() {
        let name = row.columns()[idx].name().to_string();
        let value = decode_column(row, idx)?;
        out.insert(name, value);
    }
    Ok(out)
}

fn decode_column(row: &postgres::Row, idx: usize) -> Result<SqlValue, Error> {
    let column = &row.columns()[idx];
    let ty = column.type_();

    let decoded = if *ty == Type::BOOL {
        row.try_get::<_, Option<bool>>(idx)?.map(SqlValue::Bool)
    } else if *ty == Type::INT2 {
        row.try_get::<_, Option<i16>>(idx)?
            .map(|v| SqlValue::Int(v.into()))
    } else if *ty == Type::INT4 {
        row.try_get::<_, Option<i32>>(idx)?
            .map(|v| SqlValue::Int(v.into()))
    } else if *ty == Type::INT8 {
        row.try_get::<_, Option<i64>>(idx)?.map(SqlValue::Int)
    } else if *ty == Type::FLOAT4 {
        row.try_get::<_, Option<f32>>(idx)?
            .map(|v| SqlValue::Float(v.into()))
    } else if *ty == Type::FLOAT8 {
        row.try_get::<_, Option<f64>>(idx)?.map(SqlValue::Float)
    } else if *ty == Type::TEXT || *ty == Type::VARCHAR || *ty == Type::BPCHAR || *ty == Type::NAME
    {
        row.try_get::<_, Option<String>>(idx)?.map(SqlValue::Text)
    } else if *ty == Type::BYTEA {
        row.try_get::<_, Option<Vec<u8>>>(idx)?.map(SqlValue::Bytes)
    } else if *ty == Type::JSON || *ty == Type::JSONB {
        row.try_get::<_, Option<serde_json::Value>>(idx)?
            .map(|v| SqlValue::Text(v.to_string()))
    } else if *ty == Type::UUID {
        row.try_get::<_, Option<uuid::Uuid>>(idx)?
            .map(|v| SqlValue::Text(v.to_string()))
    } else if *ty == Type::TIMESTAMP {
        row.try_get::<_, Option<chrono::NaiveDateTime>>(idx)?
            .map(|v| SqlValue::Text(v.to_string()))
    } else if *ty == Type::TIMESTAMPTZ {
        row.try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(idx)?
            .map(|v| SqlValue::Text(v.to_rfc3339()))
    } else if *ty == Type::DATE {
        row.try_get::<_, Option<chrono::NaiveDate>>(idx)?
            .map(|v| SqlValue::Text(v.to_string()))
    } else {
        return Err(Error::Decode {
            column: column.name().to_string(),
            reason: format!("unsupported column type `{ty}`"),
        });
    };

    Ok(decoded.unwrap_or(SqlValue::Null))
}

/// Quote a value for a libpq keyword/value connection string.
fn kv_escape(value: &str) -> String {
    let needs_quoting =
        value.is_empty() || value.contains(|c: char| c.is_whitespace() || c == '\'' || c == '\\');
    if !needs_quoting {
        return value.to_string();
    }
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for c in value.chars() {
        if c == '\'' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('\'');
    quoted
}

#[cfg(test)]
mod tests {
    use super::*;
    use postgres::config::Host;

    #[test]
    fn test_builder_omits_missing_parameters() {
        let backend = PostgresBackend::builder().host("localhost").build();
        assert_eq!(backend.params().get_str("host"), Some("localhost"));
        assert!(!backend.params().contains("user"));
        assert!(!backend.params().contains("password"));
        assert!(!backend.params().contains("dbname"));
        assert_eq!(backend.params().len(), 1);
    }

    #[test]
    fn test_config_carries_builder_values() {
        let backend = PostgresBackend::builder()
            .host("localhost")
            .user("app")
            .password("s3cret")
            .dbname("test_db")
            .port(5433)
            .build();

        let config = backend.config().unwrap();
        assert_eq!(config.get_hosts(), &[Host::Tcp("localhost".to_string())]);
        assert_eq!(config.get_user(), Some("app"));
        assert_eq!(config.get_password(), Some(b"s3cret".as_slice()));
        assert_eq!(config.get_dbname(), Some("test_db"));
        assert_eq!(config.get_ports(), &[5433]);
    }

    #[test]
    fn test_extra_parameters_pass_through_verbatim() {
        let backend = PostgresBackend::builder()
            .host("localhost")
            .extra("application_name", "loader")
            .extra("connect_timeout", 10i64)
            .build();

        let config = backend.config().unwrap();
        assert_eq!(config.get_application_name(), Some("loader"));
        assert_eq!(
            config.get_connect_timeout(),
            Some(&std::time::Duration::from_secs(10))
        );
    }

    #[test]
    fn test_unknown_extra_parameter_is_rejected_by_driver() {
        let backend = PostgresBackend::builder()
            .host("localhost")
            .extra("no_such_option", "x")
            .build();

        let err = backend.config().unwrap_err();
        assert!(matches!(err, Error::Postgres(_)));
    }

    #[test]
    fn test_kv_escape() {
        assert_eq!(kv_escape("plain"), "plain");
        assert_eq!(kv_escape("two words"), "'two words'");
        assert_eq!(kv_escape("it's"), "'it\\'s'");
        assert_eq!(kv_escape(""), "''");
    }

    #[test]
    fn test_password_not_logged_in_display() {
        let backend = PostgresBackend::builder()
            .host("localhost")
            .password("s3cret")
            .build();
        assert!(!backend.params().to_string().contains("s3cret"));
    }
}
