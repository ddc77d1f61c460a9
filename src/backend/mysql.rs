//! MySQL adapter.
//!
//! Two behaviors distinguish this adapter from the PostgreSQL one:
//!
//! - the client-side connection count is pinned to exactly one via pool
//!   constraints applied just before connecting, so pooling is effectively
//!   disabled and each operation owns its one connection outright;
//! - when draining a buffered result fails with the server's
//!   "no resultset produced" error (the statement was not a query), the
//!   failure is treated as zero rows instead of propagating. Any other
//!   driver failure propagates unchanged.
//!
//! Autocommit is requested from the driver as a connect-time init
//! statement; this layer does not enforce any transactional behavior.

use std::time::{Duration, Instant};

use mysql::prelude::{Protocol, Queryable};
use mysql::{Opts, OptsBuilder, Pool, PoolConstraints, PoolOpts, PooledConn, QueryResult};

use crate::backend::{Backend, Connection};
use crate::error::Error;
use crate::log_id::LogId;
use crate::params::{ConnectionParams, ParamValue};
use crate::stream::{RowSink, RowStream};
use crate::types::{QueryOutput, Row, SqlValue};

/// Server error message reported when rows are fetched from a statement
/// that did not produce a result set. Matched exactly; treated as an empty
/// result rather than a failure.
const NO_RESULT_SET_MESSAGE: &str = "no resultset produced";

/// MySQL backend over the blocking `mysql` driver.
#[derive(Debug, Clone)]
pub struct MySqlBackend {
    params: ConnectionParams,
}

/// One scoped MySQL connection: a driver pool pinned to a single
/// connection, plus the connection checked out of it. Closing drops both,
/// which disconnects outright instead of returning the handle to a pool.
pub struct MySqlConnection {
    pool: Pool,
    conn: PooledConn,
}

impl MySqlConnection {
    /// The raw driver connection, for driver-level work.
    pub fn driver(&mut self) -> &mut PooledConn {
        &mut self.conn
    }
}

impl Connection for MySqlConnection {
    fn close(self) -> Result<(), Error> {
        drop(self.conn);
        drop(self.pool);
        Ok(())
    }
}

impl MySqlBackend {
    pub fn builder() -> MySqlBackendBuilder {
        MySqlBackendBuilder::default()
    }

    /// The assembled connection parameters.
    pub fn params(&self) -> &ConnectionParams {
        &self.params
    }

    /// Execute a query, buffering the full result.
    ///
    /// The connection is closed before the result is returned.
    /// `last_insert_id` is `None` when the driver reports no generated key.
    pub fn execute_buffered(&self, query: &str, params: &[SqlValue]) -> Result<QueryOutput, Error> {
        let log_id = LogId::new();
        tracing::debug!(log_id = %log_id, params = %self.params, "connection parameters");
        crate::backend::with_connection(self, &log_id, |conn| {
            let started = Instant::now();
            tracing::info!(log_id = %log_id, query = %query, "starting query execution");
            tracing::info!(log_id = %log_id, params = ?params, "query parameters");
            tracing::info!(log_id = %log_id, "not streaming results");

            // Empty params run over the text protocol, anything else over
            // the binary (prepared) protocol.
            let output = if params.is_empty() {
                let mut result = conn
                    .driver()
                    .query_iter(query)
                    .map_err(|err| log_execute_error(&log_id, err))?;
                drain_result(&log_id, &mut result)?
            } else {
                let mut result = conn
                    .driver()
                    .exec_iter(query, mysql_params(params))
                    .map_err(|err| log_execute_error(&log_id, err))?;
                drain_result(&log_id, &mut result)?
            };

            tracing::info!(
                log_id = %log_id,
                rows_affected = output.rows_affected,
                elapsed_secs = started.elapsed().as_secs_f64(),
                "query execution finished"
            );
            Ok(output)
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
            let outcome = crate::backend::with_connection(&backend, &log_id, |conn| {
                let started = Instant::now();
                tracing::info!(log_id = %log_id, query = %query, "starting query execution");
                tracing::info!(log_id = %log_id, params = ?params, "query parameters");
                tracing::info!(log_id = %log_id, "streaming results");

                let finished = if params.is_empty() {
                    let mut result = conn
                        .driver()
                        .query_iter(query.as_str())
                        .map_err(|err| log_execute_error(&log_id, err))?;
                    stream_result(&log_id, &sink, &mut result)?
                } else {
                    let mut result = conn
                        .driver()
                        .exec_iter(query.as_str(), mysql_params(&params))
                        .map_err(|err| log_execute_error(&log_id, err))?;
                    stream_result(&log_id, &sink, &mut result)?
                };

                match finished {
                    Some(rows) => tracing::info!(
                        log_id = %log_id,
                        rows,
                        elapsed_secs = started.elapsed().as_secs_f64(),
                        "query execution finished"
                    ),
                    None => tracing::info!(log_id = %log_id, "stream abandoned by consumer"),
                }
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
        F: FnOnce(&mut MySqlConnection) -> Result<T, Error>,
    {
        let log_id = LogId::new();
        tracing::debug!(log_id = %log_id, params = %self.params, "connection parameters");
        crate::backend::with_connection(self, &log_id, work)
    }

    fn opts(&self) -> Result<Opts, Error> {
        let mut opts = OptsBuilder::new().init(vec!["SET autocommit=1".to_string()]);

        for (name, value) in self.params.iter() {
            opts = match name {
                "host" => opts.ip_or_hostname(Some(value.to_string())),
                "user" => opts.user(Some(value.to_string())),
                "password" => opts.pass(Some(value.to_string())),
                "db_name" => opts.db_name(Some(value.to_string())),
                "port" => opts.tcp_port(parse_param(name, value)?),
                "connect_timeout_ms" => {
                    let ms: u64 = parse_param(name, value)?;
                    opts.tcp_connect_timeout(Some(Duration::from_millis(ms)))
                }
                other => {
                    return Err(Error::Configuration(format!(
                        "unsupported connection parameter `{other}`"
                    )));
                }
            };
        }

        // Exactly one client-side connection, applied just before
        // connecting; pooling stays disabled.
        let constraints = PoolConstraints::new(1, 1).expect("1..=1 is a valid pool range");
        opts = opts.pool_opts(PoolOpts::default().with_constraints(constraints));

        Ok(Opts::from(opts))
    }
}

impl Backend for MySqlBackend {
    type Conn = MySqlConnection;

    fn connect(&self) -> Result<MySqlConnection, Error> {
        let pool = Pool::new(self.opts()?)?;
        let conn = pool.get_conn()?;
        Ok(MySqlConnection { pool, conn })
    }
}

/// Builder for [`MySqlBackend`].
///
/// Named parameters that are never set (or set to an empty string) are
/// omitted from the parameter map entirely.
#[derive(Debug, Default)]
pub struct MySqlBackendBuilder {
    host: Option<String>,
    user: Option<String>,
    password: Option<String>,
    db_name: Option<String>,
    port: Option<u16>,
    extras: Vec<(String, ParamValue)>,
}

impl MySqlBackendBuilder {
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

    pub fn db_name(mut self, db_name: impl Into<String>) -> Self {
        self.db_name = Some(db_name.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Pass an additional driver parameter through. The adapter maps
    /// parameter names onto the driver's typed options, so only names it
    /// knows (`connect_timeout_ms`, ...) are accepted; an unknown name
    /// fails with a configuration error at connect time.
    pub fn extra(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.extras.push((name.into(), value.into()));
        self
    }

    pub fn build(self) -> MySqlBackend {
        let mut params = ConnectionParams::new();
        params.set_if_some("host", self.host);
        params.set_if_some("user", self.user);
        params.set_if_some("password", self.password);
        params.set_if_some("db_name", self.db_name);
        params.set_if_some("port", self.port);
        for (name, value) in self.extras {
            params.set(&name, value);
        }
        MySqlBackend { params }
    }
}

fn parse_param<T: std::str::FromStr>(name: &str, value: &ParamValue) -> Result<T, Error> {
    value.to_string().parse().map_err(|_| {
        Error::Configuration(format!("invalid value `{value}` for parameter `{name}`"))
    })
}

fn log_execute_error(log_id: &LogId, err: mysql::Error) -> Error {
    tracing::error!(log_id = %log_id, error = %err, "query execution failed");
    Error::from(err)
}

fn is_no_result_set(err: &mysql::Error) -> bool {
    matches!(err, mysql::Error::MySqlError(server) if server.message == NO_RESULT_SET_MESSAGE)
}

/// Drain the first result set into a buffered output. This layer never
/// issues multi-statement text, so there is at most one set.
///
/// `rows_affected` follows the C API convention: a statement that returned
/// rows reports how many it returned, anything else reports the driver's
/// affected-row count.
fn drain_result<P: Protocol>(
    log_id: &LogId,
    result: &mut QueryResult<'_, '_, '_, P>,
) -> Result<QueryOutput, Error> {
    let mut rows = Vec::new();
    if let Some(result_set) = result.iter() {
        for item in result_set {
            match item {
                Ok(row) => rows.push(decode_mysql_row(row)?),
                Err(err) if is_no_result_set(&err) => {
                    tracing::debug!(log_id = %log_id, "statement produced no result set, returning zero rows");
                    break;
                }
                Err(err) => return Err(log_execute_error(log_id, err)),
            }
        }
    }

    let rows_affected = if rows.is_empty() {
        result.affected_rows()
    } else {
        rows.len() as u64
    };
    let last_insert_id = result.last_insert_id();

    Ok(QueryOutput {
        rows_affected,
        last_insert_id,
        rows,
    })
}

/// Hand rows of the first result set to the stream one at a time. Returns
/// `Some(count)` when the result set was exhausted, `None` when the
/// consumer abandoned the stream.
fn stream_result<P: Protocol>(
    log_id: &LogId,
    sink: &RowSink<Row>,
    result: &mut QueryResult<'_, '_, '_, P>,
) -> Result<Option<u64>, Error> {
    let mut yielded = 0u64;
    if let Some(result_set) = result.iter() {
        for item in result_set {
            let row = item.map_err(|err| log_execute_error(log_id, err))?;
            if !sink.emit(decode_mysql_row(row)?) {
                return Ok(None);
            }
            yielded += 1;
        }
    }
    Ok(Some(yielded))
}

fn mysql_params(params: &[SqlValue]) -> mysql::Params {
    let values = params
        .iter()
        .map(|value| match value {
            SqlValue::Null => mysql::Value::NULL,
            SqlValue::Bool(v) => mysql::Value::from(*v),
            SqlValue::Int(v) => mysql::Value::Int(*v),
            SqlValue::Float(v) => mysql::Value::Double(*v),
            SqlValue::Text(v) => mysql::Value::Bytes(v.clone().into_bytes()),
            SqlValue::Bytes(v) => mysql::Value::Bytes(v.clone()),
        })
        .collect();
    mysql::Params::Positional(values)
}

fn decode_mysql_row(row: mysql::Row) -> Result<Row, Error> {
    let columns = row.columns();
    let values = row.unwrap();

    let mut out = Row::new();
    for (column, value) in columns.iter().zip(values) {
        out.insert(column.name_str().to_string(), mysql_value_to_sql(value));
    }
    Ok(out)
}

fn mysql_value_to_sql(value: mysql::Value) -> SqlValue {
    match value {
        mysql::Value::NULL => SqlValue::Null,
        mysql::Value::Int(v) => SqlValue::Int(v),
        mysql::Value::UInt(v) => match i64::try_from(v) {
            Ok(v) => SqlValue::Int(v),
            // Out of signed range; keep the digits rather than truncate.
            Err(_) => SqlValue::Text(v.to_string()),
        },
        mysql::Value::Float(v) => SqlValue::Float(f64::from(v)),
        mysql::Value::Double(v) => SqlValue::Float(v),
        mysql::Value::Bytes(bytes) => match String::from_utf8(bytes) {
            Ok(text) => SqlValue::Text(text),
            Err(err) => SqlValue::Bytes(err.into_bytes()),
        },
        mysql::Value::Date(year, month, day, hour, minute, second, micros) => {
            if micros == 0 {
                SqlValue::Text(format!(
                    "{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}"
                ))
            } else {
                SqlValue::Text(format!(
                    "{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}.{micros:06}"
                ))
            }
        }
        mysql::Value::Time(negative, days, hours, minutes, seconds, micros) => {
            let sign = if negative { "-" } else { "" };
            let hours = u32::from(hours) + days * 24;
            if micros == 0 {
                SqlValue::Text(format!("{sign}{hours:02}:{minutes:02}:{seconds:02}"))
            } else {
                SqlValue::Text(format!(
                    "{sign}{hours:02}:{minutes:02}:{seconds:02}.{micros:06}"
                ))
            }
        }
    }
}
