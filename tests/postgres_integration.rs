//! Live-server integration tests for the PostgreSQL backend.
//!
//! These tests need a reachable PostgreSQL server and are ignored by
//! default:
//!
//! ```sh
//! PG_HOST=localhost PG_USER=postgres PG_PASSWORD=secret \
//!     cargo test --test postgres_integration -- --ignored
//! ```
//!
//! Configuration: `PG_HOST`, `PG_PORT`, `PG_USER`, `PG_PASSWORD`,
//! `PG_DBNAME`. Set `TRIDENT_DB_LOGLEVEL` to see the per-operation log
//! lines.

use trident_db::{PostgresBackend, SqlValue};

const ROW_COUNT: usize = 1000;
const TABLE: &str = "trident_test_salaries";

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_env("TRIDENT_DB_LOGLEVEL")
        .unwrap_or_else(|_| "warn".into());
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn backend() -> PostgresBackend {
    let mut builder = PostgresBackend::builder()
        .host(std::env::var("PG_HOST").unwrap_or_else(|_| "localhost".to_string()))
        .user(std::env::var("PG_USER").unwrap_or_else(|_| "postgres".to_string()))
        .dbname(std::env::var("PG_DBNAME").unwrap_or_else(|_| "postgres".to_string()));
    if let Ok(password) = std::env::var("PG_PASSWORD") {
        builder = builder.password(password);
    }
    if let Ok(port) = std::env::var("PG_PORT") {
        builder = builder.port(port.parse().expect("PG_PORT must be a port number"));
    }
    builder.build()
}

#[test]
#[ignore = "requires a running PostgreSQL server"]
fn test_buffered_select_one() {
    init_logging();
    let db = backend();

    let output = db.execute_buffered("SELECT 1::INT8 AS one", &[]).unwrap();
    assert_eq!(output.rows_affected, 1);
    assert_eq!(output.last_insert_id, None);
    assert_eq!(output.rows.len(), 1);
    assert_eq!(output.rows[0].get("one"), Some(&SqlValue::Int(1)));
}

#[test]
#[ignore = "requires a running PostgreSQL server"]
fn test_typed_parameters() {
    init_logging();
    let db = backend();

    let output = db
        .execute_buffered(
            "SELECT $1::INT8 AS number, $2::TEXT AS label",
            &[SqlValue::Int(7), SqlValue::Text("seven".to_string())],
        )
        .unwrap();
    assert_eq!(output.rows[0].get("number"), Some(&SqlValue::Int(7)));
    assert_eq!(
        output.rows[0].get("label"),
        Some(&SqlValue::Text("seven".to_string()))
    );
}

#[test]
#[ignore = "requires a running PostgreSQL server"]
fn test_salaries_roundtrip() {
    init_logging();
    let db = backend();

    db.execute_buffered(&format!("DROP TABLE IF EXISTS {TABLE}"), &[])
        .unwrap();
    db.execute_buffered(
        &format!(
            "CREATE TABLE {TABLE} (\
             emp_no BIGINT NOT NULL,\
             salary BIGINT NOT NULL,\
             from_date DATE NOT NULL,\
             to_date DATE NOT NULL,\
             PRIMARY KEY (emp_no, from_date))"
        ),
        &[],
    )
    .unwrap();

    // Batch insert through one scoped connection, under an explicit
    // transaction.
    db.with_connection(|client| {
        let mut tx = client.transaction()?;
        let stmt = tx.prepare(&format!(
            "INSERT INTO {TABLE} (emp_no, salary, from_date, to_date) \
             VALUES ($1, $2, '1996-08-03', '1997-08-03')"
        ))?;
        for i in 0..ROW_COUNT as i64 {
            tx.execute(&stmt, &[&i, &(40_000 + i)])?;
        }
        tx.commit()?;
        Ok(())
    })
    .unwrap();

    // A plain DML statement reports its affected count and no rows.
    let output = db
        .execute_buffered(
            &format!("UPDATE {TABLE} SET salary = salary + 1 WHERE emp_no < $1"),
            &[SqlValue::Int(10)],
        )
        .unwrap();
    assert_eq!(output.rows_affected, 10);
    assert!(output.rows.is_empty());

    // Streaming yields every row exactly once.
    let mut count = 0usize;
    for row in db.execute_streamed(&format!("SELECT * FROM {TABLE}"), &[]) {
        let row = row.unwrap();
        assert!(row.contains_key("salary"));
        count += 1;
    }
    assert_eq!(count, ROW_COUNT);

    // Abandoning a stream early must not wedge the next operation.
    let mut stream = db.execute_streamed(&format!("SELECT * FROM {TABLE}"), &[]);
    for _ in 0..10 {
        stream.next().unwrap().unwrap();
    }
    drop(stream);

    db.execute_buffered(&format!("DROP TABLE {TABLE}"), &[])
        .unwrap();
}
