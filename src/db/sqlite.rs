//! SQLite executor.
//!
//! sqlx runs each SQLite connection on its own worker thread, so dropping the
//! future does not stop a statement that is already running there. A progress
//! handler interrupts it once the call has been abandoned, which lets the
//! worker close the file and release its locks.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteRow};
use sqlx::{
    Column as SqlxColumn, Connection, Either, Executor, Row as SqlxRow, Statement, TypeInfo,
    ValueRef,
};
use tracing::debug;

use super::{
    classify_sqlx_error, close_quietly, ColumnInfo, ConnectionParams, Engine, ExecutionRequest,
    QueryExecutor, RawResult, Row, RowSet, Value,
};
use crate::error::{BridgeError, Result};
use crate::store::drivers::sqlite_path_from_url;
use crate::store::ConnectionModel;

/// Virtual machine instructions between checks for an abandoned call.
const INTERRUPT_CHECK_OPS: i32 = 1_000;

/// Runs statements against SQLite database files.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteExecutor;

impl SqliteExecutor {
    /// Returns the database file of a connection.
    ///
    /// Looks at the database field, then the `path` property, then the
    /// stored `jdbc:sqlite:` URL.
    pub fn database_path(connection: &ConnectionModel) -> Result<PathBuf> {
        connection
            .database
            .as_deref()
            .filter(|d| !d.trim().is_empty())
            .or_else(|| connection.property("path"))
            .or_else(|| connection.url.as_deref().and_then(sqlite_path_from_url))
            .map(PathBuf::from)
            .ok_or_else(|| BridgeError::MissingProperty {
                property: "database",
                context: connection.context(),
            })
    }
}

/// Marks the call as abandoned when dropped before it finished.
struct AbandonOnDrop(Arc<AtomicBool>);

impl Drop for AbandonOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Release);
    }
}

#[async_trait]
impl QueryExecutor for SqliteExecutor {
    fn engine(&self) -> Engine {
        Engine::Sqlite
    }

    async fn execute(
        &self,
        connection: &ConnectionModel,
        request: &ExecutionRequest,
    ) -> Result<RawResult> {
        let params = ConnectionParams::resolve(connection, Engine::Sqlite);
        let path = Self::database_path(connection)?;
        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(false)
            .read_only(connection.read_only);

        let start = Instant::now();
        debug!("Opening SQLite database {}", path.display());
        let mut conn = SqliteConnection::connect_with(&options)
            .await
            .map_err(|e| params.failure(classify_sqlx_error(&e), e.to_string()))?;

        let abandoned = Arc::new(AtomicBool::new(false));
        let _abandon_on_drop = AbandonOnDrop(Arc::clone(&abandoned));
        let outcome = match interrupt_when_abandoned(&mut conn, abandoned).await {
            Ok(()) => run(&mut conn, &request.sql).await,
            Err(e) => Err(e),
        };
        close_quietly(Engine::Sqlite, conn.close()).await;

        let elapsed = start.elapsed();
        match outcome {
            Ok(Outcome::Rows(columns, rows)) => Ok(RawResult::Sqlite(RowSet {
                columns,
                rows,
                elapsed,
            })),
            Ok(Outcome::Affected(rows_affected)) => Ok(RawResult::Affected {
                rows_affected,
                elapsed,
            }),
            Err(e) => Err(params.failure(classify_sqlx_error(&e), e.to_string())),
        }
    }
}

async fn interrupt_when_abandoned(
    conn: &mut SqliteConnection,
    abandoned: Arc<AtomicBool>,
) -> sqlx::Result<()> {
    let mut handle = conn.lock_handle().await?;
    // Returning false interrupts the running statement.
    handle.set_progress_handler(INTERRUPT_CHECK_OPS, move || {
        !abandoned.load(Ordering::Acquire)
    });
    Ok(())
}

enum Outcome {
    Rows(Vec<ColumnInfo>, Vec<SqliteRow>),
    Affected(u64),
}

async fn run(conn: &mut SqliteConnection, sql: &str) -> sqlx::Result<Outcome> {
    let statement = (&mut *conn).prepare(sql).await?;

    let mut rows = Vec::new();
    let mut rows_affected = 0;
    let mut results = (&mut *conn).fetch_many(statement.query());
    while let Some(item) = results.try_next().await? {
        match item {
            Either::Left(done) => rows_affected += done.rows_affected(),
            Either::Right(row) => rows.push(row),
        }
    }
    drop(results);

    // Row metadata carries the storage types; the statement only has the
    // declared ones, but it still names the columns of an empty result.
    let columns = match rows.first() {
        Some(first) => column_info(first.columns()),
        None => column_info(statement.columns()),
    };
    if columns.is_empty() {
        return Ok(Outcome::Affected(rows_affected));
    }
    Ok(Outcome::Rows(columns, rows))
}

fn column_info<C: SqlxColumn>(columns: &[C]) -> Vec<ColumnInfo> {
    columns
        .iter()
        .map(|col| ColumnInfo::new(col.name(), col.type_info().name()))
        .collect()
}

/// Converts a SqliteRow to our Row type.
///
/// SQLite is dynamically typed, so each value is decoded by its own storage
/// class rather than the declared column type.
pub(crate) fn convert_row(row: &SqliteRow) -> Row {
    (0..row.columns().len())
        .map(|i| convert_value(row, i))
        .collect()
}

fn convert_value(row: &SqliteRow, index: usize) -> Value {
    let storage = match row.try_get_raw(index) {
        Ok(raw) if raw.is_null() => return Value::Null,
        Ok(raw) => raw.type_info().name().to_uppercase(),
        Err(_) => return Value::Null,
    };
    match storage.as_str() {
        "INTEGER" | "BOOLEAN" | "INT8" => row.try_get::<i64, _>(index).map(Value::Int),
        "REAL" => row.try_get::<f64, _>(index).map(Value::Float),
        "BLOB" => row.try_get::<Vec<u8>, _>(index).map(Value::Bytes),
        _ => row.try_get::<String, _>(index).map(Value::String),
    }
    .unwrap_or(Value::Null)
}
