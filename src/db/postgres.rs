//! PostgreSQL executor.
//!
//! Opens a single `PgConnection` per statement using sqlx. Connection options
//! are built field by field, so the password never appears in a URL.

use std::str::FromStr;
use std::time::Instant;

use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::postgres::types::{PgInterval, PgTimeTz};
use sqlx::postgres::{PgConnectOptions, PgConnection, PgRow, PgSslMode};
use sqlx::types::{Decimal, Uuid};
use sqlx::{
    Column as SqlxColumn, Connection, Either, Executor, Row as SqlxRow, Statement, TypeInfo,
    ValueRef,
};
use tracing::debug;

use super::{
    classify_sqlx_error, close_quietly, ColumnInfo, ConnectionParams, Engine, ExecutionRequest,
    QueryExecutor, RawResult, Row, RowSet, Value,
};
use crate::error::Result;
use crate::store::ConnectionModel;

/// Runs statements against PostgreSQL.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresExecutor;

impl PostgresExecutor {
    /// Builds the connect options for a connection.
    pub fn connect_options(connection: &ConnectionModel) -> Result<PgConnectOptions> {
        let params = ConnectionParams::resolve(connection, Engine::Postgres);
        let database = params.require_database()?;
        let user = params.require_user()?;
        let password = params.require_password()?;

        let mut options = PgConnectOptions::new()
            .host(params.host())
            .port(params.port.unwrap_or(5432))
            .username(user)
            .password(password)
            .database(database)
            .application_name("dbeaver-bridge")
            .ssl_mode(ssl_mode(&params));

        if let Some(ca) = &connection.ssl.ca_cert {
            options = options.ssl_root_cert(ca);
        }
        Ok(options)
    }
}

/// Chooses the TLS mode: explicit settings first, then encryption for
/// anything that is not on this machine.
fn ssl_mode(params: &ConnectionParams<'_>) -> PgSslMode {
    let ssl = &params.model.ssl;
    let explicit = ssl
        .mode
        .as_deref()
        .or_else(|| params.model.property("sslmode"))
        .and_then(|mode| PgSslMode::from_str(&mode.to_lowercase()).ok());
    if let Some(mode) = explicit {
        return mode;
    }
    if ssl.ca_cert.is_some() {
        return PgSslMode::VerifyCa;
    }
    match ssl.enabled {
        Some(true) => PgSslMode::Require,
        Some(false) => PgSslMode::Prefer,
        None if params.is_local() => PgSslMode::Prefer,
        None => PgSslMode::Require,
    }
}

#[async_trait]
impl QueryExecutor for PostgresExecutor {
    fn engine(&self) -> Engine {
        Engine::Postgres
    }

    async fn execute(
        &self,
        connection: &ConnectionModel,
        request: &ExecutionRequest,
    ) -> Result<RawResult> {
        let params = ConnectionParams::resolve(connection, Engine::Postgres);
        let options = Self::connect_options(connection)?;

        let start = Instant::now();
        debug!(
            "Connecting to PostgreSQL at {}:{}",
            params.host(),
            options.get_port()
        );
        let mut conn = PgConnection::connect_with(&options)
            .await
            .map_err(|e| params.failure(classify_sqlx_error(&e), format_query_error(&e)))?;

        let outcome = run(&mut conn, &request.sql).await;
        close_quietly(Engine::Postgres, conn.close()).await;

        let elapsed = start.elapsed();
        match outcome {
            Ok(Outcome::Rows(columns, rows)) => Ok(RawResult::Postgres(RowSet {
                columns,
                rows,
                elapsed,
            })),
            Ok(Outcome::Affected(rows_affected)) => Ok(RawResult::Affected {
                rows_affected,
                elapsed,
            }),
            Err(e) => Err(params.failure(classify_sqlx_error(&e), format_query_error(&e))),
        }
    }
}

enum Outcome {
    Rows(Vec<ColumnInfo>, Vec<PgRow>),
    Affected(u64),
}

async fn run(conn: &mut PgConnection, sql: &str) -> sqlx::Result<Outcome> {
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

    let columns = column_info(statement.columns());
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

/// Converts a sqlx PgRow to our Row type.
pub(crate) fn convert_row(row: &PgRow) -> Row {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| convert_value(row, i, col.type_info().name()))
        .collect()
}

fn get<'r, T>(row: &'r PgRow, index: usize) -> Option<T>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get::<T, _>(index).ok()
}

/// Encodes an array column as JSON text, keeping NULL elements.
fn get_array<'r, T>(row: &'r PgRow, index: usize) -> Option<String>
where
    Vec<Option<T>>: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
    T: serde::Serialize,
{
    get::<Vec<Option<T>>>(row, index).and_then(|v| serde_json::to_string(&v).ok())
}

/// Converts a single column value from a PgRow to our Value type.
///
/// Types without a mapping become a marker string naming the type, so a
/// cell is only ever `Null` when the database sent NULL.
fn convert_value(row: &PgRow, index: usize, type_name: &str) -> Value {
    match row.try_get_raw(index) {
        Ok(raw) if raw.is_null() => return Value::Null,
        Ok(_) => {}
        Err(_) => return unsupported(type_name),
    }

    let upper = type_name.to_uppercase();
    let value: Option<Value> = match upper.as_str() {
        "BOOL" | "BOOLEAN" => get::<bool>(row, index).map(Value::from),
        "INT2" | "SMALLINT" => get::<i16>(row, index).map(Value::from),
        "INT4" | "INT" | "INTEGER" => get::<i32>(row, index).map(Value::from),
        "INT8" | "BIGINT" => get::<i64>(row, index).map(Value::from),
        "OID" => get::<sqlx::postgres::types::Oid>(row, index).map(|v| Value::Int(v.0.into())),
        "FLOAT4" | "REAL" => get::<f32>(row, index).map(Value::from),
        "FLOAT8" | "DOUBLE PRECISION" => get::<f64>(row, index).map(Value::from),
        "NUMERIC" | "DECIMAL" => get::<Decimal>(row, index).map(|v| v.to_string().into()),
        "UUID" => get::<Uuid>(row, index).map(|v| v.to_string().into()),
        "BYTEA" => get::<Vec<u8>>(row, index).map(Value::from),
        "TIMESTAMPTZ" => get::<chrono::DateTime<chrono::Utc>>(row, index)
            .map(|v| v.to_rfc3339().into()),
        "TIMESTAMP" => get::<chrono::NaiveDateTime>(row, index)
            .map(|v| v.format("%Y-%m-%dT%H:%M:%S%.f").to_string().into()),
        "DATE" => get::<chrono::NaiveDate>(row, index)
            .map(|v| v.format("%Y-%m-%d").to_string().into()),
        "TIME" => get::<chrono::NaiveTime>(row, index)
            .map(|v| v.format("%H:%M:%S%.f").to_string().into()),
        "TIMETZ" => get::<PgTimeTz<chrono::NaiveTime, chrono::FixedOffset>>(row, index)
            .map(|v| format!("{}{}", v.time.format("%H:%M:%S%.f"), v.offset).into()),
        "INTERVAL" => get::<PgInterval>(row, index).map(|v| format_interval(&v).into()),
        "JSON" | "JSONB" => get::<serde_json::Value>(row, index).map(|v| v.to_string().into()),
        "BOOL[]" => get_array::<bool>(row, index).map(Value::from),
        "INT2[]" => get_array::<i16>(row, index).map(Value::from),
        "INT4[]" => get_array::<i32>(row, index).map(Value::from),
        "INT8[]" => get_array::<i64>(row, index).map(Value::from),
        "FLOAT4[]" => get_array::<f32>(row, index).map(Value::from),
        "FLOAT8[]" => get_array::<f64>(row, index).map(Value::from),
        "TEXT[]" | "VARCHAR[]" | "NAME[]" | "BPCHAR[]" => {
            get_array::<String>(row, index).map(Value::from)
        }
        // Text-like types (TEXT, VARCHAR, NAME, CITEXT, ...) decode as strings.
        _ => get::<String>(row, index).map(Value::from),
    };
    value.unwrap_or_else(|| unsupported(type_name))
}

fn unsupported(type_name: &str) -> Value {
    Value::String(format!("<unsupported type {type_name}>"))
}

/// Formats an interval in ISO-8601 duration notation, e.g. `P1M2DT3.5S`.
fn format_interval(interval: &PgInterval) -> String {
    let seconds = interval.microseconds as f64 / 1_000_000.0;
    format!("P{}M{}DT{}S", interval.months, interval.days, seconds)
}

/// Formats an error with the server's detail and hint when available.
fn format_query_error(error: &sqlx::Error) -> String {
    let Some(db_error) = error.as_database_error() else {
        return error.to_string();
    };

    let mut result = String::from("ERROR: ");
    result.push_str(db_error.message());

    if let Some(pg_error) = db_error.try_downcast_ref::<sqlx::postgres::PgDatabaseError>() {
        let fields = [
            ("DETAIL", pg_error.detail()),
            ("HINT", pg_error.hint()),
            ("TABLE", pg_error.table()),
            ("COLUMN", pg_error.column()),
            ("CONSTRAINT", pg_error.constraint()),
        ];
        for (label, value) in fields {
            if let Some(value) = value {
                result.push_str(&format!("\n  {label}: {value}"));
            }
        }
    }
    result
}
