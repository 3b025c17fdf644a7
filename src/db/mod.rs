//! Database execution layer for dbeaver-bridge.
//!
//! Each supported engine has a [`QueryExecutor`] that opens one connection,
//! runs one statement and closes the connection again. The
//! [`DriverDispatcher`] picks the executor for a connection's driver and the
//! [`ResultNormalizer`] turns the engine rows into a [`QueryResult`].

mod dispatch;
mod mock;
mod normalize;
mod postgres;
mod sqlite;
mod sqlserver;
mod types;

pub use dispatch::{DriverDispatcher, DriverMatch, Route};
pub use mock::MockExecutor;
pub use normalize::{ResultNormalizer, DEFAULT_MAX_ROWS};
pub use postgres::PostgresExecutor;
pub use sqlite::SqliteExecutor;
pub use sqlserver::SqlServerExecutor;
pub use types::{ColumnInfo, QueryResult, Row, Value};

use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{BridgeError, ConnectionContext, ExecutionErrorKind, Result};
use crate::store::ConnectionModel;

/// How long closing a connection may take before it is abandoned.
pub const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Database engines with an executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    Sqlite,
    Postgres,
    SqlServer,
}

impl Engine {
    /// Returns the engine's display name.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Sqlite => "SQLite",
            Self::Postgres => "PostgreSQL",
            Self::SqlServer => "SQL Server",
        }
    }

    /// Returns the port the engine listens on by default.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Self::Sqlite => None,
            Self::Postgres => Some(5432),
            Self::SqlServer => Some(1433),
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// One statement to run.
///
/// Executors always read whatever rows the statement produces; a statement
/// without result columns is reported by its affected row count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    pub sql: String,
}

impl ExecutionRequest {
    pub fn new(sql: impl Into<String>) -> Self {
        Self { sql: sql.into() }
    }
}

/// Rows as the engine returned them, with their column metadata.
pub struct RowSet<R> {
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<R>,
    pub elapsed: Duration,
}

/// Unconverted outcome of one execution.
pub enum RawResult {
    Postgres(RowSet<sqlx::postgres::PgRow>),
    Sqlite(RowSet<sqlx::sqlite::SqliteRow>),
    SqlServer(RowSet<tiberius::Row>),
    /// Rows that are already in the common representation.
    Materialized(RowSet<Row>),
    /// A statement that returned no rows.
    Affected { rows_affected: u64, elapsed: Duration },
}

impl fmt::Debug for RawResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (kind, rows) = match self {
            Self::Postgres(set) => ("Postgres", set.rows.len()),
            Self::Sqlite(set) => ("Sqlite", set.rows.len()),
            Self::SqlServer(set) => ("SqlServer", set.rows.len()),
            Self::Materialized(set) => ("Materialized", set.rows.len()),
            Self::Affected { rows_affected, .. } => {
                return write!(f, "Affected({rows_affected})");
            }
        };
        write!(f, "{kind}({rows} rows)")
    }
}

/// Runs single statements against one engine.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// The engine this executor talks to.
    fn engine(&self) -> Engine;

    /// Opens a connection, runs the statement and closes the connection.
    async fn execute(
        &self,
        connection: &ConnectionModel,
        request: &ExecutionRequest,
    ) -> Result<RawResult>;
}

/// Connection properties after falling back from typed fields to the
/// property map and then to engine defaults.
#[derive(Debug, Clone)]
pub(crate) struct ConnectionParams<'a> {
    pub model: &'a ConnectionModel,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub user: Option<String>,
}

impl<'a> ConnectionParams<'a> {
    pub fn resolve(model: &'a ConnectionModel, engine: Engine) -> Self {
        let prop = |key: &str| model.property(key).map(String::from);
        Self {
            model,
            host: model.host.clone().or_else(|| prop("host")),
            port: model
                .port
                .or_else(|| model.property("port").and_then(|p| p.trim().parse().ok()))
                .or(engine.default_port()),
            database: model
                .database
                .clone()
                .or_else(|| prop("database"))
                .or_else(|| prop("databaseName")),
            user: model.user.clone().or_else(|| prop("user")),
        }
    }

    pub fn host(&self) -> &str {
        self.host.as_deref().unwrap_or("localhost")
    }

    pub fn password(&self) -> Option<&'a str> {
        self.model
            .password
            .as_ref()
            .map(|p| p.expose())
            .filter(|p| !p.is_empty())
    }

    pub fn require_user(&self) -> Result<&str> {
        self.user
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| BridgeError::MissingProperty {
                property: "user",
                context: self.context(),
            })
    }

    pub fn require_database(&self) -> Result<&str> {
        self.database
            .as_deref()
            .filter(|d| !d.trim().is_empty())
            .ok_or_else(|| BridgeError::MissingProperty {
                property: "database",
                context: self.context(),
            })
    }

    pub fn require_password(&self) -> Result<&'a str> {
        self.password().ok_or_else(|| BridgeError::CredentialMissing {
            context: self.context(),
        })
    }

    /// True for loopback hosts and local sockets.
    pub fn is_local(&self) -> bool {
        let host = self.host().trim_matches(|c| c == '[' || c == ']');
        host.eq_ignore_ascii_case("localhost")
            || host == "127.0.0.1"
            || host == "::1"
            || host == "."
            || host.starts_with('/')
    }

    pub fn context(&self) -> ConnectionContext {
        ConnectionContext {
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            database: self.database.clone(),
            ..self.model.context()
        }
    }

    /// Builds an execution error for this connection, redacting the password.
    pub fn failure(&self, kind: ExecutionErrorKind, message: impl Into<String>) -> BridgeError {
        BridgeError::execution(kind, self.context(), message, self.password())
    }
}

/// Maps a sqlx error onto the execution error kinds.
pub(crate) fn classify_sqlx_error(error: &sqlx::Error) -> ExecutionErrorKind {
    match error {
        sqlx::Error::Database(db) => match db.code().as_deref() {
            // invalid_password, invalid_authorization_specification
            Some("28P01") | Some("28000") => ExecutionErrorKind::Authentication,
            _ => ExecutionErrorKind::Execution,
        },
        sqlx::Error::Io(_) | sqlx::Error::Tls(_) => ExecutionErrorKind::Transport,
        sqlx::Error::PoolTimedOut => ExecutionErrorKind::Timeout,
        _ => ExecutionErrorKind::Execution,
    }
}

/// Closes a connection, bounded by [`TEARDOWN_TIMEOUT`].
///
/// Failures are logged and otherwise ignored so they never replace the
/// outcome of the statement.
pub(crate) async fn close_quietly<F, E>(engine: Engine, close: F)
where
    F: Future<Output = std::result::Result<(), E>>,
    E: fmt::Display,
{
    match tokio::time::timeout(TEARDOWN_TIMEOUT, close).await {
        Ok(Ok(())) => debug!("Closed {engine} connection"),
        Ok(Err(e)) => warn!("Failed to close {engine} connection: {e}"),
        Err(_) => warn!("Closing {engine} connection timed out after {TEARDOWN_TIMEOUT:?}"),
    }
}
