//! SQL Server executor.
//!
//! Uses tiberius over a tokio `TcpStream`. Azure SQL may answer the login
//! with a routing redirect; one redirect is followed.

use std::time::Instant;

use async_trait::async_trait;
use tiberius::error::Error as TdsError;
use futures::TryStreamExt;
use tiberius::{AuthMethod, Client, ColumnData, Config, EncryptionLevel, QueryItem};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::debug;

use super::{
    close_quietly, ColumnInfo, ConnectionParams, Engine, ExecutionRequest, QueryExecutor,
    RawResult, Row, RowSet, Value,
};
use crate::error::{ExecutionErrorKind, Result};
use crate::store::ConnectionModel;

type TdsClient = Client<Compat<TcpStream>>;

/// SQL Server error number for a rejected login.
const LOGIN_FAILED: u32 = 18456;

/// Runs statements against SQL Server.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlServerExecutor;

impl SqlServerExecutor {
    /// Builds a tiberius config for a connection.
    pub fn build_config(connection: &ConnectionModel) -> Result<Config> {
        let params = ConnectionParams::resolve(connection, Engine::SqlServer);
        let user = params.require_user()?;
        let password = params.require_password()?;

        let mut config = Config::new();
        config.host(params.host());
        config.port(params.port.unwrap_or(1433));
        config.authentication(AuthMethod::sql_server(user, password));
        config.application_name("dbeaver-bridge");
        if let Some(database) = params.database.as_deref().filter(|d| !d.is_empty()) {
            config.database(database);
        }

        let security = transport_security(&params);
        config.encryption(security.encryption);
        match security.trust {
            Trust::CaFile(path) => config.trust_cert_ca(path),
            Trust::ServerCertificate => config.trust_cert(),
            Trust::SystemRoots => {}
        }
        Ok(config)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Trust {
    CaFile(String),
    ServerCertificate,
    SystemRoots,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct TransportSecurity {
    encryption: EncryptionLevel,
    trust: Trust,
}

fn truthy(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "true" | "yes" | "1" | "strict" | "mandatory"
    )
}

/// Encryption is required for remote hosts unless the connection turns it
/// off; certificates are trusted unless a CA file or an explicit
/// `trustServerCertificate=false` is given.
fn transport_security(params: &ConnectionParams<'_>) -> TransportSecurity {
    let model = params.model;
    let encrypt = model
        .ssl
        .enabled
        .or_else(|| model.property("encrypt").map(truthy));
    let encryption = match encrypt {
        Some(true) => EncryptionLevel::Required,
        Some(false) => EncryptionLevel::Off,
        None if params.is_local() => EncryptionLevel::Off,
        None => EncryptionLevel::Required,
    };

    let trust_server = model
        .ssl
        .trust_server_certificate
        .or_else(|| model.property("trustServerCertificate").map(truthy));
    let trust = match (&model.ssl.ca_cert, trust_server) {
        (Some(path), _) => Trust::CaFile(path.display().to_string()),
        (None, Some(false)) => Trust::SystemRoots,
        (None, _) => Trust::ServerCertificate,
    };

    TransportSecurity { encryption, trust }
}

/// Opens a client, following one routing redirect.
async fn connect(config: Config) -> tiberius::Result<TdsClient> {
    let tcp = TcpStream::connect(config.get_addr()).await?;
    tcp.set_nodelay(true)?;

    match Client::connect(config.clone(), tcp.compat_write()).await {
        Err(TdsError::Routing { host, port }) => {
            debug!("SQL Server redirected the login to {host}:{port}");
            let mut config = config;
            config.host(&host);
            config.port(port);
            let tcp = TcpStream::connect(config.get_addr()).await?;
            tcp.set_nodelay(true)?;
            Client::connect(config, tcp.compat_write()).await
        }
        other => other,
    }
}

enum Outcome {
    Rows(Vec<ColumnInfo>, Vec<tiberius::Row>),
    Affected(u64),
}

/// Column of the trailing result set that carries the affected row count.
const ROWCOUNT_COLUMN: &str = "__dbbridge_rows_affected";

/// Appends a row count query, since the TDS stream does not report how many
/// rows a statement touched.
fn with_rowcount(sql: &str) -> String {
    let sql = sql.trim_end_matches(|c: char| c == ';' || c.is_whitespace());
    format!("{sql}\n;SELECT CAST(@@ROWCOUNT AS BIGINT) AS {ROWCOUNT_COLUMN}")
}

fn is_rowcount_marker(columns: &[tiberius::Column]) -> bool {
    matches!(columns, [only] if only.name() == ROWCOUNT_COLUMN)
}

async fn run(client: &mut TdsClient, sql: &str) -> tiberius::Result<Outcome> {
    let mut stream = client.simple_query(with_rowcount(sql)).await?;

    // The first result set with columns is the statement's own; metadata
    // arrives before its rows, so an empty result still has columns.
    let mut result: Option<(usize, Vec<ColumnInfo>)> = None;
    let mut marker: Option<usize> = None;
    let mut rows = Vec::new();
    let mut rows_affected = 0;
    while let Some(item) = stream.try_next().await? {
        match item {
            QueryItem::Metadata(meta) if is_rowcount_marker(meta.columns()) => {
                marker = Some(meta.result_index());
            }
            QueryItem::Metadata(meta) => {
                if result.is_none() {
                    result = Some((meta.result_index(), column_info(meta.columns())));
                }
            }
            QueryItem::Row(row) if Some(row.result_index()) == marker => {
                let count = row.try_get::<i64, _>(0)?.unwrap_or_default();
                rows_affected = u64::try_from(count).unwrap_or_default();
            }
            QueryItem::Row(row) => {
                if matches!(&result, Some((index, _)) if *index == row.result_index()) {
                    rows.push(row);
                }
            }
        }
    }

    match result {
        Some((_, columns)) if !columns.is_empty() => Ok(Outcome::Rows(columns, rows)),
        _ => Ok(Outcome::Affected(rows_affected)),
    }
}

fn column_info(columns: &[tiberius::Column]) -> Vec<ColumnInfo> {
    columns
        .iter()
        .map(|col| ColumnInfo::new(col.name(), format!("{:?}", col.column_type())))
        .collect()
}

/// Maps a tiberius error onto the execution error kinds.
fn classify_error(error: &TdsError) -> ExecutionErrorKind {
    match error {
        TdsError::Server(token) if token.code() == LOGIN_FAILED => {
            ExecutionErrorKind::Authentication
        }
        TdsError::Io { .. } | TdsError::Tls(_) | TdsError::Routing { .. } => {
            ExecutionErrorKind::Transport
        }
        _ => ExecutionErrorKind::Execution,
    }
}

#[async_trait]
impl QueryExecutor for SqlServerExecutor {
    fn engine(&self) -> Engine {
        Engine::SqlServer
    }

    async fn execute(
        &self,
        connection: &ConnectionModel,
        request: &ExecutionRequest,
    ) -> Result<RawResult> {
        let params = ConnectionParams::resolve(connection, Engine::SqlServer);
        let config = Self::build_config(connection)?;

        let start = Instant::now();
        debug!("Connecting to SQL Server at {}", config.get_addr());
        let mut client = connect(config)
            .await
            .map_err(|e| params.failure(classify_error(&e), e.to_string()))?;

        let outcome = run(&mut client, &request.sql).await;
        close_quietly(Engine::SqlServer, client.close()).await;

        let elapsed = start.elapsed();
        match outcome {
            Ok(Outcome::Rows(columns, rows)) => Ok(RawResult::SqlServer(RowSet {
                columns,
                rows,
                elapsed,
            })),
            Ok(Outcome::Affected(rows_affected)) => Ok(RawResult::Affected {
                rows_affected,
                elapsed,
            }),
            Err(e) => Err(params.failure(classify_error(&e), e.to_string())),
        }
    }
}

/// Converts a tiberius row to our Row type.
pub(crate) fn convert_row(row: &tiberius::Row) -> Row {
    row.cells()
        .enumerate()
        .map(|(i, (_col, data))| match data {
            ColumnData::DateTime(Some(_))
            | ColumnData::SmallDateTime(Some(_))
            | ColumnData::DateTime2(Some(_)) => row
                .try_get::<chrono::NaiveDateTime, _>(i)
                .ok()
                .flatten()
                .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
                .into(),
            ColumnData::DateTimeOffset(Some(_)) => row
                .try_get::<chrono::DateTime<chrono::Utc>, _>(i)
                .ok()
                .flatten()
                .map(|dt| dt.to_rfc3339())
                .into(),
            ColumnData::Date(Some(_)) => row
                .try_get::<chrono::NaiveDate, _>(i)
                .ok()
                .flatten()
                .map(|d| d.format("%Y-%m-%d").to_string())
                .into(),
            ColumnData::Time(Some(_)) => row
                .try_get::<chrono::NaiveTime, _>(i)
                .ok()
                .flatten()
                .map(|t| t.format("%H:%M:%S%.f").to_string())
                .into(),
            _ => convert_column_data(data),
        })
        .collect()
}

fn convert_column_data(data: &ColumnData<'_>) -> Value {
    match data {
        ColumnData::Bit(Some(b)) => Value::Bool(*b),
        ColumnData::U8(Some(v)) => Value::Int((*v).into()),
        ColumnData::I16(Some(v)) => Value::Int((*v).into()),
        ColumnData::I32(Some(v)) => Value::Int((*v).into()),
        ColumnData::I64(Some(v)) => Value::Int(*v),
        ColumnData::F32(Some(v)) => Value::Float((*v).into()),
        ColumnData::F64(Some(v)) => Value::Float(*v),
        // Exact decimal text rather than a lossy float.
        ColumnData::Numeric(Some(n)) => Value::String(n.to_string()),
        ColumnData::String(Some(s)) => Value::String(s.to_string()),
        ColumnData::Guid(Some(g)) => Value::String(g.to_string()),
        ColumnData::Binary(Some(b)) => Value::Bytes(b.to_vec()),
        ColumnData::Xml(Some(xml)) => Value::String(xml.to_string()),
        _ => Value::Null,
    }
}
