//! Mock executor for testing.
//!
//! Returns canned rows without a database and counts the "connections" it
//! holds open, so tests can check that timed-out or cancelled calls release
//! them.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{ColumnInfo, Engine, ExecutionRequest, QueryExecutor, RawResult, Row, RowSet, Value};
use crate::error::{BridgeError, ExecutionErrorKind, Result};
use crate::safety::classify_sql;
use crate::store::ConnectionModel;

/// An executor that returns predefined results.
pub struct MockExecutor {
    engine: Engine,
    columns: Vec<ColumnInfo>,
    rows: Vec<Row>,
    delay: Option<Duration>,
    failure: Option<(ExecutionErrorKind, String)>,
    executed: Mutex<Vec<(String, String)>>,
    open: Arc<AtomicUsize>,
    opened: AtomicUsize,
}

/// A simulated open connection; released when dropped.
struct OpenConnection(Arc<AtomicUsize>);

impl OpenConnection {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for OpenConnection {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockExecutor {
    /// Creates a mock that answers every read with one `result` row.
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            columns: vec![ColumnInfo::new("result", "text")],
            rows: vec![vec![Value::from("mock")]],
            delay: None,
            failure: None,
            executed: Mutex::new(Vec::new()),
            open: Arc::new(AtomicUsize::new(0)),
            opened: AtomicUsize::new(0),
        }
    }

    /// Answers reads with these rows.
    pub fn with_rows(mut self, columns: Vec<ColumnInfo>, rows: Vec<Row>) -> Self {
        self.columns = columns;
        self.rows = rows;
        self
    }

    /// Holds the connection open for `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fails every call with an execution error of this kind.
    pub fn failing(mut self, kind: ExecutionErrorKind, message: impl Into<String>) -> Self {
        self.failure = Some((kind, message.into()));
        self
    }

    /// `(connection id, sql)` of every call, in order.
    pub fn executed(&self) -> Vec<(String, String)> {
        self.executed.lock().clone()
    }

    /// Number of calls made.
    pub fn call_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Number of calls currently holding a connection.
    pub fn open_connections(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueryExecutor for MockExecutor {
    fn engine(&self) -> Engine {
        self.engine
    }

    async fn execute(
        &self,
        connection: &ConnectionModel,
        request: &ExecutionRequest,
    ) -> Result<RawResult> {
        let start = Instant::now();
        self.executed
            .lock()
            .push((connection.id.clone(), request.sql.clone()));
        self.opened.fetch_add(1, Ordering::SeqCst);
        let _connection = OpenConnection::new(&self.open);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if let Some((kind, message)) = &self.failure {
            return Err(BridgeError::execution(
                *kind,
                connection.context(),
                message.clone(),
                connection.password.as_ref().map(|p| p.expose()),
            ));
        }

        // Stands in for an engine: statements that only read return rows.
        if !classify_sql(&request.sql).class.is_read_only() {
            return Ok(RawResult::Affected {
                rows_affected: 1,
                elapsed: start.elapsed(),
            });
        }

        Ok(RawResult::Materialized(RowSet {
            columns: self.columns.clone(),
            rows: self.rows.clone(),
            elapsed: start.elapsed(),
        }))
    }
}
