//! The query service: resolves a saved connection, checks the statement and
//! runs it on the matching engine.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::connection::{ConnectionCache, ReloadReport};
use crate::db::{
    DriverDispatcher, Engine, ExecutionRequest, QueryResult, ResultNormalizer, DEFAULT_MAX_ROWS,
};
use crate::error::{BridgeError, ExecutionErrorKind, Result};
use crate::safety::{SafetyVerdict, SqlClassifier};
use crate::secrets::{CredentialResolver, NoCredentials};
use crate::store::{ConnectionModel, ConnectionSummary};

/// Default bound on connect plus request time.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Limits applied to every execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionOptions {
    pub timeout: Duration,
    pub max_rows: usize,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_rows: DEFAULT_MAX_ROWS,
        }
    }
}

/// Runs SQL against saved DBeaver connections.
pub struct QueryService {
    cache: Arc<ConnectionCache>,
    dispatcher: DriverDispatcher,
    resolver: Arc<dyn CredentialResolver>,
    classifier: SqlClassifier,
    options: ExecutionOptions,
}

impl QueryService {
    /// Creates a service over `cache` with the default engines and no
    /// credential fallback.
    pub fn new(cache: Arc<ConnectionCache>) -> Self {
        Self {
            cache,
            dispatcher: DriverDispatcher::default(),
            resolver: Arc::new(NoCredentials),
            classifier: SqlClassifier::new(),
            options: ExecutionOptions::default(),
        }
    }

    pub fn with_dispatcher(mut self, dispatcher: DriverDispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn CredentialResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_options(mut self, options: ExecutionOptions) -> Self {
        self.options = options;
        self
    }

    /// Password-free summaries of all saved connections.
    pub fn list_connections(&self) -> Vec<ConnectionSummary> {
        self.cache.list()
    }

    pub fn get_connection(&self, id: &str) -> Result<Arc<ConnectionModel>> {
        self.cache.get(id)
    }

    pub fn classify(&self, sql: &str) -> SafetyVerdict {
        self.classifier.classify(sql)
    }

    /// Re-reads the connection store off the async runtime.
    pub async fn reload(&self) -> Result<ReloadReport> {
        let cache = Arc::clone(&self.cache);
        tokio::task::spawn_blocking(move || cache.reload())
            .await
            .map_err(|e| BridgeError::internal(format!("Reload task failed: {e}")))?
    }

    /// Runs one statement against the connection with this id.
    ///
    /// Statements that need confirmation are refused unless `confirmed` is
    /// set, and read-only connections only accept reads. Neither refusal
    /// opens a connection.
    pub async fn execute_query(&self, id: &str, sql: &str, confirmed: bool) -> Result<QueryResult> {
        let connection = self.cache.get(id)?;
        let verdict = self.classifier.classify(sql);

        if connection.read_only && !verdict.class.is_read_only() {
            return Err(BridgeError::ReadOnly {
                id: connection.id.clone(),
                class: verdict.class,
            });
        }

        if verdict.requires_confirmation && !confirmed {
            return Err(BridgeError::ConfirmationRequired {
                class: verdict.class,
                keyword: verdict.keyword_or_unknown().to_string(),
            });
        }

        let executor = self.dispatcher.select(&connection.driver)?;
        let connection = self.with_password(connection, executor.engine()).await?;
        let request = ExecutionRequest::new(sql);

        debug!(
            "Executing {} statement on connection '{}' ({})",
            verdict.class,
            connection.id,
            executor.engine()
        );

        let start = Instant::now();
        let raw = match tokio::time::timeout(
            self.options.timeout,
            executor.execute(&connection, &request),
        )
        .await
        {
            Ok(raw) => raw?,
            Err(_) => {
                return Err(BridgeError::execution(
                    ExecutionErrorKind::Timeout,
                    connection.context(),
                    format!("no result within {:?}", self.options.timeout),
                    None,
                ))
            }
        };

        let result = ResultNormalizer::new(self.options.max_rows).normalize(raw)?;
        info!(
            "Executed {} statement on connection '{}' in {:?}: {} rows{}",
            verdict.class,
            connection.id,
            start.elapsed(),
            result.row_count,
            result
                .rows_affected
                .map(|n| format!(", {n} affected"))
                .unwrap_or_default()
        );
        Ok(result)
    }

    /// Like [`execute_query`](Self::execute_query), but gives up as soon as
    /// `token` is cancelled, dropping the in-flight connection.
    pub async fn execute_query_cancellable(
        &self,
        id: &str,
        sql: &str,
        confirmed: bool,
        token: CancellationToken,
    ) -> Result<QueryResult> {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                let context = self
                    .cache
                    .get(id)
                    .map(|c| c.context())
                    .unwrap_or_default();
                info!("Query on connection '{id}' cancelled");
                Err(BridgeError::Cancelled { context })
            }
            result = self.execute_query(id, sql, confirmed) => result,
        }
    }

    /// Fills in the password from the resolver when the store has none.
    ///
    /// Resolvers may block on the OS keyring, so they run on the blocking pool.
    async fn with_password(
        &self,
        connection: Arc<ConnectionModel>,
        engine: Engine,
    ) -> Result<Arc<ConnectionModel>> {
        if engine == Engine::Sqlite || connection.password.is_some() {
            return Ok(connection);
        }
        let resolver = Arc::clone(&self.resolver);
        let lookup = Arc::clone(&connection);
        let resolved = tokio::task::spawn_blocking(move || resolver.resolve(&lookup))
            .await
            .map_err(|e| BridgeError::internal(format!("Credential lookup failed: {e}")))??;
        match resolved {
            Some(password) => {
                let mut resolved = (*connection).clone();
                resolved.password = Some(password);
                Ok(Arc::new(resolved))
            }
            None => Ok(connection),
        }
    }
}

impl std::fmt::Debug for QueryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryService")
            .field("connections", &self.cache.len())
            .field("dispatcher", &self.dispatcher)
            .field("options", &self.options)
            .finish()
    }
}
