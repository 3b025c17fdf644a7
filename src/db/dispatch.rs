//! Driver dispatch: picks the executor for a connection's driver identifier.

use std::sync::Arc;

use super::{Engine, PostgresExecutor, QueryExecutor, SqlServerExecutor, SqliteExecutor};
use crate::error::{BridgeError, Result};

/// Predicate over a lower-cased driver identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverMatch {
    Contains(&'static str),
    ContainsAny(&'static [&'static str]),
}

impl DriverMatch {
    pub fn matches(&self, driver: &str) -> bool {
        let driver = driver.to_lowercase();
        match self {
            Self::Contains(needle) => driver.contains(needle),
            Self::ContainsAny(needles) => needles.iter().any(|n| driver.contains(n)),
        }
    }
}

/// One row of the dispatch table.
#[derive(Clone)]
pub struct Route {
    pub matcher: DriverMatch,
    pub executor: Arc<dyn QueryExecutor>,
}

impl Route {
    pub fn new(matcher: DriverMatch, executor: Arc<dyn QueryExecutor>) -> Self {
        Self { matcher, executor }
    }

    pub fn engine(&self) -> Engine {
        self.executor.engine()
    }
}

/// Ordered dispatch table; the first matching route wins.
#[derive(Clone)]
pub struct DriverDispatcher {
    routes: Vec<Route>,
}

impl Default for DriverDispatcher {
    fn default() -> Self {
        Self::new(vec![
            Route::new(DriverMatch::Contains("sqlite"), Arc::new(SqliteExecutor)),
            Route::new(DriverMatch::Contains("postgres"), Arc::new(PostgresExecutor)),
            Route::new(
                DriverMatch::ContainsAny(&["mssql", "sqlserver", "microsoft"]),
                Arc::new(SqlServerExecutor),
            ),
        ])
    }
}

impl DriverDispatcher {
    /// Builds a dispatcher from an explicit route table.
    pub fn new(routes: Vec<Route>) -> Self {
        Self { routes }
    }

    /// Returns the route for a driver identifier.
    pub fn route(&self, driver: &str) -> Result<&Route> {
        self.routes
            .iter()
            .find(|route| route.matcher.matches(driver))
            .ok_or_else(|| BridgeError::NotSupported {
                driver: driver.to_string(),
                supported: self.supported(),
            })
    }

    /// Returns the executor for a driver identifier.
    pub fn select(&self, driver: &str) -> Result<Arc<dyn QueryExecutor>> {
        self.route(driver).map(|route| Arc::clone(&route.executor))
    }

    /// Display names of the engines in the table, in order.
    pub fn supported(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for route in &self.routes {
            let name = route.engine().display_name().to_string();
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }
}

impl std::fmt::Debug for DriverDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverDispatcher")
            .field("engines", &self.supported())
            .finish()
    }
}
