//! Reloadable snapshot of the saved connections.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{BridgeError, Result};
use crate::store::{ConnectionModel, ConnectionSummary, ParsedStore, StoreSource, Warning};

/// One consistent view of the store.
#[derive(Debug, Default)]
struct Snapshot {
    connections: Vec<Arc<ConnectionModel>>,
    warnings: Vec<Warning>,
}

impl Snapshot {
    fn from_parsed(parsed: ParsedStore) -> Self {
        Self {
            connections: parsed.connections.into_iter().map(Arc::new).collect(),
            warnings: parsed.warnings,
        }
    }
}

/// Outcome of a successful reload.
#[derive(Debug, Clone, Serialize)]
pub struct ReloadReport {
    pub count: usize,
    pub warnings: Vec<Warning>,
}

/// Holds the current connection snapshot.
///
/// Readers clone the snapshot `Arc` and release the lock immediately; a load
/// builds the whole new snapshot before swapping it in with one write.
#[derive(Debug, Default)]
pub struct ConnectionCache {
    snapshot: RwLock<Arc<Snapshot>>,
    source: Option<StoreSource>,
}

impl ConnectionCache {
    /// Creates an empty cache that reloads from `source`.
    pub fn new(source: StoreSource) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(Snapshot::default())),
            source: Some(source),
        }
    }

    /// Creates a cache holding exactly these connections, with no store behind it.
    pub fn with_connections(connections: Vec<ConnectionModel>) -> Self {
        let cache = Self::default();
        cache.load(connections);
        cache
    }

    /// Replaces the snapshot with these connections.
    pub fn load(&self, connections: Vec<ConnectionModel>) {
        self.swap(Snapshot::from_parsed(ParsedStore {
            connections,
            warnings: Vec::new(),
        }));
    }

    /// Password-free summaries of every connection, in store order.
    pub fn list(&self) -> Vec<ConnectionSummary> {
        self.current()
            .connections
            .iter()
            .map(|c| c.summary())
            .collect()
    }

    /// Returns the connection with this id.
    pub fn get(&self, id: &str) -> Result<Arc<ConnectionModel>> {
        self.current()
            .connections
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| BridgeError::not_found(id))
    }

    /// Number of loaded connections.
    pub fn len(&self) -> usize {
        self.current().connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Warnings from the last successful load.
    pub fn warnings(&self) -> Vec<Warning> {
        self.current().warnings.clone()
    }

    /// Re-reads the store.
    ///
    /// On failure the previous snapshot stays in place and the error is returned.
    pub fn reload(&self) -> Result<ReloadReport> {
        let source = self
            .source
            .as_ref()
            .ok_or_else(|| BridgeError::config("No connection store configured for reload"))?;

        let parsed = match source.load() {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Reload failed, keeping {} cached connections: {e}", self.len());
                return Err(e);
            }
        };

        let report = ReloadReport {
            count: parsed.connections.len(),
            warnings: parsed.warnings.clone(),
        };
        self.swap(Snapshot::from_parsed(parsed));
        info!("Connection cache holds {} connections", report.count);
        Ok(report)
    }

    fn current(&self) -> Arc<Snapshot> {
        Arc::clone(&*self.snapshot.read())
    }

    fn swap(&self, snapshot: Snapshot) {
        *self.snapshot.write() = Arc::new(snapshot);
    }
}
