//! DBeaver connection store.
//!
//! Locates the store on disk, detects which of the two historical layouts is
//! present and parses it into [`ConnectionModel`]s. Malformed entries are
//! skipped and reported as [`Warning`]s; only an unreadable store fails.

pub mod credentials;
pub mod drivers;
mod entry;
mod legacy;
mod locator;
mod model;
mod modern;

pub use legacy::LegacyParser;
pub use locator::{ConfigLocator, StoreLocation};
pub use model::{ConnectionModel, ConnectionSummary, Password, SslOptions};
pub use modern::ModernParser;

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{BridgeError, Result};
use drivers::DriverMapping;

/// Relative path of the driver mapping document, shared by both layouts.
pub const DRIVERS_FILE: &str = ".metadata/.plugins/org.jkiss.dbeaver.core/drivers.xml";

/// The on-disk layout of the connection store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaVersion {
    /// `.dbeaver4` workspaces: XML data sources.
    Legacy,
    /// `DBeaverData/workspace6`: JSON data sources and encrypted credentials.
    Modern,
}

impl SchemaVersion {
    /// Parses a schema name.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "legacy" | "xml" => Some(Self::Legacy),
            "modern" | "json" => Some(Self::Modern),
            _ => None,
        }
    }

    /// Returns the parser for this layout.
    pub fn parser(&self) -> Box<dyn StoreParser> {
        match self {
            Self::Legacy => Box::new(LegacyParser),
            Self::Modern => Box::new(ModernParser),
        }
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Legacy => write!(f, "legacy"),
            Self::Modern => write!(f, "modern"),
        }
    }
}

/// A recoverable problem found while parsing the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Warning {
    /// File the problem was found in.
    pub source: PathBuf,
    /// Connection id (or position) of the affected entry, if any.
    pub entry: Option<String>,
    pub message: String,
}

impl Warning {
    pub fn new(source: &Path, entry: Option<String>, message: impl Into<String>) -> Self {
        Self {
            source: source.to_path_buf(),
            entry,
            message: message.into(),
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.entry {
            Some(entry) => write!(f, "{} [{}]: {}", self.source.display(), entry, self.message),
            None => write!(f, "{}: {}", self.source.display(), self.message),
        }
    }
}

/// Connections parsed from a store, in file order, plus recovered problems.
#[derive(Debug, Clone, Default)]
pub struct ParsedStore {
    pub connections: Vec<ConnectionModel>,
    pub warnings: Vec<Warning>,
}

impl ParsedStore {
    /// Adds a connection unless its id was already seen.
    pub(crate) fn push(&mut self, model: ConnectionModel, source: &Path) {
        if self.connections.iter().any(|c| c.id == model.id) {
            let id = model.id.clone();
            self.warn(source, Some(id), "duplicate connection id; keeping the first entry");
            return;
        }
        self.connections.push(model);
    }

    pub(crate) fn warn(&mut self, source: &Path, entry: Option<String>, message: impl Into<String>) {
        let warning = Warning::new(source, entry, message);
        warn!("Skipping store entry: {warning}");
        self.warnings.push(warning);
    }
}

/// Common contract of the two store parsers.
pub trait StoreParser: Send + Sync {
    /// Parses the store rooted at `location`.
    fn parse(&self, location: &StoreLocation) -> Result<ParsedStore>;
}

/// Reads a store file as UTF-8, mapping failures to a configuration error.
pub(crate) fn read_store_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| BridgeError::config(format!("Failed to read {}: {e}", path.display())))
}

/// Loads the optional driver mapping document next to a store.
pub(crate) fn load_driver_mapping(path: &Path, parsed: &mut ParsedStore) -> DriverMapping {
    let Ok(xml) = std::fs::read_to_string(path) else {
        return DriverMapping::default();
    };
    match DriverMapping::parse(&xml) {
        Ok(mapping) => mapping,
        Err(e) => {
            parsed.warn(path, None, format!("ignoring driver mapping: {e}"));
            DriverMapping::default()
        }
    }
}

/// Where connections come from on `reload()`.
#[derive(Debug, Clone, Default)]
pub struct StoreSource {
    locator: ConfigLocator,
}

impl StoreSource {
    pub fn new(locator: ConfigLocator) -> Self {
        Self { locator }
    }

    /// Locates and parses the store.
    pub fn load(&self) -> Result<ParsedStore> {
        let location = self.locator.locate()?;
        info!(
            "Loading {} connection store from {}",
            location.schema,
            location.root.display()
        );
        let parsed = location.schema.parser().parse(&location)?;
        info!(
            "Loaded {} connections ({} warnings)",
            parsed.connections.len(),
            parsed.warnings.len()
        );
        Ok(parsed)
    }
}
