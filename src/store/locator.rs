//! Finds the DBeaver workspace and detects its layout.

use std::path::{Path, PathBuf};

use tracing::debug;

use super::{SchemaVersion, DRIVERS_FILE};
use crate::error::{BridgeError, Result};

const MODERN_MARKER: &str = "General/.dbeaver";
const MODERN_DATA_SOURCES: &str = "General/.dbeaver/data-sources.json";
const MODERN_CREDENTIALS: &str = "General/.dbeaver/credentials-config.json";
const LEGACY_DATA_SOURCES: &str = "General/.dbeaver-data-sources.xml";

/// A located store: the workspace root and its layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLocation {
    pub root: PathBuf,
    pub schema: SchemaVersion,
}

impl StoreLocation {
    pub fn new(root: impl Into<PathBuf>, schema: SchemaVersion) -> Self {
        Self {
            root: root.into(),
            schema,
        }
    }

    /// The data sources document for this layout.
    pub fn data_sources_path(&self) -> PathBuf {
        match self.schema {
            SchemaVersion::Legacy => self.root.join(LEGACY_DATA_SOURCES),
            SchemaVersion::Modern => self.root.join(MODERN_DATA_SOURCES),
        }
    }

    /// The encrypted credentials file (modern layout only).
    pub fn credentials_path(&self) -> Option<PathBuf> {
        match self.schema {
            SchemaVersion::Legacy => None,
            SchemaVersion::Modern => Some(self.root.join(MODERN_CREDENTIALS)),
        }
    }

    /// The driver mapping document.
    pub fn drivers_path(&self) -> PathBuf {
        self.root.join(DRIVERS_FILE)
    }
}

/// Locates the connection store.
#[derive(Debug, Clone)]
pub struct ConfigLocator {
    explicit: Option<(PathBuf, Option<SchemaVersion>)>,
    search_roots: Vec<PathBuf>,
}

impl Default for ConfigLocator {
    fn default() -> Self {
        Self::with_search_roots(well_known_roots())
    }
}

impl ConfigLocator {
    /// Searches the given workspace roots in order.
    pub fn with_search_roots(roots: Vec<PathBuf>) -> Self {
        let mut search_roots: Vec<PathBuf> = Vec::with_capacity(roots.len());
        for root in roots {
            if !search_roots.contains(&root) {
                search_roots.push(root);
            }
        }
        Self {
            explicit: None,
            search_roots,
        }
    }

    /// Uses exactly this workspace root; no other location is checked.
    pub fn with_override(path: impl Into<PathBuf>, schema: Option<SchemaVersion>) -> Self {
        Self {
            explicit: Some((path.into(), schema)),
            search_roots: Vec::new(),
        }
    }

    /// Returns the store location and its schema version.
    pub fn locate(&self) -> Result<StoreLocation> {
        if let Some((path, schema)) = &self.explicit {
            let schema = schema.or_else(|| detect_schema(path));
            return match schema {
                Some(schema) => Ok(StoreLocation::new(path.clone(), schema)),
                None => Err(BridgeError::StoreNotFound {
                    checked: vec![path.clone()],
                }),
            };
        }

        for root in &self.search_roots {
            debug!("Checking for DBeaver workspace at {}", root.display());
            if let Some(schema) = detect_schema(root) {
                return Ok(StoreLocation::new(root.clone(), schema));
            }
        }

        Err(BridgeError::StoreNotFound {
            checked: self.search_roots.clone(),
        })
    }
}

/// Detects the layout of a workspace root from its marker paths.
pub fn detect_schema(root: &Path) -> Option<SchemaVersion> {
    if root.join(MODERN_MARKER).is_dir() {
        Some(SchemaVersion::Modern)
    } else if root.join(LEGACY_DATA_SOURCES).is_file() {
        Some(SchemaVersion::Legacy)
    } else {
        None
    }
}

/// Default workspace roots, modern layouts first.
fn well_known_roots() -> Vec<PathBuf> {
    let mut roots = Vec::new();
    if let Some(data_dir) = dirs::data_dir() {
        roots.push(data_dir.join("DBeaverData").join("workspace6"));
    }
    if let Some(home) = dirs::home_dir() {
        roots.push(home.join("Library").join("DBeaverData").join("workspace6"));
        roots.push(home.join(".local/share/DBeaverData/workspace6"));
        roots.push(home.join(".dbeaver4"));
        roots.push(home.join(".dbeaver"));
    }
    roots
}
