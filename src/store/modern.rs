//! Parser for the modern JSON layout (`data-sources.json` plus the encrypted
//! `credentials-config.json`).

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::credentials::{parse_credentials, SavedCredentials};
use super::drivers::DriverMapping;
use super::entry::{is_ssl_handler, RawEntry, SslHandler};
use super::{load_driver_mapping, read_store_file, ParsedStore, StoreLocation, StoreParser};
use crate::error::{BridgeError, Result};

/// Parses `data-sources.json` and merges saved credentials.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModernParser;

impl StoreParser for ModernParser {
    fn parse(&self, location: &StoreLocation) -> Result<ParsedStore> {
        let source = location.data_sources_path();
        let json = read_store_file(&source)?;
        let mut parsed = ParsedStore::default();
        let mapping = load_driver_mapping(&location.drivers_path(), &mut parsed);

        let credentials = match location.credentials_path() {
            Some(path) => load_credentials(&path, &mut parsed),
            None => HashMap::new(),
        };

        self.parse_documents(&json, &credentials, &mapping, &source, &mut parsed)?;
        Ok(parsed)
    }
}

#[derive(Debug, Deserialize)]
struct ModernEntry {
    provider: Option<String>,
    driver: Option<String>,
    name: Option<String>,
    #[serde(rename = "read-only", default)]
    read_only: bool,
    folder: Option<String>,
    #[serde(default)]
    configuration: Configuration,
}

#[derive(Debug, Default, Deserialize)]
struct Configuration {
    host: Option<String>,
    port: Option<PortValue>,
    database: Option<String>,
    url: Option<String>,
    user: Option<String>,
    password: Option<String>,
    #[serde(default)]
    properties: serde_json::Map<String, Value>,
    #[serde(default)]
    handlers: serde_json::Map<String, Value>,
}

/// DBeaver writes ports as strings; hand-edited files sometimes use numbers.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PortValue {
    Number(u64),
    Text(String),
}

impl PortValue {
    fn into_text(self) -> String {
        match self {
            Self::Number(n) => n.to_string(),
            Self::Text(s) => s,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Handler {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    enabled: bool,
    #[serde(default)]
    properties: serde_json::Map<String, Value>,
}

impl ModernParser {
    /// Parses a data sources document with already-decrypted credentials,
    /// appending to `parsed`.
    pub fn parse_documents(
        &self,
        json: &str,
        credentials: &HashMap<String, SavedCredentials>,
        mapping: &DriverMapping,
        source: &Path,
        parsed: &mut ParsedStore,
    ) -> Result<()> {
        let document: Value = serde_json::from_str(json).map_err(|e| {
            BridgeError::config(format!("Malformed JSON in {}: {e}", source.display()))
        })?;

        let connections = match document.get("connections") {
            None | Some(Value::Null) => return Ok(()),
            Some(Value::Object(connections)) => connections,
            Some(_) => {
                return Err(BridgeError::config(format!(
                    "{}: \"connections\" is not an object",
                    source.display()
                )))
            }
        };

        for (position, (id, value)) in connections.iter().enumerate() {
            let label = if id.trim().is_empty() {
                format!("#{}", position + 1)
            } else {
                id.clone()
            };
            let entry: ModernEntry = match serde_json::from_value(value.clone()) {
                Ok(entry) => entry,
                Err(e) => {
                    parsed.warn(source, Some(label), format!("unexpected entry shape: {e}"));
                    continue;
                }
            };

            let raw = entry.into_raw(id, credentials.get(id));
            match raw.into_model(mapping) {
                Ok(model) => parsed.push(model, source),
                Err(problem) => parsed.warn(source, Some(label), problem),
            }
        }
        Ok(())
    }
}

impl ModernEntry {
    fn into_raw(self, id: &str, saved: Option<&SavedCredentials>) -> RawEntry {
        let config = self.configuration;
        let ssl = config
            .handlers
            .into_iter()
            .filter_map(|(handler_id, value)| {
                let handler: Handler = serde_json::from_value(value).ok()?;
                let ssl = is_ssl_handler(&handler_id)
                    || handler.kind.as_deref().is_some_and(is_ssl_handler);
                ssl.then(|| SslHandler {
                    enabled: handler.enabled,
                    properties: stringify(handler.properties),
                })
            })
            .next();

        let user = config
            .user
            .filter(|u| !u.trim().is_empty())
            .or_else(|| saved.and_then(|c| c.user.clone()));
        let password = saved
            .and_then(|c| c.password.clone())
            .or(config.password);

        RawEntry {
            id: Some(id.to_string()),
            name: self.name,
            driver: self.driver,
            provider: self.provider,
            host: config.host,
            port: config.port.map(PortValue::into_text),
            database: config.database,
            url: config.url,
            user,
            password,
            properties: stringify(config.properties),
            ssl,
            read_only: self.read_only,
            folder: self.folder,
        }
    }
}

/// Property values as strings; nested values keep their JSON text.
fn stringify(map: serde_json::Map<String, Value>) -> BTreeMap<String, String> {
    map.into_iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| {
            let text = match v {
                Value::String(s) => s,
                other => other.to_string(),
            };
            (k, text)
        })
        .collect()
}

/// Reads and decrypts the credentials file. Any failure is one warning.
fn load_credentials(path: &Path, parsed: &mut ParsedStore) -> HashMap<String, SavedCredentials> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("No saved credentials at {}", path.display());
            return HashMap::new();
        }
        Err(e) => {
            parsed.warn(path, None, format!("cannot read saved credentials: {e}"));
            return HashMap::new();
        }
    };
    match parse_credentials(&data) {
        Ok(credentials) => credentials,
        Err(e) => {
            parsed.warn(
                path,
                None,
                format!("cannot decrypt saved credentials, passwords unavailable: {e}"),
            );
            HashMap::new()
        }
    }
}
