//! Normalized connection model.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use percent_encoding::percent_decode_str;
use serde::{Serialize, Serializer};
use url::Url;

use crate::error::{BridgeError, ConnectionContext, Result};
use crate::store::drivers::default_port;

/// A password value that never shows up in `Debug` output or serialized data.
#[derive(Clone, PartialEq, Eq)]
pub struct Password(String);

impl Password {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the plaintext. Callers must not log or format it.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Password(****)")
    }
}

impl Serialize for Password {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str("****")
    }
}

/// SSL/TLS settings stored with a connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SslOptions {
    /// Explicitly enabled or disabled; `None` means the executor decides.
    pub enabled: Option<bool>,
    /// Engine-specific mode (e.g. `require`, `verify-full`).
    pub mode: Option<String>,
    /// CA bundle supplied by the user.
    pub ca_cert: Option<PathBuf>,
    /// Trust the server certificate without validating the chain.
    pub trust_server_certificate: Option<bool>,
}

impl SslOptions {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// One saved connection, normalized from either store schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionModel {
    pub id: String,
    pub name: String,
    /// Driver identifier (driver class when the mapping knows it, else the driver id).
    pub driver: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<Password>,
    /// JDBC URL as stored.
    pub url: Option<String>,
    pub properties: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "SslOptions::is_empty")]
    pub ssl: SslOptions,
    pub read_only: bool,
    pub folder: Option<String>,
}

impl ConnectionModel {
    /// Creates a model with only the required fields set.
    pub fn new(id: impl Into<String>, driver: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            driver: driver.into(),
            host: None,
            port: None,
            database: None,
            user: None,
            password: None,
            url: None,
            properties: BTreeMap::new(),
            ssl: SslOptions::default(),
            read_only: false,
            folder: None,
        }
    }

    /// Builds an ad-hoc connection from a URL.
    ///
    /// Accepts `postgres://`, `postgresql://`, `sqlserver://`, `mssql://`
    /// and `sqlite:` URLs.
    pub fn from_url(id: impl Into<String>, conn_str: &str) -> Result<Self> {
        let url = Url::parse(conn_str)
            .map_err(|e| BridgeError::config(format!("Invalid connection string: {e}")))?;

        let driver = match url.scheme() {
            "postgres" | "postgresql" => "postgres",
            "sqlserver" | "mssql" => "sqlserver",
            "sqlite" => "sqlite",
            other => {
                return Err(BridgeError::config(format!(
                    "Invalid scheme '{other}'. Expected postgres, sqlserver or sqlite"
                )))
            }
        };

        let mut model = Self::new(id, driver);
        if driver == "sqlite" {
            let path = conn_str
                .trim_start_matches("sqlite:")
                .trim_start_matches("//");
            model.database = Some(path.to_string());
            return Ok(model.with_default_port());
        }

        // Userinfo and path stay percent-encoded in the parsed URL.
        let decode = |s: &str| percent_decode_str(s).decode_utf8_lossy().into_owned();
        model.host = url.host_str().map(String::from);
        model.port = url.port();
        model.database = url
            .path()
            .strip_prefix('/')
            .filter(|db| !db.is_empty())
            .map(decode);
        if !url.username().is_empty() {
            model.user = Some(decode(url.username()));
        }
        model.password = url.password().map(|p| Password::new(decode(p)));
        for (key, value) in url.query_pairs() {
            if key == "sslmode" {
                model.ssl.mode = Some(value.to_string());
            } else {
                model.properties.insert(key.to_string(), value.to_string());
            }
        }
        Ok(model.with_default_port())
    }

    /// Fills the port from the per-driver default table when absent.
    pub fn with_default_port(mut self) -> Self {
        if self.port.is_none() {
            self.port = default_port(&self.driver);
        }
        self
    }

    /// Looks up an engine-specific property, case-insensitively.
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.is_empty())
    }

    /// Password-free summary for listings.
    pub fn summary(&self) -> ConnectionSummary {
        ConnectionSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            driver: self.driver.clone(),
            host: self.host.clone(),
            port: self.port,
            database: self.database.clone(),
            user: self.user.clone(),
            read_only: self.read_only,
            folder: self.folder.clone(),
        }
    }

    /// Diagnostic context for errors.
    pub fn context(&self) -> ConnectionContext {
        ConnectionContext {
            connection_id: self.id.clone(),
            driver: self.driver.clone(),
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            database: self.database.clone(),
        }
    }
}

/// Listing entry for a saved connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionSummary {
    pub id: String,
    pub name: String,
    pub driver: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub user: Option<String>,
    pub read_only: bool,
    pub folder: Option<String>,
}
