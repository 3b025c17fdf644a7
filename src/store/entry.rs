//! Schema-independent normalization of one store entry.
//!
//! Both parsers collect the fields they find into a [`RawEntry`] and share
//! this conversion, so equivalent legacy and modern entries converge on the
//! same [`ConnectionModel`].

use std::collections::BTreeMap;
use std::path::PathBuf;

use super::drivers::{parse_jdbc_url, DriverMapping};
use super::model::{ConnectionModel, Password, SslOptions};

/// Fields of one entry as read from either schema, not yet validated.
#[derive(Debug, Clone, Default)]
pub(crate) struct RawEntry {
    pub id: Option<String>,
    pub name: Option<String>,
    pub driver: Option<String>,
    pub provider: Option<String>,
    pub host: Option<String>,
    pub port: Option<String>,
    pub database: Option<String>,
    pub url: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub properties: BTreeMap<String, String>,
    pub ssl: Option<SslHandler>,
    pub read_only: bool,
    pub folder: Option<String>,
}

/// An SSL network handler attached to an entry.
#[derive(Debug, Clone, Default)]
pub(crate) struct SslHandler {
    pub enabled: bool,
    pub properties: BTreeMap<String, String>,
}

/// Returns true for handler ids/types that describe SSL.
pub(crate) fn is_ssl_handler(id_or_type: &str) -> bool {
    id_or_type.to_lowercase().contains("ssl")
}

impl SslHandler {
    fn to_options(&self) -> SslOptions {
        let lookup = |keys: &[&str]| {
            self.properties
                .iter()
                .find(|(k, _)| keys.iter().any(|key| k.eq_ignore_ascii_case(key)))
                .map(|(_, v)| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        SslOptions {
            enabled: Some(self.enabled),
            mode: lookup(&["sslMode", "ssl.mode"]),
            ca_cert: lookup(&["ssl.ca.cert", "sslRootCert", "ssl.ca", "caCertificate"])
                .map(PathBuf::from),
            trust_server_certificate: lookup(&[
                "trustServerCertificate",
                "ssl.trust.server.certificate",
            ])
            .map(|v| v.eq_ignore_ascii_case("true")),
        }
    }
}

impl RawEntry {
    /// A label for warnings: the id, or the entry position.
    pub fn label(&self, position: usize) -> String {
        non_empty(self.id.as_deref()).unwrap_or_else(|| format!("#{position}"))
    }

    /// Validates and normalizes the entry.
    pub fn into_model(self, mapping: &DriverMapping) -> Result<ConnectionModel, String> {
        let id = non_empty(self.id.as_deref()).ok_or("missing connection id")?;
        let driver = mapping
            .resolve(self.driver.as_deref(), self.provider.as_deref())
            .ok_or("missing driver identifier")?;

        let port = match non_empty(self.port.as_deref()) {
            Some(port) => Some(
                port.parse::<u16>()
                    .map_err(|_| format!("invalid port '{port}'"))?,
            ),
            None => None,
        };

        let mut model = ConnectionModel::new(id.clone(), driver);
        model.name = non_empty(self.name.as_deref()).unwrap_or(id);
        model.host = non_empty(self.host.as_deref());
        model.port = port;
        model.database = non_empty(self.database.as_deref());
        model.url = non_empty(self.url.as_deref());
        model.user = non_empty(self.user.as_deref());
        model.password = self
            .password
            .filter(|p| !p.is_empty())
            .map(Password::new);
        model.properties = self.properties;
        model.ssl = self.ssl.map(|h| h.to_options()).unwrap_or_default();
        model.read_only = self.read_only;
        model.folder = non_empty(self.folder.as_deref());

        if let Some(jdbc) = model.url.as_deref().and_then(parse_jdbc_url) {
            model.host = model.host.or(jdbc.host);
            model.port = model.port.or(jdbc.port);
            model.database = model.database.or(jdbc.database);
        }

        Ok(model.with_default_port())
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}
