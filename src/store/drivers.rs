//! Driver mapping document, per-driver default ports and JDBC URL parsing.

use std::collections::HashMap;
use std::sync::OnceLock;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;

/// Default ports, checked in order against the lower-cased driver identifier.
const DEFAULT_PORTS: &[(&[&str], Option<u16>)] = &[
    (&["sqlite"], None),
    (&["postgres", "pgjdbc"], Some(5432)),
    (&["mssql", "sqlserver", "microsoft", "jtds"], Some(1433)),
    (&["mysql", "mariadb"], Some(3306)),
    (&["oracle"], Some(1521)),
    (&["db2"], Some(50000)),
];

/// Returns the default port for a driver identifier, if the engine uses one.
pub fn default_port(driver: &str) -> Option<u16> {
    let driver = driver.to_lowercase();
    DEFAULT_PORTS
        .iter()
        .find(|(needles, _)| needles.iter().any(|n| driver.contains(n)))
        .and_then(|(_, port)| *port)
}

/// Maps DBeaver driver ids to driver class names.
#[derive(Debug, Clone, Default)]
pub struct DriverMapping {
    classes: HashMap<String, String>,
}

impl DriverMapping {
    /// Parses a `drivers.xml` document.
    ///
    /// Returns a message describing the problem if the document is not well-formed.
    pub fn parse(xml: &str) -> Result<Self, String> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut mapping = Self::default();
        let mut provider: Option<String> = None;

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) if e.local_name().as_ref() == b"provider" => {
                    provider = attribute(&e, b"id");
                }
                Ok(Event::End(e)) if e.local_name().as_ref() == b"provider" => {
                    provider = None;
                }
                Ok(Event::Start(e)) | Ok(Event::Empty(e))
                    if e.local_name().as_ref() == b"driver" =>
                {
                    let (Some(id), Some(class)) = (attribute(&e, b"id"), attribute(&e, b"class"))
                    else {
                        continue;
                    };
                    if let Some(provider) = &provider {
                        mapping
                            .classes
                            .entry(format!("{provider}:{id}"))
                            .or_insert_with(|| class.clone());
                    }
                    mapping.classes.entry(id).or_insert(class);
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => {
                    return Err(format!(
                        "malformed XML at byte {}: {e}",
                        reader.error_position()
                    ))
                }
            }
        }

        Ok(mapping)
    }

    /// Adds a mapping entry.
    pub fn insert(&mut self, driver_id: impl Into<String>, class: impl Into<String>) {
        self.classes.insert(driver_id.into(), class.into());
    }

    /// Resolves the driver identifier for an entry.
    ///
    /// Order: mapped class of `provider:driver`, mapped class of `driver`,
    /// the driver id itself, then the provider id.
    pub fn resolve(&self, driver: Option<&str>, provider: Option<&str>) -> Option<String> {
        let driver = driver.map(str::trim).filter(|d| !d.is_empty());
        let provider = provider.map(str::trim).filter(|p| !p.is_empty());

        if let Some(driver) = driver {
            if let Some(provider) = provider {
                if let Some(class) = self.classes.get(&format!("{provider}:{driver}")) {
                    return Some(class.clone());
                }
            }
            return Some(
                self.classes
                    .get(driver)
                    .cloned()
                    .unwrap_or_else(|| driver.to_string()),
            );
        }
        provider.map(String::from)
    }
}

/// Reads and unescapes an attribute; malformed attributes read as absent.
fn attribute(e: &BytesStart<'_>, name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == name)
        .and_then(|a| a.unescape_value().ok())
        .map(|v| v.into_owned())
}

/// Connection details recovered from a JDBC URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JdbcUrl {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    /// `;key=value` and `?key=value` parameters, in order.
    pub params: Vec<(String, String)>,
}

fn network_url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^jdbc:(?:[a-z0-9]+:)*?[a-z0-9]+://(?P<host>\[[^\]]+\]|[^:/;?]+)(?::(?P<port>\d+))?(?:/(?P<db>[^;?]*))?(?P<rest>.*)$",
        )
        .expect("JDBC URL pattern is valid")
    })
}

/// Parses a JDBC URL such as `jdbc:postgresql://host:5432/db`,
/// `jdbc:sqlserver://host:1433;databaseName=db` or `jdbc:sqlite:/path/file.db`.
pub fn parse_jdbc_url(url: &str) -> Option<JdbcUrl> {
    let url = url.trim();
    if let Some(path) = strip_prefix_ignore_case(url, "jdbc:sqlite:") {
        return Some(JdbcUrl {
            database: Some(path.to_string()).filter(|p| !p.is_empty()),
            ..JdbcUrl::default()
        });
    }

    let caps = network_url_regex().captures(url)?;
    let mut parsed = JdbcUrl {
        host: caps
            .name("host")
            .map(|m| m.as_str().trim_matches(|c| c == '[' || c == ']').to_string()),
        port: caps.name("port").and_then(|m| m.as_str().parse().ok()),
        database: caps
            .name("db")
            .map(|m| m.as_str().to_string())
            .filter(|db| !db.is_empty()),
        params: Vec::new(),
    };

    let rest = caps.name("rest").map(|m| m.as_str()).unwrap_or_default();
    for pair in rest.split([';', '?', '&']).filter(|p| !p.is_empty()) {
        if let Some((key, value)) = pair.split_once('=') {
            parsed.params.push((key.to_string(), value.to_string()));
        }
    }
    if parsed.database.is_none() {
        parsed.database = parsed
            .params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("databaseName") || k.eq_ignore_ascii_case("database"))
            .map(|(_, v)| v.clone());
    }
    Some(parsed)
}

/// Returns the SQLite file path stored in a `jdbc:sqlite:` URL.
pub fn sqlite_path_from_url(url: &str) -> Option<&str> {
    strip_prefix_ignore_case(url.trim(), "jdbc:sqlite:").filter(|p| !p.is_empty())
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if s.len() >= prefix.len() && s.is_char_boundary(prefix.len()) {
        let (head, tail) = s.split_at(prefix.len());
        if head.eq_ignore_ascii_case(prefix) {
            return Some(tail);
        }
    }
    None
}
