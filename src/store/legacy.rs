//! Parser for the legacy XML layout (`.dbeaver-data-sources.xml`).

use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::credentials::decode_legacy_password;
use super::drivers::DriverMapping;
use super::entry::{is_ssl_handler, RawEntry, SslHandler};
use super::{load_driver_mapping, read_store_file, ParsedStore, StoreLocation, StoreParser};
use crate::error::{BridgeError, Result};

/// Parses `<data-sources>` documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct LegacyParser;

impl StoreParser for LegacyParser {
    fn parse(&self, location: &StoreLocation) -> Result<ParsedStore> {
        let source = location.data_sources_path();
        let xml = read_store_file(&source)?;
        let mut parsed = ParsedStore::default();
        let mapping = load_driver_mapping(&location.drivers_path(), &mut parsed);
        self.parse_document(&xml, &mapping, &source, &mut parsed)?;
        Ok(parsed)
    }
}

/// Entry being assembled while its `<data-source>` element is open.
#[derive(Default)]
struct OpenEntry {
    raw: RawEntry,
    /// First problem found in the entry; the entry is skipped if set.
    broken: Option<String>,
    /// SSL handler whose element is still open.
    handler: Option<SslHandler>,
    /// Depth of non-SSL handlers being skipped.
    skipped_handlers: usize,
}

impl LegacyParser {
    /// Parses a data sources document, appending to `parsed`.
    ///
    /// XML that is not well-formed fails the whole document; problems inside
    /// one `<data-source>` only skip that entry.
    pub fn parse_document(
        &self,
        xml: &str,
        mapping: &DriverMapping,
        source: &Path,
        parsed: &mut ParsedStore,
    ) -> Result<()> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut open: Option<OpenEntry> = None;
        let mut position = 0usize;
        let mut saw_root = false;

        loop {
            let event = match reader.read_event() {
                Ok(event) => event,
                Err(e) => {
                    return Err(BridgeError::config(format!(
                        "Malformed XML in {} at byte {}: {e}",
                        source.display(),
                        reader.error_position()
                    )))
                }
            };

            match event {
                Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"data-sources" => {
                    saw_root = true;
                }
                Event::Start(e) if e.local_name().as_ref() == b"data-source" => {
                    position += 1;
                    let mut entry = OpenEntry::default();
                    read_data_source(&mut entry, &e);
                    open = Some(entry);
                }
                Event::Empty(e) if e.local_name().as_ref() == b"data-source" => {
                    position += 1;
                    let mut entry = OpenEntry::default();
                    read_data_source(&mut entry, &e);
                    finish_entry(entry, position, mapping, source, parsed);
                }
                Event::End(e) if e.local_name().as_ref() == b"data-source" => {
                    if let Some(entry) = open.take() {
                        finish_entry(entry, position, mapping, source, parsed);
                    }
                }
                Event::Start(e) => {
                    if let Some(entry) = open.as_mut() {
                        open_child(entry, &e, false);
                    }
                }
                Event::Empty(e) => {
                    if let Some(entry) = open.as_mut() {
                        open_child(entry, &e, true);
                    }
                }
                Event::End(e) if e.local_name().as_ref() == b"network-handler" => {
                    if let Some(entry) = open.as_mut() {
                        close_handler(entry);
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !saw_root {
            return Err(BridgeError::config(format!(
                "{} has no <data-sources> root element",
                source.display()
            )));
        }
        Ok(())
    }
}

/// Reads `<data-source>` attributes.
fn read_data_source(entry: &mut OpenEntry, e: &BytesStart<'_>) {
    for (key, value) in attributes(entry, e) {
        match key.as_str() {
            "id" => entry.raw.id = Some(value),
            "name" => entry.raw.name = Some(value),
            "driver" => entry.raw.driver = Some(value),
            "provider" => entry.raw.provider = Some(value),
            "read-only" => entry.raw.read_only = value.eq_ignore_ascii_case("true"),
            "folder" => entry.raw.folder = Some(value),
            _ => {}
        }
    }
}

/// Handles an element nested in an open `<data-source>`.
fn open_child(entry: &mut OpenEntry, e: &BytesStart<'_>, self_closing: bool) {
    match e.local_name().as_ref() {
        b"connection" => {
            for (key, value) in attributes(entry, e) {
                match key.as_str() {
                    "host" => entry.raw.host = Some(value),
                    "server" if entry.raw.host.is_none() => entry.raw.host = Some(value),
                    "port" => entry.raw.port = Some(value),
                    "database" => entry.raw.database = Some(value),
                    "url" => entry.raw.url = Some(value),
                    "user" => entry.raw.user = Some(value),
                    "password" => entry.raw.password = Some(decode_legacy_password(&value)),
                    _ => {}
                }
            }
        }
        b"network-handler" => {
            let attrs = attributes(entry, e);
            let kind = attrs
                .iter()
                .filter(|(k, _)| k == "type" || k == "id")
                .any(|(_, v)| is_ssl_handler(v));
            if kind {
                let enabled = attrs
                    .iter()
                    .any(|(k, v)| k == "enabled" && v.eq_ignore_ascii_case("true"));
                entry.handler = Some(SslHandler {
                    enabled,
                    ..SslHandler::default()
                });
            } else {
                entry.skipped_handlers += 1;
            }
            if self_closing {
                close_handler(entry);
            }
        }
        b"property" => {
            let attrs = attributes(entry, e);
            let name = attrs.iter().find(|(k, _)| k == "name").map(|(_, v)| v.clone());
            let value = attrs.iter().find(|(k, _)| k == "value").map(|(_, v)| v.clone());
            let (Some(name), Some(value)) = (name, value) else {
                return;
            };
            if let Some(handler) = entry.handler.as_mut() {
                handler.properties.insert(name, value);
            } else if entry.skipped_handlers == 0 {
                entry.raw.properties.insert(name, value);
            }
        }
        _ => {}
    }
}

fn close_handler(entry: &mut OpenEntry) {
    if let Some(handler) = entry.handler.take() {
        entry.raw.ssl = Some(handler);
    } else {
        entry.skipped_handlers = entry.skipped_handlers.saturating_sub(1);
    }
}

/// Decodes all attributes of an element; a broken attribute marks the entry.
fn attributes(entry: &mut OpenEntry, e: &BytesStart<'_>) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for attr in e.attributes() {
        let decoded = attr
            .map_err(|err| err.to_string())
            .and_then(|a| {
                let key = String::from_utf8_lossy(a.key.as_ref()).into_owned();
                a.unescape_value()
                    .map(|v| (key.clone(), v.into_owned()))
                    .map_err(|err| format!("attribute '{key}': {err}"))
            });
        match decoded {
            Ok(pair) => out.push(pair),
            Err(err) => {
                if entry.broken.is_none() {
                    entry.broken = Some(format!("corrupt attribute ({err})"));
                }
            }
        }
    }
    out
}

fn finish_entry(
    entry: OpenEntry,
    position: usize,
    mapping: &DriverMapping,
    source: &Path,
    parsed: &mut ParsedStore,
) {
    let label = entry.raw.label(position);
    if let Some(problem) = entry.broken {
        parsed.warn(source, Some(label), problem);
        return;
    }
    match entry.raw.into_model(mapping) {
        Ok(model) => parsed.push(model, source),
        Err(problem) => parsed.warn(source, Some(label), problem),
    }
}
