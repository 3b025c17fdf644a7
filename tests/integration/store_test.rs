//! Connection store integration tests.
//!
//! Parses whole workspaces from disk, in both layouts.

use pretty_assertions::assert_eq;
use tempfile::TempDir;

use std::sync::atomic::{AtomicBool, Ordering};

use dbeaver_bridge::connection::ConnectionCache;
use dbeaver_bridge::error::BridgeError;
use dbeaver_bridge::store::credentials::CREDENTIALS_KEY;
use dbeaver_bridge::store::{ConfigLocator, SchemaVersion, StoreSource};

use super::fixtures::{
    legacy_sample, modern_sample, write_legacy_store, write_modern_store, MSSQL_PASSWORD,
    PG_PASSWORD,
};

#[test]
fn test_credentials_key_is_dbeaver_default() {
    assert_eq!(hex::encode(CREDENTIALS_KEY), "babb4a9f774ab853c96c2d653dfe544a");
}

#[test]
fn test_legacy_and_modern_layouts_converge() {
    let legacy_dir = TempDir::new().unwrap();
    write_legacy_store(legacy_dir.path(), &legacy_sample());
    let modern_dir = TempDir::new().unwrap();
    let (data_sources, credentials) = modern_sample();
    write_modern_store(modern_dir.path(), &data_sources, Some(&credentials));

    let legacy = StoreSource::new(ConfigLocator::with_override(legacy_dir.path(), None))
        .load()
        .unwrap();
    let modern = StoreSource::new(ConfigLocator::with_override(modern_dir.path(), None))
        .load()
        .unwrap();

    assert!(legacy.warnings.is_empty(), "{:?}", legacy.warnings);
    assert!(modern.warnings.is_empty(), "{:?}", modern.warnings);
    assert_eq!(legacy.connections, modern.connections);

    let ids: Vec<&str> = modern.connections.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["pg-prod", "local-sqlite", "mssql"]);

    let pg = &modern.connections[0];
    assert_eq!(pg.driver, "org.postgresql.Driver");
    assert_eq!(pg.port, Some(5433));
    assert_eq!(pg.user.as_deref(), Some("reporter"));
    assert_eq!(pg.password.as_ref().map(|p| p.expose()), Some(PG_PASSWORD));
    assert_eq!(pg.ssl.mode.as_deref(), Some("verify-full"));
    assert_eq!(pg.ssl.enabled, Some(true));
    assert_eq!(pg.property("connectTimeout"), Some("20"));
    assert!(pg.read_only);
    assert_eq!(pg.folder.as_deref(), Some("Prod"));

    let sqlite = &modern.connections[1];
    assert_eq!(sqlite.driver, "org.sqlite.JDBC");
    assert_eq!(sqlite.port, None);
    assert!(sqlite.password.is_none());

    let mssql = &modern.connections[2];
    assert_eq!(mssql.driver, "com.microsoft.sqlserver.jdbc.SQLServerDriver");
    assert_eq!(mssql.port, Some(1433));
    assert_eq!(mssql.password.as_ref().map(|p| p.expose()), Some(MSSQL_PASSWORD));
}

#[test]
fn test_one_malformed_entry_is_skipped() {
    let dir = TempDir::new().unwrap();
    let (mut data_sources, credentials) = modern_sample();
    data_sources["connections"]["broken"] = serde_json::json!({
        "provider": "postgresql",
        "driver": "postgres-jdbc",
        "configuration": { "host": "x", "port": "not-a-port" }
    });
    write_modern_store(dir.path(), &data_sources, Some(&credentials));

    let parsed = StoreSource::new(ConfigLocator::with_override(dir.path(), None))
        .load()
        .unwrap();
    assert_eq!(parsed.connections.len(), 3);
    assert_eq!(parsed.warnings.len(), 1);
    assert_eq!(parsed.warnings[0].entry.as_deref(), Some("broken"));
}

#[test]
fn test_legacy_entry_without_driver_is_skipped() {
    let dir = TempDir::new().unwrap();
    let xml = legacy_sample().replace(
        "</data-sources>",
        r#"  <data-source id="nodriver" name="No driver"><connection host="h"/></data-source>
</data-sources>"#,
    );
    write_legacy_store(dir.path(), &xml);

    let parsed = StoreSource::new(ConfigLocator::with_override(dir.path(), None))
        .load()
        .unwrap();
    assert_eq!(parsed.connections.len(), 3);
    assert_eq!(parsed.warnings.len(), 1);
    assert!(parsed.warnings[0].message.contains("driver"));
}

#[test]
fn test_corrupt_credentials_still_load_connections() {
    let dir = TempDir::new().unwrap();
    let (data_sources, _) = modern_sample();
    write_modern_store(dir.path(), &data_sources, None);
    std::fs::write(
        dir.path().join("General/.dbeaver/credentials-config.json"),
        b"definitely not encrypted",
    )
    .unwrap();

    let parsed = StoreSource::new(ConfigLocator::with_override(dir.path(), None))
        .load()
        .unwrap();
    assert_eq!(parsed.connections.len(), 3);
    assert_eq!(parsed.warnings.len(), 1);
    assert!(parsed.connections.iter().all(|c| c.password.is_none()));
}

#[test]
fn test_search_roots_in_order() {
    let legacy_dir = TempDir::new().unwrap();
    write_legacy_store(legacy_dir.path(), &legacy_sample());
    let modern_dir = TempDir::new().unwrap();
    let (data_sources, _) = modern_sample();
    write_modern_store(modern_dir.path(), &data_sources, None);
    let empty = TempDir::new().unwrap();

    let locator = ConfigLocator::with_search_roots(vec![
        empty.path().to_path_buf(),
        modern_dir.path().to_path_buf(),
        legacy_dir.path().to_path_buf(),
    ]);
    let location = locator.locate().unwrap();
    assert_eq!(location.root, modern_dir.path().to_path_buf());
    assert_eq!(location.schema, SchemaVersion::Modern);
}

#[test]
fn test_store_not_found_lists_checked_paths() {
    let a = TempDir::new().unwrap();
    let b = TempDir::new().unwrap();
    let locator = ConfigLocator::with_search_roots(vec![
        a.path().to_path_buf(),
        b.path().to_path_buf(),
        a.path().to_path_buf(),
    ]);
    match locator.locate() {
        Err(BridgeError::StoreNotFound { checked }) => {
            assert_eq!(checked, vec![a.path().to_path_buf(), b.path().to_path_buf()]);
        }
        other => panic!("expected StoreNotFound, got {other:?}"),
    }
}

#[test]
fn test_unreadable_data_sources_fails() {
    let dir = TempDir::new().unwrap();
    write_legacy_store(dir.path(), r#"<data-sources><data-source id="a"></wrong></data-sources>"#);
    let err = StoreSource::new(ConfigLocator::with_override(dir.path(), Some(SchemaVersion::Legacy)))
        .load()
        .unwrap_err();
    assert!(matches!(err, BridgeError::Config(_)));
}

#[test]
fn test_readers_see_whole_snapshots_during_reload() {
    let dir = TempDir::new().unwrap();
    let (old, credentials) = modern_sample();
    let mut new = old.clone();
    new["connections"]
        .as_object_mut()
        .unwrap()
        .remove("mssql");
    new["connections"]["pg-prod"]["configuration"]["host"] = serde_json::json!("db2.example.com");

    write_modern_store(dir.path(), &old, Some(&credentials));
    let cache = ConnectionCache::new(StoreSource::new(ConfigLocator::with_override(
        dir.path(),
        None,
    )));
    cache.reload().unwrap();

    let done = AtomicBool::new(false);
    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                let mut reads = 0;
                while !done.load(Ordering::Acquire) || reads == 0 {
                    let list = cache.list();
                    let host = list
                        .iter()
                        .find(|c| c.id == "pg-prod")
                        .and_then(|c| c.host.clone());
                    match list.len() {
                        3 => assert_eq!(host.as_deref(), Some("db.example.com")),
                        2 => assert_eq!(host.as_deref(), Some("db2.example.com")),
                        n => panic!("torn snapshot with {n} connections"),
                    }
                    reads += 1;
                }
            });
        }

        for round in 0..40 {
            let sample = if round % 2 == 0 { &new } else { &old };
            write_modern_store(dir.path(), sample, Some(&credentials));
            cache.reload().unwrap();
        }
        done.store(true, Ordering::Release);
    });

    assert_eq!(cache.len(), 3);
}
