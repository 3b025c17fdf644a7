//! Query service tests over a real store, with engines replaced by mocks.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use dbeaver_bridge::connection::ConnectionCache;
use dbeaver_bridge::db::{
    DriverDispatcher, DriverMatch, Engine, MockExecutor, QueryExecutor, Route,
};
use dbeaver_bridge::error::{BridgeError, ExecutionErrorKind};
use dbeaver_bridge::query::{ExecutionOptions, QueryService};
use dbeaver_bridge::safety::SafetyClass;
use dbeaver_bridge::store::{ConfigLocator, StoreSource};

use super::fixtures::{modern_sample, write_modern_store, MSSQL_PASSWORD, PG_PASSWORD};

struct Harness {
    _dir: TempDir,
    root: std::path::PathBuf,
    postgres: Arc<MockExecutor>,
    service: QueryService,
}

async fn harness(postgres: MockExecutor, options: ExecutionOptions) -> Harness {
    let dir = TempDir::new().unwrap();
    let root = dir.path().to_path_buf();
    let (data_sources, credentials) = modern_sample();
    write_modern_store(&root, &data_sources, Some(&credentials));

    let postgres = Arc::new(postgres);
    let dispatcher = DriverDispatcher::new(vec![
        Route::new(DriverMatch::Contains("postgres"), Arc::clone(&postgres) as Arc<dyn QueryExecutor>),
        Route::new(
            DriverMatch::ContainsAny(&["mssql", "sqlserver", "microsoft"]),
            Arc::new(MockExecutor::new(Engine::SqlServer)),
        ),
    ]);
    let cache = ConnectionCache::new(StoreSource::new(ConfigLocator::with_override(&root, None)));
    let service = QueryService::new(Arc::new(cache))
        .with_dispatcher(dispatcher)
        .with_options(options);
    service.reload().await.unwrap();

    Harness {
        _dir: dir,
        root,
        postgres,
        service,
    }
}

#[tokio::test]
async fn test_listing_never_exposes_passwords() {
    let h = harness(MockExecutor::new(Engine::Postgres), ExecutionOptions::default()).await;

    let summaries = h.service.list_connections();
    assert_eq!(summaries.len(), 3);
    let listed = serde_json::to_string(&summaries).unwrap();
    let shown = serde_json::to_string(&*h.service.get_connection("pg-prod").unwrap()).unwrap();
    for text in [&listed, &shown] {
        assert!(!text.contains(PG_PASSWORD));
        assert!(!text.contains(MSSQL_PASSWORD));
    }
    assert!(shown.contains("db.example.com"));
}

#[tokio::test]
async fn test_read_only_store_flag_is_enforced() {
    let h = harness(MockExecutor::new(Engine::Postgres), ExecutionOptions::default()).await;

    // pg-prod is marked read-only in the store.
    let err = h
        .service
        .execute_query("pg-prod", "INSERT INTO t VALUES (1)", false)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BridgeError::ReadOnly {
            class: SafetyClass::Mutating,
            ..
        }
    ));
    assert_eq!(h.postgres.call_count(), 0);

    let result = h
        .service
        .execute_query("pg-prod", "SELECT * FROM t", false)
        .await
        .unwrap();
    assert_eq!(result.row_count, 1);
    assert_eq!(
        h.postgres.executed(),
        vec![("pg-prod".to_string(), "SELECT * FROM t".to_string())]
    );
}

#[tokio::test]
async fn test_sqlite_entry_not_in_table_is_not_supported() {
    let h = harness(MockExecutor::new(Engine::Postgres), ExecutionOptions::default()).await;
    match h.service.execute_query("local-sqlite", "SELECT 1", false).await {
        Err(BridgeError::NotSupported { driver, supported }) => {
            assert_eq!(driver, "org.sqlite.JDBC");
            assert_eq!(supported, vec!["PostgreSQL", "SQL Server"]);
        }
        other => panic!("expected NotSupported, got {other:?}"),
    }
}

#[tokio::test]
async fn test_timeout_releases_connection() {
    let h = harness(
        MockExecutor::new(Engine::Postgres).with_delay(Duration::from_secs(30)),
        ExecutionOptions {
            timeout: Duration::from_millis(100),
            max_rows: 100,
        },
    )
    .await;

    let err = h
        .service
        .execute_query("pg-prod", "SELECT pg_sleep(30)", false)
        .await
        .unwrap_err();
    assert_eq!(err.execution_kind(), Some(ExecutionErrorKind::Timeout));
    assert!(err.to_string().contains("pg-prod"));
    assert_eq!(h.postgres.call_count(), 1);
    assert_eq!(h.postgres.open_connections(), 0);
}

#[tokio::test]
async fn test_engine_failure_is_reported() {
    let h = harness(
        MockExecutor::new(Engine::Postgres).failing(
            ExecutionErrorKind::Authentication,
            format!("password authentication failed ({PG_PASSWORD})"),
        ),
        ExecutionOptions::default(),
    )
    .await;

    let err = h
        .service
        .execute_query("pg-prod", "SELECT 1", false)
        .await
        .unwrap_err();
    assert_eq!(err.execution_kind(), Some(ExecutionErrorKind::Authentication));
    assert!(!err.to_string().contains(PG_PASSWORD));
}

#[tokio::test]
async fn test_reload_picks_up_changes_and_survives_breakage() {
    let h = harness(MockExecutor::new(Engine::Postgres), ExecutionOptions::default()).await;

    let (mut data_sources, credentials) = modern_sample();
    data_sources["connections"]
        .as_object_mut()
        .unwrap()
        .remove("mssql");
    write_modern_store(&h.root, &data_sources, Some(&credentials));
    let report = h.service.reload().await.unwrap();
    assert_eq!(report.count, 2);
    assert!(matches!(
        h.service.get_connection("mssql"),
        Err(BridgeError::NotFound { .. })
    ));

    std::fs::write(h.root.join("General/.dbeaver/data-sources.json"), "[").unwrap();
    assert!(h.service.reload().await.is_err());
    assert_eq!(h.service.list_connections().len(), 2);
}

#[test]
fn test_classify_boundaries() {
    let service = QueryService::new(Arc::new(ConnectionCache::default()));

    let verdict = service.classify("SELECT 1");
    assert_eq!(verdict.class, SafetyClass::SafeRead);
    assert!(!verdict.requires_confirmation);

    let verdict = service.classify("  -- note\nDROP TABLE t");
    assert_eq!(verdict.class, SafetyClass::Destructive);
    assert!(verdict.requires_confirmation);
    assert_eq!(verdict.keyword.as_deref(), Some("DROP"));

    let verdict = service.classify("insert into t values (1)");
    assert_eq!(verdict.class, SafetyClass::Mutating);
    assert!(!verdict.requires_confirmation);

    // Only the leading keyword counts.
    let verdict = service.classify("WITH gone AS (DELETE FROM t RETURNING *) SELECT * FROM gone");
    assert_eq!(verdict.class, SafetyClass::SafeRead);
}
