//! End-to-end tests against real SQLite databases.
//!
//! Each test writes a modern DBeaver workspace whose connections point at
//! SQLite files in a temporary directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::Connection;
use tempfile::TempDir;

use dbeaver_bridge::config::Config;
use dbeaver_bridge::connection::ConnectionCache;
use dbeaver_bridge::db::Value;
use dbeaver_bridge::error::{BridgeError, ExecutionErrorKind};
use dbeaver_bridge::query::{ExecutionOptions, QueryService};
use dbeaver_bridge::safety::SafetyClass;

use super::fixtures::write_modern_store;

async fn create_db(path: &Path, statements: &[&str]) {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    let mut conn = SqliteConnection::connect_with(&options).await.unwrap();
    for statement in statements {
        sqlx::query(statement).execute(&mut conn).await.unwrap();
    }
    conn.close().await.unwrap();
}

/// Writes a workspace with one SQLite connection per `(id, file, read_only)`.
fn write_store(root: &Path, databases: &[(String, PathBuf, bool)]) {
    let connections: serde_json::Map<String, serde_json::Value> = databases
        .iter()
        .map(|(id, path, read_only)| {
            (
                id.clone(),
                serde_json::json!({
                    "provider": "generic",
                    "driver": "sqlite_jdbc",
                    "name": id,
                    "read-only": read_only,
                    "configuration": { "database": path.display().to_string() }
                }),
            )
        })
        .collect();
    write_modern_store(root, &serde_json::json!({ "connections": connections }), None);
}

async fn service(root: &Path, options: ExecutionOptions) -> QueryService {
    let mut config = Config::default();
    config.store.path = Some(root.to_path_buf());
    let service = QueryService::new(Arc::new(ConnectionCache::new(config.store_source())))
        .with_options(options);
    service.reload().await.unwrap();
    service
}

async fn users_fixture() -> (TempDir, QueryService) {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("app.db");
    create_db(
        &db,
        &[
            "CREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT NOT NULL, score REAL)",
            "INSERT INTO users VALUES (1, 'alice@example.com', 4.5), (2, 'bob@example.com', NULL)",
        ],
    )
    .await;
    let workspace = dir.path().join("workspace6");
    write_store(
        &workspace,
        &[
            ("app".to_string(), db.clone(), false),
            ("app-ro".to_string(), db, true),
        ],
    );
    let service = service(&workspace, ExecutionOptions::default()).await;
    (dir, service)
}

#[tokio::test]
async fn test_select_through_store() {
    let (_dir, service) = users_fixture().await;

    let result = service
        .execute_query("app", "SELECT id, email, score FROM users ORDER BY id", false)
        .await
        .unwrap();

    let names: Vec<&str> = result.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["id", "email", "score"]);
    assert_eq!(result.row_count, 2);
    assert_eq!(
        result.rows[0],
        vec![
            Value::Int(1),
            Value::String("alice@example.com".into()),
            Value::Float(4.5)
        ]
    );
    assert_eq!(result.rows[1][2], Value::Null);
    assert!(!result.was_truncated);
}

#[tokio::test]
async fn test_destructive_without_confirmation_leaves_table() {
    let (_dir, service) = users_fixture().await;

    let err = service
        .execute_query("app", "DROP TABLE users", false)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BridgeError::ConfirmationRequired {
            class: SafetyClass::Destructive,
            ..
        }
    ));

    let still_there = service
        .execute_query("app", "SELECT count(*) AS n FROM users", false)
        .await
        .unwrap();
    assert_eq!(still_there.rows[0][0], Value::Int(2));

    let deleted = service
        .execute_query("app", "DELETE FROM users WHERE id = 2", true)
        .await
        .unwrap();
    assert_eq!(deleted.rows_affected, Some(1));
}

#[tokio::test]
async fn test_mutation_and_read_only_connection() {
    let (_dir, service) = users_fixture().await;

    let inserted = service
        .execute_query(
            "app",
            "INSERT INTO users (email) VALUES ('carol@example.com')",
            false,
        )
        .await
        .unwrap();
    assert_eq!(inserted.rows_affected, Some(1));

    let err = service
        .execute_query("app-ro", "UPDATE users SET score = 0", false)
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::ReadOnly { .. }));

    let read = service
        .execute_query("app-ro", "SELECT email FROM users WHERE score IS NULL", false)
        .await
        .unwrap();
    assert_eq!(read.row_count, 2);
}

#[tokio::test]
async fn test_row_cap_applies() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("numbers.db");
    create_db(&db, &["CREATE TABLE n (v INTEGER)"]).await;
    let workspace = dir.path().join("ws");
    write_store(&workspace, &[("numbers".to_string(), db, false)]);
    let service = service(
        &workspace,
        ExecutionOptions {
            timeout: Duration::from_secs(30),
            max_rows: 10,
        },
    )
    .await;

    let result = service
        .execute_query(
            "numbers",
            "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 25) SELECT x FROM c",
            false,
        )
        .await
        .unwrap();
    assert_eq!(result.row_count, 10);
    assert_eq!(result.total_rows, Some(25));
    assert!(result.was_truncated);

    let empty = service
        .execute_query("numbers", "SELECT v FROM n", false)
        .await
        .unwrap();
    assert_eq!(empty.row_count, 0);
    assert_eq!(empty.columns.len(), 1);
}

#[tokio::test]
async fn test_slow_query_times_out() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("slow.db");
    create_db(&db, &["CREATE TABLE t (v INTEGER)"]).await;
    let workspace = dir.path().join("ws");
    write_store(&workspace, &[("slow".to_string(), db.clone(), false)]);
    let timeout = Duration::from_millis(300);
    let service = service(
        &workspace,
        ExecutionOptions {
            timeout,
            max_rows: 10,
        },
    )
    .await;

    let start = Instant::now();
    let err = service
        .execute_query(
            "slow",
            "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c) SELECT count(*) FROM c",
            false,
        )
        .await
        .unwrap_err();
    assert_eq!(err.execution_kind(), Some(ExecutionErrorKind::Timeout));
    assert!(start.elapsed() < timeout + Duration::from_secs(3));

    // The abandoned statement must stop and give up its lock on the file.
    assert_exclusive_lock_within(&db, Duration::from_secs(3)).await;
}

async fn assert_exclusive_lock_within(path: &Path, limit: Duration) {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .busy_timeout(Duration::ZERO);
    let mut conn = SqliteConnection::connect_with(&options).await.unwrap();
    let deadline = Instant::now() + limit;
    loop {
        match sqlx::query("BEGIN EXCLUSIVE").execute(&mut conn).await {
            Ok(_) => break,
            Err(_) if Instant::now() < deadline => {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            Err(e) => panic!("{} is still locked: {e}", path.display()),
        }
    }
    sqlx::query("ROLLBACK").execute(&mut conn).await.unwrap();
    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_pragma_and_returning_produce_rows() {
    let (_dir, service) = users_fixture().await;

    let pragma = service
        .execute_query("app", "PRAGMA table_info(users)", true)
        .await
        .unwrap();
    assert_eq!(pragma.row_count, 3);
    assert_eq!(pragma.rows_affected, None);

    let inserted = service
        .execute_query(
            "app",
            "INSERT INTO users (email) VALUES ('dave@example.com') RETURNING id, email",
            false,
        )
        .await
        .unwrap();
    assert_eq!(inserted.row_count, 1);
    assert_eq!(
        inserted.rows[0],
        vec![Value::Int(3), Value::String("dave@example.com".into())]
    );
}

#[tokio::test]
async fn test_missing_database_file() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("gone.db");
    let workspace = dir.path().join("ws");
    write_store(&workspace, &[("gone".to_string(), missing.clone(), false)]);
    let service = service(&workspace, ExecutionOptions::default()).await;

    let err = service
        .execute_query("gone", "SELECT 1", false)
        .await
        .unwrap_err();
    assert!(err.execution_kind().is_some());
    assert!(!missing.exists());
}

#[tokio::test]
async fn test_concurrent_queries_on_distinct_connections() {
    let dir = TempDir::new().unwrap();
    let mut databases = Vec::new();
    for i in 0..50 {
        let path = dir.path().join(format!("db{i}.db"));
        let insert = format!("INSERT INTO marker VALUES ({i})");
        create_db(&path, &["CREATE TABLE marker (n INTEGER)", &insert]).await;
        databases.push((format!("conn-{i}"), path, false));
    }
    let workspace = dir.path().join("ws");
    write_store(&workspace, &databases);
    let service = Arc::new(service(&workspace, ExecutionOptions::default()).await);

    let calls = (0..50).map(|i| {
        let service = Arc::clone(&service);
        async move {
            let result = service
                .execute_query(&format!("conn-{i}"), "SELECT n FROM marker", false)
                .await
                .unwrap();
            (i, result)
        }
    });

    for (i, result) in futures::future::join_all(calls).await {
        assert_eq!(result.rows, vec![vec![Value::Int(i)]]);
    }
}
