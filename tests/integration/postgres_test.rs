//! PostgreSQL integration tests.
//!
//! These tests require a running PostgreSQL database.
//! Set DATABASE_URL environment variable to run them.

use std::sync::Arc;

use dbeaver_bridge::connection::ConnectionCache;
use dbeaver_bridge::db::Value;
use dbeaver_bridge::error::{BridgeError, ExecutionErrorKind};
use dbeaver_bridge::query::QueryService;
use dbeaver_bridge::store::{ConnectionModel, Password};

/// Helper to build a service holding the DATABASE_URL connection as `pg`.
fn get_test_service() -> Option<QueryService> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let connection = ConnectionModel::from_url("pg", &url).ok()?;
    let mut wrong = connection.clone();
    wrong.id = "pg-wrong-password".to_string();
    wrong.password = Some(Password::new("definitely-not-the-password"));
    let mut unsaved = connection.clone();
    unsaved.id = "pg-no-password".to_string();
    unsaved.password = None;
    let cache = ConnectionCache::with_connections(vec![connection, wrong, unsaved]);
    Some(QueryService::new(Arc::new(cache)))
}

#[tokio::test]
async fn test_execute_simple_select() {
    let Some(service) = get_test_service() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let result = service
        .execute_query(
            "pg",
            "SELECT 1 AS num, 'hello' AS greeting, NULL::text AS nothing, true AS flag",
            false,
        )
        .await
        .unwrap();

    let names: Vec<&str> = result.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["num", "greeting", "nothing", "flag"]);
    assert_eq!(
        result.rows,
        vec![vec![
            Value::Int(1),
            Value::String("hello".into()),
            Value::Null,
            Value::Bool(true)
        ]]
    );
}

#[tokio::test]
async fn test_empty_result_keeps_columns() {
    let Some(service) = get_test_service() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let result = service
        .execute_query("pg", "SELECT 1 AS a, now() AS b WHERE false", false)
        .await
        .unwrap();
    assert_eq!(result.row_count, 0);
    assert_eq!(result.columns.len(), 2);
}

#[tokio::test]
async fn test_timestamps_are_iso_strings() {
    let Some(service) = get_test_service() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let result = service
        .execute_query("pg", "SELECT DATE '2024-03-01' AS d", false)
        .await
        .unwrap();
    assert_eq!(result.rows[0][0], Value::String("2024-03-01".into()));
}

#[tokio::test]
async fn test_sql_error_is_execution_kind() {
    let Some(service) = get_test_service() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let err = service
        .execute_query("pg", "SELECT * FROM nonexistent_table_xyz", false)
        .await
        .unwrap_err();
    assert_eq!(err.execution_kind(), Some(ExecutionErrorKind::Execution));
}

#[tokio::test]
async fn test_password_never_leaks() {
    let Some(service) = get_test_service() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    // Trust-authenticated servers accept any password.
    if let Err(err) = service
        .execute_query("pg-wrong-password", "SELECT 1", false)
        .await
    {
        assert!(!err.to_string().contains("definitely-not-the-password"));
    }

    let err = service
        .execute_query("pg-no-password", "SELECT 1", false)
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::CredentialMissing { .. }));
}

#[tokio::test]
async fn test_numeric_and_uuid_values() {
    let Some(service) = get_test_service() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let result = service
        .execute_query(
            "pg",
            "SELECT 1.50::numeric AS amount, gen_random_uuid() AS id, ARRAY['a', 'b'] AS tags",
            false,
        )
        .await
        .unwrap();
    let row = &result.rows[0];
    assert_eq!(row[0], Value::String("1.50".into()));
    match &row[1] {
        Value::String(id) => assert_eq!(id.matches('-').count(), 4),
        other => panic!("uuid came back as {other:?}"),
    }
    assert_eq!(row[2], Value::String(r#"["a","b"]"#.into()));
}

#[tokio::test]
async fn test_show_returns_rows() {
    let Some(service) = get_test_service() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let result = service
        .execute_query("pg", "SHOW server_version", false)
        .await
        .unwrap();
    assert_eq!(result.row_count, 1);
    assert_eq!(result.columns[0].name, "server_version");
}
