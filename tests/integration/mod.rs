//! Integration tests for dbeaver-bridge.

pub mod postgres_test;
pub mod service_test;
pub mod sqlite_test;
pub mod sqlserver_test;
pub mod store_test;
