//! dbeaver-bridge - run ad-hoc SQL against the connections saved in DBeaver.
//!
//! The library resolves DBeaver's connection store (both its legacy XML and
//! its modern JSON layout) and runs single statements against SQLite,
//! PostgreSQL and SQL Server connections, returning uniformly shaped results.

pub mod cli;
pub mod config;
pub mod connection;
pub mod db;
pub mod error;
pub mod logging;
pub mod query;
pub mod safety;
pub mod secrets;
pub mod store;
