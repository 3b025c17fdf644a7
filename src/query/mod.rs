//! Query execution for dbeaver-bridge.
//!
//! [`QueryService`] ties the connection cache, the safety classifier and the
//! engine executors together.

pub mod service;

pub use service::{ExecutionOptions, QueryService, DEFAULT_TIMEOUT};
