//! Connection snapshot management for dbeaver-bridge.
//!
//! Keeps the parsed store in memory and swaps it atomically on reload.

pub mod cache;

pub use cache::{ConnectionCache, ReloadReport};
