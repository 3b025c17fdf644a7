//! Error types for dbeaver-bridge.
//!
//! Defines the main error enum used throughout the crate.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::safety::SafetyClass;

/// Connection details attached to failures so they can be diagnosed.
///
/// Never carries the password.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionContext {
    pub connection_id: String,
    pub driver: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub database: Option<String>,
}

impl fmt::Display for ConnectionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "connection '{}' (driver {}", self.connection_id, self.driver)?;
        if let Some(host) = &self.host {
            match self.port {
                Some(port) => write!(f, ", {host}:{port}")?,
                None => write!(f, ", {host}")?,
            }
        }
        if let Some(user) = &self.user {
            write!(f, ", user '{user}'")?;
        }
        if let Some(database) = &self.database {
            write!(f, ", database '{database}'")?;
        }
        write!(f, ")")
    }
}

/// Classification of a failed execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionErrorKind {
    /// Connect or request phase exceeded the configured timeout.
    Timeout,
    /// The server rejected the credentials.
    Authentication,
    /// Network, TLS or certificate failure.
    Transport,
    /// Anything else reported by the engine (syntax errors, constraint violations, ...).
    Execution,
}

impl fmt::Display for ExecutionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "Timed out"),
            Self::Authentication => write!(f, "Authentication failed"),
            Self::Transport => write!(f, "Transport failure"),
            Self::Execution => write!(f, "Execution failed"),
        }
    }
}

/// Main error type for dbeaver-bridge operations.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// The connection store could not be read or its top level could not be parsed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// No connection store was found in any of the checked locations.
    #[error("DBeaver connection store not found; checked: {}", display_paths(.checked))]
    StoreNotFound { checked: Vec<PathBuf> },

    /// No connection with the given id is loaded.
    #[error("Connection '{id}' not found")]
    NotFound { id: String },

    /// The statement needs `confirmed = true` before it is run.
    #[error("{keyword} is a {class} statement and requires explicit confirmation")]
    ConfirmationRequired { class: SafetyClass, keyword: String },

    /// The connection is marked read-only in DBeaver.
    #[error("Connection '{id}' is read-only; refusing {class} statement")]
    ReadOnly { id: String, class: SafetyClass },

    /// No executor handles the connection's driver.
    #[error(
        "Driver '{driver}' is not supported (supported engines: {}). Run this query from DBeaver instead.",
        .supported.join(", ")
    )]
    NotSupported {
        driver: String,
        supported: Vec<String>,
    },

    /// The executor needs a password and none is saved.
    #[error("No password saved for {context}. Make sure the password is saved in DBeaver.")]
    CredentialMissing { context: ConnectionContext },

    /// A property the executor cannot work without is missing.
    #[error("Missing required property '{property}' for {context}")]
    MissingProperty {
        property: &'static str,
        context: ConnectionContext,
    },

    /// The engine connection or query failed.
    #[error("{kind} for {context}: {message}")]
    Execution {
        kind: ExecutionErrorKind,
        context: ConnectionContext,
        message: String,
    },

    /// The caller cancelled the query while it was running.
    #[error("Query cancelled for {context}")]
    Cancelled { context: ConnectionContext },

    /// Internal errors (unexpected states, bugs, etc.)
    #[error("Internal error: {0}")]
    Internal(String),
}

fn display_paths(paths: &[PathBuf]) -> String {
    if paths.is_empty() {
        return "(no candidate locations)".to_string();
    }
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl BridgeError {
    /// Creates a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a not-found error for the given connection id.
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Creates an internal error with the given message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Creates an execution error, stripping `secret` from the message.
    pub fn execution(
        kind: ExecutionErrorKind,
        context: ConnectionContext,
        message: impl Into<String>,
        secret: Option<&str>,
    ) -> Self {
        Self::Execution {
            kind,
            context,
            message: redact(&message.into(), secret),
        }
    }

    /// Returns the execution error kind, if this is an execution error.
    pub fn execution_kind(&self) -> Option<ExecutionErrorKind> {
        match self {
            Self::Execution { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Returns the error category as a string for display purposes.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config(_) | Self::StoreNotFound { .. } => "Configuration Error",
            Self::NotFound { .. } => "Not Found",
            Self::ConfirmationRequired { .. } | Self::ReadOnly { .. } => "Safety Error",
            Self::NotSupported { .. }
            | Self::CredentialMissing { .. }
            | Self::MissingProperty { .. } => "Connection Error",
            Self::Execution { .. } | Self::Cancelled { .. } => "Execution Error",
            Self::Internal(_) => "Internal Error",
        }
    }
}

/// Replaces every occurrence of `secret` in `message` with a mask.
pub fn redact(message: &str, secret: Option<&str>) -> String {
    match secret {
        Some(secret) if !secret.is_empty() => message.replace(secret, "****"),
        _ => message.to_string(),
    }
}

/// Result type alias using BridgeError.
pub type Result<T> = std::result::Result<T, BridgeError>;
