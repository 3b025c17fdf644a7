//! Query safety classification module.
//!
//! Looks at the leading keyword of a query and classifies it as a read,
//! a data mutation, a schema change or a destructive statement to decide
//! whether explicit confirmation is required before execution.

mod classifier;

pub use classifier::{classify_sql, SqlClassifier};

use serde::Serialize;
use std::fmt;

/// Safety class of a SQL statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SafetyClass {
    /// Read-only queries (SELECT, EXPLAIN, SHOW, WITH).
    SafeRead,
    /// Data modification (INSERT, UPDATE).
    Mutating,
    /// Schema changes (CREATE, ALTER).
    SchemaChange,
    /// Data loss (DROP, TRUNCATE, DELETE) and anything unrecognized.
    Destructive,
}

impl SafetyClass {
    /// Returns true if statements of this class must be confirmed before running.
    pub fn requires_confirmation(&self) -> bool {
        matches!(self, Self::SchemaChange | Self::Destructive)
    }

    /// Returns true if statements of this class only read data.
    pub fn is_read_only(&self) -> bool {
        matches!(self, Self::SafeRead)
    }
}

impl fmt::Display for SafetyClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SafeRead => write!(f, "safe-read"),
            Self::Mutating => write!(f, "mutating"),
            Self::SchemaChange => write!(f, "schema-change"),
            Self::Destructive => write!(f, "destructive"),
        }
    }
}

/// Verdict produced by the classifier for one query string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SafetyVerdict {
    /// The determined safety class.
    pub class: SafetyClass,
    /// Whether the caller must pass `confirmed = true` to run the query.
    pub requires_confirmation: bool,
    /// The leading keyword, upper-cased, if one was found.
    pub keyword: Option<String>,
    /// Optional note for the user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl SafetyVerdict {
    /// Creates a verdict for a recognized leading keyword.
    pub fn new(class: SafetyClass, keyword: impl Into<String>) -> Self {
        Self {
            class,
            requires_confirmation: class.requires_confirmation(),
            keyword: Some(keyword.into()),
            warning: None,
        }
    }

    /// Creates a conservative verdict for a query the classifier cannot read.
    pub fn unrecognized(keyword: Option<String>, warning: impl Into<String>) -> Self {
        Self {
            class: SafetyClass::Destructive,
            requires_confirmation: true,
            keyword,
            warning: Some(warning.into()),
        }
    }

    /// Returns the keyword for display, or a placeholder.
    pub fn keyword_or_unknown(&self) -> &str {
        self.keyword.as_deref().unwrap_or("UNKNOWN")
    }
}
