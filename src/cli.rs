//! Command-line argument parsing for dbbridge.

use std::io::{BufRead, Read};
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::error::{BridgeError, Result};
use crate::store::SchemaVersion;

/// Run ad-hoc SQL against the connections saved in DBeaver.
#[derive(Parser, Debug)]
#[command(name = "dbbridge")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// DBeaver workspace root (skips the well-known locations)
    #[arg(long, global = true, value_name = "PATH", env = "DBBRIDGE_STORE_PATH")]
    pub store: Option<PathBuf>,

    /// Layout of the store at --store: legacy or modern
    #[arg(long, global = true, value_name = "SCHEMA", value_parser = parse_schema)]
    pub schema: Option<SchemaVersion>,

    /// Config file path
    #[arg(long, global = true, value_name = "PATH", env = "DBBRIDGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// More log output on stderr (repeatable)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// List saved connections (passwords are never shown)
    List,

    /// Show one connection
    Show {
        /// Connection id
        id: String,
    },

    /// Classify a statement without running it
    Classify {
        /// SQL text, or "-" to read it from stdin
        sql: String,
    },

    /// Run a statement against a saved connection
    Exec {
        /// Connection id
        id: String,

        /// SQL text, or "-" to read it from stdin
        sql: String,

        /// Allow schema-changing and destructive statements
        #[arg(long)]
        confirm: bool,

        /// Seconds before the query is abandoned
        #[arg(long, value_name = "SECS", env = "DBBRIDGE_TIMEOUT_SECS")]
        timeout: Option<u64>,

        /// Maximum rows to return
        #[arg(long, value_name = "N")]
        max_rows: Option<usize>,
    },

    /// Re-read the store and report what was loaded
    Reload,

    /// Save a connection's password in the OS keyring (read from stdin)
    SetPassword {
        /// Connection id
        id: String,
    },
}

fn parse_schema(s: &str) -> std::result::Result<SchemaVersion, String> {
    SchemaVersion::parse(s).ok_or_else(|| format!("Invalid schema: {s}. Expected: legacy or modern"))
}

impl Cli {
    /// Parses command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Returns the config file path to use.
    ///
    /// Uses the --config argument if provided, otherwise the default path.
    pub fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(Config::default_path)
    }

    /// Applies command-line overrides on top of the file configuration.
    pub fn apply(&self, config: &mut Config) -> Result<()> {
        if let Some(store) = &self.store {
            config.store.path = Some(store.clone());
            config.store.schema = self.schema;
        } else if self.schema.is_some() {
            config.store.schema = self.schema;
        }

        if let Command::Exec {
            timeout, max_rows, ..
        } = &self.command
        {
            if let Some(timeout) = timeout {
                config.execution.timeout_secs = *timeout;
            }
            if let Some(max_rows) = max_rows {
                config.execution.max_rows = *max_rows;
            }
        }

        config.validate()
    }
}

/// Returns `arg`, or everything on stdin when `arg` is `-`.
pub fn read_sql_arg(arg: &str) -> Result<String> {
    if arg != "-" {
        return Ok(arg.to_string());
    }
    let mut sql = String::new();
    std::io::stdin()
        .read_to_string(&mut sql)
        .map_err(|e| BridgeError::config(format!("Failed to read SQL from stdin: {e}")))?;
    Ok(sql)
}

/// Reads one password line, without its line ending.
pub fn read_password<R: BufRead>(mut reader: R) -> Result<String> {
    let mut line = String::new();
    reader
        .read_line(&mut line)
        .map_err(|e| BridgeError::config(format!("Failed to read password: {e}")))?;
    let password = line.trim_end_matches(['\r', '\n']);
    if password.is_empty() {
        return Err(BridgeError::config("No password given on stdin"));
    }
    Ok(password.to_string())
}
