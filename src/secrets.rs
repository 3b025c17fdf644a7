//! Password fallback for connections saved without one.
//!
//! DBeaver may keep a connection's password out of its own store. The
//! [`KeyringResolver`] looks such passwords up in the OS keyring instead.

use keyring::Entry;
use tracing::{debug, warn};

use crate::error::{BridgeError, Result};
use crate::store::{ConnectionModel, Password};

const SERVICE_NAME: &str = "dbeaver-bridge";

/// Supplies a password for a connection that has none saved.
pub trait CredentialResolver: Send + Sync {
    /// Returns the password for `connection`, or `None` if there is none.
    fn resolve(&self, connection: &ConnectionModel) -> Result<Option<Password>>;
}

/// Resolver that never finds a password.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCredentials;

impl CredentialResolver for NoCredentials {
    fn resolve(&self, _connection: &ConnectionModel) -> Result<Option<Password>> {
        Ok(None)
    }
}

/// Looks passwords up in the OS keyring under `conn:<id>`.
#[derive(Debug, Clone)]
pub struct KeyringResolver {
    service: String,
}

impl Default for KeyringResolver {
    fn default() -> Self {
        Self::new(SERVICE_NAME)
    }
}

impl KeyringResolver {
    /// Creates a resolver reading entries of the given keyring service.
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    /// Keyring user name for a connection password.
    pub fn connection_password_key(connection_id: &str) -> String {
        format!("conn:{connection_id}")
    }

    /// Saves the password for a connection id, replacing any earlier one.
    pub fn store(&self, connection_id: &str, secret: &str) -> Result<()> {
        let entry = self.entry(connection_id)?;
        entry
            .set_password(secret)
            .map_err(|e| BridgeError::internal(format!("Failed to store secret: {e}")))
    }

    fn entry(&self, connection_id: &str) -> Result<Entry> {
        Entry::new(&self.service, &Self::connection_password_key(connection_id))
            .map_err(|e| BridgeError::internal(format!("Failed to access keyring: {e}")))
    }
}

impl CredentialResolver for KeyringResolver {
    fn resolve(&self, connection: &ConnectionModel) -> Result<Option<Password>> {
        let entry = self.entry(&connection.id)?;
        match entry.get_password() {
            Ok(secret) => {
                debug!("Using keyring password for connection '{}'", connection.id);
                Ok(Some(Password::new(secret)))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => {
                // An unusable keyring is the same as no saved password.
                warn!("Keyring lookup failed for connection '{}': {e}", connection.id);
                Ok(None)
            }
        }
    }
}
