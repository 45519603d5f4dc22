//! Credential Store: key material that lets the transport resume a session
//! without pairing again.
//!
//! The gateway loads credentials once per connect attempt, saves them whenever
//! the transport rotates them, and clears them on reset. The payload is opaque
//! to everything but the transport.

pub mod file;
pub mod memory;

pub use {file::FileCredentialStore, memory::MemoryCredentialStore};

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Opaque transport credentials.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthState(serde_json::Value);

impl AuthState {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn into_value(self) -> serde_json::Value {
        self.0
    }
}

impl std::fmt::Debug for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AuthState([REDACTED])")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("credential I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode credentials: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl CredentialError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Durable storage for a single session's credentials.
pub trait CredentialStore: Send + Sync {
    /// `Ok(None)` means no prior session: the transport starts pairing.
    fn load(&self) -> Result<Option<AuthState>, CredentialError>;

    fn save(&self, state: &AuthState) -> Result<(), CredentialError>;

    /// Erase persisted credentials. Clearing an empty store succeeds.
    fn clear(&self) -> Result<(), CredentialError>;
}
