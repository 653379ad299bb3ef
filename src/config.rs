// Configuration for a synchronized store

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Suffix of the storage key holding a persisted peer id
pub const SYNC_ID_SUFFIX: &str = "_sync_id";

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Storage key cannot be empty")]
    EmptyStorageKey,

    #[error("Command buffer must hold at least one command")]
    ZeroCommandBuffer,
}

/// Where the local peer id comes from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityMode {
    /// Use the document's own id
    FromDocument,
    /// Generate once and keep it under `<key>_sync_id`
    Persisted,
}

/// Configuration for a [`PeerSyncManager`](crate::sync::PeerSyncManager)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Storage key of the document
    pub storage_key: String,
    /// How the local peer id is chosen
    pub identity: IdentityMode,
    /// Capacity of the command channel of a spawned manager
    pub command_buffer: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            storage_key: "todos".to_string(),
            identity: IdentityMode::Persisted,
            command_buffer: 64,
        }
    }
}

impl SyncConfig {
    /// Create a new config builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the storage key
    pub fn with_storage_key(mut self, key: &str) -> Self {
        self.storage_key = key.to_string();
        self
    }

    /// Set the identity mode
    pub fn with_identity(mut self, identity: IdentityMode) -> Self {
        self.identity = identity;
        self
    }

    /// Set the command buffer capacity
    pub fn with_command_buffer(mut self, capacity: usize) -> Self {
        self.command_buffer = capacity;
        self
    }

    /// Storage key of the persisted peer id
    pub fn sync_id_key(&self) -> String {
        format!("{}{}", self.storage_key, SYNC_ID_SUFFIX)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage_key.is_empty() {
            return Err(ConfigError::EmptyStorageKey);
        }
        if self.command_buffer == 0 {
            return Err(ConfigError::ZeroCommandBuffer);
        }
        Ok(())
    }
}
