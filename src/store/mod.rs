//! Keyed persistence for rate windows.
//!
//! The limiter only needs `get` and `put`; anything offering per-key
//! isolation can back it. Two stores ship with the crate: [`FileStore`] keeps
//! one JSON record per key on disk, [`MemoryStore`] keeps windows in a
//! process-local map.

mod file;
mod memory;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::config::{StorageBackend, StorageConfig};
use crate::ratelimit::RateWindow;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Errors raised by window stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error for key {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed window record for key {key}: {reason}")]
    Malformed { key: String, reason: String },
    #[error("Failed to encode window for key {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    pub(crate) fn io(key: &str, source: std::io::Error) -> Self {
        StoreError::Io {
            key: key.to_string(),
            source,
        }
    }

    pub(crate) fn malformed(key: &str, reason: impl Into<String>) -> Self {
        StoreError::Malformed {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// Trait for window store implementations.
#[async_trait]
pub trait WindowStore: Send + Sync {
    /// Read the window for `key`; `Ok(None)` when nothing is stored.
    async fn get(&self, key: &str) -> Result<Option<RateWindow>, StoreError>;

    /// Replace the window for `key`.
    async fn put(&self, key: &str, window: &RateWindow) -> Result<(), StoreError>;
}

/// Build the store selected by configuration.
pub fn from_config(config: &StorageConfig) -> Arc<dyn WindowStore> {
    match config.backend {
        StorageBackend::File => Arc::new(FileStore::new(&config.dir, config.prefix.clone())),
        StorageBackend::Memory => Arc::new(MemoryStore::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_from_config_file_backend() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            backend: StorageBackend::File,
            dir: dir.path().to_path_buf(),
            prefix: "rl_".to_string(),
        };

        let store = from_config(&config);
        store.put("sess1", &RateWindow::open(1)).await.unwrap();
        assert!(dir.path().join("rl_sess1").exists());
    }

    #[tokio::test]
    async fn test_from_config_memory_backend() {
        let config = StorageConfig {
            backend: StorageBackend::Memory,
            ..StorageConfig::default()
        };

        let store = from_config(&config);
        store.put("sess1", &RateWindow::open(1)).await.unwrap();
        assert_eq!(store.get("sess1").await.unwrap(), Some(RateWindow::open(1)));
    }
}
