//! File-backed window store.
//!
//! Layout: one file per key in a shared directory, named by appending the
//! encoded key to a fixed prefix, holding `{"t": <start>, "c": <count>}`.
//! Keys whose encoded name would be too long for the filesystem are stored
//! under `~<sha256 hex>` instead. Records are written to a unique temp file
//! and renamed into place.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::trace;

use super::{StoreError, WindowStore};
use crate::ratelimit::{encode_file_component, RateWindow, RECORD_VERSION};

/// Longest `prefix + encoded key` used verbatim as a file name.
///
/// Leaves room for the temp-file decoration under the usual 255-byte
/// NAME_MAX.
pub const MAX_FILE_NAME_LEN: usize = 200;

/// Window store keeping one JSON file per key.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
    prefix: String,
}

impl FileStore {
    /// Create a store writing `<dir>/<prefix><key>` files.
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the record for `key`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}{}", self.prefix, self.file_component(key)))
    }

    /// File name component for `key`.
    ///
    /// `~` never appears in an encoded key, so digested names cannot
    /// collide with verbatim ones.
    fn file_component(&self, key: &str) -> String {
        let encoded = encode_file_component(key);
        if self.prefix.len() + encoded.len() <= MAX_FILE_NAME_LEN {
            return encoded;
        }
        format!("~{:x}", Sha256::digest(key.as_bytes()))
    }

    fn decode(key: &str, bytes: &[u8]) -> Result<RateWindow, StoreError> {
        let window: RateWindow = serde_json::from_slice(bytes)
            .map_err(|e| StoreError::malformed(key, e.to_string()))?;

        if window.version != RECORD_VERSION {
            return Err(StoreError::malformed(
                key,
                format!("unsupported record version {}", window.version),
            ));
        }

        Ok(window)
    }
}

#[async_trait]
impl WindowStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<RateWindow>, StoreError> {
        let path = self.path_for(key);

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(key, e)),
        };

        trace!(key = %key, path = %path.display(), "Read window record");
        Self::decode(key, &bytes).map(Some)
    }

    async fn put(&self, key: &str, window: &RateWindow) -> Result<(), StoreError> {
        let path = self.path_for(key);
        let bytes = serde_json::to_vec(window).map_err(|source| StoreError::Encode {
            key: key.to_string(),
            source,
        })?;

        let temp_path = self.dir.join(format!(
            ".{}{}.{}.tmp",
            self.prefix,
            self.file_component(key),
            uuid::Uuid::new_v4().simple()
        ));

        if let Err(e) = tokio::fs::write(&temp_path, &bytes).await {
            return Err(StoreError::io(key, e));
        }

        if let Err(e) = tokio::fs::rename(&temp_path, &path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(StoreError::io(key, e));
        }

        trace!(key = %key, path = %path.display(), "Wrote window record");
        Ok(())
    }
}
