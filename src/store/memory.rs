//! In-memory window store.

use async_trait::async_trait;
use dashmap::DashMap;

use super::{StoreError, WindowStore};
use crate::ratelimit::RateWindow;

/// Windows held in a concurrent map for the life of the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    windows: DashMap<String, RateWindow>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys with a stored window.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Drop every stored window.
    pub fn clear(&self) {
        self.windows.clear();
    }
}

#[async_trait]
impl WindowStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<RateWindow>, StoreError> {
        Ok(self.windows.get(key).map(|w| *w))
    }

    async fn put(&self, key: &str, window: &RateWindow) -> Result<(), StoreError> {
        self.windows.insert(key.to_string(), *window);
        Ok(())
    }
}
