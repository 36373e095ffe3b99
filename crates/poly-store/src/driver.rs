use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::memory::InMemoryKeyValueStore;
use crate::traits::KeyValueStore;

/// Storage usage as reported by a driver. Either field may be unknown.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StorageEstimate {
    pub bytes_available: Option<u64>,
    pub bytes_used: Option<u64>,
}

/// Platform storage backend.
///
/// Implemented outside the engine (mobile, browser, desktop). The engine
/// depends only on this trait and on the [`KeyValueStore`] handles it opens.
#[async_trait]
pub trait StorageDriver: Send + Sync {
    /// Open (creating on first use) the store called `name`.
    ///
    /// Idempotent: opening the same name twice yields handles to the same
    /// data.
    async fn open_store(&self, name: &str) -> StoreResult<Arc<dyn KeyValueStore>>;

    /// Destroy the store called `name` and all of its data. Destroying an
    /// unknown store is a no-op.
    async fn destroy_store(&self, name: &str) -> StoreResult<()>;

    async fn estimate_storage(&self) -> StoreResult<StorageEstimate>;

    /// Whether the platform guarantees the data survives eviction.
    async fn persisted(&self) -> StoreResult<bool>;

    fn implementation_name(&self) -> &str;
}

/// Driver keeping every store in process memory.
#[derive(Default)]
pub struct InMemoryStorageDriver {
    stores: Mutex<HashMap<String, Arc<InMemoryKeyValueStore>>>,
}

impl InMemoryStorageDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of the stores currently open, sorted.
    pub fn store_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .stores
            .lock()
            .map(|stores| stores.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }
}

#[async_trait]
impl StorageDriver for InMemoryStorageDriver {
    async fn open_store(&self, name: &str) -> StoreResult<Arc<dyn KeyValueStore>> {
        let mut stores = self.stores.lock().map_err(|_| StoreError::LockPoisoned)?;
        let store: Arc<dyn KeyValueStore> = stores
            .entry(name.to_string())
            .or_insert_with(|| {
                info!(store = name, "creating in-memory store");
                Arc::new(InMemoryKeyValueStore::new(name))
            })
            .clone();
        Ok(store)
    }

    async fn destroy_store(&self, name: &str) -> StoreResult<()> {
        let removed = self
            .stores
            .lock()
            .map_err(|_| StoreError::LockPoisoned)?
            .remove(name);
        match removed {
            Some(store) => store.destroy(),
            None => {
                debug!(store = name, "destroy of unknown store ignored");
                Ok(())
            }
        }
    }

    async fn estimate_storage(&self) -> StoreResult<StorageEstimate> {
        let stores = self.stores.lock().map_err(|_| StoreError::LockPoisoned)?;
        let used = stores.values().map(|s| s.total_bytes()).sum();
        Ok(StorageEstimate {
            bytes_available: None,
            bytes_used: Some(used),
        })
    }

    async fn persisted(&self) -> StoreResult<bool> {
        Ok(false)
    }

    fn implementation_name(&self) -> &str {
        "memory"
    }
}

impl std::fmt::Debug for InMemoryStorageDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStorageDriver")
            .field("stores", &self.store_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_is_idempotent() {
        let driver = InMemoryStorageDriver::new();
        let a = driver.open_store("one").await.unwrap();
        a.put(b"k", b"v").await.unwrap();

        let b = driver.open_store("one").await.unwrap();
        assert_eq!(b.get(b"k").await.unwrap(), b"v");
        assert_eq!(driver.store_names(), vec!["one".to_string()]);
    }

    #[tokio::test]
    async fn destroy_then_reopen_is_empty() {
        let driver = InMemoryStorageDriver::new();
        let store = driver.open_store("s").await.unwrap();
        store.put(b"k", b"v").await.unwrap();

        driver.destroy_store("s").await.unwrap();
        assert!(matches!(store.get(b"k").await, Err(StoreError::Destroyed(_))));

        let reopened = driver.open_store("s").await.unwrap();
        assert_eq!(reopened.try_load(b"k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn destroy_unknown_is_noop() {
        let driver = InMemoryStorageDriver::new();
        driver.destroy_store("never-opened").await.unwrap();
    }

    #[tokio::test]
    async fn estimate_counts_bytes() {
        let driver = InMemoryStorageDriver::new();
        let store = driver.open_store("s").await.unwrap();
        store.put(b"ab", b"cde").await.unwrap();

        let estimate = driver.estimate_storage().await.unwrap();
        assert_eq!(estimate.bytes_used, Some(5));
        assert_eq!(estimate.bytes_available, None);
        assert!(!driver.persisted().await.unwrap());
        assert_eq!(driver.implementation_name(), "memory");
    }
}
