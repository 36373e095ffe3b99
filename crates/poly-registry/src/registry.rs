//! Driver-backed [`MetaStore`] implementation.
//!
//! Registry state lives in its own driver store named [`META_STORE_NAME`],
//! split into two sublevels:
//!
//! - `stores` -- one [`StoreInfo`] row per `(system, version)`, keyed by the
//!   system bytes followed by the big-endian version
//! - `active` -- a single `active` key holding the active store's
//!   [`StoreInfo`], absent when no store is active
//!
//! Every read-modify-write sequence runs under one async mutex, and every
//! logical change commits as a single batch, so readers never observe a
//! row deleted while the active record still names it.

use std::sync::Arc;

use async_trait::async_trait;
use poly_store::{Batch, IterOptions, KeyValueStore, StorageDriver, Sublevel};
use poly_types::PublicKey;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

use crate::error::{RegistryError, RegistryResult};
use crate::names::store_name;
use crate::traits::MetaStore;
use crate::types::StoreInfo;

/// Driver-level name of the store holding registry state.
pub const META_STORE_NAME: &str = "meta";

const ACTIVE_KEY: &[u8] = b"active";

struct MetaLevels {
    store: Arc<dyn KeyValueStore>,
    stores: Sublevel,
    active: Sublevel,
}

/// Registry of identity stores, persisted through a [`StorageDriver`].
pub struct StoreRegistry {
    driver: Arc<dyn StorageDriver>,
    meta: OnceCell<MetaLevels>,
    writes: Mutex<()>,
}

impl StoreRegistry {
    /// Create a registry over `driver`. The meta store is opened lazily on
    /// first use.
    pub fn new(driver: Arc<dyn StorageDriver>) -> Self {
        Self {
            driver,
            meta: OnceCell::new(),
            writes: Mutex::new(()),
        }
    }

    pub fn driver(&self) -> &Arc<dyn StorageDriver> {
        &self.driver
    }

    async fn meta(&self) -> RegistryResult<&MetaLevels> {
        self.meta
            .get_or_try_init(|| async {
                let store = self.driver.open_store(META_STORE_NAME).await?;
                debug!(
                    driver = self.driver.implementation_name(),
                    "registry meta store opened"
                );
                Ok::<_, RegistryError>(MetaLevels {
                    stores: Sublevel::new(Arc::clone(&store), "stores"),
                    active: Sublevel::new(Arc::clone(&store), "active"),
                    store,
                })
            })
            .await
    }

    async fn load_row(
        &self,
        meta: &MetaLevels,
        system: &PublicKey,
        version: u32,
    ) -> RegistryResult<Option<StoreInfo>> {
        match meta.stores.try_load(&row_key(system, version)).await? {
            Some(bytes) => Ok(Some(StoreInfo::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn load_active(&self, meta: &MetaLevels) -> RegistryResult<Option<StoreInfo>> {
        match meta.active.try_load(ACTIVE_KEY).await? {
            Some(bytes) => Ok(Some(StoreInfo::decode(&bytes)?)),
            None => Ok(None),
        }
    }
}

fn row_key(system: &PublicKey, version: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(36);
    key.extend_from_slice(system.as_bytes());
    key.extend_from_slice(&version.to_be_bytes());
    key
}

#[async_trait]
impl MetaStore for StoreRegistry {
    async fn open_store(
        &self,
        system: &PublicKey,
        version: u32,
    ) -> RegistryResult<Arc<dyn KeyValueStore>> {
        let meta = self.meta().await?;
        // Held through the driver open so a concurrent delete cannot leave a
        // live store without its row.
        let _guard = self.writes.lock().await;
        if self.load_row(meta, system, version).await?.is_none() {
            let info = StoreInfo::new(*system, version);
            let mut batch = Batch::new();
            batch.put(&meta.stores, &row_key(system, version), info.encode()?);
            batch.commit(meta.store.as_ref()).await?;
            info!(system = %system, version, "registered store");
        }
        Ok(self.driver.open_store(&store_name(system, version)).await?)
    }

    async fn delete_store(&self, system: &PublicKey, version: u32) -> RegistryResult<()> {
        let meta = self.meta().await?;
        let _guard = self.writes.lock().await;

        let mut batch = Batch::new();
        batch.del(&meta.stores, &row_key(system, version));
        if let Some(active) = self.load_active(meta).await? {
            if active.matches(system, version) {
                batch.del(&meta.active, ACTIVE_KEY);
                debug!(system = %system, version, "clearing active store on delete");
            }
        }
        batch.commit(meta.store.as_ref()).await?;

        self.driver
            .destroy_store(&store_name(system, version))
            .await?;
        info!(system = %system, version, "deleted store");
        Ok(())
    }

    async fn set_active_store(&self, system: &PublicKey, version: u32) -> RegistryResult<()> {
        let meta = self.meta().await?;
        let _guard = self.writes.lock().await;

        let info = match self.load_row(meta, system, version).await? {
            Some(row) => row,
            None => {
                warn!(system = %system, version, "activating a store that was never opened");
                StoreInfo::new(*system, version)
            }
        };
        let mut batch = Batch::new();
        batch.put(&meta.active, ACTIVE_KEY, info.encode()?);
        batch.commit(meta.store.as_ref()).await?;
        debug!(system = %system, version, "active store set");
        Ok(())
    }

    async fn get_active_store(&self) -> RegistryResult<Option<StoreInfo>> {
        let meta = self.meta().await?;
        self.load_active(meta).await
    }

    async fn unset_active_store(&self) -> RegistryResult<()> {
        let meta = self.meta().await?;
        let _guard = self.writes.lock().await;
        let mut batch = Batch::new();
        batch.del(&meta.active, ACTIVE_KEY);
        batch.commit(meta.store.as_ref()).await?;
        Ok(())
    }

    async fn set_store_ready(&self, system: &PublicKey, version: u32) -> RegistryResult<()> {
        let meta = self.meta().await?;
        let _guard = self.writes.lock().await;

        let mut batch = Batch::new();
        if let Some(mut row) = self.load_row(meta, system, version).await? {
            row.ready = true;
            batch.put(&meta.stores, &row_key(system, version), row.encode()?);
        }
        if let Some(mut active) = self.load_active(meta).await? {
            if active.matches(system, version) {
                active.ready = true;
                batch.put(&meta.active, ACTIVE_KEY, active.encode()?);
            }
        }
        if batch.is_empty() {
            warn!(system = %system, version, "set_store_ready on unknown store ignored");
            return Ok(());
        }
        batch.commit(meta.store.as_ref()).await?;
        Ok(())
    }

    async fn list_stores(&self) -> RegistryResult<Vec<StoreInfo>> {
        let meta = self.meta().await?;
        meta.stores
            .range(&IterOptions::default())
            .await?
            .iter()
            .map(|(_, value)| StoreInfo::decode(value))
            .collect()
    }
}

impl std::fmt::Debug for StoreRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreRegistry")
            .field("driver", &self.driver.implementation_name())
            .finish()
    }
}
