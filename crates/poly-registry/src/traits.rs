//! The [`MetaStore`] trait defining the store-registry interface.

use std::sync::Arc;

use async_trait::async_trait;
use poly_store::KeyValueStore;
use poly_types::PublicKey;

use crate::error::RegistryResult;
use crate::types::StoreInfo;

/// Registry mapping `(identity, schema version)` to an opened store.
///
/// Invariants every implementation upholds:
///
/// - `list_stores` never returns a deleted store, even when the delete races
///   with the listing.
/// - At most one store is active. Setting a new one silently replaces the
///   previous one.
/// - The ready flag is independent of the active flag; both start unset.
#[async_trait]
pub trait MetaStore: Send + Sync {
    /// Open the store for `(system, version)`, registering it on first use.
    async fn open_store(
        &self,
        system: &PublicKey,
        version: u32,
    ) -> RegistryResult<Arc<dyn KeyValueStore>>;

    /// Destroy the store's data and forget it. Clears the active store if it
    /// was this one.
    async fn delete_store(&self, system: &PublicKey, version: u32) -> RegistryResult<()>;

    async fn set_active_store(&self, system: &PublicKey, version: u32) -> RegistryResult<()>;

    async fn get_active_store(&self) -> RegistryResult<Option<StoreInfo>>;

    async fn unset_active_store(&self) -> RegistryResult<()>;

    /// Flag that setup / first sync finished for `(system, version)`.
    async fn set_store_ready(&self, system: &PublicKey, version: u32) -> RegistryResult<()>;

    async fn list_stores(&self) -> RegistryResult<Vec<StoreInfo>>;
}
