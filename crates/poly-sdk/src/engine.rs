use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use poly_crypto::SigningKey;
use poly_log::EventLog;
use poly_registry::{MetaStore, StoreInfo, StoreRegistry};
use poly_store::{InMemoryStorageDriver, KeyValueStore, StorageDriver};
use poly_sync::{Connector, HttpConnector};
use poly_types::PublicKey;
use tracing::info;

use crate::config::EngineConfig;
use crate::error::{SdkError, SdkResult};
use crate::identity::LocalIdentity;
use crate::session::Session;

/// Entry point of the SDK: the store registry plus the relay connector
/// every session syncs through.
///
/// Sessions opened for the same identity share one [`EventLog`], so their
/// writes are serialized against each other.
pub struct Engine {
    registry: Arc<StoreRegistry>,
    connector: Arc<dyn Connector>,
    config: EngineConfig,
    logs: Mutex<HashMap<PublicKey, Weak<EventLog>>>,
}

impl Engine {
    pub fn new(
        driver: Arc<dyn StorageDriver>,
        connector: Arc<dyn Connector>,
        config: EngineConfig,
    ) -> Self {
        Self {
            registry: Arc::new(StoreRegistry::new(driver)),
            connector,
            config,
            logs: Mutex::new(HashMap::new()),
        }
    }

    /// Volatile engine talking to real relays over HTTP.
    pub fn in_memory(config: EngineConfig) -> SdkResult<Self> {
        let connector = HttpConnector::new(&config.sync)?;
        Ok(Self::new(
            Arc::new(InMemoryStorageDriver::new()),
            Arc::new(connector),
            config,
        ))
    }

    pub fn registry(&self) -> &Arc<StoreRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Mint a new identity, persist it in its own store and make it active.
    pub async fn create_identity(&self) -> SdkResult<Session> {
        self.import_identity(SigningKey::generate()).await
    }

    /// Register an existing key on this device under a fresh process.
    ///
    /// Importing a key that already has a store here reuses the stored
    /// process instead of minting another.
    pub async fn import_identity(&self, key: SigningKey) -> SdkResult<Session> {
        let system = key.system();
        let version = self.config.schema_version;
        let store = self.registry.open_store(&system, version).await?;
        let identity = match LocalIdentity::load(&store).await? {
            Some(existing) => existing,
            None => {
                let fresh = LocalIdentity::new(&key);
                fresh.save(&store).await?;
                info!(%system, process = %fresh.process, "created local identity");
                fresh
            }
        };
        self.registry.set_active_store(&system, version).await?;
        Ok(self.session(&system, identity, store))
    }

    /// Open the session of a local identity without changing the active one.
    pub async fn open(&self, system: &PublicKey) -> SdkResult<Session> {
        let version = self.config.schema_version;
        if !self.is_registered(system).await? {
            return Err(SdkError::UnknownIdentity(*system));
        }
        let store = self.registry.open_store(system, version).await?;
        let identity = LocalIdentity::load(&store)
            .await?
            .ok_or(SdkError::UnknownIdentity(*system))?;
        Ok(self.session(system, identity, store))
    }

    pub async fn activate(&self, system: &PublicKey) -> SdkResult<Session> {
        let session = self.open(system).await?;
        self.registry
            .set_active_store(system, self.config.schema_version)
            .await?;
        Ok(session)
    }

    /// Session of the active identity, if one is set.
    pub async fn active(&self) -> SdkResult<Option<Session>> {
        match self.registry.get_active_store().await? {
            Some(info) if info.version == self.config.schema_version => {
                self.open(&info.system).await.map(Some)
            }
            _ => Ok(None),
        }
    }

    /// Local identities at the current schema version.
    pub async fn list_identities(&self) -> SdkResult<Vec<StoreInfo>> {
        let version = self.config.schema_version;
        let mut stores = self.registry.list_stores().await?;
        stores.retain(|info| info.version == version);
        Ok(stores)
    }

    /// Destroy an identity's store and everything synced into it.
    pub async fn delete_identity(&self, system: &PublicKey) -> SdkResult<()> {
        self.lock_logs().remove(system);
        self.registry
            .delete_store(system, self.config.schema_version)
            .await?;
        info!(%system, "deleted local identity");
        Ok(())
    }

    async fn is_registered(&self, system: &PublicKey) -> SdkResult<bool> {
        Ok(self
            .list_identities()
            .await?
            .iter()
            .any(|info| info.system == *system))
    }

    fn lock_logs(&self) -> std::sync::MutexGuard<'_, HashMap<PublicKey, Weak<EventLog>>> {
        self.logs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The log of `system`'s store, shared with every live session on it.
    fn shared_log(&self, system: &PublicKey, store: Arc<dyn KeyValueStore>) -> Arc<EventLog> {
        let mut logs = self.lock_logs();
        if let Some(log) = logs.get(system).and_then(Weak::upgrade) {
            return log;
        }
        let log = Arc::new(EventLog::new(store));
        logs.insert(*system, Arc::downgrade(&log));
        log
    }

    fn session(
        &self,
        system: &PublicKey,
        identity: LocalIdentity,
        store: Arc<dyn KeyValueStore>,
    ) -> Session {
        Session::new(
            identity,
            self.shared_log(system, store),
            Arc::clone(&self.registry),
            Arc::clone(&self.connector),
            &self.config,
        )
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("schema_version", &self.config.schema_version)
            .finish_non_exhaustive()
    }
}
