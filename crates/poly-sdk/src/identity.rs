//! The signing identity persisted inside its own store.

use std::sync::Arc;

use poly_crypto::SigningKey;
use poly_store::{KeyValueStore, Sublevel};
use poly_types::Process;
use serde::{Deserialize, Serialize};

use crate::error::{SdkError, SdkResult};

const LOCAL: &str = "local";
const IDENTITY_KEY: &[u8] = b"identity";

/// Secret key and authoring process of the identity a store belongs to.
#[derive(Clone, Serialize, Deserialize)]
pub struct LocalIdentity {
    secret: [u8; 32],
    pub process: Process,
}

impl LocalIdentity {
    /// A fresh process for `key` on this device.
    pub fn new(key: &SigningKey) -> Self {
        Self {
            secret: *key.as_bytes(),
            process: Process::random(),
        }
    }

    pub fn signing_key(&self) -> SigningKey {
        SigningKey::from_bytes(self.secret)
    }

    pub async fn load(store: &Arc<dyn KeyValueStore>) -> SdkResult<Option<Self>> {
        let level = Sublevel::new(Arc::clone(store), LOCAL);
        match level.try_load(IDENTITY_KEY).await? {
            Some(bytes) => bincode::deserialize(&bytes)
                .map(Some)
                .map_err(|e| SdkError::Internal(format!("local identity: {e}"))),
            None => Ok(None),
        }
    }

    pub async fn save(&self, store: &Arc<dyn KeyValueStore>) -> SdkResult<()> {
        let level = Sublevel::new(Arc::clone(store), LOCAL);
        let bytes =
            bincode::serialize(self).map_err(|e| SdkError::Internal(format!("local identity: {e}")))?;
        store.batch(vec![level.put_op(IDENTITY_KEY, bytes)]).await?;
        Ok(())
    }
}

impl std::fmt::Debug for LocalIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalIdentity")
            .field("system", &self.signing_key().system())
            .field("process", &self.process)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use poly_store::InMemoryKeyValueStore;

    use super::*;

    #[tokio::test]
    async fn saved_identity_loads_back() {
        let store: Arc<dyn KeyValueStore> = Arc::new(InMemoryKeyValueStore::new("id"));
        assert!(LocalIdentity::load(&store).await.unwrap().is_none());

        let key = SigningKey::generate();
        let identity = LocalIdentity::new(&key);
        identity.save(&store).await.unwrap();

        let loaded = LocalIdentity::load(&store).await.unwrap().unwrap();
        assert_eq!(loaded.signing_key().system(), key.system());
        assert_eq!(loaded.process, identity.process);
    }
}
