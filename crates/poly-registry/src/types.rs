use poly_types::PublicKey;
use serde::{Deserialize, Serialize};

use crate::error::{RegistryError, RegistryResult};

/// One known store: the identity it belongs to, its schema version, and
/// whether first sync / setup completed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreInfo {
    pub system: PublicKey,
    pub version: u32,
    pub ready: bool,
}

impl StoreInfo {
    pub fn new(system: PublicKey, version: u32) -> Self {
        Self {
            system,
            version,
            ready: false,
        }
    }

    pub fn matches(&self, system: &PublicKey, version: u32) -> bool {
        self.system == *system && self.version == version
    }

    pub(crate) fn encode(&self) -> RegistryResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| RegistryError::Serialization(e.to_string()))
    }

    pub(crate) fn decode(bytes: &[u8]) -> RegistryResult<Self> {
        bincode::deserialize(bytes).map_err(|e| RegistryError::Corrupt(e.to_string()))
    }
}
