use serde::{Deserialize, Serialize};

/// Tuning for [`crate::Synchronizer`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Relays used for identities that have not recorded their own.
    pub default_servers: Vec<String>,
    /// Most events requested or pushed per round trip.
    pub batch_size: u32,
    /// Upper bound on backfill rounds against one server.
    pub max_rounds: u32,
    pub request_timeout_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            default_servers: vec!["https://srv1-prod.polycentric.io".to_string()],
            batch_size: 64,
            max_rounds: 100,
            request_timeout_ms: 15_000,
        }
    }
}

impl SyncConfig {
    /// Configuration with no fallback servers.
    pub fn offline() -> Self {
        Self {
            default_servers: Vec::new(),
            ..Default::default()
        }
    }
}
