use std::path::Path;

use poly_query::QueryConfig;
use poly_sync::SyncConfig;
use serde::{Deserialize, Serialize};

use crate::error::{SdkError, SdkResult};

/// Top-level engine configuration, usually read from `poly.toml`.
///
/// ```toml
/// schema_version = 1
///
/// [sync]
/// default_servers = ["https://relay.example"]
/// batch_size = 64
///
/// [query]
/// channel_capacity = 256
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Version of the on-disk layout; one store exists per identity and
    /// version.
    pub schema_version: u32,
    pub sync: SyncConfig,
    pub query: QueryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            schema_version: 1,
            sync: SyncConfig::default(),
            query: QueryConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(text: &str) -> SdkResult<Self> {
        toml::from_str(text).map_err(|e| SdkError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> SdkResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| SdkError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> SdkResult<String> {
        toml::to_string_pretty(self).map_err(|e| SdkError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_sections_override_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            schema_version = 3

            [sync]
            default_servers = ["https://relay.example"]

            [query]
            channel_capacity = 8
            "#,
        )
        .unwrap();
        assert_eq!(config.schema_version, 3);
        assert_eq!(config.sync.default_servers, vec!["https://relay.example"]);
        assert_eq!(config.sync.batch_size, SyncConfig::default().batch_size);
        assert_eq!(config.query.channel_capacity, 8);
    }

    #[test]
    fn written_config_reads_back() {
        let config = EngineConfig::default();
        let text = config.to_toml_string().unwrap();
        assert_eq!(EngineConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn malformed_toml_is_config_error() {
        let err = EngineConfig::from_toml_str("schema_version = \"one\"").unwrap_err();
        assert!(matches!(err, SdkError::Config(_)));
    }
}
