use serde::{Deserialize, Serialize};

/// Configuration for the [`crate::QueryManager`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Capacity of the arrivals broadcast channel.
    pub channel_capacity: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_is_default() {
        let config: QueryConfig = toml::from_str("").unwrap();
        assert_eq!(config, QueryConfig::default());
    }
}
