//! The relay-server list recorded in an identity's state.
//!
//! Servers live in the LWW item of content type [`ContentType::SERVER`]; its
//! value is a bincode-encoded `Vec<String>` of base URLs.

use poly_types::{ContentType, SystemState};

use crate::error::{LogError, LogResult};

pub fn encode_servers(servers: &[String]) -> LogResult<Vec<u8>> {
    bincode::serialize(servers).map_err(|e| LogError::Encode(e.to_string()))
}

pub fn decode_servers(bytes: &[u8]) -> LogResult<Vec<String>> {
    bincode::deserialize(bytes).map_err(|e| LogError::Decode(e.to_string()))
}

/// The servers recorded in `state`; empty when none are recorded.
pub fn servers_of(state: &SystemState) -> LogResult<Vec<String>> {
    match state.crdt_item(ContentType::SERVER) {
        Some(item) => decode_servers(&item.value),
        None => Ok(Vec::new()),
    }
}
