use serde::{Deserialize, Serialize};

use crate::content_type::ContentType;
use crate::error::{TypeError, TypeResult};
use crate::identity::Process;

/// Current winning LWW value for one content type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrdtItem {
    pub content_type: ContentType,
    pub value: Vec<u8>,
    pub unix_milliseconds: u64,
}

/// Derived per-identity state.
///
/// `crdt_items` holds at most one entry per content type, sorted by content
/// type; `processes` is an append-only set with membership by structural
/// equality, kept in first-seen order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemState {
    pub crdt_items: Vec<CrdtItem>,
    pub processes: Vec<Process>,
}

impl SystemState {
    pub fn crdt_item(&self, content_type: ContentType) -> Option<&CrdtItem> {
        self.crdt_items
            .binary_search_by_key(&content_type, |item| item.content_type)
            .ok()
            .map(|pos| &self.crdt_items[pos])
    }

    pub fn has_process(&self, process: &Process) -> bool {
        self.processes.contains(process)
    }

    pub fn encode(&self) -> TypeResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| TypeError::Encode(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> TypeResult<Self> {
        bincode::deserialize(bytes).map_err(|e| TypeError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_content_type() {
        let state = SystemState {
            crdt_items: vec![CrdtItem {
                content_type: ContentType::USERNAME,
                value: b"alice".to_vec(),
                unix_milliseconds: 100,
            }],
            processes: vec![Process::from_bytes([1; 16])],
        };
        assert_eq!(
            state.crdt_item(ContentType::USERNAME).map(|i| i.value.as_slice()),
            Some(&b"alice"[..])
        );
        assert!(state.crdt_item(ContentType::DESCRIPTION).is_none());
        assert!(state.has_process(&Process::from_bytes([1; 16])));
        assert!(!state.has_process(&Process::from_bytes([2; 16])));
    }

    #[test]
    fn json_roundtrip() {
        let state = SystemState::default();
        let json = serde_json::to_string(&state).unwrap();
        let parsed: SystemState = serde_json::from_str(&json).unwrap();
        assert_eq!(state, parsed);
    }
}
