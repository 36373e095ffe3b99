use serde::{Deserialize, Serialize};

use crate::content_type::ContentType;
use crate::error::{TypeError, TypeResult};
use crate::identity::{Process, PublicKey};
use crate::pointer::Pointer;

/// A last-writer-wins payload attached to an event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LwwElement {
    pub value: Vec<u8>,
    pub unix_milliseconds: u64,
}

impl LwwElement {
    pub fn new(value: impl Into<Vec<u8>>, unix_milliseconds: u64) -> Self {
        Self {
            value: value.into(),
            unix_milliseconds,
        }
    }
}

/// Position of the author's latest event of `index_type` at authoring time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    pub index_type: ContentType,
    pub logical_clock: u64,
}

/// An immutable record appended to a process's log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub system: PublicKey,
    pub process: Process,
    pub logical_clock: u64,
    pub content_type: ContentType,
    pub content: Vec<u8>,
    pub lww_element: Option<LwwElement>,
    pub indices: Vec<Index>,
}

impl Event {
    /// The pointer naming this event.
    pub fn pointer(&self) -> Pointer {
        Pointer::new(self.system, self.process, self.logical_clock)
    }

    /// Canonical binary encoding; this is the byte string that gets signed.
    pub fn encode(&self) -> TypeResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| TypeError::Encode(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> TypeResult<Self> {
        bincode::deserialize(bytes).map_err(|e| TypeError::Decode(e.to_string()))
    }

    /// Decode the content of a [`ContentType::DELETE`] event.
    pub fn as_delete(&self) -> TypeResult<Option<Delete>> {
        if self.content_type != ContentType::DELETE {
            return Ok(None);
        }
        Delete::decode(&self.content).map(Some)
    }
}

/// The unit persisted and transmitted: an encoded [`Event`] plus the
/// author's signature over those exact bytes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedEvent {
    pub event: Vec<u8>,
    pub signature: Vec<u8>,
}

impl SignedEvent {
    pub fn new(event: Vec<u8>, signature: Vec<u8>) -> Self {
        Self { event, signature }
    }

    /// Decode the inner event without checking the signature.
    pub fn decode_event(&self) -> TypeResult<Event> {
        Event::decode(&self.event)
    }

    pub fn encode(&self) -> TypeResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| TypeError::Encode(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> TypeResult<Self> {
        bincode::deserialize(bytes).map_err(|e| TypeError::Decode(e.to_string()))
    }
}

/// Tombstone naming one earlier event of the same system.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delete {
    pub process: Process,
    pub logical_clock: u64,
    pub content_type: ContentType,
    pub indices: Vec<Index>,
    pub unix_milliseconds: Option<u64>,
}

impl Delete {
    /// Pointer to the deleted event, resolved against the deleting system.
    pub fn pointer(&self, system: PublicKey) -> Pointer {
        Pointer::new(system, self.process, self.logical_clock)
    }

    pub fn encode(&self) -> TypeResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| TypeError::Encode(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> TypeResult<Self> {
        bincode::deserialize(bytes).map_err(|e| TypeError::Decode(e.to_string()))
    }
}
