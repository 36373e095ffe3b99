//! Wire protocol spoken between engine clients and Polycentric relays.
//!
//! Relays are untrusted: everything they return is a
//! [`SignedEvent`](poly_types::SignedEvent) that the client verifies before
//! use. This crate
//! only defines the message shapes and their binary encoding.
//!
//! - [`RelayRequest`] / [`RelayResponse`] -- the request/response pairs
//! - [`Events`] -- `{related_events, result_events, largest_index}` batches
//! - [`RelayCodec`] -- bincode payloads with optional length/tag framing
//! - [`endpoints`] -- HTTP paths for each request kind

pub mod codec;
pub mod endpoint;
pub mod error;
pub mod message;

pub use codec::RelayCodec;
pub use endpoint::{endpoints, BODY_CONTENT_TYPE};
pub use error::{ProtocolError, ProtocolResult};
pub use message::{Events, Frame, RelayRequest, RelayResponse, MAX_MESSAGE_SIZE, PROTOCOL_VERSION};
