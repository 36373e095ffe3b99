//! Synchronization for the Polycentric engine.
//!
//! Relays are untrusted stores of signed events. This crate reconciles the
//! local [`poly_log::EventLog`] against them:
//!
//! - [`Synchronizer::backfill`] -- pull missing events, related before result
//! - [`Synchronizer::load_server_head`] / [`Synchronizer::is_feed_complete`]
//! - [`Synchronizer::explore`], [`Synchronizer::search`],
//!   [`Synchronizer::notifications`] -- paged feeds across servers
//! - [`Synchronizer::backfill_server`] -- push what a relay lacks
//!
//! Transports sit behind [`RelayTransport`]: [`HttpRelayTransport`] speaks
//! the binary relay protocol over HTTP, [`MemoryRelay`] serves from memory.

pub mod config;
pub mod error;
pub mod http;
pub mod memory;
pub mod negotiation;
pub mod synchronizer;
pub mod transport;
pub mod types;

pub use config::SyncConfig;
pub use error::{SyncError, SyncResult};
pub use http::{HttpConnector, HttpRelayTransport};
pub use memory::{MemoryNetwork, MemoryRelay};
pub use negotiation::NegotiationEngine;
pub use synchronizer::Synchronizer;
pub use transport::{Connector, RelayTransport};
pub use types::{FeedPage, HeadReport, ServerOutcome, ServerStatus, SyncReport, SyncScope};
