//! Event log and CRDT state index for the Polycentric engine.
//!
//! Each identity ("system") owns an append-only, multi-writer log of signed
//! events. This crate persists those events inside an identity store and
//! folds them into derived state:
//!
//! - [`EventLog`] -- verify, fold and persist events; read them back by
//!   pointer, by clock range, or as held ranges per process
//! - [`fold`] -- the pure CRDT fold (LWW fields plus the process set)
//! - [`keys`] -- the sublevel names and key layout of an identity store
//!
//! Ingestion is idempotent: an event already held, or one whose pointer was
//! tombstoned, produces no mutations.

pub mod error;
pub mod fold;
pub mod keys;
pub mod log;
pub mod servers;
mod staging;

pub use error::{LogError, LogResult};
pub use fold::{fold_all, fold_event, FoldOutcome};
pub use log::{EventLog, IngestReport};
pub use servers::{decode_servers, encode_servers, servers_of};
pub use staging::Staged;
