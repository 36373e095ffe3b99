//! Reactive queries for the Polycentric engine.
//!
//! A [`QueryManager`] watches one identity store's change feed and keeps
//! derived values current:
//!
//! - [`QueryCrdt`] -- live LWW fields, delivered immediately and again
//!   whenever a committed batch replaces them
//! - [`QueryBlob`] -- values assembled from several events (blobs, single
//!   events) that wait for missing pieces through a [`DependencyContext`]
//! - [`WaiterRegistry`] -- pointer-keyed one-shot waiters, fired when the
//!   named event is stored
//!
//! Every live query is owned by a [`QueryHandle`]; unregistering or dropping
//! it, or cancelling the owner's [`poly_types::CancelContext`], ends it
//! without further callbacks.

pub mod blob;
pub mod config;
pub mod crdt;
pub mod dependency;
pub mod error;
pub mod manager;
pub mod state;
pub mod waiters;

pub use blob::{Attempt, BlobTarget, EventTarget, QueryBlob, Resolve};
pub use config::QueryConfig;
pub use crdt::QueryCrdt;
pub use dependency::DependencyContext;
pub use error::{QueryError, QueryResult};
pub use manager::{QueryHandle, QueryManager};
pub use state::SubscriptionState;
pub use waiters::{WaiterId, WaiterRegistry};
