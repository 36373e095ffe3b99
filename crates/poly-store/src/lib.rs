//! Ordered byte-keyed storage for the Polycentric engine.
//!
//! This crate defines the storage contract every other component is written
//! against. Platform code supplies a [`StorageDriver`]; the engine only ever
//! talks to the [`KeyValueStore`] handles it opens.
//!
//! # Building blocks
//!
//! - [`KeyValueStore`] -- `get`, atomic `batch`, ordered `range`, change feed
//! - [`Sublevel`] -- a namespaced view sharing one physical store
//! - [`Batch`] -- collects puts/deletes across sublevels for one atomic commit
//! - [`Cursor`] -- lazy, restartable, paged iteration
//! - [`StorageDriver`] -- opens, destroys, and reports on named stores
//!
//! # Backends
//!
//! - [`InMemoryKeyValueStore`] / [`InMemoryStorageDriver`] -- `BTreeMap`-based
//!   backend for tests and embedding
//!
//! # Contract
//!
//! 1. A `batch` is all-or-nothing, including ops targeting different sublevels.
//! 2. No reader observes a partially applied batch.
//! 3. The change feed publishes each batch exactly once, after it commits, in
//!    commit order.
//! 4. A missing key is [`StoreError::NotFound`] from `get`; routine probes use
//!    [`KeyValueStore::try_load`], which maps it to `Ok(None)`.

pub mod cursor;
pub mod driver;
pub mod error;
pub mod memory;
pub mod sublevel;
pub mod traits;

pub use cursor::Cursor;
pub use driver::{InMemoryStorageDriver, StorageDriver, StorageEstimate};
pub use error::{StoreError, StoreResult};
pub use memory::InMemoryKeyValueStore;
pub use sublevel::{Batch, Sublevel};
pub use traits::{BatchOp, ChangeStream, CommittedBatch, Entry, IterOptions, KeyValueStore};
