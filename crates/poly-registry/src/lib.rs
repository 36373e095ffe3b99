//! Registry of per-identity stores.
//!
//! Each local identity gets one physical store per schema version. The
//! [`StoreRegistry`] opens and destroys those stores through a
//! [`StorageDriver`](poly_store::StorageDriver) and records, in a dedicated
//! `meta` store, which of them exist, which one is active, and whether its
//! initial setup finished.
//!
//! The registry is an ordinary value constructed by the caller and passed to
//! whoever needs it; there is no process-global instance.

pub mod error;
pub mod names;
pub mod registry;
pub mod traits;
pub mod types;

pub use error::{RegistryError, RegistryResult};
pub use names::{parse_store_name, store_name};
pub use registry::{StoreRegistry, META_STORE_NAME};
pub use traits::MetaStore;
pub use types::StoreInfo;
