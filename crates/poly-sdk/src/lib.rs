//! High-level API over the Polycentric engine.
//!
//! An [`Engine`] owns the store registry and the relay connector. Each local
//! identity opens as a [`Session`] bound to its own store, carrying the
//! event log, a synchronizer and a query manager over that store.
//!
//! ```no_run
//! # async fn demo() -> poly_sdk::SdkResult<()> {
//! use poly_sdk::{Engine, EngineConfig};
//! use poly_types::CancelToken;
//!
//! let engine = Engine::in_memory(EngineConfig::default())?;
//! let session = engine.create_identity().await?;
//! session.set_username("alice").await?;
//! session.post("hello").await?;
//! session.publish(&CancelToken::never()).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod identity;
pub mod session;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{SdkError, SdkResult};
pub use identity::LocalIdentity;
pub use session::Session;
