use poly_types::PublicKey;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SdkError {
    /// No local identity with this key has a store on this device.
    #[error("unknown identity: {0}")]
    UnknownIdentity(PublicKey),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(#[from] poly_store::StoreError),

    #[error("registry error: {0}")]
    Registry(#[from] poly_registry::RegistryError),

    #[error("log error: {0}")]
    Log(#[from] poly_log::LogError),

    #[error("sync error: {0}")]
    Sync(#[from] poly_sync::SyncError),

    #[error("query error: {0}")]
    Query(#[from] poly_query::QueryError),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type SdkResult<T> = Result<T, SdkError>;
