use poly_store::StoreError;

/// Errors from registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A registry row could not be decoded.
    #[error("corrupt registry row: {0}")]
    Corrupt(String),

    #[error("invalid store name {name:?}: {reason}")]
    InvalidStoreName { name: String, reason: String },

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Convenience alias used throughout the registry crate.
pub type RegistryResult<T> = Result<T, RegistryError>;
