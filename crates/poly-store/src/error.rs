/// Errors from key-value store operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The requested key is absent.
    #[error("key not found: {0}")]
    NotFound(String),

    /// The store was destroyed through its driver; the handle is stale.
    #[error("store destroyed: {0}")]
    Destroyed(String),

    /// A lock guarding backend state was poisoned by a panicking writer.
    #[error("store lock poisoned")]
    LockPoisoned,

    /// Failure reported by a concrete backend.
    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn not_found(key: &[u8]) -> Self {
        Self::NotFound(hex::encode(key))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
