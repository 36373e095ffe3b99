use poly_crypto::CryptoError;
use poly_store::StoreError;
use poly_types::TypeError;

/// Errors produced by event-log operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LogError {
    /// An incoming record did not decode.
    #[error("malformed event: {0}")]
    Decode(String),

    /// An incoming record's signature did not verify against its system.
    #[error("invalid signature: {0}")]
    SignatureInvalid(String),

    /// A row already in the store did not decode.
    #[error("corrupt stored record under {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("encode error: {0}")]
    Encode(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl LogError {
    pub(crate) fn corrupt(key: &[u8], err: impl std::fmt::Display) -> Self {
        Self::Corrupt {
            key: hex::encode(key),
            reason: err.to_string(),
        }
    }

    /// Whether the error concerns only the one incoming record, so a batch
    /// may skip it and carry on.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Decode(_) | Self::SignatureInvalid(_))
    }
}

impl From<CryptoError> for LogError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::Decode(e) => Self::Decode(e.to_string()),
            CryptoError::Signature(e) => Self::SignatureInvalid(e.to_string()),
            CryptoError::ForeignSystem(system) => {
                Self::SignatureInvalid(format!("key does not belong to system {system}"))
            }
        }
    }
}

impl From<TypeError> for LogError {
    fn from(err: TypeError) -> Self {
        match err {
            TypeError::Encode(e) => Self::Encode(e),
            other => Self::Decode(other.to_string()),
        }
    }
}

/// Result alias for event-log operations.
pub type LogResult<T> = Result<T, LogError>;
