use poly_log::LogError;
use poly_store::StoreError;
use poly_types::{Cancelled, Pointer};

/// Errors produced by the query layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("log error: {0}")]
    Log(#[from] LogError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A stored value did not decode into the requested shape.
    #[error("decode error: {0}")]
    Decode(String),

    /// A blob spans more sections than one query will assemble.
    #[error("blob spans {sections} sections, limit is {max}")]
    BlobTooLarge { sections: u64, max: u64 },

    /// The event a query waits for was tombstoned and will never arrive.
    #[error("event {0:?} was deleted")]
    Deleted(Pointer),

    /// The owning context was cancelled.
    #[error("query cancelled")]
    Cancelled,
}

impl From<Cancelled> for QueryError {
    fn from(_: Cancelled) -> Self {
        Self::Cancelled
    }
}

pub type QueryResult<T> = std::result::Result<T, QueryError>;
