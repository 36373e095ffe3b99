use poly_log::LogError;
use poly_protocol::ProtocolError;
use poly_types::Cancelled;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// The relay could not be reached or answered with a failure status.
    #[error("network error: {0}")]
    Network(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("log error: {0}")]
    Log(#[from] LogError),

    /// The owning cancel context was cancelled. Not a failure: the caller
    /// gets no result and nothing further was written.
    #[error("sync cancelled")]
    Cancelled,
}

impl From<Cancelled> for SyncError {
    fn from(_: Cancelled) -> Self {
        Self::Cancelled
    }
}

impl SyncError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Failures caused by one relay. Sync treats these as no progress from
    /// that relay and carries on with the others.
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Protocol(_))
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
