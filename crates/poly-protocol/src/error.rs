use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("framing error: {0}")]
    FramingError(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// The relay answered with an error message.
    #[error("relay error: code={code}, message={message}")]
    RemoteError { code: u32, message: String },

    /// The relay answered with content that breaks the protocol's rules.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The relay answered with a well-formed message of the wrong kind.
    #[error("unexpected response: expected {expected}, got {got}")]
    UnexpectedResponse {
        expected: &'static str,
        got: &'static str,
    },
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;
