use thiserror::Error;

pub type Result<T> = std::result::Result<T, P2PError>;

#[derive(Error, Debug)]
pub enum P2PError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Failed to bind {0}")]
    BindFailed(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Invalid message type: {0:?}")]
    InvalidMessageType(String),

    #[error("Message too large: {0} bytes")]
    MessageTooLarge(usize),

    #[error("Stream closed mid-frame: {0}")]
    TruncatedFrame(String),

    #[error("Directory unavailable: {0}")]
    DirectoryUnavailable(String),

    #[error("Directory timed out after {0} ms")]
    DirectoryTimeout(u128),

    #[error("Handler failed: {0}")]
    HandlerFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<std::io::Error> for P2PError {
    fn from(err: std::io::Error) -> Self {
        P2PError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for P2PError {
    fn from(err: serde_json::Error) -> Self {
        P2PError::SerializationError(err.to_string())
    }
}
