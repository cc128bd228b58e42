use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("invalid message type: {0}")]
    InvalidMessageType(String),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
}
