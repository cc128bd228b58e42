use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("storage unavailable")]
    Unavailable,

    #[error("message not found: {0}")]
    MessageNotFound(i64),

    #[error("conversation not found: {0}")]
    ConversationNotFound(i64),
}
