use thiserror::Error;

use switchboard_core::MessageType;
use switchboard_storage::StorageError;

/// Errors from the worker pool and its result handles.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("worker pool is stopped")]
    Stopped,

    #[error("worker count must be at least 1")]
    InvalidWorkerCount,

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("task panicked before producing a result")]
    TaskPanicked,
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("malformed send time: {0}")]
    MalformedDueTime(String),

    #[error("hand-off failed: {0}")]
    Pool(#[from] PoolError),

    #[error("failed to spawn scheduler thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Errors surfaced to callers of the messaging service.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),

    #[error("invalid message type for this channel: {0}")]
    InvalidMessageType(MessageType),

    #[error("no provider configured for {0}")]
    NoProvider(MessageType),

    #[error("conversation not found: {0}")]
    ConversationNotFound(i64),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("worker pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
}
