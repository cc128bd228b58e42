//! Storage collaborator contract and record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use switchboard_core::{Direction, MessageType};

use crate::error::StorageError;

/// A two-party conversation. Participant order is whatever the first
/// message used; lookups match either order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: i64,
    pub participant_from: String,
    pub participant_to: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert payload for a message row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMessage {
    pub conversation_id: i64,
    pub from: String,
    pub to: String,
    pub message_type: MessageType,
    pub body: String,
    /// Provider-specific blob, `"null"` when absent.
    pub attachments: String,
    pub messaging_provider_id: String,
    pub timestamp: String,
    pub direction: Direction,
    /// `None` persists as unset.
    pub sent_time: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: i64,
    pub conversation_id: i64,
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub body: String,
    pub attachments: String,
    pub messaging_provider_id: String,
    pub timestamp: String,
    pub direction: Direction,
    pub sent_time: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Persistence used by the messaging engine.
///
/// Every call may fail; callers treat these as remote operations and no
/// transaction spans more than one call.
pub trait MessageStore: Send + Sync {
    /// Id of the conversation between `from` and `to` (either order),
    /// creating it when none exists.
    fn find_or_create_conversation(&self, from: &str, to: &str) -> Result<i64, StorageError>;

    /// Persist a message and return its id.
    fn insert_message(&self, message: &NewMessage) -> Result<i64, StorageError>;

    /// Stamp the time a message was confirmed sent.
    fn update_message_sent_time(&self, message_id: i64, sent_time: &str) -> Result<(), StorageError>;

    /// All conversations, most recently created first.
    fn conversations(&self) -> Result<Vec<Conversation>, StorageError>;

    fn conversation_exists(&self, conversation_id: i64) -> Result<bool, StorageError>;

    /// Messages of one conversation in insertion order.
    fn messages_for_conversation(&self, conversation_id: i64) -> Result<Vec<StoredMessage>, StorageError>;
}
