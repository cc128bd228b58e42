use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use tracing::debug;

use crate::error::StorageError;
use crate::store::{Conversation, MessageStore, NewMessage, StoredMessage};

#[derive(Default)]
struct Tables {
    conversations: Vec<Conversation>,
    messages: Vec<StoredMessage>,
    next_conversation_id: i64,
    next_message_id: i64,
}

/// In-process [`MessageStore`]. Contents live as long as the value.
pub struct MemoryStore {
    tables: Mutex<Tables>,
    available: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables {
                next_conversation_id: 1,
                next_message_id: 1,
                ..Tables::default()
            }),
            available: AtomicBool::new(true),
        }
    }

    /// Toggle a simulated outage. While unavailable every call returns
    /// [`StorageError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Look up a single message by id.
    pub fn message(&self, message_id: i64) -> Result<Option<StoredMessage>, StorageError> {
        let tables = self.tables()?;
        Ok(tables.messages.iter().find(|m| m.id == message_id).cloned())
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>, StorageError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable);
        }
        Ok(self.tables.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageStore for MemoryStore {
    fn find_or_create_conversation(&self, from: &str, to: &str) -> Result<i64, StorageError> {
        let mut tables = self.tables()?;

        let existing = tables.conversations.iter().find(|c| {
            (c.participant_from == from && c.participant_to == to)
                || (c.participant_from == to && c.participant_to == from)
        });
        if let Some(conversation) = existing {
            return Ok(conversation.id);
        }

        let id = tables.next_conversation_id;
        tables.next_conversation_id += 1;
        let now = Utc::now();
        tables.conversations.push(Conversation {
            id,
            participant_from: from.to_string(),
            participant_to: to.to_string(),
            created_at: now,
            updated_at: now,
        });
        debug!(conversation_id = id, from, to, "Created conversation");
        Ok(id)
    }

    fn insert_message(&self, message: &NewMessage) -> Result<i64, StorageError> {
        let mut tables = self.tables()?;
        let now = Utc::now();

        let conversation = tables
            .conversations
            .iter_mut()
            .find(|c| c.id == message.conversation_id)
            .ok_or(StorageError::ConversationNotFound(message.conversation_id))?;
        conversation.updated_at = now;

        let id = tables.next_message_id;
        tables.next_message_id += 1;
        tables.messages.push(StoredMessage {
            id,
            conversation_id: message.conversation_id,
            from: message.from.clone(),
            to: message.to.clone(),
            message_type: message.message_type,
            body: message.body.clone(),
            attachments: message.attachments.clone(),
            messaging_provider_id: message.messaging_provider_id.clone(),
            timestamp: message.timestamp.clone(),
            direction: message.direction,
            sent_time: message.sent_time.clone(),
            created_at: now,
        });
        debug!(
            message_id = id,
            conversation_id = message.conversation_id,
            direction = %message.direction,
            "Stored message"
        );
        Ok(id)
    }

    fn update_message_sent_time(&self, message_id: i64, sent_time: &str) -> Result<(), StorageError> {
        let mut tables = self.tables()?;
        let message = tables
            .messages
            .iter_mut()
            .find(|m| m.id == message_id)
            .ok_or(StorageError::MessageNotFound(message_id))?;
        message.sent_time = Some(sent_time.to_string());
        Ok(())
    }

    fn conversations(&self) -> Result<Vec<Conversation>, StorageError> {
        let tables = self.tables()?;
        let mut conversations = tables.conversations.clone();
        conversations.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(conversations)
    }

    fn conversation_exists(&self, conversation_id: i64) -> Result<bool, StorageError> {
        let tables = self.tables()?;
        Ok(tables.conversations.iter().any(|c| c.id == conversation_id))
    }

    fn messages_for_conversation(&self, conversation_id: i64) -> Result<Vec<StoredMessage>, StorageError> {
        let tables = self.tables()?;
        if !tables.conversations.iter().any(|c| c.id == conversation_id) {
            return Err(StorageError::ConversationNotFound(conversation_id));
        }
        Ok(tables
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect())
    }
}
