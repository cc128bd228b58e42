//! Messaging service: validation, persistence and the send-now-or-later
//! decision on top of the worker pool and the scheduler.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use switchboard_core::time::now_timestamp;
use switchboard_core::{Config, Direction, MessageResponse, MessageType};
use switchboard_providers::ProviderRegistry;
use switchboard_storage::{Conversation, MessageStore, NewMessage, StoredMessage};

use crate::delivery::Delivery;
use crate::error::{PoolError, ServiceError};
use crate::pool::WorkerPool;
use crate::scheduler::{MessageScheduler, ScheduleOutcome};

/// Attachment blob stored when a request carries none.
const NO_ATTACHMENTS: &str = "null";

/// An outbound message as submitted by a client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub from: String,
    pub to: String,
    /// Required by [`MessagingService::send`] and the sms channel; the email
    /// channel fills it in.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub message_type: Option<MessageType>,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<String>,
    pub timestamp: String,
    /// ISO-8601 instant to send at. Absent means send now.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send_at: Option<String>,
}

/// A message delivered to us by a provider webhook.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub from: String,
    pub to: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub message_type: Option<MessageType>,
    #[serde(alias = "xillio_id")]
    pub messaging_provider_id: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<String>,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SendStatus {
    /// Provider accepted the message and the sent time was recorded.
    Sent { response: MessageResponse },
    /// Provider refused the message; no sent time recorded.
    Failed { response: MessageResponse },
    /// Held by the scheduler until `due_at`.
    Scheduled { due_at: DateTime<Utc> },
    /// `send_at` had already passed; handed straight to the pool.
    Dispatched,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendReceipt {
    pub conversation_id: i64,
    pub message_id: i64,
    pub provider: String,
    #[serde(flatten)]
    pub status: SendStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundReceipt {
    pub conversation_id: i64,
    pub message_id: i64,
}

/// Channel an entry point accepts.
#[derive(Debug, Clone, Copy)]
enum Channel {
    Any,
    Phone,
    Email,
}

impl Channel {
    /// Resolve the effective type for this channel.
    fn resolve(self, requested: Option<MessageType>) -> Result<Option<MessageType>, ServiceError> {
        match (self, requested) {
            (Channel::Email, _) => Ok(Some(MessageType::Email)),
            (Channel::Phone, Some(t)) if !t.is_phone() => Err(ServiceError::InvalidMessageType(t)),
            (_, requested) => Ok(requested),
        }
    }
}

pub struct MessagingService {
    store: Arc<dyn MessageStore>,
    registry: Arc<ProviderRegistry>,
    pool: Arc<WorkerPool>,
    scheduler: Arc<MessageScheduler>,
}

impl MessagingService {
    /// Assemble a service from already-built parts. The scheduler must share
    /// `pool` and `store`; starting it is left to the caller.
    pub fn new(
        store: Arc<dyn MessageStore>,
        registry: Arc<ProviderRegistry>,
        pool: Arc<WorkerPool>,
        scheduler: Arc<MessageScheduler>,
    ) -> Self {
        Self {
            store,
            registry,
            pool,
            scheduler,
        }
    }

    /// Build the default registry, pool and scheduler from `config` and
    /// start the scheduler.
    pub fn from_config(config: &Config, store: Arc<dyn MessageStore>) -> Result<Self, ServiceError> {
        let registry = Arc::new(ProviderRegistry::with_defaults());
        let applied = registry.apply_routing(&config.routing);
        if applied > 0 {
            info!(applied, "Provider overrides applied");
        }

        let pool = Arc::new(WorkerPool::new(config.engine.worker_count)?);
        let scheduler = Arc::new(
            MessageScheduler::new(Arc::clone(&pool), Arc::clone(&store))
                .with_policy(config.engine.malformed_send_time),
        );
        scheduler.start()?;

        info!(
            profile = config.profile_label(),
            workers = pool.worker_count(),
            policy = %scheduler.policy(),
            "Messaging service ready"
        );
        Ok(Self::new(store, registry, pool, scheduler))
    }

    /// Send (or schedule) a message of any type.
    ///
    /// Immediate sends block the calling thread until a pool worker has run
    /// the provider call. Provider failures come back as
    /// [`SendStatus::Failed`], not as an error.
    ///
    /// Blocking: panics if called from inside a tokio runtime. Use
    /// `tokio::task::spawn_blocking` from async code.
    ///
    /// Nothing is persisted when the request is rejected before hand-off
    /// (validation, no provider, malformed `send_at` under
    /// [`MalformedTimePolicy::Reject`](switchboard_core::config::MalformedTimePolicy::Reject),
    /// stopped pool).
    pub fn send(&self, message: OutboundMessage) -> Result<SendReceipt, ServiceError> {
        self.send_on(Channel::Any, message)
    }

    /// Send on the phone channel; only sms and mms are accepted.
    ///
    /// Blocks like [`send`](Self::send); do not call from async code.
    pub fn send_sms(&self, message: OutboundMessage) -> Result<SendReceipt, ServiceError> {
        self.send_on(Channel::Phone, message)
    }

    /// Send on the email channel. The type is always email.
    ///
    /// Blocks like [`send`](Self::send); do not call from async code.
    pub fn send_email(&self, message: OutboundMessage) -> Result<SendReceipt, ServiceError> {
        self.send_on(Channel::Email, message)
    }

    fn send_on(&self, channel: Channel, message: OutboundMessage) -> Result<SendReceipt, ServiceError> {
        let message_type = channel.resolve(message.message_type)?;
        let message_type = validate(&[
            ("from", message.from.as_str()),
            ("to", message.to.as_str()),
            ("body", message.body.as_str()),
            ("timestamp", message.timestamp.as_str()),
        ], message_type)?;

        let provider = self
            .registry
            .provider_for(message_type)
            .ok_or(ServiceError::NoProvider(message_type))?;

        // Settle everything that can still reject the request before the
        // first write.
        let due_at = message
            .send_at
            .as_deref()
            .map(|send_at| self.scheduler.resolve_send_time(send_at))
            .transpose()?;
        if !self.pool.is_accepting() {
            return Err(PoolError::Stopped.into());
        }

        let conversation_id = self.store.find_or_create_conversation(&message.from, &message.to)?;
        let attachments = message.attachments.unwrap_or_else(|| NO_ATTACHMENTS.to_string());
        let message_id = self.store.insert_message(&NewMessage {
            conversation_id,
            from: message.from.clone(),
            to: message.to.clone(),
            message_type,
            body: message.body.clone(),
            attachments: attachments.clone(),
            messaging_provider_id: String::new(),
            timestamp: message.timestamp.clone(),
            direction: Direction::Outbound,
            sent_time: None,
        })?;
        debug!(message_id, conversation_id, %message_type, "Outbound message stored");

        let delivery = Delivery {
            message_id,
            conversation_id,
            from: message.from,
            to: message.to,
            message_type,
            body: message.body,
            attachments,
            provider_message_id: String::new(),
            timestamp: message.timestamp,
            provider: Arc::clone(&provider),
        };

        let status = match due_at {
            Some(due_at) => match self.scheduler.schedule_at(delivery, due_at)? {
                ScheduleOutcome::Pending { due_at } => SendStatus::Scheduled { due_at },
                ScheduleOutcome::DispatchedNow(_) => SendStatus::Dispatched,
            },
            None => self.send_now(delivery)?,
        };

        Ok(SendReceipt {
            conversation_id,
            message_id,
            provider: provider.name().to_string(),
            status,
        })
    }

    /// Run the provider call on the pool and wait for it.
    fn send_now(&self, delivery: Delivery) -> Result<SendStatus, ServiceError> {
        let message_id = delivery.message_id;
        let request = delivery.to_request();
        let provider = Arc::clone(&delivery.provider);
        let response = self.pool.submit(move || provider.send(&request))?.wait()?;

        if !response.success {
            warn!(
                message_id,
                provider = delivery.provider.name(),
                http_status = response.http_status,
                error = %response.message,
                "Provider rejected message"
            );
            return Ok(SendStatus::Failed { response });
        }

        self.store.update_message_sent_time(message_id, &now_timestamp())?;
        info!(
            message_id,
            provider = delivery.provider.name(),
            provider_message_id = %response.provider_message_id,
            "Message sent"
        );
        Ok(SendStatus::Sent { response })
    }

    /// Record a webhook delivery of any type.
    pub fn record_inbound(&self, message: InboundMessage) -> Result<InboundReceipt, ServiceError> {
        self.record_on(Channel::Any, message)
    }

    /// Record an inbound sms or mms.
    pub fn record_inbound_sms(&self, message: InboundMessage) -> Result<InboundReceipt, ServiceError> {
        self.record_on(Channel::Phone, message)
    }

    /// Record an inbound email.
    pub fn record_inbound_email(&self, message: InboundMessage) -> Result<InboundReceipt, ServiceError> {
        self.record_on(Channel::Email, message)
    }

    fn record_on(&self, channel: Channel, message: InboundMessage) -> Result<InboundReceipt, ServiceError> {
        let message_type = channel.resolve(message.message_type)?;
        let message_type = validate(&[
            ("from", message.from.as_str()),
            ("to", message.to.as_str()),
            ("messaging_provider_id", message.messaging_provider_id.as_str()),
            ("body", message.body.as_str()),
            ("timestamp", message.timestamp.as_str()),
        ], message_type)?;

        let conversation_id = self.store.find_or_create_conversation(&message.from, &message.to)?;
        let message_id = self.store.insert_message(&NewMessage {
            conversation_id,
            from: message.from,
            to: message.to,
            message_type,
            body: message.body,
            attachments: message.attachments.unwrap_or_else(|| NO_ATTACHMENTS.to_string()),
            messaging_provider_id: message.messaging_provider_id,
            timestamp: message.timestamp,
            direction: Direction::Inbound,
            sent_time: None,
        })?;

        info!(message_id, conversation_id, %message_type, "Inbound message recorded");
        Ok(InboundReceipt {
            conversation_id,
            message_id,
        })
    }

    /// All conversations, newest first.
    pub fn conversations(&self) -> Result<Vec<Conversation>, ServiceError> {
        Ok(self.store.conversations()?)
    }

    /// Messages of one conversation, oldest first.
    pub fn messages(&self, conversation_id: i64) -> Result<Vec<StoredMessage>, ServiceError> {
        if !self.store.conversation_exists(conversation_id)? {
            return Err(ServiceError::ConversationNotFound(conversation_id));
        }
        Ok(self.store.messages_for_conversation(conversation_id)?)
    }

    /// Poll until nothing is pending in the scheduler or queued in the pool,
    /// or until `timeout` passes. Returns whether the service went idle.
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.scheduler.pending_count() == 0 && self.pool.pending_task_count() == 0 {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(50));
        }
    }

    /// Stop the scheduler, then drain and stop the pool.
    ///
    /// Deliveries still pending in the scheduler are not sent.
    pub fn shutdown(&self) {
        let undelivered = self.scheduler.pending_count();
        if undelivered > 0 {
            warn!(undelivered, "Shutting down with scheduled messages still pending");
        }
        self.scheduler.stop();
        self.pool.stop();
        info!("Messaging service stopped");
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn scheduler(&self) -> &Arc<MessageScheduler> {
        &self.scheduler
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }
}

/// Collect every empty required field, then require a message type.
fn validate(fields: &[(&'static str, &str)], message_type: Option<MessageType>) -> Result<MessageType, ServiceError> {
    let mut missing: Vec<&'static str> = fields
        .iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| *name)
        .collect();
    if message_type.is_none() {
        missing.push("type");
    }

    match message_type {
        Some(t) if missing.is_empty() => Ok(t),
        _ => Err(ServiceError::MissingFields(missing)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_lists_every_missing_field() {
        let err = validate(&[("from", ""), ("to", "+2"), ("body", " "), ("timestamp", "t")], None).unwrap_err();
        assert!(matches!(err, ServiceError::MissingFields(ref f) if f == &vec!["from", "body", "type"]));
        assert_eq!(err.to_string(), "missing required fields: from, body, type");
    }

    #[test]
    fn email_channel_forces_email() {
        assert_eq!(Channel::Email.resolve(Some(MessageType::Sms)).unwrap(), Some(MessageType::Email));
        assert_eq!(Channel::Email.resolve(None).unwrap(), Some(MessageType::Email));
    }

    #[test]
    fn phone_channel_rejects_email() {
        assert!(matches!(
            Channel::Phone.resolve(Some(MessageType::Email)),
            Err(ServiceError::InvalidMessageType(MessageType::Email))
        ));
        assert_eq!(Channel::Phone.resolve(Some(MessageType::Mms)).unwrap(), Some(MessageType::Mms));
    }

    #[test]
    fn receipt_flattens_status_tag() {
        let receipt = SendReceipt {
            conversation_id: 1,
            message_id: 2,
            provider: "default_sms".to_string(),
            status: SendStatus::Dispatched,
        };
        let value = serde_json::to_value(&receipt).unwrap();
        assert_eq!(value["status"], "dispatched");
        assert_eq!(value["provider"], "default_sms");
    }

    #[test]
    fn inbound_accepts_xillio_id_alias() {
        let json = r#"{"from":"a@x.com","to":"b@x.com","xillio_id":"msg-1","body":"hi","timestamp":"2024-01-15T14:30:00Z"}"#;
        let inbound: InboundMessage = serde_json::from_str(json).unwrap();
        assert_eq!(inbound.messaging_provider_id, "msg-1");
        assert!(inbound.message_type.is_none());
    }
}
