//! Deferred deliveries and the work that sends them.

use std::sync::Arc;

use tracing::{debug, info, warn};

use switchboard_core::time::now_timestamp;
use switchboard_core::{MessageRequest, MessageResponse, MessageType};
use switchboard_providers::Provider;
use switchboard_storage::{MessageStore, StorageError};

/// One outbound message already persisted and waiting to be sent.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub message_id: i64,
    pub conversation_id: i64,
    pub from: String,
    pub to: String,
    pub message_type: MessageType,
    pub body: String,
    /// Provider-encoded blob; empty or `"null"` means none.
    pub attachments: String,
    pub provider_message_id: String,
    /// Client-supplied timestamp of the request.
    pub timestamp: String,
    pub provider: Arc<dyn Provider>,
}

impl Delivery {
    /// Provider request for this delivery.
    pub fn to_request(&self) -> MessageRequest {
        MessageRequest::outbound(
            self.from.clone(),
            self.to.clone(),
            self.message_type,
            self.body.clone(),
            self.provider.name(),
            self.timestamp.clone(),
        )
        .with_attachment_blob(&self.attachments)
    }
}

/// What happened to a delivery once a worker ran it.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryReport {
    /// Sent and stamped with `sent_time`.
    Sent {
        message_id: i64,
        provider_message_id: String,
        sent_time: String,
    },
    /// The provider accepted it but the sent time could not be recorded.
    SentUnrecorded {
        message_id: i64,
        response: MessageResponse,
        error: StorageError,
    },
    /// The provider reported failure; the row keeps no sent time.
    ProviderFailed {
        message_id: i64,
        response: MessageResponse,
    },
}

impl DeliveryReport {
    pub fn message_id(&self) -> i64 {
        match self {
            DeliveryReport::Sent { message_id, .. }
            | DeliveryReport::SentUnrecorded { message_id, .. }
            | DeliveryReport::ProviderFailed { message_id, .. } => *message_id,
        }
    }

    pub fn is_sent(&self) -> bool {
        !matches!(self, DeliveryReport::ProviderFailed { .. })
    }
}

/// Send `delivery` through its provider and record the sent time.
///
/// Runs on a pool worker after the caller has been answered, so
/// failures are logged and returned in the report, never propagated.
pub fn send_and_record(delivery: &Delivery, store: &dyn MessageStore) -> DeliveryReport {
    let message_id = delivery.message_id;
    let provider = delivery.provider.name();
    debug!(message_id, provider, "Executing scheduled send");

    let response = delivery.provider.send(&delivery.to_request());
    if !response.success {
        warn!(
            message_id,
            provider,
            http_status = response.http_status,
            error = %response.message,
            "Scheduled send failed"
        );
        return DeliveryReport::ProviderFailed { message_id, response };
    }

    let sent_time = now_timestamp();
    match store.update_message_sent_time(message_id, &sent_time) {
        Ok(()) => {
            info!(message_id, provider, %sent_time, "Scheduled message sent");
            DeliveryReport::Sent {
                message_id,
                provider_message_id: response.provider_message_id,
                sent_time,
            }
        }
        Err(e) => {
            warn!(message_id, provider, error = %e, "Sent but failed to record sent_time");
            DeliveryReport::SentUnrecorded {
                message_id,
                response,
                error: e,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_core::{Direction, MessageResponse};
    use switchboard_storage::{MemoryStore, NewMessage};

    struct StaticProvider {
        response: MessageResponse,
    }

    impl Provider for StaticProvider {
        fn send(&self, _request: &MessageRequest) -> MessageResponse {
            self.response.clone()
        }
        fn name(&self) -> &str {
            "static"
        }
        fn supports(&self, _message_type: MessageType) -> bool {
            true
        }
    }

    fn stored_delivery(store: &MemoryStore, response: MessageResponse) -> Delivery {
        let conversation_id = store.find_or_create_conversation("+1", "+2").unwrap();
        let message_id = store
            .insert_message(&NewMessage {
                conversation_id,
                from: "+1".to_string(),
                to: "+2".to_string(),
                message_type: MessageType::Sms,
                body: "hello".to_string(),
                attachments: "null".to_string(),
                messaging_provider_id: String::new(),
                timestamp: "2024-01-15T14:30:00.000Z".to_string(),
                direction: Direction::Outbound,
                sent_time: None,
            })
            .unwrap();
        Delivery {
            message_id,
            conversation_id,
            from: "+1".to_string(),
            to: "+2".to_string(),
            message_type: MessageType::Sms,
            body: "hello".to_string(),
            attachments: "null".to_string(),
            provider_message_id: String::new(),
            timestamp: "2024-01-15T14:30:00.000Z".to_string(),
            provider: Arc::new(StaticProvider { response }),
        }
    }

    #[test]
    fn request_carries_provider_name_and_no_null_attachments() {
        let store = MemoryStore::new();
        let delivery = stored_delivery(&store, MessageResponse::sent("ok", "p1"));
        let request = delivery.to_request();
        assert_eq!(request.messaging_provider_id, "static");
        assert_eq!(request.direction, Direction::Outbound);
        assert!(request.attachments.is_empty());
    }

    #[test]
    fn success_stamps_sent_time() {
        let store = MemoryStore::new();
        let delivery = stored_delivery(&store, MessageResponse::sent("ok", "p1"));

        let report = send_and_record(&delivery, &store);
        assert!(matches!(
            &report,
            DeliveryReport::Sent { provider_message_id, .. } if provider_message_id == "p1"
        ));
        let stored = store.message(delivery.message_id).unwrap().unwrap();
        assert!(stored.sent_time.is_some());
    }

    #[test]
    fn provider_failure_leaves_sent_time_unset() {
        let store = MemoryStore::new();
        let delivery = stored_delivery(&store, MessageResponse::failed("carrier down", 503, None));

        let report = send_and_record(&delivery, &store);
        assert!(!report.is_sent());
        assert_eq!(report.message_id(), delivery.message_id);
        let stored = store.message(delivery.message_id).unwrap().unwrap();
        assert!(stored.sent_time.is_none());
    }

    #[test]
    fn storage_outage_is_reported_not_propagated() {
        let store = MemoryStore::new();
        let delivery = stored_delivery(&store, MessageResponse::sent("ok", "p1"));
        store.set_available(false);

        let report = send_and_record(&delivery, &store);
        assert!(matches!(
            report,
            DeliveryReport::SentUnrecorded { error: StorageError::Unavailable, .. }
        ));
        assert!(report.is_sent());
    }
}
