//! Provider that pretends to send.
//!
//! Used for the built-in registry entries until real carrier transports are
//! wired in. Every send succeeds with a generated provider message id.

use tracing::info;
use uuid::Uuid;

use switchboard_core::{MessageRequest, MessageResponse, MessageType};

use crate::traits::Provider;

pub struct SimulatedProvider {
    name: String,
    supported: Vec<MessageType>,
}

impl SimulatedProvider {
    pub fn new(name: impl Into<String>, supported: &[MessageType]) -> Self {
        Self {
            name: name.into(),
            supported: supported.to_vec(),
        }
    }

    /// `{name}_{6 hex chars}`, e.g. `twilio_3fa9c1`.
    fn mock_message_id(&self) -> String {
        let id = Uuid::new_v4().simple().to_string();
        format!("{}_{}", self.name, &id[..6])
    }
}

impl Provider for SimulatedProvider {
    fn send(&self, request: &MessageRequest) -> MessageResponse {
        let message_id = self.mock_message_id();
        info!(
            provider = %self.name,
            from = %request.from,
            to = %request.to,
            message_type = %request.message_type,
            provider_message_id = %message_id,
            "Simulated send"
        );
        MessageResponse::sent(format!("Message sent successfully via {}", self.name), message_id)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn supports(&self, message_type: MessageType) -> bool {
        self.supported.contains(&message_type)
    }
}
