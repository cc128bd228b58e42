//! Provider trait definition.

use switchboard_core::{MessageRequest, MessageResponse, MessageType};

/// A transport for one or more message types.
///
/// Providers are shared as `Arc<dyn Provider>` between the request path and
/// pool workers, so `send` may run on several threads at once. Transport
/// failures are reported in the returned [`MessageResponse`], not as panics.
pub trait Provider: Send + Sync {
    /// Transmit a message through this provider.
    fn send(&self, request: &MessageRequest) -> MessageResponse;

    /// Registry name for this provider (e.g., "twilio", "sendgrid").
    fn name(&self) -> &str;

    /// Whether this provider can carry `message_type`.
    fn supports(&self, message_type: MessageType) -> bool;
}

impl std::fmt::Debug for dyn Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider").field("name", &self.name()).finish()
    }
}
