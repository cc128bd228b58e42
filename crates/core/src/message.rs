use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Kind of message a provider transmits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Sms,
    Mms,
    Email,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Sms => "sms",
            MessageType::Mms => "mms",
            MessageType::Email => "email",
        }
    }

    /// SMS and MMS share the phone channel; email stands alone.
    pub fn is_phone(&self) -> bool {
        matches!(self, MessageType::Sms | MessageType::Mms)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sms" => Ok(MessageType::Sms),
            "mms" => Ok(MessageType::Mms),
            "email" => Ok(MessageType::Email),
            other => Err(CoreError::InvalidMessageType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A send request handed to a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRequest {
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub body: String,
    /// Email only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default)]
    pub attachments: Vec<String>,
    pub messaging_provider_id: String,
    pub timestamp: String,
    pub direction: Direction,
}

impl MessageRequest {
    /// Outbound request with no subject or attachments.
    pub fn outbound(
        from: impl Into<String>,
        to: impl Into<String>,
        message_type: MessageType,
        body: impl Into<String>,
        messaging_provider_id: impl Into<String>,
        timestamp: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            message_type,
            body: body.into(),
            subject: None,
            attachments: Vec::new(),
            messaging_provider_id: messaging_provider_id.into(),
            timestamp: timestamp.into(),
            direction: Direction::Outbound,
        }
    }

    /// Attach a provider-encoded attachment blob. Empty and `"null"` blobs
    /// mean "no attachments" and are ignored.
    pub fn with_attachment_blob(mut self, blob: &str) -> Self {
        if !blob.is_empty() && blob != "null" {
            self.attachments = vec![blob.to_string()];
        }
        self
    }
}

/// Outcome of a provider send attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
    /// Provider's own id for the message; empty when the send failed.
    pub provider_message_id: String,
    pub http_status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl MessageResponse {
    pub fn sent(message: impl Into<String>, provider_message_id: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            provider_message_id: provider_message_id.into(),
            http_status: 200,
            error_code: None,
        }
    }

    pub fn failed(message: impl Into<String>, http_status: u16, error_code: Option<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            provider_message_id: String::new(),
            http_status,
            error_code,
        }
    }
}

impl Default for MessageResponse {
    fn default() -> Self {
        Self::failed("no response", 500, None)
    }
}
