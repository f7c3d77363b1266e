use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::MalformedPayloadError,
    types::{Channel, ConversationId, NotificationPayload},
};

pub const PROTOCOL_VERSION: u32 = 1;

/// Fixed topic carrying dismissal signals.
pub const DISMISSAL_TOPIC: &str = "notification";

/// Broker topics for one device namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub outbound: String,
    pub inbound: String,
    pub dismissal: String,
}

impl Topics {
    pub fn for_device(device_id: &str) -> Self {
        Self {
            outbound: format!("{device_id}_send"),
            inbound: format!("{device_id}_receive"),
            dismissal: DISMISSAL_TOPIC.to_string(),
        }
    }
}

/// Reduce a phone number to the digits used as the device namespace.
pub fn normalize_device_id(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}

/// JSON object exchanged on `{deviceId}_send` and `{deviceId}_receive`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub name: String,
    pub message: String,
    pub id: String,
    pub app_name: String,
}

impl ConversationMessage {
    pub fn outbound(
        channel: Channel,
        conversation: &ConversationId,
        notification: &NotificationPayload,
    ) -> Self {
        Self {
            name: notification.sender.clone(),
            message: notification.text.clone(),
            id: conversation.as_str().to_string(),
            app_name: channel.app_id().to_string(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        // Serializing a struct of plain strings cannot fail.
        serde_json::to_vec(self).unwrap_or_default()
    }
}

/// A remote-typed reply addressed to one conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundReply {
    pub conversation: ConversationId,
    pub message: String,
}

/// `name` and `app_name` may be echoed back by the peer; routing uses `id` only.
#[derive(Deserialize)]
struct RawReply {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    id: Option<String>,
}

pub fn parse_inbound_reply(payload: &[u8]) -> Result<InboundReply, MalformedPayloadError> {
    let raw: RawReply = serde_json::from_slice(payload)?;
    let id = raw
        .id
        .filter(|id| !id.trim().is_empty())
        .ok_or(MalformedPayloadError::MissingField("id"))?;
    let message = raw
        .message
        .ok_or(MalformedPayloadError::MissingField("message"))?;
    Ok(InboundReply {
        conversation: ConversationId::from_sender(&id),
        message,
    })
}

/// Bare lower-cased conversation id published on the dismissal topic.
pub fn dismissal_payload(conversation: &ConversationId) -> Vec<u8> {
    conversation.as_str().as_bytes().to_vec()
}

/// One line of the stdio protocol spoken with the capture collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolEnvelope<T> {
    pub v: u32,
    #[serde(rename = "type")]
    pub msg_type: String,
    pub payload: T,
}

impl ProtocolEnvelope<Value> {
    pub fn new(msg_type: impl Into<String>, payload: Value) -> Self {
        Self {
            v: PROTOCOL_VERSION,
            msg_type: msg_type.into(),
            payload,
        }
    }
}
