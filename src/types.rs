use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

use crate::error::InjectionError;

/// Source application whose notifications are relayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Channel {
    #[serde(rename = "whatsapp")]
    WhatsApp,
    #[serde(rename = "messenger")]
    Messenger,
}

impl Channel {
    pub fn from_app_id(app_id: &str) -> Option<Self> {
        match app_id.trim() {
            "com.whatsapp" => Some(Channel::WhatsApp),
            "com.facebook.orca" => Some(Channel::Messenger),
            _ => None,
        }
    }

    /// Package id of the source app, also used as `app_name` on the wire.
    pub fn app_id(self) -> &'static str {
        match self {
            Channel::WhatsApp => "com.whatsapp",
            Channel::Messenger => "com.facebook.orca",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::WhatsApp => f.write_str("WhatsApp"),
            Channel::Messenger => f.write_str("Messenger"),
        }
    }
}

/// Normalized sender name identifying one conversation within a channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    pub fn from_sender(sender: &str) -> Self {
        Self(sender.trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One typed-text slot on a reply action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyInput {
    pub result_key: String,
}

impl ReplyInput {
    pub fn new(result_key: impl Into<String>) -> Self {
        Self {
            result_key: result_key.into(),
        }
    }
}

/// Filled reply slots keyed by result key, merged over the notification extras.
pub type ReplyResults = BTreeMap<String, String>;

/// Opaque handle that injects text back into the source conversation.
pub trait ReplyTarget: Send + Sync {
    fn send(&self, results: &ReplyResults) -> Result<(), InjectionError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationPayload {
    pub sender: String,
    pub text: String,
    pub extras: BTreeMap<String, String>,
}

/// A reply action exposed by a notification.
pub struct NotificationAction {
    pub inputs: Vec<ReplyInput>,
    pub target: Option<Box<dyn ReplyTarget>>,
}

impl fmt::Debug for NotificationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationAction")
            .field("inputs", &self.inputs)
            .field("has_target", &self.target.is_some())
            .finish()
    }
}

/// Notification-posted event from the capture collaborator.
#[derive(Debug)]
pub struct NotificationEvent {
    pub app_id: String,
    pub payload: NotificationPayload,
    pub actions: Vec<NotificationAction>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovalEvent {
    pub app_id: String,
    pub sender: String,
}

/// Everything needed to inject one reply into the action that produced a
/// notification. Consumed exactly once.
pub struct PendingReply {
    pub channel: Channel,
    pub conversation: ConversationId,
    pub target: Box<dyn ReplyTarget>,
    pub inputs: Vec<ReplyInput>,
    pub notification: NotificationPayload,
}

impl fmt::Debug for PendingReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingReply")
            .field("channel", &self.channel)
            .field("conversation", &self.conversation)
            .field("inputs", &self.inputs)
            .field("notification", &self.notification)
            .finish_non_exhaustive()
    }
}

/// Discrete toggle event from the feature-toggle collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "setting", rename_all = "snake_case")]
pub enum ToggleEvent {
    Assist { enabled: bool },
    Notify { enabled: bool },
    Channel { channel: Channel, enabled: bool },
}

/// Feature flags, owned by the engine and changed only via [`ChannelConfig::apply_toggle`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelConfig {
    pub assist: bool,
    pub notify: bool,
    pub whatsapp: bool,
    pub messenger: bool,
}

impl ChannelConfig {
    pub fn apply_toggle(&mut self, event: ToggleEvent) {
        match event {
            ToggleEvent::Assist { enabled } => self.assist = enabled,
            ToggleEvent::Notify { enabled } => self.notify = enabled,
            ToggleEvent::Channel { channel, enabled } => match channel {
                Channel::WhatsApp => self.whatsapp = enabled,
                Channel::Messenger => self.messenger = enabled,
            },
        }
    }

    pub fn channel_enabled(&self, channel: Channel) -> bool {
        match channel {
            Channel::WhatsApp => self.whatsapp,
            Channel::Messenger => self.messenger,
        }
    }
}
