//! Turns raw notification events into relay decisions.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::{
    config::RelaySettings,
    dedup::GreetedSets,
    protocol::{dismissal_payload, ConversationMessage, Topics},
    types::{
        Channel, ChannelConfig, ConversationId, NotificationAction, NotificationEvent,
        PendingReply, RemovalEvent,
    },
};

/// Channel-generated digest ("3 new messages") rather than a single message.
static DIGEST_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bnew messages?\b").expect("valid digest regex"));

pub fn is_digest_summary(text: &str) -> bool {
    DIGEST_MARKER.is_match(text)
}

pub fn greeting(sender: &str, canned: &str) -> String {
    let first_name = sender.split_whitespace().next().unwrap_or(sender);
    format!("Hey {first_name}, {canned}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    ModesDisabled,
    UnsupportedApp,
    MissingSender,
    NoReplyAction,
    ChannelDisabled,
    DigestSummary,
}

#[derive(Debug)]
pub enum Decision {
    Ignore(IgnoreReason),
    /// First contact in assist mode: inject the canned greeting directly.
    Greet { pending: PendingReply, text: String },
    /// Already greeted: ask the assistant, then inject its answer.
    Query {
        pending: PendingReply,
        question: String,
    },
    /// Forward mode: store `pending` and publish `payload` on `topic`.
    Forward {
        pending: PendingReply,
        topic: String,
        payload: Vec<u8>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dismissal {
    pub topic: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct EventTranslator {
    settings: RelaySettings,
    topics: Topics,
}

impl EventTranslator {
    pub fn new(settings: RelaySettings) -> Self {
        let topics = Topics::for_device(&settings.device_id);
        Self { settings, topics }
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub fn translate(
        &self,
        event: NotificationEvent,
        config: &ChannelConfig,
        greeted: &GreetedSets,
    ) -> Decision {
        if !config.assist && !config.notify {
            return Decision::Ignore(IgnoreReason::ModesDisabled);
        }
        let Some(channel) = Channel::from_app_id(&event.app_id) else {
            return Decision::Ignore(IgnoreReason::UnsupportedApp);
        };
        if event.payload.sender.trim().is_empty() {
            return Decision::Ignore(IgnoreReason::MissingSender);
        }
        if config.assist && !config.channel_enabled(channel) {
            return Decision::Ignore(IgnoreReason::ChannelDisabled);
        }

        let conversation = ConversationId::from_sender(&event.payload.sender);
        let Some(pending) = capture_reply(channel, conversation, event) else {
            return Decision::Ignore(IgnoreReason::NoReplyAction);
        };

        if config.assist {
            if !greeted.contains(channel, &pending.conversation) {
                let text = greeting(
                    &pending.notification.sender,
                    self.settings.canned_message(channel),
                );
                return Decision::Greet { pending, text };
            }
            if is_digest_summary(&pending.notification.text) {
                return Decision::Ignore(IgnoreReason::DigestSummary);
            }
            let question = pending.notification.text.clone();
            return Decision::Query { pending, question };
        }

        let message =
            ConversationMessage::outbound(channel, &pending.conversation, &pending.notification);
        Decision::Forward {
            pending,
            topic: self.topics.outbound.clone(),
            payload: message.to_bytes(),
        }
    }

    /// Dismissal signal for a removed notification, when forwarding is active.
    pub fn translate_removal(
        &self,
        event: &RemovalEvent,
        config: &ChannelConfig,
    ) -> Option<Dismissal> {
        if !config.notify {
            return None;
        }
        Channel::from_app_id(&event.app_id)?;
        if event.sender.trim().is_empty() {
            return None;
        }
        let conversation = ConversationId::from_sender(&event.sender);
        Some(Dismissal {
            topic: self.topics.dismissal.clone(),
            payload: dismissal_payload(&conversation),
        })
    }
}

/// Take the reply target from the last action exposing at least one reply input.
fn capture_reply(
    channel: Channel,
    conversation: ConversationId,
    event: NotificationEvent,
) -> Option<PendingReply> {
    let NotificationEvent {
        payload, actions, ..
    } = event;
    let NotificationAction { inputs, target } = actions
        .into_iter()
        .filter(|action| !action.inputs.is_empty() && action.target.is_some())
        .last()?;
    Some(PendingReply {
        channel,
        conversation,
        target: target?,
        inputs,
        notification: payload,
    })
}
