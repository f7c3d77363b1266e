use serde::Serialize;

use crate::{
    dedup::GreetedSets,
    events::{EventEmitter, RelayEvent},
    types::{Channel, ConversationId, PendingReply, ReplyResults},
};

/// Where the reply text came from, which decides the bookkeeping after injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// Canned greeting or assistant answer; greeted senders are remembered.
    Local,
    /// Typed by the remote peer; the registry entry was already consumed.
    Remote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyStatus {
    Delivered,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplyResult {
    pub channel: Channel,
    pub conversation: ConversationId,
    pub mode: DispatchMode,
    pub status: ReplyStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Fill every reply slot with `text`, layered over the original notification extras.
pub fn fill_reply_slots(pending: &PendingReply, text: &str) -> ReplyResults {
    let mut results = pending.notification.extras.clone();
    for input in &pending.inputs {
        results.insert(input.result_key.clone(), text.to_string());
    }
    results
}

#[derive(Clone)]
pub struct ReplyDispatcher {
    events: EventEmitter,
}

impl ReplyDispatcher {
    pub fn new(events: EventEmitter) -> Self {
        Self { events }
    }

    /// Inject `text` through the captured reply target. Consumes `pending`;
    /// a failure is logged and reported as a `reply_result` event, never retried.
    pub fn dispatch(
        &self,
        pending: PendingReply,
        text: &str,
        mode: DispatchMode,
        greeted: &mut GreetedSets,
    ) -> ReplyStatus {
        let results = fill_reply_slots(&pending, text);
        let outcome = pending.target.send(&results);

        let status = match &outcome {
            Ok(()) => {
                if mode == DispatchMode::Local {
                    greeted.record(pending.channel, &pending.conversation);
                }
                tracing::info!(
                    target = "notify_relay::dispatch",
                    channel = %pending.channel,
                    conversation = %pending.conversation,
                    mode = ?mode,
                    "reply injected"
                );
                ReplyStatus::Delivered
            }
            Err(error) => {
                tracing::warn!(
                    target = "notify_relay::dispatch",
                    channel = %pending.channel,
                    conversation = %pending.conversation,
                    mode = ?mode,
                    error = %error,
                    "reply injection failed"
                );
                ReplyStatus::Failed
            }
        };

        self.events.emit(
            RelayEvent::ReplyResult,
            ReplyResult {
                channel: pending.channel,
                conversation: pending.conversation,
                mode,
                status,
                error: outcome.err().map(|error| error.to_string()),
            },
        );
        status
    }
}
