//! Line-delimited JSON bridge to the notification capture collaborator.
//!
//! Each stdin line is one frame (`{"v":1,"type":...,"payload":...}`); each
//! reply injection is written back as a `reply` frame naming the notification
//! key and action that produced it.

use std::{collections::BTreeMap, sync::Arc};

use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::{
    dedup::DedupSet,
    engine::EngineCommand,
    error::InjectionError,
    protocol::ProtocolEnvelope,
    types::{
        Channel, NotificationAction, NotificationEvent, NotificationPayload, RemovalEvent,
        ReplyInput, ReplyResults, ReplyTarget, ToggleEvent,
    },
};

/// Notifications whose reply actions stay usable before the oldest expires.
pub const DEFAULT_MAX_LIVE: usize = 1024;

type LiveKeys = Arc<Mutex<DedupSet<String>>>;

pub type FrameSender = mpsc::UnboundedSender<ProtocolEnvelope<Value>>;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown frame type `{0}`")]
    UnknownType(String),
}

#[derive(Deserialize)]
struct InboundFrame {
    #[serde(rename = "type")]
    msg_type: String,
    #[serde(default)]
    payload: Value,
}

#[derive(Deserialize)]
struct PostedFrame {
    key: String,
    app: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    extras: BTreeMap<String, String>,
    #[serde(default)]
    actions: Vec<ActionFrame>,
}

#[derive(Deserialize)]
struct ActionFrame {
    #[serde(default)]
    inputs: Vec<String>,
}

#[derive(Deserialize)]
struct RemovedFrame {
    #[serde(default)]
    key: Option<String>,
    app: String,
    #[serde(default)]
    title: String,
}

/// Reply action of one notification, answered by writing a `reply` frame.
struct StdioReplyTarget {
    key: String,
    action: usize,
    live: LiveKeys,
    out: FrameSender,
}

impl ReplyTarget for StdioReplyTarget {
    fn send(&self, results: &ReplyResults) -> Result<(), InjectionError> {
        if !self.live.lock().contains(&self.key) {
            return Err(InjectionError::Expired);
        }
        let frame = ProtocolEnvelope::new(
            "reply",
            json!({ "key": self.key, "action": self.action, "results": results }),
        );
        self.out.send(frame).map_err(|_| InjectionError::Cancelled)
    }
}

pub struct StdioBridge {
    out: FrameSender,
    live: LiveKeys,
}

impl StdioBridge {
    pub fn new(out: FrameSender) -> Self {
        Self::with_capacity(out, DEFAULT_MAX_LIVE)
    }

    pub fn with_capacity(out: FrameSender, max_live: usize) -> Self {
        Self {
            out,
            live: Arc::new(Mutex::new(DedupSet::new(max_live))),
        }
    }

    /// Number of notifications whose reply actions are still usable.
    pub fn live_notifications(&self) -> usize {
        self.live.lock().len()
    }

    pub fn parse_line(&self, line: &str) -> Result<EngineCommand, FrameError> {
        let frame: InboundFrame = serde_json::from_str(line)?;
        match frame.msg_type.as_str() {
            "notification_posted" => {
                let posted: PostedFrame = serde_json::from_value(frame.payload)?;
                Ok(EngineCommand::Posted(self.posted_event(posted)))
            }
            "notification_removed" => {
                let removed: RemovedFrame = serde_json::from_value(frame.payload)?;
                if let Some(key) = &removed.key {
                    self.live.lock().remove(key);
                }
                Ok(EngineCommand::Removed(RemovalEvent {
                    app_id: removed.app,
                    sender: removed.title,
                }))
            }
            "toggle" => {
                let toggle: ToggleEvent = serde_json::from_value(frame.payload)?;
                Ok(EngineCommand::Toggle(toggle))
            }
            "listener_connected" => Ok(EngineCommand::ListenerConnected),
            "listener_disconnected" => {
                let mut live = self.live.lock();
                if !live.is_empty() {
                    tracing::debug!(
                        target = "notify_relay::capture",
                        expired = live.len(),
                        "listener gone; reply actions expired"
                    );
                    live.clear();
                }
                Ok(EngineCommand::ListenerDisconnected)
            }
            "shutdown" => Ok(EngineCommand::Shutdown),
            other => Err(FrameError::UnknownType(other.to_string())),
        }
    }

    fn posted_event(&self, posted: PostedFrame) -> NotificationEvent {
        // Only a relayable notification can ever have its reply action invoked.
        let replyable = Channel::from_app_id(&posted.app).is_some()
            && posted.actions.iter().any(|action| !action.inputs.is_empty());
        if replyable {
            self.live.lock().insert_if_new(&posted.key);
        }
        let actions = posted
            .actions
            .into_iter()
            .enumerate()
            .map(|(index, action)| {
                let target: Option<Box<dyn ReplyTarget>> = if action.inputs.is_empty() {
                    None
                } else {
                    Some(Box::new(StdioReplyTarget {
                        key: posted.key.clone(),
                        action: index,
                        live: Arc::clone(&self.live),
                        out: self.out.clone(),
                    }))
                };
                NotificationAction {
                    inputs: action.inputs.into_iter().map(ReplyInput::new).collect(),
                    target,
                }
            })
            .collect();

        NotificationEvent {
            app_id: posted.app,
            payload: NotificationPayload {
                sender: posted.title,
                text: posted.text,
                extras: posted.extras,
            },
            actions,
        }
    }
}
