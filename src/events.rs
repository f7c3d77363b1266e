use std::io::{self, Write};

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::Config;

pub fn init_logging(cfg: &Config) -> Result<()> {
    let filter =
        EnvFilter::try_new(cfg.log_level.clone()).unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout carries protocol frames, so logs go to stderr.
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_ansi(false)
        .with_writer(io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// Relay lifecycle events a supervisor can follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEvent {
    /// Broker session came up, came back, or dropped.
    Connection,
    /// Outcome of one reply injection.
    ReplyResult,
    /// Inbound broker message that could not be routed.
    InboundDropped,
    /// Assistant answer discarded because the conversation state moved on.
    AnswerDiscarded,
}

impl RelayEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            RelayEvent::Connection => "connection",
            RelayEvent::ReplyResult => "reply_result",
            RelayEvent::InboundDropped => "inbound_dropped",
            RelayEvent::AnswerDiscarded => "answer_discarded",
        }
    }
}

/// Machine-readable lifecycle events, one JSON object per line on stderr.
#[derive(Clone, Debug)]
pub struct EventEmitter {
    json_output: bool,
}

impl EventEmitter {
    pub fn new(json_output: bool) -> Self {
        Self { json_output }
    }

    pub fn emit<T: Serialize>(&self, event: RelayEvent, payload: T) {
        if !self.json_output {
            return;
        }
        let mut stderr = io::stderr().lock();
        let _ = writeln!(stderr, "{}", event_line(event, payload));
    }
}

fn event_line<T: Serialize>(event: RelayEvent, payload: T) -> serde_json::Value {
    json!({
        "ts": Utc::now().to_rfc3339(),
        "type": event.as_str(),
        "payload": payload,
    })
}
