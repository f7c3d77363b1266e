//! Error taxonomy for the relay engine.
//!
//! Every failure is handled where it occurs and degrades to "no visible
//! effect" plus log output. None of these reach a human.

use thiserror::Error;

/// Broker unreachable, refused the session, or dropped it.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("invalid broker endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("broker refused connection: {0}")]
    Refused(String),

    #[error("broker connection lost: {0}")]
    Lost(String),

    #[error("broker client error: {0}")]
    Client(String),
}

#[derive(Debug, Error)]
pub enum PublishError {
    /// No live session. A reconnect has been requested and the message dropped.
    #[error("broker session is not connected")]
    NotConnected,

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// The captured reply target can no longer be invoked.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InjectionError {
    #[error("reply target was cancelled")]
    Cancelled,

    #[error("reply target expired")]
    Expired,
}

#[derive(Debug, Error)]
pub enum AssistantError {
    #[error("assistant request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("assistant api error: {0}")]
    Api(String),

    #[error("assistant returned no answer")]
    EmptyAnswer,
}

/// Inbound broker message that cannot be routed.
#[derive(Debug, Error)]
pub enum MalformedPayloadError {
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("payload is missing field `{0}`")]
    MissingField(&'static str),

    #[error("no pending reply for conversation `{0}`")]
    UnknownConversation(String),

    #[error("message on unexpected topic `{0}`")]
    UnexpectedTopic(String),
}
