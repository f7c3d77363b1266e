//! Durable, reconnecting publish/subscribe session.
//!
//! A single session task owns the connection lifecycle. It is the only place
//! that connects, re-subscribes and changes [`SessionState`]; everything else
//! (publishers, the engine's toggle handling) only reads the state or asks the
//! task to act.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use serde::Serialize;
use serde_json::json;
use tokio::{
    sync::{
        mpsc::{self, error::TrySendError},
        Notify,
    },
    task::JoinHandle,
};

use crate::{
    error::{ConnectionError, PublishError},
    events::{EventEmitter, RelayEvent},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Qos {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

/// QoS for every relay topic: transient signals, delivered at least once.
pub const RELAY_QOS: Qos = Qos::AtLeastOnce;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
    pub jitter: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            jitter: Duration::from_millis(250),
        }
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base.as_millis() as u64;
        let exp_ms = base_ms.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
        let bounded = exp_ms.min(self.max.as_millis() as u64);
        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        Duration::from_millis(bounded + jitter)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub endpoint: String,
    pub client_id: String,
    /// `false` keeps broker-side session state so missed QoS 1 messages are redelivered.
    pub clean_session: bool,
    pub keep_alive: Duration,
    pub credentials: Option<(String, String)>,
    pub backoff: Backoff,
}

impl SessionOptions {
    pub fn new(endpoint: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client_id: client_id.into(),
            clean_session: false,
            keep_alive: Duration::from_secs(30),
            credentials: None,
            backoff: Backoff::default(),
        }
    }
}

/// Opens links to the broker. One call per (re)connect attempt.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn connect(&self, options: &SessionOptions) -> Result<Link, ConnectionError>;
}

/// An established connection: a shareable client half and the inbound event half.
pub struct Link {
    pub client: Arc<dyn LinkClient>,
    pub events: Box<dyn LinkEvents>,
}

#[async_trait]
pub trait LinkClient: Send + Sync {
    async fn subscribe(&self, topic: &str, qos: Qos) -> Result<(), ConnectionError>;

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: Qos,
        retained: bool,
    ) -> Result<(), ConnectionError>;

    async fn disconnect(&self);
}

#[async_trait]
pub trait LinkEvents: Send {
    /// Next message on any subscribed topic. An error means the connection is gone.
    async fn next_message(&mut self) -> Result<InboundMessage, ConnectionError>;

    /// Drive the link until a queued disconnect has gone out. Called once, before the link is dropped.
    async fn flush(&mut self) {}
}

/// What the relay engine needs from a broker session.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: Qos,
        retained: bool,
    ) -> Result<(), PublishError>;

    /// Start the session if it is not already running.
    fn open(&self);

    /// Stop the session. Pending publishes fail with `NotConnected`.
    fn close(&self);
}

#[derive(Debug, Clone, Copy)]
enum SessionControl {
    Shutdown,
}

struct Shared {
    state: SessionState,
    client: Option<Arc<dyn LinkClient>>,
    generation: u64,
}

struct RunningTask {
    control_tx: mpsc::Sender<SessionControl>,
    handle: JoinHandle<()>,
}

struct SessionInner {
    transport: Arc<dyn Transport>,
    options: SessionOptions,
    inbound_tx: mpsc::Sender<InboundMessage>,
    shared: Mutex<Shared>,
    subscriptions: Mutex<BTreeMap<String, Qos>>,
    reconnect_now: Notify,
    task: Mutex<Option<RunningTask>>,
    events: EventEmitter,
}

impl SessionInner {
    /// Apply a lifecycle transition if `generation` is still the live session.
    fn transition(
        &self,
        generation: u64,
        state: SessionState,
        client: Option<Arc<dyn LinkClient>>,
    ) -> bool {
        let mut shared = self.shared.lock();
        if shared.generation != generation {
            return false;
        }
        shared.state = state;
        shared.client = client;
        true
    }

    fn connected_client(&self) -> Option<Arc<dyn LinkClient>> {
        let shared = self.shared.lock();
        match shared.state {
            SessionState::Connected => shared.client.clone(),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct BrokerSession {
    inner: Arc<SessionInner>,
}

impl BrokerSession {
    pub fn new(
        transport: Arc<dyn Transport>,
        options: SessionOptions,
        inbound_tx: mpsc::Sender<InboundMessage>,
        events: EventEmitter,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                transport,
                options,
                inbound_tx,
                shared: Mutex::new(Shared {
                    state: SessionState::Disconnected,
                    client: None,
                    generation: 0,
                }),
                subscriptions: Mutex::new(BTreeMap::new()),
                reconnect_now: Notify::new(),
                task: Mutex::new(None),
                events,
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        self.inner.shared.lock().state
    }

    pub fn options(&self) -> &SessionOptions {
        &self.inner.options
    }

    pub fn active_subscriptions(&self) -> Vec<String> {
        self.inner.subscriptions.lock().keys().cloned().collect()
    }

    /// Record `topic` for every future (re)connect and subscribe now if connected.
    pub async fn subscribe(&self, topic: &str, qos: Qos) -> Result<(), ConnectionError> {
        self.inner
            .subscriptions
            .lock()
            .insert(topic.to_string(), qos);
        match self.inner.connected_client() {
            Some(client) => client.subscribe(topic, qos).await,
            None => Ok(()),
        }
    }

    /// Ask the session task to skip its current backoff wait.
    pub fn request_reconnect(&self) {
        self.inner.reconnect_now.notify_one();
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
    }

    fn start(&self) {
        let mut task = self.inner.task.lock();
        if task.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            return;
        }

        let generation = {
            let mut shared = self.inner.shared.lock();
            shared.generation += 1;
            shared.state = SessionState::Connecting;
            shared.client = None;
            shared.generation
        };

        let (control_tx, control_rx) = mpsc::channel(4);
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(run_session(inner, generation, control_rx));
        *task = Some(RunningTask { control_tx, handle });
    }

    fn stop(&self) {
        let Some(task) = self.inner.task.lock().take() else {
            return;
        };
        if task.control_tx.try_send(SessionControl::Shutdown).is_err() {
            task.handle.abort();
        }
        let mut shared = self.inner.shared.lock();
        shared.generation += 1;
        shared.state = SessionState::Disconnected;
        shared.client = None;
    }
}

#[async_trait]
impl Broker for BrokerSession {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: Qos,
        retained: bool,
    ) -> Result<(), PublishError> {
        let Some(client) = self.inner.connected_client() else {
            self.request_reconnect();
            return Err(PublishError::NotConnected);
        };
        client
            .publish(topic, payload, qos, retained)
            .await
            .map_err(|error| {
                self.request_reconnect();
                PublishError::Connection(error)
            })
    }

    fn open(&self) {
        self.start();
    }

    fn close(&self) {
        self.stop();
    }
}

async fn run_session(
    inner: Arc<SessionInner>,
    generation: u64,
    mut control_rx: mpsc::Receiver<SessionControl>,
) {
    let endpoint = inner.options.endpoint.clone();
    let mut attempt = 0u32;
    let mut has_connected = false;

    loop {
        let pending_state = if has_connected {
            SessionState::Reconnecting
        } else {
            SessionState::Connecting
        };
        if !inner.transition(generation, pending_state, None) {
            break;
        }

        let connected = tokio::select! {
            _ = control_rx.recv() => break,
            result = inner.transport.connect(&inner.options) => result,
        };

        match connected {
            Ok(Link { client, mut events }) => {
                let status = if has_connected {
                    "reconnected"
                } else {
                    "connected"
                };
                has_connected = true;
                attempt = 0;
                if !inner.transition(generation, SessionState::Connected, Some(client.clone())) {
                    client.disconnect().await;
                    events.flush().await;
                    break;
                }
                tracing::info!(
                    target = "notify_relay::broker",
                    endpoint = %endpoint,
                    status,
                    "broker session up"
                );
                inner
                    .events
                    .emit(RelayEvent::Connection, json!({ "status": status }));

                let topics: Vec<(String, Qos)> = inner
                    .subscriptions
                    .lock()
                    .iter()
                    .map(|(topic, qos)| (topic.clone(), *qos))
                    .collect();
                for (topic, qos) in &topics {
                    if let Err(error) = client.subscribe(topic, *qos).await {
                        tracing::warn!(
                            target = "notify_relay::broker",
                            topic = %topic,
                            error = %error,
                            "failed to subscribe topic"
                        );
                    }
                }

                let shutdown = loop {
                    tokio::select! {
                        _ = control_rx.recv() => break true,
                        message = events.next_message() => match message {
                            Ok(message) => match inner.inbound_tx.try_send(message) {
                                Ok(()) => {}
                                // The read loop never waits on the engine.
                                Err(TrySendError::Full(message)) => {
                                    tracing::warn!(
                                        target = "notify_relay::broker",
                                        topic = %message.topic,
                                        "inbound queue full; message dropped"
                                    );
                                }
                                Err(TrySendError::Closed(_)) => {
                                    tracing::debug!(
                                        target = "notify_relay::broker",
                                        "inbound consumer gone; stopping session"
                                    );
                                    break true;
                                }
                            },
                            Err(error) => {
                                tracing::warn!(
                                    target = "notify_relay::broker",
                                    error = %error,
                                    "broker connection lost"
                                );
                                break false;
                            }
                        },
                    }
                };

                if shutdown {
                    client.disconnect().await;
                    events.flush().await;
                    break;
                }
            }
            Err(error) => {
                tracing::warn!(
                    target = "notify_relay::broker",
                    endpoint = %endpoint,
                    error = %error,
                    "broker connect failed"
                );
            }
        }

        if !inner.transition(generation, SessionState::Reconnecting, None) {
            break;
        }
        inner
            .events
            .emit(RelayEvent::Connection, json!({ "status": "disconnected" }));

        attempt += 1;
        let delay = inner.options.backoff.delay(attempt);
        tokio::select! {
            _ = control_rx.recv() => break,
            _ = tokio::time::sleep(delay) => {}
            _ = inner.reconnect_now.notified() => {
                tracing::debug!(target = "notify_relay::broker", "reconnect requested");
            }
        }
    }

    inner.transition(generation, SessionState::Disconnected, None);
    tracing::info!(target = "notify_relay::broker", endpoint = %endpoint, "broker session closed");
}
