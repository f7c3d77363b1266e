//! Fakes shared by the integration tests.
#![allow(dead_code)]

use std::{
    collections::BTreeMap,
    future::Future,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use notify_relay::{
    assistant::Assistant,
    broker::{
        Backoff, Broker, InboundMessage, Link, LinkClient, LinkEvents, Qos, SessionOptions,
        Transport,
    },
    config::RelaySettings,
    engine::{EngineCommand, EngineOptions, RelayEngine},
    error::{AssistantError, ConnectionError, InjectionError, PublishError},
    types::{
        ChannelConfig, NotificationAction, NotificationEvent, NotificationPayload, ReplyInput,
        ReplyResults, ReplyTarget,
    },
};

pub const DEVICE_ID: &str = "15551234567";

// ==================== engine collaborators ====================

#[derive(Default)]
pub struct RecordingBroker {
    pub published: Mutex<Vec<(String, Vec<u8>)>>,
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub offline: AtomicBool,
}

impl RecordingBroker {
    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.published.lock().clone()
    }
}

#[async_trait]
impl Broker for RecordingBroker {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        _qos: Qos,
        _retained: bool,
    ) -> Result<(), PublishError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(PublishError::NotConnected);
        }
        self.published.lock().push((topic.to_string(), payload));
        Ok(())
    }

    fn open(&self) {
        self.opened.fetch_add(1, Ordering::SeqCst);
    }

    fn close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct ScriptedAssistant {
    pub answer: Option<String>,
    pub questions: Mutex<Vec<String>>,
}

impl ScriptedAssistant {
    pub fn answering(answer: &str) -> Self {
        Self {
            answer: Some(answer.to_string()),
            questions: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            answer: None,
            questions: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Assistant for ScriptedAssistant {
    async fn query(&self, text: &str) -> Result<String, AssistantError> {
        self.questions.lock().push(text.to_string());
        self.answer
            .clone()
            .ok_or_else(|| AssistantError::Api("503 service unavailable".into()))
    }
}

#[derive(Clone, Default)]
pub struct RecordingTarget {
    pub sent: Arc<Mutex<Vec<ReplyResults>>>,
    pub fail: Option<InjectionError>,
}

impl RecordingTarget {
    pub fn failing(error: InjectionError) -> Self {
        Self {
            fail: Some(error),
            ..Default::default()
        }
    }

    pub fn texts(&self, key: &str) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter_map(|results| results.get(key).cloned())
            .collect()
    }

    pub fn calls(&self) -> usize {
        self.sent.lock().len()
    }
}

impl ReplyTarget for RecordingTarget {
    fn send(&self, results: &ReplyResults) -> Result<(), InjectionError> {
        if let Some(error) = &self.fail {
            return Err(error.clone());
        }
        self.sent.lock().push(results.clone());
        Ok(())
    }
}

pub fn notification(
    app: &str,
    sender: &str,
    text: &str,
    target: &RecordingTarget,
) -> NotificationEvent {
    NotificationEvent {
        app_id: app.to_string(),
        payload: NotificationPayload {
            sender: sender.to_string(),
            text: text.to_string(),
            extras: BTreeMap::new(),
        },
        actions: vec![NotificationAction {
            inputs: vec![ReplyInput::new("reply")],
            target: Some(Box::new(target.clone())),
        }],
    }
}

pub struct Harness {
    pub engine: RelayEngine,
    pub commands: mpsc::Receiver<EngineCommand>,
    pub broker: Arc<RecordingBroker>,
    pub assistant: Arc<ScriptedAssistant>,
}

impl Harness {
    pub fn new(config: ChannelConfig, assistant: ScriptedAssistant) -> Self {
        let broker = Arc::new(RecordingBroker::default());
        let assistant = Arc::new(assistant);
        let (tx, rx) = mpsc::channel(16);
        let settings = RelaySettings {
            device_id: DEVICE_ID.to_string(),
            whatsapp_greeting: "I'm driving, will reply soon.".to_string(),
            messenger_greeting: "In a meeting, talk later.".to_string(),
        };
        let engine = RelayEngine::new(EngineOptions::new(
            settings,
            config,
            broker.clone(),
            assistant.clone(),
            tx,
        ));
        Self {
            engine,
            commands: rx,
            broker,
            assistant,
        }
    }

    /// Feed the next self-addressed command (an assistant completion) back into the engine.
    pub async fn pump_one(&mut self) {
        let command = tokio::time::timeout(Duration::from_secs(2), self.commands.recv())
            .await
            .expect("engine command within 2s")
            .expect("command channel open");
        self.engine.handle(command).await;
    }
}

pub fn forward_mode() -> ChannelConfig {
    ChannelConfig {
        notify: true,
        ..Default::default()
    }
}

pub fn assist_mode() -> ChannelConfig {
    ChannelConfig {
        assist: true,
        whatsapp: true,
        messenger: true,
        ..Default::default()
    }
}

// ==================== broker transport ====================

#[derive(Default)]
struct TransportState {
    connects: usize,
    fail_next: usize,
    subscriptions: Vec<(usize, String)>,
    published: Vec<(usize, String, Vec<u8>)>,
    disconnects: usize,
    flushes: usize,
    links: Vec<mpsc::UnboundedSender<Result<InboundMessage, ConnectionError>>>,
}

#[derive(Clone, Default)]
pub struct ScriptedTransport {
    state: Arc<Mutex<TransportState>>,
}

impl ScriptedTransport {
    pub fn fail_next(&self, attempts: usize) {
        self.state.lock().fail_next = attempts;
    }

    pub fn connect_count(&self) -> usize {
        self.state.lock().connects
    }

    /// Topics subscribed on the link opened by the `connection`-th connect attempt (1-based).
    pub fn subscriptions_for(&self, connection: usize) -> Vec<String> {
        self.state
            .lock()
            .subscriptions
            .iter()
            .filter(|(conn, _)| *conn == connection)
            .map(|(_, topic)| topic.clone())
            .collect()
    }

    pub fn published(&self) -> Vec<(usize, String, Vec<u8>)> {
        self.state.lock().published.clone()
    }

    /// (disconnect requests, links flushed after a disconnect).
    pub fn shutdowns(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.disconnects, state.flushes)
    }

    pub fn drop_connection(&self) {
        if let Some(link) = self.state.lock().links.last() {
            let _ = link.send(Err(ConnectionError::Lost("simulated network loss".into())));
        }
    }

    pub fn deliver(&self, topic: &str, payload: &[u8]) {
        if let Some(link) = self.state.lock().links.last() {
            let _ = link.send(Ok(InboundMessage {
                topic: topic.to_string(),
                payload: payload.to_vec(),
            }));
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn connect(&self, _options: &SessionOptions) -> Result<Link, ConnectionError> {
        let mut state = self.state.lock();
        state.connects += 1;
        let connection = state.connects;
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(ConnectionError::Refused("connection refused".into()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        state.links.push(tx);
        Ok(Link {
            client: Arc::new(ScriptedClient {
                connection,
                state: Arc::clone(&self.state),
            }),
            events: Box::new(ScriptedEvents {
                rx,
                state: Arc::clone(&self.state),
            }),
        })
    }
}

struct ScriptedClient {
    connection: usize,
    state: Arc<Mutex<TransportState>>,
}

#[async_trait]
impl LinkClient for ScriptedClient {
    async fn subscribe(&self, topic: &str, _qos: Qos) -> Result<(), ConnectionError> {
        self.state
            .lock()
            .subscriptions
            .push((self.connection, topic.to_string()));
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        _qos: Qos,
        _retained: bool,
    ) -> Result<(), ConnectionError> {
        self.state
            .lock()
            .published
            .push((self.connection, topic.to_string(), payload));
        Ok(())
    }

    async fn disconnect(&self) {
        self.state.lock().disconnects += 1;
    }
}

struct ScriptedEvents {
    rx: mpsc::UnboundedReceiver<Result<InboundMessage, ConnectionError>>,
    state: Arc<Mutex<TransportState>>,
}

#[async_trait]
impl LinkEvents for ScriptedEvents {
    async fn next_message(&mut self) -> Result<InboundMessage, ConnectionError> {
        match self.rx.recv().await {
            Some(message) => message,
            None => Err(ConnectionError::Lost("link closed".into())),
        }
    }

    async fn flush(&mut self) {
        let mut state = self.state.lock();
        if state.disconnects > state.flushes {
            state.flushes += 1;
        }
    }
}

pub fn session_options(base: Duration) -> SessionOptions {
    let mut options = SessionOptions::new("tcp://localhost:1883", "test-phone");
    options.backoff = Backoff::new(base, base * 4).with_jitter(Duration::ZERO);
    options
}

pub async fn wait_until<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 2s"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(2), future)
        .await
        .expect("completed within 2s")
}
