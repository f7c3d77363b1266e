//! Single-writer relay engine.
//!
//! The engine task owns the conversation registry, the greeted sets and the
//! feature toggles. Capture events, toggle changes, broker deliveries and
//! assistant completions all arrive as [`EngineCommand`]s on one channel, so
//! no other component touches that state directly.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;

use crate::{
    assistant::Assistant,
    broker::{Broker, InboundMessage, RELAY_QOS},
    config::RelaySettings,
    dedup::{GreetedSets, DEFAULT_MAX_GREETED},
    dispatch::{DispatchMode, ReplyDispatcher},
    error::{AssistantError, MalformedPayloadError, PublishError},
    events::{EventEmitter, RelayEvent},
    protocol::parse_inbound_reply,
    registry::ConversationRegistry,
    translator::{Decision, EventTranslator},
    types::{ChannelConfig, NotificationEvent, PendingReply, RemovalEvent, ToggleEvent},
};

#[derive(Debug)]
pub enum EngineCommand {
    Posted(NotificationEvent),
    Removed(RemovalEvent),
    Toggle(ToggleEvent),
    Inbound(InboundMessage),
    AssistantAnswered {
        pending: PendingReply,
        answer: Result<String, AssistantError>,
        /// Engine session the query was issued in.
        session: u64,
    },
    ListenerConnected,
    ListenerDisconnected,
    Shutdown,
}

pub struct EngineOptions {
    pub settings: RelaySettings,
    pub config: ChannelConfig,
    pub broker: Arc<dyn Broker>,
    pub assistant: Arc<dyn Assistant>,
    /// Sender half of the engine's own command channel, used for assistant completions.
    pub commands: mpsc::Sender<EngineCommand>,
    pub events: EventEmitter,
    pub max_greeted: usize,
}

impl EngineOptions {
    pub fn new(
        settings: RelaySettings,
        config: ChannelConfig,
        broker: Arc<dyn Broker>,
        assistant: Arc<dyn Assistant>,
        commands: mpsc::Sender<EngineCommand>,
    ) -> Self {
        Self {
            settings,
            config,
            broker,
            assistant,
            commands,
            events: EventEmitter::new(false),
            max_greeted: DEFAULT_MAX_GREETED,
        }
    }
}

pub struct RelayEngine {
    config: ChannelConfig,
    translator: EventTranslator,
    registry: ConversationRegistry,
    greeted: GreetedSets,
    dispatcher: ReplyDispatcher,
    broker: Arc<dyn Broker>,
    assistant: Arc<dyn Assistant>,
    commands: mpsc::Sender<EngineCommand>,
    events: EventEmitter,
    /// Bumped whenever greeted state is reset; answers from older sessions are stale.
    session: u64,
}

impl RelayEngine {
    pub fn new(options: EngineOptions) -> Self {
        Self {
            config: options.config,
            translator: EventTranslator::new(options.settings),
            registry: ConversationRegistry::new(),
            greeted: GreetedSets::new(options.max_greeted),
            dispatcher: ReplyDispatcher::new(options.events.clone()),
            broker: options.broker,
            assistant: options.assistant,
            commands: options.commands,
            events: options.events,
            session: 0,
        }
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn registry(&self) -> &ConversationRegistry {
        &self.registry
    }

    pub fn greeted(&self) -> &GreetedSets {
        &self.greeted
    }

    pub async fn run(mut self, mut commands: mpsc::Receiver<EngineCommand>) {
        while let Some(command) = commands.recv().await {
            if matches!(command, EngineCommand::Shutdown) {
                break;
            }
            self.handle(command).await;
        }
        self.teardown();
        tracing::info!(target = "notify_relay::engine", "engine stopped");
    }

    pub async fn handle(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::Posted(event) => self.on_posted(event).await,
            EngineCommand::Removed(event) => self.on_removed(event).await,
            EngineCommand::Toggle(toggle) => self.on_toggle(toggle),
            EngineCommand::Inbound(message) => {
                if let Err(error) = self.on_inbound(message) {
                    tracing::debug!(
                        target = "notify_relay::engine",
                        error = %error,
                        "dropping inbound broker message"
                    );
                    self.events.emit(
                        RelayEvent::InboundDropped,
                        json!({ "reason": error.to_string() }),
                    );
                }
            }
            EngineCommand::AssistantAnswered {
                pending,
                answer,
                session,
            } => self.on_assistant_answer(pending, answer, session),
            EngineCommand::ListenerConnected => {
                tracing::info!(target = "notify_relay::engine", "listener connected");
                if self.config.notify {
                    self.broker.open();
                }
            }
            EngineCommand::ListenerDisconnected => {
                tracing::info!(target = "notify_relay::engine", "listener disconnected");
                self.teardown();
            }
            EngineCommand::Shutdown => self.teardown(),
        }
    }

    async fn on_posted(&mut self, event: NotificationEvent) {
        match self.translator.translate(event, &self.config, &self.greeted) {
            Decision::Ignore(reason) => {
                tracing::debug!(target = "notify_relay::engine", reason = ?reason, "notification ignored");
            }
            Decision::Greet { pending, text } => {
                self.dispatcher
                    .dispatch(pending, &text, DispatchMode::Local, &mut self.greeted);
            }
            Decision::Query { pending, question } => self.spawn_query(pending, question),
            Decision::Forward {
                pending,
                topic,
                payload,
            } => {
                let channel = pending.channel;
                let conversation = pending.conversation.clone();
                if self.registry.put(conversation.clone(), pending).is_some() {
                    tracing::debug!(
                        target = "notify_relay::engine",
                        conversation = %conversation,
                        "replaced pending reply with newer notification"
                    );
                }
                match self.broker.publish(&topic, payload, RELAY_QOS, false).await {
                    Ok(()) => {
                        tracing::info!(
                            target = "notify_relay::engine",
                            channel = %channel,
                            conversation = %conversation,
                            topic = %topic,
                            "notification forwarded"
                        );
                    }
                    Err(PublishError::NotConnected) => {
                        tracing::warn!(
                            target = "notify_relay::engine",
                            conversation = %conversation,
                            "broker not connected; notification dropped, reconnect requested"
                        );
                    }
                    Err(error) => {
                        tracing::warn!(
                            target = "notify_relay::engine",
                            conversation = %conversation,
                            error = %error,
                            "forward publish failed"
                        );
                    }
                }
            }
        }
    }

    async fn on_removed(&mut self, event: RemovalEvent) {
        let Some(dismissal) = self.translator.translate_removal(&event, &self.config) else {
            return;
        };
        if let Err(error) = self
            .broker
            .publish(&dismissal.topic, dismissal.payload, RELAY_QOS, false)
            .await
        {
            tracing::warn!(
                target = "notify_relay::engine",
                sender = %event.sender,
                error = %error,
                "dismissal publish failed"
            );
        }
    }

    fn on_toggle(&mut self, toggle: ToggleEvent) {
        self.config.apply_toggle(toggle);
        tracing::info!(target = "notify_relay::engine", toggle = ?toggle, "toggle applied");
        match toggle {
            ToggleEvent::Notify { enabled: true } => self.broker.open(),
            ToggleEvent::Notify { enabled: false } => {
                self.broker.close();
                let dropped = self.registry.clear_all();
                if dropped > 0 {
                    tracing::debug!(target = "notify_relay::engine", dropped, "cleared pending replies");
                }
            }
            ToggleEvent::Channel {
                channel,
                enabled: false,
            } => {
                self.greeted.clear(channel);
                self.session += 1;
            }
            ToggleEvent::Channel { enabled: true, .. } | ToggleEvent::Assist { .. } => {}
        }
    }

    fn on_inbound(&mut self, message: InboundMessage) -> Result<(), MalformedPayloadError> {
        if message.topic != self.translator.topics().inbound {
            return Err(MalformedPayloadError::UnexpectedTopic(message.topic));
        }
        let reply = parse_inbound_reply(&message.payload)?;
        let pending = self
            .registry
            .remove(&reply.conversation)
            .ok_or_else(|| {
                MalformedPayloadError::UnknownConversation(reply.conversation.to_string())
            })?;
        // Entry is gone before injection: a cancelled target is never retried.
        self.dispatcher.dispatch(
            pending,
            &reply.message,
            DispatchMode::Remote,
            &mut self.greeted,
        );
        Ok(())
    }

    fn spawn_query(&self, pending: PendingReply, question: String) {
        let assistant = Arc::clone(&self.assistant);
        let commands = self.commands.clone();
        let session = self.session;
        tokio::spawn(async move {
            let answer = assistant.query(&question).await;
            if commands
                .send(EngineCommand::AssistantAnswered {
                    pending,
                    answer,
                    session,
                })
                .await
                .is_err()
            {
                tracing::debug!(target = "notify_relay::engine", "engine gone; assistant answer dropped");
            }
        });
    }

    fn on_assistant_answer(
        &mut self,
        pending: PendingReply,
        answer: Result<String, AssistantError>,
        session: u64,
    ) {
        let stale = if session != self.session {
            Some("session reset")
        } else if !self.config.assist {
            Some("assist disabled")
        } else if !self.config.channel_enabled(pending.channel) {
            Some("channel disabled")
        } else {
            None
        };
        if let Some(reason) = stale {
            tracing::debug!(
                target = "notify_relay::engine",
                conversation = %pending.conversation,
                reason,
                "discarding assistant answer"
            );
            self.events.emit(
                RelayEvent::AnswerDiscarded,
                json!({ "conversation": pending.conversation, "reason": reason }),
            );
            return;
        }

        match answer {
            Ok(text) => {
                self.dispatcher
                    .dispatch(pending, &text, DispatchMode::Local, &mut self.greeted);
            }
            Err(error) => {
                tracing::warn!(
                    target = "notify_relay::engine",
                    conversation = %pending.conversation,
                    error = %error,
                    "assistant produced no reply"
                );
            }
        }
    }

    fn teardown(&mut self) {
        self.session += 1;
        self.greeted.clear_all();
        self.registry.clear_all();
        self.broker.close();
    }
}
