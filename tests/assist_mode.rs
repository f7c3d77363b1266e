//! Assist mode: first-contact greetings, assistant answers, greeted-set lifecycle.

mod common;

use std::time::Duration;

use common::{assist_mode, notification, Harness, RecordingTarget, ScriptedAssistant};
use notify_relay::{
    engine::EngineCommand,
    error::InjectionError,
    types::{Channel, ConversationId, ToggleEvent},
};

fn alice() -> ConversationId {
    ConversationId::from_sender("Alice")
}

async fn post(h: &mut Harness, app: &str, sender: &str, text: &str, target: &RecordingTarget) {
    h.engine
        .handle(EngineCommand::Posted(notification(app, sender, text, target)))
        .await;
}

#[tokio::test]
async fn first_message_gets_canned_greeting() {
    let mut h = Harness::new(assist_mode(), ScriptedAssistant::answering("unused"));
    let target = RecordingTarget::default();

    post(&mut h, "com.whatsapp", "Alice", "hi", &target).await;

    assert_eq!(
        target.texts("reply"),
        vec!["Hey Alice, I'm driving, will reply soon.".to_string()]
    );
    assert!(h.engine.greeted().contains(Channel::WhatsApp, &alice()));
    assert!(h.broker.published().is_empty(), "assist mode stays local");
    assert!(h.assistant.questions.lock().is_empty());
}

#[tokio::test]
async fn greetings_use_the_channel_message() {
    let mut h = Harness::new(assist_mode(), ScriptedAssistant::answering("unused"));
    let target = RecordingTarget::default();

    post(&mut h, "com.facebook.orca", "Bob Stone", "hey", &target).await;

    assert_eq!(
        target.texts("reply"),
        vec!["Hey Bob, In a meeting, talk later.".to_string()]
    );
    assert!(!h
        .engine
        .greeted()
        .contains(Channel::WhatsApp, &ConversationId::from_sender("bob stone")));
}

#[tokio::test]
async fn follow_up_is_answered_by_assistant() {
    let mut h = Harness::new(
        assist_mode(),
        ScriptedAssistant::answering("I'll be there at six."),
    );
    let greeting = RecordingTarget::default();
    let follow_up = RecordingTarget::default();

    post(&mut h, "com.whatsapp", "Alice", "hi", &greeting).await;
    post(&mut h, "com.whatsapp", "Alice", "when do you arrive?", &follow_up).await;
    h.pump_one().await;

    assert_eq!(
        h.assistant.questions.lock().clone(),
        vec!["when do you arrive?".to_string()]
    );
    assert_eq!(
        follow_up.texts("reply"),
        vec!["I'll be there at six.".to_string()]
    );
    assert_eq!(greeting.calls(), 1);
}

#[tokio::test]
async fn assistant_failure_sends_nothing() {
    let mut h = Harness::new(assist_mode(), ScriptedAssistant::failing());
    let greeting = RecordingTarget::default();
    let follow_up = RecordingTarget::default();

    post(&mut h, "com.whatsapp", "Alice", "hi", &greeting).await;
    post(&mut h, "com.whatsapp", "Alice", "still there?", &follow_up).await;
    h.pump_one().await;

    assert_eq!(h.assistant.questions.lock().len(), 1);
    assert_eq!(follow_up.calls(), 0);
}

#[tokio::test]
async fn digest_summary_is_not_sent_to_assistant() {
    let mut h = Harness::new(assist_mode(), ScriptedAssistant::answering("nope"));
    let target = RecordingTarget::default();

    post(&mut h, "com.whatsapp", "Alice", "hi", &target).await;
    post(&mut h, "com.whatsapp", "Alice", "3 new messages", &target).await;

    let nothing = tokio::time::timeout(Duration::from_millis(50), h.commands.recv()).await;
    assert!(nothing.is_err(), "no assistant query should be in flight");
    assert!(h.assistant.questions.lock().is_empty());
    assert_eq!(target.calls(), 1);
}

#[tokio::test]
async fn failed_greeting_is_retried_on_next_message() {
    let mut h = Harness::new(assist_mode(), ScriptedAssistant::answering("unused"));
    let expired = RecordingTarget::failing(InjectionError::Expired);
    let live = RecordingTarget::default();

    post(&mut h, "com.whatsapp", "Alice", "hi", &expired).await;
    assert!(!h.engine.greeted().contains(Channel::WhatsApp, &alice()));

    post(&mut h, "com.whatsapp", "Alice", "hello??", &live).await;
    assert_eq!(
        live.texts("reply"),
        vec!["Hey Alice, I'm driving, will reply soon.".to_string()]
    );
}

#[tokio::test]
async fn disabled_channel_is_skipped_and_forgotten() {
    let mut h = Harness::new(assist_mode(), ScriptedAssistant::answering("unused"));
    let target = RecordingTarget::default();
    post(&mut h, "com.whatsapp", "Alice", "hi", &target).await;
    assert_eq!(h.engine.greeted().len(Channel::WhatsApp), 1);

    h.engine
        .handle(EngineCommand::Toggle(ToggleEvent::Channel {
            channel: Channel::WhatsApp,
            enabled: false,
        }))
        .await;
    assert_eq!(h.engine.greeted().len(Channel::WhatsApp), 0);

    post(&mut h, "com.whatsapp", "Alice", "hello?", &target).await;
    assert_eq!(target.calls(), 1, "disabled channel gets no reply");

    h.engine
        .handle(EngineCommand::Toggle(ToggleEvent::Channel {
            channel: Channel::WhatsApp,
            enabled: true,
        }))
        .await;
    post(&mut h, "com.whatsapp", "Alice", "hello?", &target).await;
    assert_eq!(
        target.texts("reply").last().map(String::as_str),
        Some("Hey Alice, I'm driving, will reply soon."),
        "re-enabled channel greets again"
    );
}

#[tokio::test]
async fn listener_disconnect_resets_greeted_senders() {
    let mut h = Harness::new(assist_mode(), ScriptedAssistant::answering("unused"));
    let target = RecordingTarget::default();
    post(&mut h, "com.whatsapp", "Alice", "hi", &target).await;
    post(&mut h, "com.facebook.orca", "Bob", "hi", &target).await;

    h.engine.handle(EngineCommand::ListenerDisconnected).await;

    assert_eq!(h.engine.greeted().len(Channel::WhatsApp), 0);
    assert_eq!(h.engine.greeted().len(Channel::Messenger), 0);
    assert!(h.engine.registry().is_empty());
}

#[tokio::test]
async fn unsupported_apps_are_ignored() {
    let mut h = Harness::new(assist_mode(), ScriptedAssistant::answering("unused"));
    let target = RecordingTarget::default();

    post(&mut h, "org.telegram.messenger", "Alice", "hi", &target).await;

    assert_eq!(target.calls(), 0);
    assert_eq!(h.engine.greeted().len(Channel::WhatsApp), 0);
}

/// Greets Alice, then leaves an assistant query for her follow-up in flight.
async fn query_in_flight(h: &mut Harness, follow_up: &RecordingTarget) {
    let greeting = RecordingTarget::default();
    post(h, "com.whatsapp", "Alice", "hi", &greeting).await;
    post(h, "com.whatsapp", "Alice", "are you coming?", follow_up).await;
}

#[tokio::test]
async fn answer_after_channel_disable_is_discarded() {
    let mut h = Harness::new(assist_mode(), ScriptedAssistant::answering("auto answer"));
    let follow_up = RecordingTarget::default();
    query_in_flight(&mut h, &follow_up).await;

    h.engine
        .handle(EngineCommand::Toggle(ToggleEvent::Channel {
            channel: Channel::WhatsApp,
            enabled: false,
        }))
        .await;
    h.pump_one().await;

    assert_eq!(follow_up.calls(), 0, "disabled channel must not be answered");
    assert!(!h.engine.greeted().contains(Channel::WhatsApp, &alice()));
}

#[tokio::test]
async fn answer_after_channel_toggled_back_on_is_still_discarded() {
    let mut h = Harness::new(assist_mode(), ScriptedAssistant::answering("auto answer"));
    let follow_up = RecordingTarget::default();
    query_in_flight(&mut h, &follow_up).await;

    for enabled in [false, true] {
        h.engine
            .handle(EngineCommand::Toggle(ToggleEvent::Channel {
                channel: Channel::WhatsApp,
                enabled,
            }))
            .await;
    }
    h.pump_one().await;

    assert_eq!(follow_up.calls(), 0);
    assert_eq!(h.engine.greeted().len(Channel::WhatsApp), 0);
}

#[tokio::test]
async fn answer_after_listener_disconnect_is_discarded() {
    let mut h = Harness::new(assist_mode(), ScriptedAssistant::answering("auto answer"));
    let follow_up = RecordingTarget::default();
    query_in_flight(&mut h, &follow_up).await;

    h.engine.handle(EngineCommand::ListenerDisconnected).await;
    h.pump_one().await;

    assert_eq!(follow_up.calls(), 0);
    assert!(!h.engine.greeted().contains(Channel::WhatsApp, &alice()));
}

#[tokio::test]
async fn answer_after_assist_off_is_discarded() {
    let mut h = Harness::new(assist_mode(), ScriptedAssistant::answering("auto answer"));
    let follow_up = RecordingTarget::default();
    query_in_flight(&mut h, &follow_up).await;

    h.engine
        .handle(EngineCommand::Toggle(ToggleEvent::Assist { enabled: false }))
        .await;
    h.pump_one().await;

    assert_eq!(follow_up.calls(), 0);
}

#[tokio::test]
async fn unrelated_channel_toggle_keeps_answer() {
    let mut h = Harness::new(assist_mode(), ScriptedAssistant::answering("auto answer"));
    let follow_up = RecordingTarget::default();
    query_in_flight(&mut h, &follow_up).await;

    h.engine
        .handle(EngineCommand::Toggle(ToggleEvent::Channel {
            channel: Channel::Messenger,
            enabled: true,
        }))
        .await;
    h.pump_one().await;

    assert_eq!(follow_up.texts("reply"), vec!["auto answer".to_string()]);
}
