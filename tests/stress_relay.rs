//! Stress tests for the bounded greeted sets and conversation registry.
//! Run with: cargo test --test stress_relay -- --ignored

mod common;

use std::time::Duration;

use notify_relay::{
    broker::Backoff,
    dedup::GreetedSets,
    registry::ConversationRegistry,
    types::{Channel, ConversationId, NotificationPayload, PendingReply, ReplyInput},
};

use common::RecordingTarget;

fn sender(i: usize) -> ConversationId {
    ConversationId::from_sender(&format!("Sender {}", i))
}

fn pending(i: usize, channel: Channel) -> PendingReply {
    PendingReply {
        channel,
        conversation: sender(i),
        target: Box::new(RecordingTarget::default()),
        inputs: vec![ReplyInput::new("reply")],
        notification: NotificationPayload {
            sender: format!("Sender {}", i),
            text: format!("message {}", i),
            ..Default::default()
        },
    }
}

#[test]
#[ignore]
fn greeted_sets_stay_bounded_under_100k_senders() {
    let max = 1_000;
    let mut greeted = GreetedSets::new(max);

    for i in 0..100_000 {
        let channel = if i % 2 == 0 {
            Channel::WhatsApp
        } else {
            Channel::Messenger
        };
        greeted.record(channel, &sender(i));
        assert!(greeted.len(channel) <= max, "greeted set exceeded max at {}", i);
    }

    // Most recent senders survive eviction; the oldest are gone.
    assert!(greeted.contains(Channel::WhatsApp, &sender(99_998)));
    assert!(greeted.contains(Channel::Messenger, &sender(99_999)));
    assert!(!greeted.contains(Channel::WhatsApp, &sender(0)));
}

#[test]
#[ignore]
fn registry_overwrites_keep_one_entry_per_conversation() {
    let mut registry = ConversationRegistry::new();

    for round in 0..50 {
        for i in 0..1_000 {
            registry.put(sender(i), pending(i, Channel::WhatsApp));
        }
        assert_eq!(registry.len(), 1_000, "duplicate entries after round {}", round);
    }

    for i in (0..1_000).step_by(2) {
        assert!(registry.remove(&sender(i)).is_some());
    }
    assert_eq!(registry.len(), 500);
    assert_eq!(registry.clear(Channel::Messenger), 0);
    assert_eq!(registry.clear_all(), 500);
}

#[test]
#[ignore]
fn backoff_never_exceeds_cap_with_jitter() {
    let backoff = Backoff::new(Duration::from_millis(1_000), Duration::from_millis(30_000));
    for attempt in 1..=10_000u32 {
        let delay = backoff.delay(attempt);
        assert!(delay >= Duration::from_millis(1_000), "attempt {}", attempt);
        assert!(delay <= Duration::from_millis(30_250), "attempt {}", attempt);
    }
}
