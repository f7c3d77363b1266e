//! In-flight conversations awaiting a remote-typed reply.
//!
//! Owned by the engine task; all access is serialized through it.

use std::collections::HashMap;

use crate::types::{Channel, ConversationId, PendingReply};

#[derive(Debug, Default)]
pub struct ConversationRegistry {
    pending: HashMap<ConversationId, PendingReply>,
}

impl ConversationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `pending` under `id`, returning the entry it replaced.
    ///
    /// A fresh notification always wins over a stale one for the same sender.
    pub fn put(&mut self, id: ConversationId, pending: PendingReply) -> Option<PendingReply> {
        self.pending.insert(id, pending)
    }

    pub fn get(&self, id: &ConversationId) -> Option<&PendingReply> {
        self.pending.get(id)
    }

    pub fn remove(&mut self, id: &ConversationId) -> Option<PendingReply> {
        self.pending.remove(id)
    }

    /// Drop every pending reply captured from `channel`. Returns how many were dropped.
    pub fn clear(&mut self, channel: Channel) -> usize {
        let before = self.pending.len();
        self.pending.retain(|_, pending| pending.channel != channel);
        before - self.pending.len()
    }

    pub fn clear_all(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
