use std::{
    collections::{HashMap, HashSet, VecDeque},
    hash::Hash,
};

use crate::types::{Channel, ConversationId};

pub const DEFAULT_MAX_GREETED: usize = 4096;

/// Bounded insertion-ordered set; the oldest key is evicted first.
///
/// Holds greeted conversations per listener session, and the notification
/// keys whose reply actions are still live.
#[derive(Debug)]
pub struct DedupSet<K = ConversationId> {
    max_entries: usize,
    seen: HashSet<K>,
    order: VecDeque<K>,
}

impl<K: Eq + Hash + Clone> DedupSet<K> {
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries,
            seen: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.seen.contains(key)
    }

    pub fn insert_if_new(&mut self, key: &K) -> bool {
        if self.seen.contains(key) {
            return false;
        }

        self.seen.insert(key.clone());
        self.order.push_back(key.clone());

        while self.seen.len() > self.max_entries {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }

        debug_assert_eq!(
            self.seen.len(),
            self.order.len(),
            "DedupSet: HashSet and VecDeque out of sync"
        );
        true
    }

    pub fn remove(&mut self, key: &K) -> bool {
        if !self.seen.remove(key) {
            return false;
        }
        self.order.retain(|k| k != key);
        true
    }

    pub fn clear(&mut self) {
        self.seen.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// One [`DedupSet`] per channel.
#[derive(Debug)]
pub struct GreetedSets {
    max_entries: usize,
    sets: HashMap<Channel, DedupSet>,
}

impl GreetedSets {
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries,
            sets: HashMap::new(),
        }
    }

    pub fn contains(&self, channel: Channel, id: &ConversationId) -> bool {
        self.sets
            .get(&channel)
            .is_some_and(|set| set.contains(id))
    }

    pub fn record(&mut self, channel: Channel, id: &ConversationId) -> bool {
        let max = self.max_entries;
        self.sets
            .entry(channel)
            .or_insert_with(|| DedupSet::new(max))
            .insert_if_new(id)
    }

    pub fn clear(&mut self, channel: Channel) {
        if let Some(set) = self.sets.get_mut(&channel) {
            set.clear();
        }
    }

    pub fn clear_all(&mut self) {
        self.sets.clear();
    }

    pub fn len(&self, channel: Channel) -> usize {
        self.sets.get(&channel).map_or(0, |set| set.len())
    }
}

impl Default for GreetedSets {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_GREETED)
    }
}
