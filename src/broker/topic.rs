//! Topic management
//!
//! A `Topic` holds the set of subscriber IDs for a particular topic name, and
//! `TopicIndex` maps topic names to topics. Topic names are matched byte for
//! byte; there is no normalization and no wildcard support.
//!
//! The index never keeps a topic with an empty subscriber set: the entry is
//! removed as soon as its last subscriber leaves.

use std::collections::HashSet;

use dashmap::DashMap;

use crate::session::SessionId;

/// A single topic and the sessions subscribed to it.
#[derive(Debug, Default)]
pub struct Topic {
    /// Exact topic name as sent by the client
    pub name: String,
    /// Identities of the subscribed sessions
    pub subscribers: HashSet<SessionId>,
}

impl Topic {
    /// Create a new topic with the given name.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            subscribers: HashSet::new(),
        }
    }

    /// Add a subscriber to the topic. Returns false if it was already present.
    pub fn subscribe(&mut self, id: SessionId) -> bool {
        self.subscribers.insert(id)
    }

    /// Remove a subscriber from the topic. Returns false if it was absent.
    pub fn unsubscribe(&mut self, id: &str) -> bool {
        self.subscribers.remove(id)
    }

    /// True once the last subscriber left; the index drops such topics.
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

/// Sharded topic → subscribers map. Operations on different topics do not
/// contend with each other.
#[derive(Debug, Default)]
pub struct TopicIndex {
    topics: DashMap<String, Topic>,
}

impl TopicIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `id` to `topic`, creating the entry if needed. Idempotent.
    pub fn subscribe(&self, topic: &str, id: &str) -> bool {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| Topic::new(topic))
            .subscribe(id.to_string())
    }

    /// Remove `id` from `topic` and drop the entry once it is empty.
    /// A no-op when `id` was not subscribed.
    pub fn unsubscribe(&self, topic: &str, id: &str) -> bool {
        let (removed, now_empty) = match self.topics.get_mut(topic) {
            Some(mut entry) => {
                let removed = entry.unsubscribe(id);
                (removed, entry.is_empty())
            }
            None => return false,
        };

        if now_empty {
            // re-checked under the shard lock in case someone subscribed meanwhile
            self.topics.remove_if(topic, |_, t| t.is_empty());
        }
        removed
    }

    /// Copy of the current subscriber set. Callers iterate it without holding
    /// any index lock.
    pub fn subscribers_of(&self, topic: &str) -> Vec<SessionId> {
        self.topics
            .get(topic)
            .map(|t| t.subscribers.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Teardown helper: unsubscribe `id` from every topic in `topics`.
    /// Returns how many subscriptions were actually removed.
    pub fn remove_session_everywhere<'a>(
        &self,
        id: &str,
        topics: impl IntoIterator<Item = &'a String>,
    ) -> usize {
        topics
            .into_iter()
            .filter(|topic| self.unsubscribe(topic, id))
            .count()
    }

    /// Whether `topic` has an entry. Because empty topics are removed, this
    /// is the same as "has at least one subscriber".
    pub fn contains_topic(&self, topic: &str) -> bool {
        self.topics.contains_key(topic)
    }

    /// Whether session `id` is in the subscriber set of `topic`.
    pub fn is_subscribed(&self, topic: &str, id: &str) -> bool {
        self.topics
            .get(topic)
            .is_some_and(|t| t.subscribers.contains(id))
    }

    /// Number of topics with at least one subscriber.
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    /// Total (topic, subscriber) pairs.
    pub fn subscription_count(&self) -> usize {
        self.topics.iter().map(|t| t.subscribers.len()).sum()
    }

    /// Names of every topic currently in the index, in no particular order.
    ///
    /// Like [`TopicIndex::subscribers_of`] this is a copy; topics may come and
    /// go while the caller looks at it.
    pub fn topic_names(&self) -> Vec<String> {
        self.topics.iter().map(|t| t.key().clone()).collect()
    }
}
