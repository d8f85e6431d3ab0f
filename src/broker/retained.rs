//! Retained messages: the last message published with `retain = true` on each
//! topic. Entries are overwritten, never merged, and live until the process
//! exits. There is no size bound or expiry.

use dashmap::DashMap;

use crate::broker::message::Message;

#[derive(Debug, Default)]
pub struct RetainedCache {
    messages: DashMap<String, Message>,
}

impl RetainedCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `message` under its topic, replacing whatever was there.
    pub fn put(&self, message: Message) {
        self.messages.insert(message.topic.clone(), message);
    }

    pub fn get(&self, topic: &str) -> Option<Message> {
        self.messages.get(topic).map(|m| m.value().clone())
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
