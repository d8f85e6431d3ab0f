//! Broker engine
//!
//! This module contains the in-memory broker responsible for:
//! - registering sessions and tearing them down exactly once
//! - keeping session subscriptions and the topic index in agreement
//! - publishing messages to every subscriber except the publisher
//! - replaying retained messages to new subscribers
//!
//! Concurrency and usage notes:
//! - The API is synchronous and shared as `Arc<Broker>`; there is no
//!   broker-wide lock. The session registry, topic index and retained cache
//!   are sharded maps, and each session guards its own state.
//! - Lock order is always session → topic index. Publishing snapshots the
//!   subscriber set first and only then touches sessions, so it never holds an
//!   index lock while queueing frames.
//! - Delivery only enqueues onto the session's bounded outbound queue; the
//!   socket write happens in the connection's writer task.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Utc;
use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::broker::message::{Message, format_timestamp};
use crate::broker::retained::RetainedCache;
use crate::broker::stats::{BrokerStats, StatsSnapshot};
use crate::broker::topic::TopicIndex;
use crate::config::BrokerSettings;
use crate::session::{Outbound, Session, SessionId};
use crate::transport::frame::{self, Frame, FrameError};
use crate::utils::BrokerError;

#[derive(Debug)]
pub struct Broker {
    sessions: DashMap<SessionId, Arc<Session>>,
    /// Sessions admitted and not yet torn down; gates `max_connections`
    admitted: AtomicUsize,
    topics: TopicIndex,
    retained: RetainedCache,
    stats: BrokerStats,
    settings: BrokerSettings,
    started_at: chrono::DateTime<Utc>,
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(BrokerSettings::default())
    }
}

impl Broker {
    /// Create an empty broker with the given limits.
    ///
    /// Nothing is spawned here; the transports drive the broker through
    /// [`Broker::connect`] and [`Broker::handle_line`], and the binary starts
    /// the stats reporter separately.
    pub fn new(settings: BrokerSettings) -> Self {
        Self {
            sessions: DashMap::new(),
            admitted: AtomicUsize::new(0),
            topics: TopicIndex::new(),
            retained: RetainedCache::new(),
            stats: BrokerStats::default(),
            settings,
            started_at: Utc::now(),
        }
    }

    /// Limits this broker was created with.
    pub fn settings(&self) -> &BrokerSettings {
        &self.settings
    }

    /// Read access to the topic index, mostly for inspection and tests.
    /// Mutations go through [`Broker::subscribe`] and [`Broker::unsubscribe`]
    /// so the session side stays in agreement.
    pub fn topics(&self) -> &TopicIndex {
        &self.topics
    }

    /// Read access to the retained message cache.
    pub fn retained(&self) -> &RetainedCache {
        &self.retained
    }

    /// Look up a registered session. Sessions leave the registry at the end
    /// of teardown, so `None` means the identity is unknown or already gone.
    pub fn session(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|s| Arc::clone(s.value()))
    }

    /// Number of sessions currently in the registry.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Create and register a session for a freshly accepted connection.
    ///
    /// Returns the session (already `Active`) and the receiving end of its
    /// outbound queue, which the transport drains onto the socket.
    ///
    /// Admission is counted atomically, and a session stops counting as soon
    /// as its teardown starts.
    ///
    /// # Errors
    ///
    /// [`BrokerError::TooManyConnections`] when `max_connections` sessions
    /// are already admitted. The transport closes the stream in that case.
    pub fn connect(
        &self,
        peer: impl Into<String>,
    ) -> Result<(Arc<Session>, tokio::sync::mpsc::Receiver<Outbound>), BrokerError> {
        let max = self.settings.max_connections;
        self.admitted
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            })
            .map_err(|_| BrokerError::TooManyConnections(max))?;

        let (session, rx) = Session::new(peer, self.settings.outbound_queue_capacity);
        let session = Arc::new(session);
        self.sessions
            .insert(session.id().to_string(), Arc::clone(&session));
        session.activate();
        self.stats.record_connection();

        info!("{} connected from {}", session.id(), session.peer());
        Ok((session, rx))
    }

    /// Decode one inbound line and act on it. Bad frames are logged and
    /// dropped; the session stays up.
    pub fn handle_line(&self, session: &Session, line: &str) {
        session.touch();

        match frame::decode(line) {
            Ok(frame) => self.handle_frame(session, frame),
            Err(FrameError::UnknownType(kind)) => {
                warn!("{} sent unknown frame type '{kind}', dropping", session.id());
            }
            Err(err) => {
                warn!(
                    "Invalid frame from {}: {err} | {}",
                    session.id(),
                    line.chars().take(100).collect::<String>()
                );
            }
        }
    }

    /// Route a parsed frame to the matching operation.
    pub fn handle_frame(&self, session: &Session, frame: Frame) {
        let id = session.id();
        match frame {
            Frame::Subscribe { topic } => {
                if let Err(e) = self.subscribe(id, &topic) {
                    warn!("{id} subscribe rejected: {e}");
                }
            }
            Frame::Unsubscribe { topic } => {
                if let Err(e) = self.unsubscribe(id, &topic) {
                    warn!("{id} unsubscribe rejected: {e}");
                }
            }
            Frame::Publish {
                topic,
                payload,
                retain,
            } => {
                self.publish(id, &topic, payload, retain);
            }
            Frame::Ping {} => {
                if let Err(e) = self.pong(session) {
                    warn!("{id} pong failed: {e}");
                }
            }
            other @ (Frame::Message { .. } | Frame::Pong { .. }) => {
                warn!("{id} sent broker-only frame '{}', dropping", other.kind());
            }
        }
    }

    /// Subscribe session `id` to `topic`.
    ///
    /// The session's own set and the topic index change together under the
    /// session lock. If a retained message exists for the topic it is queued
    /// to this session only, before returning.
    pub fn subscribe(&self, id: &str, topic: &str) -> Result<(), BrokerError> {
        if topic.is_empty() {
            return Err(BrokerError::EmptyTopic);
        }
        let session = self
            .session(id)
            .ok_or_else(|| BrokerError::UnknownSession(id.to_string()))?;

        let added = session
            .update_subscriptions(|subs| {
                if subs.insert(topic.to_string()) {
                    self.topics.subscribe(topic, id);
                    true
                } else {
                    false
                }
            })
            .ok_or_else(|| BrokerError::SessionClosed(id.to_string()))?;

        if added {
            self.stats.record_subscription();
            info!("{id} subscribed to {topic}");
        } else {
            debug!("{id} already subscribed to {topic}");
        }

        if let Some(retained) = self.retained.get(topic) {
            let text: Outbound = frame::encode(&retained.to_frame())?.into();
            if let Err(e) = session.deliver(text) {
                warn!("Failed to replay retained message on {topic} to {id}: {e}");
                self.disconnect(id);
                return Err(e.into());
            }
            debug!("Replayed retained message on {topic} to {id}");
        }
        Ok(())
    }

    /// Unsubscribe session `id` from `topic`. Unsubscribing from a topic the
    /// session never joined is a no-op.
    pub fn unsubscribe(&self, id: &str, topic: &str) -> Result<(), BrokerError> {
        if topic.is_empty() {
            return Err(BrokerError::EmptyTopic);
        }
        let session = self
            .session(id)
            .ok_or_else(|| BrokerError::UnknownSession(id.to_string()))?;

        let removed = session
            .update_subscriptions(|subs| {
                if subs.remove(topic) {
                    self.topics.unsubscribe(topic, id);
                    true
                } else {
                    false
                }
            })
            .ok_or_else(|| BrokerError::SessionClosed(id.to_string()))?;

        if removed {
            info!("{id} unsubscribed from {topic}");
        }
        Ok(())
    }

    /// Publish `payload` on `topic` on behalf of session `from`.
    ///
    /// Every subscriber except `from` gets one `message` frame. A subscriber
    /// whose queue is closed or full is torn down after the fan-out; the
    /// publish itself never fails. Returns the number of successful deliveries.
    pub fn publish(&self, from: &str, topic: &str, payload: String, retain: bool) -> usize {
        if topic.is_empty() {
            warn!("{from} published without a topic, dropping");
            return 0;
        }

        let message = Message::new(topic, payload, from);
        let text: Outbound = match frame::encode(&message.to_frame()) {
            Ok(json) => json.into(),
            Err(e) => {
                warn!("Failed to serialize message: {e}");
                return 0;
            }
        };

        if retain {
            self.retained.put(message);
        }

        let mut delivered = 0;
        let mut failed = Vec::new();
        for sub_id in self.topics.subscribers_of(topic) {
            if sub_id == from {
                continue;
            }
            let Some(subscriber) = self.session(&sub_id) else {
                debug!("No session registered with id: {sub_id}");
                continue;
            };
            match subscriber.deliver(Arc::clone(&text)) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!("Failed to send to {sub_id}: {e}");
                    failed.push(sub_id);
                }
            }
        }

        self.stats.record_message();

        for sub_id in failed {
            self.disconnect(&sub_id);
        }

        debug!("{from} published to {topic} ({delivered} deliveries, retain={retain})");
        delivered
    }

    /// Reply to a `ping` on the same session.
    pub fn pong(&self, session: &Session) -> Result<(), BrokerError> {
        let text: Outbound = frame::encode(&Frame::pong(format_timestamp(Utc::now())))?.into();
        if let Err(e) = session.deliver(text) {
            self.disconnect(session.id());
            return Err(e.into());
        }
        Ok(())
    }

    /// Tear a session down: release its transport handle, unwind every
    /// subscription from the topic index and drop it from the registry.
    ///
    /// Safe to call any number of times from any task; only the first call
    /// does the work and returns true.
    pub fn disconnect(&self, id: &str) -> bool {
        let Some(session) = self.session(id) else {
            return false;
        };

        let Some(removed) =
            session.begin_close(|topics| self.topics.remove_session_everywhere(id, topics))
        else {
            return false;
        };

        self.admitted.fetch_sub(1, Ordering::AcqRel);
        self.sessions.remove(id);
        session.mark_closed();

        info!("Cleaned up client {id} ({removed} subscriptions removed)");
        true
    }

    /// Disconnect every live session. Used on shutdown.
    pub fn shutdown(&self) -> usize {
        let ids: Vec<SessionId> = self.sessions.iter().map(|s| s.key().clone()).collect();
        let closed = ids.iter().filter(|id| self.disconnect(id)).count();
        info!("Broker shut down, {closed} sessions closed");
        closed
    }

    /// Point-in-time counters. Totals come from the atomic counters, gauges
    /// are read from the registry, index and retained cache directly.
    pub fn stats(&self) -> StatsSnapshot {
        let now = Utc::now();
        StatsSnapshot {
            started_at: self.started_at,
            uptime_secs: (now - self.started_at).num_seconds(),
            total_connections: self.stats.total_connections(),
            current_connections: self.sessions.len(),
            total_messages: self.stats.total_messages(),
            total_subscriptions: self.stats.total_subscriptions(),
            current_subscriptions: self.topics.subscription_count(),
            active_topics: self.topics.topic_count(),
            retained_messages: self.retained.len(),
        }
    }
}
