//! Broker counters and the periodic stats reporter.
//!
//! Only lifetime totals are stored as counters. Gauges (live connections,
//! subscriptions, topics, retained entries) are read from the structures that
//! own them whenever a snapshot is taken, so they cannot drift.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::broker::engine::Broker;

#[derive(Debug, Default)]
pub struct BrokerStats {
    total_connections: AtomicU64,
    total_messages: AtomicU64,
    total_subscriptions: AtomicU64,
}

impl BrokerStats {
    pub fn record_connection(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_message(&self) {
        self.total_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_subscription(&self) {
        self.total_subscriptions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_connections(&self) -> u64 {
        self.total_connections.load(Ordering::Relaxed)
    }

    pub fn total_messages(&self) -> u64 {
        self.total_messages.load(Ordering::Relaxed)
    }

    pub fn total_subscriptions(&self) -> u64 {
        self.total_subscriptions.load(Ordering::Relaxed)
    }
}

/// Point-in-time view of the broker, as logged by the reporter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub started_at: DateTime<Utc>,
    pub uptime_secs: i64,
    pub total_connections: u64,
    pub current_connections: usize,
    pub total_messages: u64,
    pub total_subscriptions: u64,
    pub current_subscriptions: usize,
    pub active_topics: usize,
    pub retained_messages: usize,
}

/// Log a stats snapshot every `interval` until the task is dropped.
pub async fn run_stats_reporter(broker: Arc<Broker>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    // the first tick completes immediately
    ticker.tick().await;

    loop {
        ticker.tick().await;
        report(&broker.stats());
    }
}

pub fn report(snapshot: &StatsSnapshot) {
    info!(
        uptime_secs = snapshot.uptime_secs,
        total_connections = snapshot.total_connections,
        current_connections = snapshot.current_connections,
        total_messages = snapshot.total_messages,
        total_subscriptions = snapshot.total_subscriptions,
        current_subscriptions = snapshot.current_subscriptions,
        active_topics = snapshot.active_topics,
        retained_messages = snapshot.retained_messages,
        "broker stats"
    );
}
