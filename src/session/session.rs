use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

pub type SessionId = String;

/// Encoded frame queued for a session's writer task, without the trailing newline.
pub type Outbound = Arc<str>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    Disconnecting,
    Closed,
}

/// Why a frame could not be queued for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// The session is tearing down or its writer task is gone
    Closed,
    /// The outbound queue is full; the peer is not keeping up
    QueueFull,
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "session closed"),
            Self::QueueFull => write!(f, "outbound queue full"),
        }
    }
}

impl std::error::Error for DeliveryError {}

#[derive(Debug)]
struct SessionInner {
    state: SessionState,
    subscriptions: HashSet<String>,
    last_activity: DateTime<Utc>,
    outbound: Option<mpsc::Sender<Outbound>>,
}

/// Server-side state of one connected client.
///
/// The outbound sender is the only handle to the connection's writer task;
/// dropping it during teardown closes the transport. Subscriptions are only
/// mutated through [`Session::update_subscriptions`] and
/// [`Session::begin_close`], both of which run under the session lock so the
/// topic index can be updated in the same critical section.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    peer: String,
    connected_at: DateTime<Utc>,
    inner: Mutex<SessionInner>,
    closed: Notify,
}

impl Session {
    /// Create a session in the `Connecting` state together with the receiving
    /// end of its outbound queue. The `id` is a UUID-based identity used
    /// across broker operations.
    pub fn new(peer: impl Into<String>, capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let now = Utc::now();
        let session = Self {
            id: format!("client-{}", Uuid::new_v4()),
            peer: peer.into(),
            connected_at: now,
            inner: Mutex::new(SessionInner {
                state: SessionState::Connecting,
                subscriptions: HashSet::new(),
                last_activity: now,
                outbound: Some(tx),
            }),
            closed: Notify::new(),
        };
        (session, rx)
    }

    /// Broker-assigned identity, `client-<uuid>`. Used as the key in the
    /// session registry and the topic index, and as `from_client` on every
    /// message this session publishes.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Remote address of the connection, for logging.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// When the connection was accepted.
    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    /// True while the session accepts subscriptions and deliveries.
    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    /// `connecting → active`. Returns false if the session already left `Connecting`.
    pub fn activate(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != SessionState::Connecting {
            return false;
        }
        inner.state = SessionState::Active;
        true
    }

    /// Time of the last inbound frame, or of the connect if none arrived yet.
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.inner.lock().last_activity
    }

    /// Record inbound activity. The timestamp never moves backwards.
    pub fn touch(&self) {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        if now > inner.last_activity {
            inner.last_activity = now;
        }
    }

    /// Copy of the topics this session is subscribed to, in no particular order.
    pub fn subscriptions(&self) -> Vec<String> {
        self.inner.lock().subscriptions.iter().cloned().collect()
    }

    /// Whether the session's own set contains `topic`.
    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.inner.lock().subscriptions.contains(topic)
    }

    /// Queue an encoded frame for the writer task. Never blocks.
    ///
    /// # Errors
    ///
    /// [`DeliveryError::Closed`] once teardown has started or the writer task
    /// is gone, [`DeliveryError::QueueFull`] when the peer is not keeping up.
    /// The caller is expected to tear the session down in both cases.
    pub fn deliver(&self, frame: Outbound) -> Result<(), DeliveryError> {
        let inner = self.inner.lock();
        if inner.state != SessionState::Active {
            return Err(DeliveryError::Closed);
        }
        let Some(outbound) = inner.outbound.as_ref() else {
            return Err(DeliveryError::Closed);
        };
        outbound.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::QueueFull,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Run `f` against the subscription set while the session lock is held.
    /// Returns `None` when the session is not active.
    pub(crate) fn update_subscriptions<R>(
        &self,
        f: impl FnOnce(&mut HashSet<String>) -> R,
    ) -> Option<R> {
        let mut inner = self.inner.lock();
        if inner.state != SessionState::Active {
            return None;
        }
        Some(f(&mut inner.subscriptions))
    }

    /// `active → disconnecting`: drops the outbound handle, wakes the reader and
    /// hands the drained subscription set to `unwind` under the session lock.
    ///
    /// Only the first caller gets `Some`; every later call is a no-op.
    pub(crate) fn begin_close<R>(&self, unwind: impl FnOnce(&HashSet<String>) -> R) -> Option<R> {
        let mut inner = self.inner.lock();
        match inner.state {
            SessionState::Connecting | SessionState::Active => {}
            SessionState::Disconnecting | SessionState::Closed => return None,
        }
        inner.state = SessionState::Disconnecting;
        inner.outbound = None;
        let topics = std::mem::take(&mut inner.subscriptions);
        let result = unwind(&topics);
        drop(inner);

        self.closed.notify_waiters();
        Some(result)
    }

    /// `disconnecting → closed`.
    pub(crate) fn mark_closed(&self) {
        let mut inner = self.inner.lock();
        if inner.state == SessionState::Disconnecting {
            inner.state = SessionState::Closed;
        }
    }

    /// Whether teardown has started (`disconnecting` or `closed`).
    pub fn is_closing(&self) -> bool {
        matches!(
            self.state(),
            SessionState::Disconnecting | SessionState::Closed
        )
    }

    /// Resolves once teardown has started, immediately if it already has.
    ///
    /// Every waiter is woken, so the connection's reader and writer tasks can
    /// both stop on the same teardown.
    pub async fn closed(&self) {
        let notified = self.closed.notified();
        tokio::pin!(notified);
        // register before checking the state so a concurrent teardown is not missed
        notified.as_mut().enable();
        if self.is_closing() {
            return;
        }
        notified.await;
    }
}
