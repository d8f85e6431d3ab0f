//! The `error` module defines custom error types used within the `pubwire` application.
//!
//! This module centralizes error handling, providing a consistent way to
//! represent and propagate errors throughout the system. Per-frame and
//! per-session errors are logged where they happen; only startup failures
//! travel all the way up to `main`.

use std::fmt;

use crate::session::DeliveryError;
use crate::transport::frame::FrameError;

#[derive(Debug)]
pub enum BrokerError {
    /// Configuration could not be loaded or deserialized
    Config(config::ConfigError),
    /// Socket level failure (bind, accept, read, write)
    Io(std::io::Error),
    /// A frame could not be decoded or encoded
    Frame(FrameError),
    /// WebSocket handshake or transport failure
    WebSocket(tungstenite::Error),
    /// Subscribe/unsubscribe/publish with an empty topic
    EmptyTopic,
    /// No live session with this identity
    UnknownSession(String),
    /// The session exists but is no longer active
    SessionClosed(String),
    /// `max_connections` sessions are already registered
    TooManyConnections(usize),
    /// A frame exceeded `max_frame_size` bytes without a newline
    FrameTooLarge(usize),
    /// Outbound delivery to a session failed
    Delivery(DeliveryError),
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "configuration error: {e}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Frame(e) => write!(f, "frame error: {e}"),
            Self::WebSocket(e) => write!(f, "websocket error: {e}"),
            Self::EmptyTopic => write!(f, "topic must not be empty"),
            Self::UnknownSession(id) => write!(f, "unknown session: {id}"),
            Self::SessionClosed(id) => write!(f, "session closed: {id}"),
            Self::TooManyConnections(max) => write!(f, "connection limit of {max} reached"),
            Self::FrameTooLarge(max) => write!(f, "frame exceeds {max} bytes"),
            Self::Delivery(e) => write!(f, "delivery failed: {e}"),
        }
    }
}

impl std::error::Error for BrokerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            Self::Io(e) => Some(e),
            Self::Frame(e) => Some(e),
            Self::WebSocket(e) => Some(e),
            Self::Delivery(e) => Some(e),
            _ => None,
        }
    }
}

impl From<config::ConfigError> for BrokerError {
    fn from(e: config::ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<std::io::Error> for BrokerError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<FrameError> for BrokerError {
    fn from(e: FrameError) -> Self {
        Self::Frame(e)
    }
}

impl From<tungstenite::Error> for BrokerError {
    fn from(e: tungstenite::Error) -> Self {
        Self::WebSocket(e)
    }
}

impl From<DeliveryError> for BrokerError {
    fn from(e: DeliveryError) -> Self {
        Self::Delivery(e)
    }
}
