//! The `session` module defines the server-side representation of a client.
//!
//! It provides the `Session` struct, which encapsulates the state of a single
//! connection: its unique identifier, subscribed topics, liveness timestamp and
//! the bounded queue feeding the connection's writer task.

#[allow(clippy::module_inception)]
pub mod session;
pub use session::{DeliveryError, Outbound, Session, SessionId, SessionState};
