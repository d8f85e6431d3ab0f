//! The `client` module provides a small async client for the broker's line
//! protocol.
//!
//! It backs the `pub` and `sub` subcommands of the binary and is what the
//! end-to-end tests drive the broker with.

pub mod pubsub_client;
pub use pubsub_client::Client;
