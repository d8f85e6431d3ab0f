//! # pubwire
//!
//! `pubwire` is a small in-memory publish/subscribe broker. Clients connect
//! over TCP (or optionally WebSocket), exchange newline-delimited JSON frames,
//! subscribe to exact topic names and receive every message published to them
//! by other clients. The last message published with `retain` is replayed to
//! new subscribers.
//!
//! ## Core Modules
//!
//! - `broker`: session registry, topic index, retained cache, routing and stats.
//! - `session`: per-connection state and the bounded outbound queue.
//! - `transport`: wire frames plus the TCP and WebSocket listeners.
//! - `client`: a line-protocol client used by the CLI and the tests.
//! - `config`: layered settings (defaults, `config/default.toml`, `PUBWIRE_*`).
//! - `utils`: error type and logging setup.

pub mod broker;
pub mod client;
pub mod config;
pub mod session;
pub mod transport;
pub mod utils;
