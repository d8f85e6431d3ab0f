//! The `transport` module is responsible for network communication with
//! clients.
//!
//! It defines the newline-delimited JSON frame format, the TCP accept loop
//! with per-session reader/writer tasks, and an optional WebSocket listener
//! that speaks the same frames.

pub mod frame;
pub mod tcp;
pub mod websocket;

pub use frame::{Frame, FrameError};
pub use tcp::start_tcp_server;
pub use websocket::start_websocket_server;

#[cfg(test)]
mod tests;
