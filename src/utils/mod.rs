//! The `utils` module provides a collection of utility functions and common
//! definitions used across the `pubwire` application.
//!
//! It centralizes the crate-wide error type and the logging bootstrap so the
//! broker, transport and binary all report failures the same way.

pub mod error;
pub mod logging;

pub use error::BrokerError;
