//! Testing utilities and mock implementations
//!
//! Doubles for the transport, clock, status reporter and action handlers so
//! the device runtime can be tested without an MQTT broker.

pub mod mocks;

pub use mocks::*;
