//! Device runtime lifecycle
//!
//! Wires the transport, action dispatch and telemetry together and owns the
//! background tasks they run on.

pub mod runtime;

pub use runtime::{DeviceRuntime, LifecycleError, ACTION_CHANNEL_CAPACITY};
