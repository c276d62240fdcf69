//! Bytebeam device runtime
//!
//! Device-side runtime for the Bytebeam IoT platform: receives remote
//! actions over MQTT, executes them through registered handlers, reports
//! their status, and publishes sequenced telemetry on named streams.
//!
//! # Overview
//!
//! - Protocol message types and topic layout
//! - MQTT transport with TLS, automatic reconnection and resubscription
//! - Action registry, dispatcher and status reporting with an
//!   at-most-one-terminal-status guarantee per action
//! - Telemetry publisher with gap-free per-stream sequence numbers
//! - Device runtime lifecycle with a periodic device shadow
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use bytebeam_device::actions::{ActionHandle, ActionHandler, ActionRegistry, Execution, HandlerError};
//! use bytebeam_device::{DeviceConfig, DeviceRuntime, MqttClient};
//! use serde_json::Value;
//!
//! struct Reboot;
//!
//! #[async_trait]
//! impl ActionHandler for Reboot {
//!     async fn execute(&self, _payload: Value, handle: ActionHandle) -> Result<Execution, HandlerError> {
//!         let _ = handle.progress(50).await;
//!         Ok(Execution::Finished)
//!     }
//! }
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DeviceConfig::load_from_file("device.toml".as_ref())?;
//! let transport = MqttClient::new(&config)?;
//!
//! let mut registry = ActionRegistry::new();
//! registry.register("reboot", Reboot)?;
//!
//! let mut runtime = DeviceRuntime::new(config, transport, registry);
//! runtime.start().await?;
//!
//! if let Some(telemetry) = runtime.telemetry() {
//!     telemetry
//!         .publish("sht_stream", [("temperature", 21.5), ("humidity", 42.0)])
//!         .await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod actions;
pub mod clock;
pub mod config;
pub mod context;
pub mod device;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod telemetry;
pub mod testing;
pub mod transport;

pub use actions::{
    ActionDispatcher, ActionHandle, ActionHandler, ActionRegistry, DispatchOutcome, Execution,
    HandlerError,
};
pub use clock::{Clock, SystemClock};
pub use config::*;
pub use context::DeviceContext;
pub use device::{DeviceRuntime, LifecycleError};
pub use error::{DeviceError, DeviceResult, PublishError};
pub use protocol::*;
pub use telemetry::{FieldValue, TelemetryPublisher};
pub use transport::mqtt::MqttClient;
