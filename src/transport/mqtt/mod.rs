//! MQTT client implementation for the Bytebeam device protocol
//!
//! The client is split the same way as its concerns: pure functions are kept
//! apart from the I/O that drives rumqttc.
//!
//! - [`connection`] - Connection state, reconnect policy and option building
//! - [`message_handler`] - Event routing and inbound message forwarding
//! - [`health_monitor`] - Reconnection decisions and state transitions
//! - [`client`] - Event loop supervision and publish/subscribe I/O
//!
//! # Usage
//!
//! ```rust,no_run
//! use bytebeam_device::config::DeviceConfig;
//! use bytebeam_device::transport::mqtt::MqttClient;
//! use bytebeam_device::transport::Transport;
//! use std::path::Path;
//! use tokio::sync::mpsc;
//!
//! # tokio_test::block_on(async {
//! let config = DeviceConfig::load_from_file(Path::new("device.toml"))?;
//! let mut client = MqttClient::new(&config)?;
//! client.connect().await?;
//!
//! let (tx, mut rx) = mpsc::channel(16);
//! client.subscribe("/tenants/demo/devices/42/actions", tx).await?;
//! while let Some(message) = rx.recv().await {
//!     println!("{} bytes on {}", message.payload.len(), message.topic);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod health_monitor;
pub mod message_handler;

pub use client::MqttClient;
pub use connection::{ConnectionState, MqttError, ReconnectConfig};
pub use health_monitor::{ConnectionEvent, HealthMonitor, ReconnectionDecision};
pub use message_handler::{EventRoute, ForwardError, MessageForwarder, MessageHandler};
