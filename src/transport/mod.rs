//! Transport layer for device-to-cloud messaging
//!
//! This module provides the transport abstraction used by the action and
//! telemetry subsystems, and the MQTT implementation that talks to the
//! Bytebeam broker.

use tokio::sync::mpsc;

pub mod mqtt;

pub use mqtt::ConnectionState;

/// A message delivered on a subscribed topic
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Transport trait for device communication
///
/// This trait provides an abstraction over the transport mechanism
/// (MQTT in production) to enable dependency injection and testing.
/// Every publish is QoS 1 and never retained.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Connect to the broker. Returns once the session is established.
    async fn connect(&mut self) -> Result<(), Self::Error>;

    /// Disconnect from the broker and stop background tasks
    async fn disconnect(&self) -> Result<(), Self::Error>;

    /// Publish a payload to a topic
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), Self::Error>;

    /// Subscribe to a topic; messages arriving on it are sent to `sender`.
    /// Subscriptions are restored automatically after a reconnect.
    async fn subscribe(
        &self,
        topic: &str,
        sender: mpsc::Sender<InboundMessage>,
    ) -> Result<(), Self::Error>;

    /// Check if transport is currently connected
    fn is_connected(&self) -> bool;

    /// Get current connection state
    fn connection_state(&self) -> Option<ConnectionState>;

    /// Check if the connection is permanently disconnected
    fn is_permanently_disconnected(&self) -> bool;
}

/// Type alias for MQTT transport
pub type MqttTransport = mqtt::MqttClient;
