//! Pure connection state management for MQTT client
//!
//! This module contains pure functions for connection state management,
//! reconnect policy and MQTT option building.

use crate::config::DeviceConfig;
use rumqttc::v5::MqttOptions;
use rumqttc::Transport as RumqttcTransport;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Connection state for MQTT client
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Initial state - attempting to connect
    Connecting,
    /// Successfully connected and ready for operations
    Connected,
    /// Disconnected with reason
    Disconnected(String),
    /// Attempting to reconnect (attempt count)
    Reconnecting(u32),
    /// Permanently disconnected - max reconnection attempts exceeded
    PermanentlyDisconnected(String),
}

/// Reconnection configuration
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Maximum number of reconnection attempts (None = unlimited)
    pub max_attempts: Option<u32>,
    /// Backoff pattern in milliseconds
    pub backoff_pattern: Vec<u64>,
    /// Delay to use after pattern is exhausted
    pub sustained_delay: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            backoff_pattern: vec![25, 50, 100, 250],
            sustained_delay: 250,
        }
    }
}

impl ReconnectConfig {
    /// Maximum total time for all reconnection attempts, None if unlimited
    pub fn calculate_max_total_time(&self) -> Option<u64> {
        self.max_attempts.map(|max_attempts| {
            (1..=max_attempts)
                .map(|attempt| self.calculate_backoff_delay(attempt))
                .sum()
        })
    }

    /// Backoff delay for the given attempt (1-based)
    pub fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        let index = attempt.saturating_sub(1) as usize;
        self.backoff_pattern
            .get(index)
            .copied()
            .unwrap_or(self.sustained_delay)
    }
}

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Connection failed")]
    ConnectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Publishing failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Subscription failed")]
    SubscriptionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("TLS configuration error: {0}")]
    TlsConfig(String),
    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },
    #[error("Connection failed: {0}")]
    ConnectionFailedStr(String),
}

/// Build MQTT options from the device configuration.
///
/// The client id is the device id. `mqtts` URLs use TLS: the configured CA
/// verifies the broker and, when a client certificate and key are present,
/// they are presented for mutual authentication.
pub fn configure_mqtt_options(config: &DeviceConfig) -> Result<MqttOptions, MqttError> {
    let broker_url = &config.mqtt.broker_url;
    let url =
        Url::parse(broker_url).map_err(|_| MqttError::InvalidBrokerUrl(broker_url.clone()))?;

    let host = url
        .host_str()
        .ok_or_else(|| MqttError::InvalidBrokerUrl(broker_url.clone()))?;
    let port = url
        .port()
        .unwrap_or(if url.scheme() == "mqtts" { 8883 } else { 1883 });

    let mut mqtt_options = MqttOptions::new(config.device.id.clone(), host, port);

    if url.scheme() == "mqtts" {
        mqtt_options.set_transport(build_tls_transport(config)?);
    }

    if let Some(username) = config.get_mqtt_username() {
        let password = config.get_mqtt_password().unwrap_or_default();
        mqtt_options.set_credentials(username, password);
    }

    mqtt_options.set_keep_alive(Duration::from_secs(config.mqtt.keep_alive_secs));
    mqtt_options.set_max_packet_size(Some(256 * 1024));

    Ok(mqtt_options)
}

fn build_tls_transport(config: &DeviceConfig) -> Result<RumqttcTransport, MqttError> {
    let credentials = &config.credentials;
    let client_auth = credentials
        .client_auth()
        .map(|(cert, key)| (cert.as_bytes().to_vec(), key.as_bytes().to_vec()));

    match (&credentials.ca_cert, client_auth) {
        (Some(ca), client_auth) => Ok(RumqttcTransport::tls(
            ca.as_bytes().to_vec(),
            client_auth,
            None,
        )),
        (None, None) => Ok(RumqttcTransport::tls_with_default_config()),
        (None, Some(_)) => Err(MqttError::TlsConfig(
            "client certificate requires a CA certificate".to_string(),
        )),
    }
}
