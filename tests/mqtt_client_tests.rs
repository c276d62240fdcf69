//! Integration tests for the MQTT client that need no broker
//!
//! Covers client construction, state before connecting, the reconnect
//! policy and startup against an unreachable broker.


use bytebeam_device::config::DeviceConfig;
use bytebeam_device::transport::mqtt::{ConnectionState, MqttClient, MqttError, ReconnectConfig};
use bytebeam_device::transport::Transport;
use std::time::Duration;
use test_helpers::{test_config, ACTIONS_TOPIC};
use tokio::sync::mpsc;
use tokio::time::timeout;

fn config_with_broker(broker_url: &str) -> DeviceConfig {
    let mut config = test_config();
    config.mqtt.broker_url = broker_url.to_string();
    config
}

#[tokio::test]
async fn test_mqtt_client_creation() {
    let client = MqttClient::new(&test_config()).unwrap();

    assert!(
        !client.is_connected(),
        "Client should not be connected until connect() is called"
    );
    assert_eq!(client.connection_state(), None);
    assert!(!client.is_permanently_disconnected());
}

fn assert_shareable_transport<T: Transport + Send + Sync + 'static>() {}

#[test]
fn test_mqtt_client_is_a_shareable_transport() {
    assert_shareable_transport::<MqttClient>();
}

#[tokio::test]
async fn test_tls_client_creation_without_certificates() {
    let client = MqttClient::new(&config_with_broker("mqtts://localhost:8883"));
    assert!(client.is_ok());
}

#[tokio::test]
async fn test_invalid_broker_url_rejected() {
    let result = MqttClient::new(&config_with_broker("not a url"));
    assert!(matches!(result, Err(MqttError::InvalidBrokerUrl(_))));
}

#[tokio::test]
async fn test_publish_before_connect_fails() {
    let client = MqttClient::new(&test_config()).unwrap();

    let result = client
        .publish("/tenants/demo/devices/test-device/events/s/jsonarray", b"[]".to_vec())
        .await;

    assert!(matches!(result, Err(MqttError::NotConnected { .. })));
}

#[tokio::test]
async fn test_subscribe_before_connect_is_deferred() {
    let client = MqttClient::new(&test_config()).unwrap();
    let (tx, _rx) = mpsc::channel(4);

    client.subscribe(ACTIONS_TOPIC, tx).await.unwrap();
    assert!(!client.is_connected());
}

#[test]
fn test_default_reconnect_backoff_pattern() {
    let config = ReconnectConfig::default();

    let delays: Vec<u64> = (1..=6).map(|a| config.calculate_backoff_delay(a)).collect();
    assert_eq!(delays, vec![25, 50, 100, 250, 250, 250]);
    assert_eq!(config.max_attempts, None);
    assert_eq!(config.calculate_max_total_time(), None);
}

#[tokio::test]
async fn test_unreachable_broker_becomes_permanently_disconnected() {
    let mut client = MqttClient::new(&config_with_broker("mqtt://localhost:9999"))
        .unwrap()
        .with_reconnect_config(ReconnectConfig {
            max_attempts: Some(2),
            backoff_pattern: vec![10, 10],
            sustained_delay: 10,
        });

    let connect_result = timeout(Duration::from_secs(10), client.connect()).await;
    assert!(
        matches!(connect_result, Ok(Err(_)) | Err(_)),
        "Connection should fail when the broker is unavailable"
    );

    // The supervisor gives up after the configured attempts
    let gave_up = timeout(Duration::from_secs(10), async {
        while !client.is_permanently_disconnected() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(gave_up.is_ok());
    assert!(matches!(
        client.connection_state(),
        Some(ConnectionState::PermanentlyDisconnected(_))
    ));

    let (tx, _rx) = mpsc::channel(1);
    assert!(client.subscribe(ACTIONS_TOPIC, tx).await.is_err());

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_connect_twice_is_rejected() {
    let mut client = MqttClient::new(&config_with_broker("mqtt://localhost:9999"))
        .unwrap()
        .with_reconnect_config(ReconnectConfig {
            max_attempts: Some(1),
            backoff_pattern: vec![10],
            sustained_delay: 10,
        });

    let _ = timeout(Duration::from_secs(10), client.connect()).await;
    let second = client.connect().await;
    assert!(matches!(second, Err(MqttError::ConnectionFailedStr(_))));

    client.disconnect().await.unwrap();
}
