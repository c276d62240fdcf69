//! Device runtime lifecycle tests with the mock transport


use bytebeam_device::actions::ActionRegistry;
use bytebeam_device::device::{DeviceRuntime, LifecycleError};
use bytebeam_device::testing::{ManualClock, MockHandler, MockTransport};
use bytebeam_device::transport::Transport;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use test_helpers::{stream_topic, test_config, ACTIONS_TOPIC, STATUS_TOPIC};

const WAIT: Duration = Duration::from_secs(2);

fn runtime(registry: ActionRegistry) -> DeviceRuntime<MockTransport> {
    DeviceRuntime::with_clock(
        test_config(),
        MockTransport::new(),
        registry,
        Arc::new(ManualClock::new(10_000)),
    )
}

fn parse_all(raw: &[Vec<u8>]) -> Vec<Value> {
    raw.iter()
        .map(|r| serde_json::from_slice(r).unwrap())
        .collect()
}

#[tokio::test]
async fn test_full_cycle() {
    let handler = MockHandler::succeeding();
    let mut registry = ActionRegistry::new();
    registry.register("reboot", handler.clone()).unwrap();

    let mut device = runtime(registry);
    assert!(!device.is_running());
    assert!(device.telemetry().is_none());

    device.start().await.unwrap();
    assert!(device.is_running());
    let transport = device.transport().unwrap().clone();

    // Inbound action reaches the handler and one status comes back
    transport
        .deliver(ACTIONS_TOPIC, r#"{"id":"r1","name":"reboot","payload":{}}"#)
        .await;
    let statuses = parse_all(&transport.wait_for_messages(STATUS_TOPIC, 1, WAIT).await);
    assert_eq!(statuses[0]["id"], "r1");
    assert_eq!(statuses[0]["status"], "Completed");
    assert_eq!(handler.invocations(), 1);

    // Application telemetry goes through the shared publisher
    let telemetry = device.telemetry().unwrap();
    let sequence = telemetry
        .publish("sht_stream", [("temperature", 21.5)])
        .await
        .unwrap();
    assert_eq!(sequence, 1);

    device.shutdown().await.unwrap();
    assert!(!transport.is_connected());
    assert!(!device.is_running());
}

#[tokio::test]
async fn test_malformed_action_is_ignored_by_running_device() {
    let mut device = runtime(ActionRegistry::new());
    device.start().await.unwrap();
    let transport = device.transport().unwrap().clone();

    transport.deliver(ACTIONS_TOPIC, "{\"id\":\"x\"}").await;
    transport
        .deliver(ACTIONS_TOPIC, r#"{"id":"y","name":"nope"}"#)
        .await;

    // Only the well-formed but unsupported action gets a status
    let statuses = parse_all(&transport.wait_for_messages(STATUS_TOPIC, 1, WAIT).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(transport.messages_on(STATUS_TOPIC).await.len(), 1);
    assert_eq!(statuses[0]["id"], "y");
    assert_eq!(statuses[0]["status"], "Failed");

    device.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_update_config_action_changes_shadow_period() {
    let mut device = runtime(ActionRegistry::new());
    device.start().await.unwrap();
    let transport = device.transport().unwrap().clone();
    let shadow_topic = stream_topic("device_shadow");

    // First shadow is published at startup; the configured period is a minute
    transport.wait_for_messages(&shadow_topic, 1, WAIT).await;

    transport
        .deliver(
            ACTIONS_TOPIC,
            r#"{"id":"cfg1","name":"update_config","payload":{"publish_period_ms":20}}"#,
        )
        .await;
    let statuses = parse_all(&transport.wait_for_messages(STATUS_TOPIC, 1, WAIT).await);
    assert_eq!(statuses[0]["status"], "Completed");

    let shadows = parse_all(&transport.wait_for_messages(&shadow_topic, 3, WAIT).await);
    assert!(shadows.len() >= 3);
    let sequences: Vec<u64> = shadows
        .iter()
        .map(|s| s[0]["sequence"].as_u64().unwrap())
        .collect();
    assert_eq!(&sequences[..3], &[1, 2, 3]);

    device.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_permanent_disconnect_is_visible() {
    let mut device = runtime(ActionRegistry::new());
    device.start().await.unwrap();
    assert!(!device.is_permanently_disconnected());

    device.transport().unwrap().set_permanently_disconnected();
    assert!(device.is_permanently_disconnected());

    device.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_start_fails_when_transport_cannot_connect() {
    let mut device = DeviceRuntime::new(
        test_config(),
        MockTransport::with_failure(),
        ActionRegistry::new(),
    );

    let err = device.start().await.unwrap_err();
    assert!(matches!(err, LifecycleError::Transport(_)));
    assert!(!device.is_running());
}
