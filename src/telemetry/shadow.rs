//! Device shadow: periodic self-description published as telemetry

use super::{FieldValue, TelemetryPublisher};
use crate::config::DeviceInfo;
use crate::error::PublishError;
use crate::transport::Transport;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct DeviceShadow {
    stream: String,
    info: DeviceInfo,
    started: Instant,
}

impl DeviceShadow {
    pub fn new(stream: impl Into<String>, info: DeviceInfo) -> Self {
        Self {
            stream: stream.into(),
            info,
            started: Instant::now(),
        }
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Milliseconds since the shadow was created
    pub fn uptime_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Shadow fields in publish order
    pub fn fields(&self) -> Vec<(&'static str, FieldValue)> {
        vec![
            ("Status", self.info.status.as_str().into()),
            ("Software_Type", self.info.software_type.as_str().into()),
            ("Software_Version", self.info.software_version.as_str().into()),
            ("Hardware_Type", self.info.hardware_type.as_str().into()),
            ("Hardware_Version", self.info.hardware_version.as_str().into()),
            ("Uptime", self.uptime_ms().into()),
        ]
    }

    /// Publish one shadow record, returning its sequence number
    pub async fn publish<T: Transport + 'static>(
        &self,
        publisher: &TelemetryPublisher<T>,
    ) -> Result<u64, PublishError> {
        publisher.publish(&self.stream, self.fields()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;
    use crate::context::DeviceContext;
    use crate::testing::mocks::{ManualClock, MockTransport};
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_shadow_record_fields() {
        let transport = Arc::new(MockTransport::new());
        let publisher = TelemetryPublisher::new(DeviceContext::new(
            Arc::new(DeviceConfig::test_config()),
            transport.clone(),
            Arc::new(ManualClock::new(5_000)),
        ));
        let info = DeviceInfo {
            status: "Device is Up!".to_string(),
            software_type: "bytebeam-device".to_string(),
            software_version: "1.2.3".to_string(),
            hardware_type: "esp32".to_string(),
            hardware_version: "rev-b".to_string(),
        };
        let shadow = DeviceShadow::new("device_shadow", info);

        assert_eq!(shadow.publish(&publisher).await.unwrap(), 1);
        assert_eq!(shadow.publish(&publisher).await.unwrap(), 2);

        let records = transport
            .published_json("/tenants/demo/devices/test-device/events/device_shadow/jsonarray")
            .await;
        let first = &records[0][0];
        assert_eq!(first["sequence"], json!(1));
        assert_eq!(first["timestamp"], json!(5_000));
        assert_eq!(first["Status"], json!("Device is Up!"));
        assert_eq!(first["Hardware_Type"], json!("esp32"));
        assert_eq!(first["Software_Version"], json!("1.2.3"));
        assert!(first["Uptime"].is_u64());

        let keys: Vec<&String> = first.as_object().unwrap().keys().collect();
        assert_eq!(
            keys,
            vec![
                "timestamp",
                "sequence",
                "Status",
                "Software_Type",
                "Software_Version",
                "Hardware_Type",
                "Hardware_Version",
                "Uptime"
            ]
        );
    }
}
