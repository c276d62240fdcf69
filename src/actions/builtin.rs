//! Built-in action handlers
//!
//! Registered by the device runtime alongside application handlers.

use super::{ActionHandle, ActionHandler, Execution, HandlerError};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

pub const UPDATE_CONFIG_ACTION: &str = "update_config";

/// `update_config` handler - changes the device shadow publish period
pub struct UpdateConfigHandler {
    publish_period: watch::Sender<Duration>,
}

impl UpdateConfigHandler {
    pub fn new(publish_period: watch::Sender<Duration>) -> Self {
        Self { publish_period }
    }

    /// Extract the new period (pure function)
    fn parse_period(payload: &Value) -> Result<Duration, HandlerError> {
        payload
            .get("publish_period_ms")
            .and_then(Value::as_u64)
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .ok_or_else(|| {
                HandlerError::InvalidPayload(
                    "publish_period_ms must be a positive integer".to_string(),
                )
            })
    }
}

#[async_trait]
impl ActionHandler for UpdateConfigHandler {
    fn payload_schema(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "publish_period_ms": {
                    "type": "integer",
                    "minimum": 1
                }
            },
            "required": ["publish_period_ms"]
        }))
    }

    async fn execute(&self, payload: Value, _handle: ActionHandle) -> Result<Execution, HandlerError> {
        let period = Self::parse_period(&payload)?;

        self.publish_period.send(period).map_err(|_| {
            HandlerError::execution_failed("Device shadow is not running")
        })?;

        info!(period_ms = period.as_millis() as u64, "Updated shadow publish period");
        Ok(Execution::Finished)
    }
}
