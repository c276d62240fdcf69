//! Wire message types for Bytebeam device traffic
//!
//! Defines the inbound action command, the outbound action status and the
//! telemetry record carried inside a stream envelope.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// A remote command delivered to the device
///
/// # Examples
/// ```
/// use bytebeam_device::protocol::Action;
/// use serde_json::json;
///
/// let action = Action::parse(br#"{"id":"171","name":"reboot","payload":{"delay":5}}"#).unwrap();
/// assert_eq!(action.id, "171");
/// assert_eq!(action.name, "reboot");
/// assert_eq!(action.payload, json!({"delay": 5}));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Action {
    /// Cloud-assigned action identifier, echoed in every status
    pub id: String,
    /// Action name used to select a handler
    pub name: String,
    /// Arbitrary handler input
    #[serde(default)]
    pub payload: Value,
}

impl Action {
    /// Parse one inbound action message.
    ///
    /// The message must be a JSON object carrying string `id` and `name`
    /// fields. A missing `payload` is treated as `null`.
    pub fn parse(raw: &[u8]) -> Result<Self, ParseError> {
        let value: Value = serde_json::from_slice(raw).map_err(ParseError::InvalidJson)?;
        let Value::Object(mut object) = value else {
            return Err(ParseError::NotAnObject);
        };

        let id = take_string(&mut object, "id")?;
        let name = take_string(&mut object, "name")?;
        let payload = object.remove("payload").unwrap_or(Value::Null);

        Ok(Self { id, name, payload })
    }
}

fn take_string(object: &mut Map<String, Value>, field: &'static str) -> Result<String, ParseError> {
    match object.remove(field) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s),
        Some(Value::String(_)) => Err(ParseError::EmptyField(field)),
        Some(_) => Err(ParseError::WrongType(field)),
        None => Err(ParseError::MissingField(field)),
    }
}

/// Inbound action parse failures. A message that fails to parse has no
/// usable id, so no status can be addressed to it.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),
    #[error("Action message is not a JSON object")]
    NotAnObject,
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
    #[error("Field '{0}' must be a string")]
    WrongType(&'static str),
    #[error("Field '{0}' must not be empty")]
    EmptyField(&'static str),
    #[error("Telemetry envelope must be an array holding exactly one record")]
    MalformedEnvelope,
}

/// Status kinds published for an action
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StatusKind {
    Progress,
    Completed,
    Failed,
}

impl StatusKind {
    pub fn is_terminal(self) -> bool {
        matches!(self, StatusKind::Completed | StatusKind::Failed)
    }
}

/// Outbound action status
///
/// `progress` is only present on Progress updates and `errors` only on
/// Failed ones.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionStatus {
    pub id: String,
    pub status: StatusKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}

impl ActionStatus {
    pub fn progress(action_id: &str, percentage: u8, timestamp: i64) -> Self {
        Self {
            id: action_id.to_string(),
            status: StatusKind::Progress,
            progress: Some(percentage),
            errors: None,
            timestamp,
        }
    }

    pub fn completed(action_id: &str, timestamp: i64) -> Self {
        Self {
            id: action_id.to_string(),
            status: StatusKind::Completed,
            progress: None,
            errors: None,
            timestamp,
        }
    }

    pub fn failed(action_id: &str, message: &str, timestamp: i64) -> Self {
        Self {
            id: action_id.to_string(),
            status: StatusKind::Failed,
            progress: None,
            errors: Some(vec![message.to_string()]),
            timestamp,
        }
    }
}

/// Execution state of one action on the device.
///
/// `Received → Executing → {Completed | Failed}`; terminal states are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionState {
    Received,
    Executing,
    Completed,
    Failed,
}

impl ActionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ActionState::Completed | ActionState::Failed)
    }
}

/// One sequenced record on a named stream
///
/// Serializes as `{"timestamp": .., "sequence": .., <field>: <value>, ..}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetryRecord {
    /// Stream the record belongs to; carried by the topic, not the payload
    #[serde(skip)]
    pub stream: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    /// Per-stream sequence number, starting at 1
    pub sequence: u64,
    /// Caller-supplied fields
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl TelemetryRecord {
    /// Serialize the record wrapped in its single-element envelope array
    pub fn to_envelope(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(std::slice::from_ref(self))
    }

    /// Parse an envelope produced by [`TelemetryRecord::to_envelope`]
    pub fn from_envelope(stream: &str, raw: &[u8]) -> Result<Self, ParseError> {
        let mut records: Vec<TelemetryRecord> =
            serde_json::from_slice(raw).map_err(ParseError::InvalidJson)?;
        if records.len() != 1 {
            return Err(ParseError::MalformedEnvelope);
        }
        let mut record = records.remove(0);
        record.stream = stream.to_string();
        Ok(record)
    }
}
