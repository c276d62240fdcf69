//! Telemetry record construction
//!
//! [`RecordBuilder`] owns every field value of a record under construction.
//! Validation happens while fields are added; if any field is rejected the
//! builder and everything it holds is dropped together.

use crate::protocol::{TelemetryRecord, ValidationError};
use serde_json::{Map, Number, Value};
use thiserror::Error;

/// Field names the envelope itself uses
pub const RESERVED_FIELDS: [&str; 2] = ["timestamp", "sequence"];

/// Telemetry record construction errors
#[derive(Debug, Error, PartialEq)]
pub enum EnvelopeError {
    #[error("Invalid stream: {0}")]
    InvalidStream(#[from] ValidationError),
    #[error("Field name cannot be empty")]
    EmptyFieldName,
    #[error("Duplicate field: {0}")]
    DuplicateField(String),
    #[error("Field name is reserved: {0}")]
    ReservedField(String),
    #[error("Field {field} is not a finite number")]
    NonFiniteNumber { field: String },
}

/// A single telemetry field value
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Int(i64),
    UInt(u64),
    Bool(bool),
    Text(String),
    Json(Value),
}

impl FieldValue {
    fn into_json(self, field: &str) -> Result<Value, EnvelopeError> {
        match self {
            FieldValue::Float(f) => Number::from_f64(f).map(Value::Number).ok_or_else(|| {
                EnvelopeError::NonFiniteNumber {
                    field: field.to_string(),
                }
            }),
            FieldValue::Int(i) => Ok(Value::from(i)),
            FieldValue::UInt(u) => Ok(Value::from(u)),
            FieldValue::Bool(b) => Ok(Value::Bool(b)),
            FieldValue::Text(s) => Ok(Value::String(s)),
            FieldValue::Json(v) => Ok(v),
        }
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<f32> for FieldValue {
    fn from(value: f32) -> Self {
        FieldValue::Float(f64::from(value))
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        FieldValue::Int(i64::from(value))
    }
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> Self {
        FieldValue::UInt(value)
    }
}

impl From<u32> for FieldValue {
    fn from(value: u32) -> Self {
        FieldValue::UInt(u64::from(value))
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        FieldValue::Json(value)
    }
}

/// Validated field set for one telemetry record
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordBuilder {
    fields: Map<String, Value>,
}

impl RecordBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(name, value)` pairs, keeping their order
    pub fn from_fields<I, K, V>(fields: I) -> Result<Self, EnvelopeError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<FieldValue>,
    {
        fields
            .into_iter()
            .try_fold(Self::new(), |builder, (name, value)| builder.field(name, value))
    }

    /// Add one field
    pub fn field(
        mut self,
        name: impl Into<String>,
        value: impl Into<FieldValue>,
    ) -> Result<Self, EnvelopeError> {
        let name = name.into();
        if name.is_empty() {
            return Err(EnvelopeError::EmptyFieldName);
        }
        if RESERVED_FIELDS.contains(&name.as_str()) {
            return Err(EnvelopeError::ReservedField(name));
        }
        if self.fields.contains_key(&name) {
            return Err(EnvelopeError::DuplicateField(name));
        }

        let value = value.into().into_json(&name)?;
        self.fields.insert(name, value);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Stamp the fields with their timestamp and sequence number
    pub fn build(self, stream: &str, timestamp: i64, sequence: u64) -> TelemetryRecord {
        TelemetryRecord {
            stream: stream.to_string(),
            timestamp,
            sequence,
            fields: self.fields,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_keeps_field_order() {
        let record = RecordBuilder::from_fields([("temperature", 21.5), ("humidity", 42.0)])
            .unwrap()
            .build("sht_stream", 1000, 1);

        let keys: Vec<&String> = record.fields.keys().collect();
        assert_eq!(keys, vec!["temperature", "humidity"]);
        assert_eq!(record.sequence, 1);
    }

    #[test]
    fn test_mixed_value_types() {
        let record = RecordBuilder::new()
            .field("count", 3u32)
            .unwrap()
            .field("offset", -2i32)
            .unwrap()
            .field("ok", true)
            .unwrap()
            .field("label", "front-door")
            .unwrap()
            .field("location", json!({"lat": 12.9, "lon": 77.6}))
            .unwrap()
            .build("s", 1, 1);

        assert_eq!(record.fields["count"], json!(3));
        assert_eq!(record.fields["offset"], json!(-2));
        assert_eq!(record.fields["ok"], json!(true));
        assert_eq!(record.fields["label"], json!("front-door"));
        assert_eq!(record.fields["location"]["lat"], json!(12.9));
    }

    #[test]
    fn test_rejects_duplicate_field() {
        let err = RecordBuilder::from_fields([("a", 1i64), ("a", 2i64)]).unwrap_err();
        assert_eq!(err, EnvelopeError::DuplicateField("a".to_string()));
    }

    #[test]
    fn test_rejects_reserved_and_empty_names() {
        assert_eq!(
            RecordBuilder::new().field("sequence", 7u64).unwrap_err(),
            EnvelopeError::ReservedField("sequence".to_string())
        );
        assert_eq!(
            RecordBuilder::new().field("timestamp", 7u64).unwrap_err(),
            EnvelopeError::ReservedField("timestamp".to_string())
        );
        assert_eq!(
            RecordBuilder::new().field("", 1i64).unwrap_err(),
            EnvelopeError::EmptyFieldName
        );
    }

    #[test]
    fn test_rejects_non_finite_numbers() {
        let err = RecordBuilder::from_fields([("ok", 1.0), ("bad", f64::NAN)]).unwrap_err();
        assert_eq!(
            err,
            EnvelopeError::NonFiniteNumber {
                field: "bad".to_string()
            }
        );
        assert!(RecordBuilder::new()
            .field("inf", f64::INFINITY)
            .is_err());
    }
}
