//! Error types shared across the device runtime
//!
//! Each subsystem owns its error enum; [`DeviceError`] aggregates them for
//! callers that drive the whole runtime.

use crate::actions::{HandlerError, RegistryError, StatusError};
use crate::config::ConfigError;
use crate::device::LifecycleError;
use crate::protocol::ParseError;
use crate::telemetry::EnvelopeError;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Main error type for device runtime operations
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Malformed action: {0}")]
    Parse(#[from] ParseError),

    #[error("Action handler error: {0}")]
    Handler(#[from] HandlerError),

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("Status error: {0}")]
    Status(#[from] StatusError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("Transport error: {0}")]
    Transport(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Failure to put one message on the wire
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Invalid telemetry record: {0}")]
    Envelope(#[from] EnvelopeError),

    #[error("Failed to serialize message: {0}")]
    Serialization(#[source] serde_json::Error),

    #[error("Failed to publish to {topic}: {source}")]
    Transport {
        topic: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl PublishError {
    pub(crate) fn transport<E>(topic: &str, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Transport {
            topic: topic.to_string(),
            source: Box::new(source),
        }
    }
}

/// Result type for device runtime operations
pub type DeviceResult<T> = Result<T, DeviceError>;

const MAX_ERROR_MESSAGE_LEN: usize = 500;
const TRUNCATE_SUFFIX: &str = "...[truncated]";

static SECRET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(password|passwd|token|secret|api[_-]?key|private[_-]?key)\s*[=:]\s*\S+")
        .expect("secret pattern is valid")
});

static SECRET_PATH_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/[a-zA-Z0-9._/-]+/(secrets?|\.ssh|\.aws|\.config)/[a-zA-Z0-9._/-]+")
        .expect("secret path pattern is valid")
});

/// Sanitize a handler failure message before it leaves the device.
///
/// Credential assignments (`password=`, `token:`, `api_key=` ...) and
/// secret-looking paths are redacted and the result is capped at 500 bytes.
pub fn sanitize_error_message(message: &str) -> String {
    let sanitized = SECRET_PATTERN.replace_all(message, "${1}=***");
    let mut sanitized = SECRET_PATH_PATTERN
        .replace_all(&sanitized, "/***REDACTED***/")
        .into_owned();

    if sanitized.len() > MAX_ERROR_MESSAGE_LEN {
        let mut cut = MAX_ERROR_MESSAGE_LEN - TRUNCATE_SUFFIX.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized.truncate(cut);
        sanitized.push_str(TRUNCATE_SUFFIX);
    }

    sanitized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_sanitization() {
        let sanitized =
            sanitize_error_message("Failed to authenticate: password=secret123 token=abc456");

        assert!(!sanitized.contains("secret123"));
        assert!(!sanitized.contains("abc456"));
        assert!(sanitized.contains("password=***"));
        assert!(sanitized.contains("token=***"));
    }

    #[test]
    fn test_long_message_truncation() {
        let long_message = "x".repeat(600);
        let sanitized = sanitize_error_message(&long_message);

        assert!(sanitized.len() <= 500);
        assert!(sanitized.ends_with("...[truncated]"));
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let long_message = "é".repeat(400);
        let sanitized = sanitize_error_message(&long_message);

        assert!(sanitized.len() <= 500);
        assert!(sanitized.ends_with("...[truncated]"));
    }

    #[test]
    fn test_file_path_redaction() {
        let message = "Failed to read /home/user/.ssh/id_rsa and /etc/secrets/api.key";
        let sanitized = sanitize_error_message(message);

        assert!(sanitized.contains("/***REDACTED***/"));
        assert!(!sanitized.contains("/home/user/.ssh/id_rsa"));
    }

    #[test]
    fn test_sanitize_case_insensitive() {
        let sanitized = sanitize_error_message("PASSWORD=secret123 Token=abc API_KEY=xyz");

        assert!(!sanitized.contains("secret123"));
        assert!(!sanitized.contains("abc"));
        assert!(!sanitized.contains("xyz"));
    }

    #[test]
    fn test_sanitize_with_colons() {
        let sanitized = sanitize_error_message("password: secret123 token: abc456");

        assert!(!sanitized.contains("secret123"));
        assert!(!sanitized.contains("abc456"));
    }

    #[test]
    fn test_plain_message_unchanged() {
        assert_eq!(sanitize_error_message("sensor timeout"), "sensor timeout");
        assert_eq!(sanitize_error_message(""), "");
    }

    #[test]
    fn test_words_containing_key_are_not_secrets() {
        for message in [
            "missing key: temperature",
            "monkey: banana not found",
            "tokens: 3 remaining",
            "key=value pairs expected",
        ] {
            assert_eq!(sanitize_error_message(message), message);
        }
    }

    #[test]
    fn test_exactly_500_chars_not_truncated() {
        let message = "x".repeat(500);
        let sanitized = sanitize_error_message(&message);
        assert_eq!(sanitized.len(), 500);
        assert!(!sanitized.contains("truncated"));
    }

    #[test]
    fn test_publish_error_display() {
        let err = PublishError::transport(
            "/tenants/demo/devices/42/action/status",
            std::io::Error::new(std::io::ErrorKind::NotConnected, "not connected"),
        );
        assert_eq!(
            err.to_string(),
            "Failed to publish to /tenants/demo/devices/42/action/status: not connected"
        );
    }
}
