//! Topic construction and identifier validation for Bytebeam device traffic
//!
//! Every topic a device touches is scoped under its tenant (project) and
//! device id. Identifiers are interpolated into topic paths, so they must
//! never contain MQTT separators or wildcards.

use thiserror::Error;

pub fn canonicalize_topic(topic: &str) -> String {
    if topic.is_empty() {
        return "/".to_string();
    }

    // Single leading slash
    let mut result = if topic.starts_with('/') {
        topic.to_string()
    } else {
        format!("/{topic}")
    };

    // Collapse multiple consecutive slashes
    while result.contains("//") {
        result = result.replace("//", "/");
    }

    // No trailing slash (except for root "/")
    if result.len() > 1 && result.ends_with('/') {
        result.pop();
    }

    result
}

/// Validate an identifier that will be embedded in a topic path
/// (device id, project id or stream name).
pub fn validate_identifier(kind: IdentifierKind, value: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::Empty(kind));
    }

    for ch in value.chars() {
        if !ch.is_ascii_alphanumeric() && ch != '.' && ch != '_' && ch != '-' {
            return Err(ValidationError::InvalidChar(kind, ch));
        }
    }

    Ok(())
}

/// What an identifier names, for error messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierKind {
    DeviceId,
    ProjectId,
    Stream,
}

impl std::fmt::Display for IdentifierKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdentifierKind::DeviceId => write!(f, "device id"),
            IdentifierKind::ProjectId => write!(f, "project id"),
            IdentifierKind::Stream => write!(f, "stream name"),
        }
    }
}

/// Identifier validation errors
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("{0} cannot be empty")]
    Empty(IdentifierKind),
    #[error("{0} contains invalid character: '{1}'")]
    InvalidChar(IdentifierKind, char),
}

/// Topics derived from one device identity
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceTopics {
    base: String,
}

impl DeviceTopics {
    pub fn new(project_id: &str, device_id: &str) -> Self {
        Self {
            base: canonicalize_topic(&format!("/tenants/{project_id}/devices/{device_id}")),
        }
    }

    /// Inbound actions: `/tenants/{project}/devices/{device}/actions`
    pub fn actions(&self) -> String {
        format!("{}/actions", self.base)
    }

    /// Outbound action status: `/tenants/{project}/devices/{device}/action/status`
    pub fn action_status(&self) -> String {
        format!("{}/action/status", self.base)
    }

    /// Outbound stream records: `/tenants/{project}/devices/{device}/events/{stream}/jsonarray`
    pub fn stream(&self, stream: &str) -> String {
        canonicalize_topic(&format!("{}/events/{stream}/jsonarray", self.base))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn canonicalize_topic_is_idempotent(topic in ".*") {
            let first = canonicalize_topic(&topic);
            let second = canonicalize_topic(&first);
            prop_assert_eq!(first, second);
        }

        #[test]
        fn canonicalize_topic_has_no_consecutive_or_trailing_slashes(topic in ".*") {
            let result = canonicalize_topic(&topic);
            prop_assert!(result.starts_with('/'));
            prop_assert!(!result.contains("//"), "consecutive slashes: {}", result);
            if result.len() > 1 {
                prop_assert!(!result.ends_with('/'), "trailing slash: {}", result);
            }
        }

        #[test]
        fn valid_identifiers_pass(id in "[a-zA-Z0-9._-]{1,64}") {
            prop_assert!(validate_identifier(IdentifierKind::Stream, &id).is_ok());
        }

        #[test]
        fn identifiers_with_separators_fail(
            prefix in "[a-z]{0,8}",
            sep in prop::sample::select(vec!['/', '+', '#', ' ']),
            suffix in "[a-z]{0,8}",
        ) {
            let id = format!("{prefix}{sep}{suffix}");
            prop_assert_eq!(
                validate_identifier(IdentifierKind::DeviceId, &id),
                Err(ValidationError::InvalidChar(IdentifierKind::DeviceId, sep))
            );
        }
    }

    #[test]
    fn test_edge_cases() {
        assert_eq!(canonicalize_topic(""), "/");
        assert_eq!(canonicalize_topic("//"), "/");
        assert_eq!(canonicalize_topic("a/b/c/"), "/a/b/c");
        assert_eq!(canonicalize_topic("//a//b//c//"), "/a/b/c");
    }

    #[test]
    fn test_device_topics() {
        let topics = DeviceTopics::new("demo", "42");
        assert_eq!(topics.actions(), "/tenants/demo/devices/42/actions");
        assert_eq!(topics.action_status(), "/tenants/demo/devices/42/action/status");
        assert_eq!(
            topics.stream("sht_stream"),
            "/tenants/demo/devices/42/events/sht_stream/jsonarray"
        );
    }

    #[test]
    fn test_empty_identifier_error() {
        assert_eq!(
            validate_identifier(IdentifierKind::ProjectId, ""),
            Err(ValidationError::Empty(IdentifierKind::ProjectId))
        );
        assert_eq!(
            ValidationError::Empty(IdentifierKind::ProjectId).to_string(),
            "project id cannot be empty"
        );
    }
}
