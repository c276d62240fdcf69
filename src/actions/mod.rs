//! Remote action handling
//!
//! Handlers are registered by action name in an [`ActionRegistry`] at
//! startup. The [`dispatcher`] routes each inbound action to its handler and
//! drives [`status`] reporting for it.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

pub mod builtin;
pub mod dispatcher;
pub mod status;

pub use dispatcher::{ActionDispatcher, DispatchOutcome};
pub use status::{
    ActionHandle, ActionStatusReporter, InFlightActions, StatusError, StatusReporter,
    ABANDONED_ACTION_MESSAGE,
};

/// Failure message published for actions with no registered handler
pub const UNSUPPORTED_ACTION_MESSAGE: &str = "Action not supported";

/// How a handler finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Execution {
    /// Work is done; the dispatcher reports Completed unless the handler
    /// already reported a terminal status through its handle
    Finished,
    /// The handle was moved to an independent worker which reports the
    /// terminal status itself
    Detached,
}

/// A handler for one action name
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// JSON Schema the payload must satisfy before `execute` is called
    fn payload_schema(&self) -> Option<Value> {
        None
    }

    async fn execute(&self, payload: Value, handle: ActionHandle)
        -> Result<Execution, HandlerError>;
}

/// Errors returned by action handlers; each becomes one Failed status
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
    #[error("{0}")]
    ExecutionFailed(String),
}

impl HandlerError {
    pub fn execution_failed<S: Into<String>>(message: S) -> Self {
        Self::ExecutionFailed(message.into())
    }
}

/// Handler registration errors
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Action name cannot be empty")]
    EmptyName,
    #[error("Action already registered: {0}")]
    DuplicateAction(String),
    #[error("Invalid payload schema for {action}: {message}")]
    SchemaError { action: String, message: String },
}

struct RegisteredAction {
    handler: Arc<dyn ActionHandler>,
    validator: Option<jsonschema::Validator>,
}

/// Mapping from action name to handler, populated at startup
#[derive(Default)]
pub struct ActionRegistry {
    actions: HashMap<String, RegisteredAction>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under `name`, compiling its payload schema if any
    pub fn register<H>(&mut self, name: &str, handler: H) -> Result<(), RegistryError>
    where
        H: ActionHandler + 'static,
    {
        self.register_arc(name, Arc::new(handler))
    }

    pub fn register_arc(
        &mut self,
        name: &str,
        handler: Arc<dyn ActionHandler>,
    ) -> Result<(), RegistryError> {
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.actions.contains_key(name) {
            return Err(RegistryError::DuplicateAction(name.to_string()));
        }

        let validator = handler
            .payload_schema()
            .map(|schema| {
                jsonschema::validator_for(&schema).map_err(|e| RegistryError::SchemaError {
                    action: name.to_string(),
                    message: e.to_string(),
                })
            })
            .transpose()?;

        self.actions
            .insert(name.to_string(), RegisteredAction { handler, validator });
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ActionHandler>> {
        self.actions.get(name).map(|entry| entry.handler.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    /// Check `payload` against the schema registered for `name`
    pub fn validate_payload(&self, name: &str, payload: &Value) -> Result<(), HandlerError> {
        let Some(validator) = self.actions.get(name).and_then(|e| e.validator.as_ref()) else {
            return Ok(());
        };

        validator.validate(payload).map_err(|errors| {
            let error_messages: Vec<String> = errors
                .map(|e| format!("At '{}': {}", e.instance_path, e))
                .collect();
            HandlerError::InvalidPayload(error_messages.join("; "))
        })
    }

    /// Registered action names, sorted
    pub fn list_actions(&self) -> Vec<String> {
        let mut names: Vec<String> = self.actions.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct NoopHandler;

    #[async_trait]
    impl ActionHandler for NoopHandler {
        async fn execute(
            &self,
            _payload: Value,
            _handle: ActionHandle,
        ) -> Result<Execution, HandlerError> {
            Ok(Execution::Finished)
        }
    }

    struct SchemaHandler(Value);

    #[async_trait]
    impl ActionHandler for SchemaHandler {
        fn payload_schema(&self) -> Option<Value> {
            Some(self.0.clone())
        }

        async fn execute(
            &self,
            _payload: Value,
            _handle: ActionHandle,
        ) -> Result<Execution, HandlerError> {
            Ok(Execution::Finished)
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = ActionRegistry::new();
        registry.register("reboot", NoopHandler).unwrap();
        registry.register("update_firmware", NoopHandler).unwrap();

        assert!(registry.get("reboot").is_some());
        assert!(registry.contains("update_firmware"));
        assert!(registry.get("unknown").is_none());
        assert_eq!(registry.list_actions(), vec!["reboot", "update_firmware"]);
    }

    #[test]
    fn test_register_rejects_duplicates_and_empty_names() {
        let mut registry = ActionRegistry::new();
        registry.register("reboot", NoopHandler).unwrap();

        assert!(matches!(
            registry.register("reboot", NoopHandler),
            Err(RegistryError::DuplicateAction(name)) if name == "reboot"
        ));
        assert!(matches!(
            registry.register("", NoopHandler),
            Err(RegistryError::EmptyName)
        ));
    }

    #[test]
    fn test_invalid_schema_rejected_at_registration() {
        let mut registry = ActionRegistry::new();
        let result = registry.register("bad", SchemaHandler(json!({"type": 12})));
        assert!(matches!(result, Err(RegistryError::SchemaError { .. })));
        assert!(!registry.contains("bad"));
    }

    #[test]
    fn test_validate_payload() {
        let mut registry = ActionRegistry::new();
        registry
            .register(
                "set_led",
                SchemaHandler(json!({
                    "type": "object",
                    "properties": {"on": {"type": "boolean"}},
                    "required": ["on"]
                })),
            )
            .unwrap();
        registry.register("reboot", NoopHandler).unwrap();

        assert!(registry.validate_payload("set_led", &json!({"on": true})).is_ok());
        let err = registry
            .validate_payload("set_led", &json!({"on": "yes"}))
            .unwrap_err();
        assert!(matches!(err, HandlerError::InvalidPayload(_)));
        assert!(err.to_string().contains("/on"));

        // Handlers without a schema accept anything
        assert!(registry.validate_payload("reboot", &json!(null)).is_ok());
    }

    #[test]
    fn test_handler_error_display() {
        assert_eq!(
            HandlerError::execution_failed("sensor timeout").to_string(),
            "sensor timeout"
        );
        assert_eq!(
            HandlerError::InvalidPayload("missing url".to_string()).to_string(),
            "Invalid payload: missing url"
        );
    }
}
