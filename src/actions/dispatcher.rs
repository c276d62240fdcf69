//! Inbound action dispatch
//!
//! Parses each inbound action message, routes it to the handler registered
//! for its name and turns the handler's outcome into exactly one terminal
//! status.

use super::status::{ActionHandle, InFlightActions, StatusError, StatusReporter};
use super::{ActionRegistry, Execution, UNSUPPORTED_ACTION_MESSAGE};
use crate::action_span;
use crate::error::sanitize_error_message;
use crate::observability::metrics;
use crate::protocol::{Action, ActionState};
use crate::transport::InboundMessage;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn, Instrument};

/// Failure message published when a handler panics
pub const HANDLER_PANIC_MESSAGE: &str = "Action handler panicked";

/// What happened to one inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Not a valid action; nothing was published
    Dropped,
    /// Same id as an action still in flight; nothing was published
    Duplicate,
    /// No handler registered; Failed was reported
    Unsupported,
    /// Payload failed schema validation; Failed was reported
    Rejected,
    Completed,
    Failed,
    /// Handler moved terminal reporting to a worker
    Detached,
}

pub struct ActionDispatcher {
    registry: Arc<ActionRegistry>,
    reporter: Arc<dyn StatusReporter>,
    in_flight: InFlightActions,
}

impl ActionDispatcher {
    pub fn new(registry: Arc<ActionRegistry>, reporter: Arc<dyn StatusReporter>) -> Self {
        Self {
            registry,
            reporter,
            in_flight: InFlightActions::new(),
        }
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    /// Ids of actions without a terminal status yet
    pub fn in_flight(&self) -> &InFlightActions {
        &self.in_flight
    }

    /// Handle one raw inbound action message
    pub async fn handle_incoming(&self, raw: &[u8]) -> DispatchOutcome {
        let action = match Action::parse(raw) {
            Ok(action) => action,
            Err(e) => {
                metrics().action_malformed();
                warn!(error = %e, bytes = raw.len(), "Dropping malformed action message");
                return DispatchOutcome::Dropped;
            }
        };
        metrics().action_received();

        let span = action_span!(action_id = %action.id, action = %action.name);
        self.dispatch(action).instrument(span).await
    }

    async fn dispatch(&self, action: Action) -> DispatchOutcome {
        if !self.in_flight.try_insert(&action.id) {
            metrics().action_duplicate();
            warn!("Dropping action whose id is already in flight");
            return DispatchOutcome::Duplicate;
        }

        let handle =
            ActionHandle::tracked(&action.id, self.reporter.clone(), self.in_flight.clone());

        let Some(handler) = self.registry.get(&action.name) else {
            metrics().action_unsupported();
            warn!("No handler registered for action");
            report_failure(&handle, UNSUPPORTED_ACTION_MESSAGE).await;
            return DispatchOutcome::Unsupported;
        };

        if let Err(e) = self.registry.validate_payload(&action.name, &action.payload) {
            metrics().action_rejected();
            warn!(error = %e, "Rejecting action payload");
            report_failure(&handle, &e.to_string()).await;
            return DispatchOutcome::Rejected;
        }

        info!("Executing action");
        handle.mark_executing();
        let started = Instant::now();

        let worker_handle = handle.clone();
        let payload = action.payload;
        let joined = tokio::spawn(
            async move { handler.execute(payload, worker_handle).await }
                .instrument(tracing::Span::current()),
        )
        .await;

        let outcome = match joined {
            Ok(Ok(Execution::Detached)) => {
                debug!("Handler detached; worker owns terminal reporting");
                return DispatchOutcome::Detached;
            }
            Ok(Ok(Execution::Finished)) => {
                if !handle.is_terminal() {
                    report_completion(&handle).await;
                }
                outcome_for(&handle)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Action handler failed");
                if handle.is_terminal() {
                    debug!("Handler already reported a terminal status");
                } else {
                    report_failure(&handle, &sanitize_error_message(&e.to_string())).await;
                }
                outcome_for(&handle)
            }
            Err(join_error) => {
                error!(error = %join_error, "Action handler task aborted");
                if !handle.is_terminal() {
                    report_failure(&handle, HANDLER_PANIC_MESSAGE).await;
                }
                outcome_for(&handle)
            }
        };

        metrics().action_executed(
            &action.name,
            started.elapsed(),
            outcome == DispatchOutcome::Completed,
        );
        outcome
    }

    /// Dispatch messages from `receiver` until the channel closes
    pub async fn run(self: Arc<Self>, mut receiver: mpsc::Receiver<InboundMessage>) {
        info!("Action dispatcher running");

        while let Some(message) = receiver.recv().await {
            let outcome = self.handle_incoming(&message.payload).await;
            debug!(topic = %message.topic, ?outcome, "Inbound action dispatched");
        }

        info!("Action dispatch loop ended");
    }
}

fn outcome_for(handle: &ActionHandle) -> DispatchOutcome {
    match handle.state() {
        ActionState::Completed => DispatchOutcome::Completed,
        _ => DispatchOutcome::Failed,
    }
}

async fn report_completion(handle: &ActionHandle) {
    match handle.complete().await {
        Ok(()) => info!("Action completed"),
        Err(e) => log_report_error(&e),
    }
}

async fn report_failure(handle: &ActionHandle, message: &str) {
    match handle.fail(message).await {
        Ok(()) => info!(error = %message, "Action failed"),
        Err(e) => log_report_error(&e),
    }
}

fn log_report_error(e: &StatusError) {
    match e {
        StatusError::AlreadyTerminal { .. } => debug!(error = %e, "Terminal status already sent"),
        _ => warn!(error = %e, "Could not publish action status"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{ActionHandler, HandlerError, ABANDONED_ACTION_MESSAGE};
    use crate::testing::mocks::{MockHandler, RecordingReporter};
    use async_trait::async_trait;
    use serde_json::{json, Value};

    fn dispatcher_with(
        registry: ActionRegistry,
    ) -> (ActionDispatcher, Arc<RecordingReporter>) {
        let reporter = Arc::new(RecordingReporter::new());
        let dispatcher = ActionDispatcher::new(Arc::new(registry), reporter.clone());
        (dispatcher, reporter)
    }

    #[tokio::test]
    async fn test_malformed_message_dropped_without_status() {
        let handler = MockHandler::succeeding();
        let mut registry = ActionRegistry::new();
        registry.register("reboot", handler.clone()).unwrap();
        let (dispatcher, reporter) = dispatcher_with(registry);

        let outcome = dispatcher
            .handle_incoming(br#"{"id":"abc123","payload":{}}"#)
            .await;

        assert_eq!(outcome, DispatchOutcome::Dropped);
        assert!(reporter.reports().is_empty());
        assert_eq!(handler.invocations(), 0);
    }

    #[tokio::test]
    async fn test_unsupported_action_fails_once() {
        let (dispatcher, reporter) = dispatcher_with(ActionRegistry::new());

        let outcome = dispatcher
            .handle_incoming(br#"{"id":"a7","name":"self_destruct","payload":null}"#)
            .await;

        assert_eq!(outcome, DispatchOutcome::Unsupported);
        assert_eq!(
            reporter.reports(),
            vec![("a7".to_string(), "Failed".to_string(), Some(UNSUPPORTED_ACTION_MESSAGE.to_string()))]
        );
        assert!(dispatcher.in_flight().is_empty());
    }

    #[tokio::test]
    async fn test_finished_handler_auto_completes() {
        let handler = MockHandler::succeeding();
        let mut registry = ActionRegistry::new();
        registry.register("reboot", handler.clone()).unwrap();
        let (dispatcher, reporter) = dispatcher_with(registry);

        let outcome = dispatcher
            .handle_incoming(br#"{"id":"a1","name":"reboot","payload":{"delay":5}}"#)
            .await;

        assert_eq!(outcome, DispatchOutcome::Completed);
        assert_eq!(handler.payloads(), vec![json!({"delay": 5})]);
        assert_eq!(reporter.terminal_count("a1"), 1);
        assert_eq!(reporter.kinds_for("a1"), vec!["Completed"]);
    }

    #[tokio::test]
    async fn test_handler_error_becomes_failed_status() {
        let mut registry = ActionRegistry::new();
        registry
            .register("read_sensor", MockHandler::failing("sensor timeout"))
            .unwrap();
        let (dispatcher, reporter) = dispatcher_with(registry);

        let outcome = dispatcher
            .handle_incoming(br#"{"id":"abc123","name":"read_sensor"}"#)
            .await;

        assert_eq!(outcome, DispatchOutcome::Failed);
        assert_eq!(
            reporter.reports(),
            vec![("abc123".to_string(), "Failed".to_string(), Some("sensor timeout".to_string()))]
        );
    }

    #[tokio::test]
    async fn test_self_reported_terminal_not_duplicated() {
        let mut registry = ActionRegistry::new();
        registry
            .register("flash", MockHandler::reports_failure_then_finishes("image corrupt"))
            .unwrap();
        let (dispatcher, reporter) = dispatcher_with(registry);

        let outcome = dispatcher
            .handle_incoming(br#"{"id":"f1","name":"flash"}"#)
            .await;

        assert_eq!(outcome, DispatchOutcome::Failed);
        assert_eq!(reporter.terminal_count("f1"), 1);
        assert_eq!(reporter.kinds_for("f1"), vec!["Progress", "Failed"]);
    }

    #[tokio::test]
    async fn test_panicking_handler_reported_and_dispatcher_stays_live() {
        let mut registry = ActionRegistry::new();
        registry.register("crash", MockHandler::panicking()).unwrap();
        registry.register("reboot", MockHandler::succeeding()).unwrap();
        let (dispatcher, reporter) = dispatcher_with(registry);

        let outcome = dispatcher
            .handle_incoming(br#"{"id":"p1","name":"crash"}"#)
            .await;
        assert_eq!(outcome, DispatchOutcome::Failed);
        assert_eq!(
            reporter.reports()[0].2.as_deref(),
            Some(HANDLER_PANIC_MESSAGE)
        );

        let next = dispatcher
            .handle_incoming(br#"{"id":"p2","name":"reboot"}"#)
            .await;
        assert_eq!(next, DispatchOutcome::Completed);
    }

    #[tokio::test]
    async fn test_schema_rejection_skips_handler() {
        struct LedHandler;

        #[async_trait]
        impl ActionHandler for LedHandler {
            fn payload_schema(&self) -> Option<Value> {
                Some(json!({
                    "type": "object",
                    "properties": {"on": {"type": "boolean"}},
                    "required": ["on"]
                }))
            }

            async fn execute(
                &self,
                _payload: Value,
                _handle: ActionHandle,
            ) -> Result<Execution, HandlerError> {
                panic!("must not run for an invalid payload");
            }
        }

        let mut registry = ActionRegistry::new();
        registry.register("set_led", LedHandler).unwrap();
        let (dispatcher, reporter) = dispatcher_with(registry);

        let outcome = dispatcher
            .handle_incoming(br#"{"id":"l1","name":"set_led","payload":{"on":"yes"}}"#)
            .await;

        assert_eq!(outcome, DispatchOutcome::Rejected);
        let reports = reporter.reports();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].2.as_deref().unwrap().starts_with("Invalid payload"));
    }

    #[tokio::test]
    async fn test_duplicate_in_flight_dropped() {
        let mut registry = ActionRegistry::new();
        registry.register("update_firmware", MockHandler::detaching()).unwrap();
        let (dispatcher, reporter) = dispatcher_with(registry);

        let raw = br#"{"id":"u1","name":"update_firmware"}"#;
        assert_eq!(dispatcher.handle_incoming(raw).await, DispatchOutcome::Detached);
        assert!(dispatcher.in_flight().contains("u1"));

        assert_eq!(dispatcher.handle_incoming(raw).await, DispatchOutcome::Duplicate);
        assert!(reporter.reports().is_empty());
    }

    #[tokio::test]
    async fn test_released_handle_fails_action_and_frees_id() {
        let handler = MockHandler::detaching();
        let mut registry = ActionRegistry::new();
        registry.register("update_firmware", handler.clone()).unwrap();
        let (dispatcher, reporter) = dispatcher_with(registry);

        let raw = br#"{"id":"u2","name":"update_firmware"}"#;
        assert_eq!(dispatcher.handle_incoming(raw).await, DispatchOutcome::Detached);
        handler.release_held();

        assert!(!dispatcher.in_flight().contains("u2"));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(
            reporter.reports(),
            vec![(
                "u2".to_string(),
                "Failed".to_string(),
                Some(ABANDONED_ACTION_MESSAGE.to_string())
            )]
        );
    }

    #[tokio::test]
    async fn test_abandoned_worker_allows_reissue() {
        let handler = MockHandler::abandoning();
        let mut registry = ActionRegistry::new();
        registry.register("update_firmware", handler.clone()).unwrap();
        let (dispatcher, reporter) = dispatcher_with(registry);

        let raw = br#"{"id":"u3","name":"update_firmware"}"#;
        assert_eq!(dispatcher.handle_incoming(raw).await, DispatchOutcome::Detached);

        tokio::time::timeout(std::time::Duration::from_secs(2), async {
            while reporter.terminal_count("u3") == 0 {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert!(dispatcher.in_flight().is_empty());
        assert_eq!(reporter.kinds_for("u3"), vec!["Failed"]);

        assert_eq!(dispatcher.handle_incoming(raw).await, DispatchOutcome::Detached);
        assert_eq!(handler.invocations(), 2);
    }

    #[tokio::test]
    async fn test_run_drains_channel() {
        let handler = MockHandler::succeeding();
        let mut registry = ActionRegistry::new();
        registry.register("reboot", handler.clone()).unwrap();
        let (dispatcher, reporter) = dispatcher_with(registry);

        let (tx, rx) = mpsc::channel(8);
        for id in ["r1", "r2", "r3"] {
            tx.send(InboundMessage {
                topic: "/tenants/demo/devices/test-device/actions".to_string(),
                payload: format!(r#"{{"id":"{id}","name":"reboot"}}"#).into_bytes(),
            })
            .await
            .unwrap();
        }
        drop(tx);

        Arc::new(dispatcher).run(rx).await;

        assert_eq!(handler.invocations(), 3);
        assert_eq!(reporter.reports().len(), 3);
    }
}
