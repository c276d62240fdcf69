//! Action status reporting
//!
//! [`ActionStatusReporter`] turns Progress/Completed/Failed reports into
//! status messages on the device's status topic. [`ActionHandle`] wraps a
//! reporter for one action and enforces its state machine, so at most one
//! terminal status is ever published per action id.

use crate::context::DeviceContext;
use crate::error::PublishError;
use crate::observability::metrics;
use crate::protocol::{ActionState, ActionStatus};
use crate::transport::Transport;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, warn};

/// Failure message for a dispatched action whose handle was dropped unfinished
pub const ABANDONED_ACTION_MESSAGE: &str = "Action abandoned before completion";

/// Status reporting errors
#[derive(Debug, Error)]
pub enum StatusError {
    #[error("Progress percentage {0} is outside 0-100")]
    InvalidPercentage(u8),
    #[error("Action {action_id} already reported a terminal status")]
    AlreadyTerminal { action_id: String },
    #[error(transparent)]
    Publish(#[from] PublishError),
}

/// Publishes status messages for actions
#[async_trait]
pub trait StatusReporter: Send + Sync {
    async fn report_progress(&self, action_id: &str, percentage: u8) -> Result<(), StatusError>;
    async fn report_completed(&self, action_id: &str) -> Result<(), StatusError>;
    async fn report_failed(&self, action_id: &str, message: &str) -> Result<(), StatusError>;
}

/// Status reporter publishing through the device transport
pub struct ActionStatusReporter<T: Transport + 'static> {
    context: DeviceContext<T>,
}

impl<T: Transport + 'static> ActionStatusReporter<T> {
    pub fn new(context: DeviceContext<T>) -> Self {
        Self { context }
    }

    async fn publish_status(&self, status: &ActionStatus) -> Result<(), PublishError> {
        let topic = self.context.topics().action_status();
        let payload = serde_json::to_vec(status).map_err(PublishError::Serialization)?;

        match self.context.transport().publish(&topic, payload).await {
            Ok(()) => {
                metrics().status_published();
                debug!(
                    action_id = %status.id,
                    status = ?status.status,
                    "Published action status"
                );
                Ok(())
            }
            Err(e) => {
                metrics().status_publish_failed();
                warn!(
                    action_id = %status.id,
                    status = ?status.status,
                    error = %e,
                    "Failed to publish action status"
                );
                Err(PublishError::transport(&topic, e))
            }
        }
    }
}

#[async_trait]
impl<T: Transport + 'static> StatusReporter for ActionStatusReporter<T> {
    async fn report_progress(&self, action_id: &str, percentage: u8) -> Result<(), StatusError> {
        if percentage > 100 {
            return Err(StatusError::InvalidPercentage(percentage));
        }
        let status = ActionStatus::progress(action_id, percentage, self.context.now_millis());
        Ok(self.publish_status(&status).await?)
    }

    async fn report_completed(&self, action_id: &str) -> Result<(), StatusError> {
        let status = ActionStatus::completed(action_id, self.context.now_millis());
        Ok(self.publish_status(&status).await?)
    }

    async fn report_failed(&self, action_id: &str, message: &str) -> Result<(), StatusError> {
        let status = ActionStatus::failed(action_id, message, self.context.now_millis());
        Ok(self.publish_status(&status).await?)
    }
}

/// Ids of actions that have not reached a terminal status yet
#[derive(Debug, Clone, Default)]
pub struct InFlightActions {
    ids: Arc<Mutex<HashSet<String>>>,
}

impl InFlightActions {
    pub fn new() -> Self {
        Self::default()
    }

    fn ids(&self) -> MutexGuard<'_, HashSet<String>> {
        self.ids.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns false if the id is already in flight
    pub fn try_insert(&self, action_id: &str) -> bool {
        self.ids().insert(action_id.to_string())
    }

    pub fn remove(&self, action_id: &str) {
        self.ids().remove(action_id);
    }

    pub fn contains(&self, action_id: &str) -> bool {
        self.ids().contains(action_id)
    }

    pub fn len(&self) -> usize {
        self.ids().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// State shared by every clone of one [`ActionHandle`]
struct HandleShared {
    action_id: Arc<str>,
    reporter: Arc<dyn StatusReporter>,
    state: Mutex<ActionState>,
    in_flight: Option<InFlightActions>,
}

impl HandleShared {
    fn state(&self) -> MutexGuard<'_, ActionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for HandleShared {
    /// The last clone went away without a terminal report. For dispatched
    /// actions the id is released and one Failed status is sent.
    fn drop(&mut self) {
        let Some(in_flight) = &self.in_flight else {
            return;
        };
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if state.is_terminal() {
            return;
        }
        *state = ActionState::Failed;
        in_flight.remove(&self.action_id);

        warn!(action_id = %self.action_id, "Action handle dropped without a terminal status");
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let reporter = self.reporter.clone();
        let action_id = self.action_id.clone();
        runtime.spawn(async move {
            if let Err(e) = reporter
                .report_failed(&action_id, ABANDONED_ACTION_MESSAGE)
                .await
            {
                warn!(action_id = %action_id, error = %e, "Could not report abandoned action");
            }
        });
    }
}

/// Per-action reporting capability handed to handlers.
///
/// Clones share state, so a handle moved to a worker task and the copy kept
/// by the dispatcher agree on whether the action has finished. If every clone
/// of a dispatched action's handle is dropped before a terminal report, the
/// action is failed with [`ABANDONED_ACTION_MESSAGE`].
#[derive(Clone)]
pub struct ActionHandle {
    shared: Arc<HandleShared>,
}

impl std::fmt::Debug for ActionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionHandle")
            .field("action_id", &self.shared.action_id)
            .field("state", &self.state())
            .finish()
    }
}

impl ActionHandle {
    pub fn new(action_id: &str, reporter: Arc<dyn StatusReporter>) -> Self {
        Self::with_tracking(action_id, reporter, None)
    }

    /// Handle whose id leaves `in_flight` once a terminal status is reported
    pub(crate) fn tracked(
        action_id: &str,
        reporter: Arc<dyn StatusReporter>,
        in_flight: InFlightActions,
    ) -> Self {
        Self::with_tracking(action_id, reporter, Some(in_flight))
    }

    fn with_tracking(
        action_id: &str,
        reporter: Arc<dyn StatusReporter>,
        in_flight: Option<InFlightActions>,
    ) -> Self {
        Self {
            shared: Arc::new(HandleShared {
                action_id: Arc::from(action_id),
                reporter,
                state: Mutex::new(ActionState::Received),
                in_flight,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.shared.action_id
    }

    pub fn state(&self) -> ActionState {
        *self.shared.state()
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    pub(crate) fn mark_executing(&self) {
        let mut state = self.shared.state();
        if *state == ActionState::Received {
            *state = ActionState::Executing;
        }
    }

    /// Move to `next`, refusing to leave a terminal state
    fn transition(&self, next: ActionState) -> Result<(), StatusError> {
        {
            let mut state = self.shared.state();
            if state.is_terminal() {
                return Err(StatusError::AlreadyTerminal {
                    action_id: self.shared.action_id.to_string(),
                });
            }
            *state = next;
        }

        if next.is_terminal() {
            if let Some(in_flight) = &self.shared.in_flight {
                in_flight.remove(&self.shared.action_id);
            }
        }
        Ok(())
    }

    /// Report intermediate progress (0-100)
    pub async fn progress(&self, percentage: u8) -> Result<(), StatusError> {
        if percentage > 100 {
            return Err(StatusError::InvalidPercentage(percentage));
        }
        self.transition(ActionState::Executing)?;
        self.shared
            .reporter
            .report_progress(&self.shared.action_id, percentage)
            .await
    }

    /// Report successful completion; terminal
    pub async fn complete(&self) -> Result<(), StatusError> {
        self.transition(ActionState::Completed)?;
        self.shared
            .reporter
            .report_completed(&self.shared.action_id)
            .await
    }

    /// Report failure with a single error message; terminal
    pub async fn fail(&self, message: &str) -> Result<(), StatusError> {
        self.transition(ActionState::Failed)?;
        self.shared
            .reporter
            .report_failed(&self.shared.action_id, message)
            .await
    }
}
