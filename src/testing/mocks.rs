//! Mock implementations for testing
//!
//! Provides a recording transport, a manual clock, a recording status
//! reporter and scripted action handlers so the action and telemetry
//! pipelines can be exercised without a broker.

use crate::actions::{ActionHandle, ActionHandler, Execution, HandlerError};
use crate::actions::{StatusError, StatusReporter};
use crate::clock::Clock;
use crate::transport::{ConnectionState, InboundMessage, Transport};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

pub type PublishedMessage = (String, Vec<u8>);

#[derive(Debug, Error)]
#[error("Mock transport failure: {0}")]
pub struct MockTransportError(pub String);

/// Mock transport recording every publish and routing injected messages
/// to subscribers
#[derive(Debug, Default)]
pub struct MockTransport {
    pub published_messages: Arc<Mutex<Vec<PublishedMessage>>>,
    subscriptions: Arc<Mutex<HashMap<String, mpsc::Sender<InboundMessage>>>>,
    failing: AtomicBool,
    connected: AtomicBool,
    permanently_disconnected: AtomicBool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport whose connect and publish calls fail
    pub fn with_failure() -> Self {
        let transport = Self::default();
        transport.set_failing(true);
        transport
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_permanently_disconnected(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.permanently_disconnected.store(true, Ordering::SeqCst);
    }

    fn is_failing(&self) -> bool {
        self.failing.load(Ordering::SeqCst)
    }

    pub async fn get_published_messages(&self) -> Vec<PublishedMessage> {
        self.published_messages.lock().await.clone()
    }

    /// Payloads published on `topic`, in publish order
    pub async fn messages_on(&self, topic: &str) -> Vec<Vec<u8>> {
        self.published_messages
            .lock()
            .await
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    /// Payloads published on `topic`, parsed as JSON
    pub async fn published_json(&self, topic: &str) -> Vec<Value> {
        self.messages_on(topic)
            .await
            .iter()
            .filter_map(|payload| serde_json::from_slice(payload).ok())
            .collect()
    }

    /// Poll until at least `count` messages were published on `topic`
    pub async fn wait_for_messages(
        &self,
        topic: &str,
        count: usize,
        timeout: Duration,
    ) -> Vec<Vec<u8>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let messages = self.messages_on(topic).await;
            if messages.len() >= count || tokio::time::Instant::now() >= deadline {
                return messages;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Deliver an inbound message to the subscriber of `topic`.
    /// Returns false if nobody is subscribed.
    pub async fn deliver(&self, topic: &str, payload: impl Into<Vec<u8>>) -> bool {
        let sender = self.subscriptions.lock().await.get(topic).cloned();
        match sender {
            Some(sender) => sender
                .send(InboundMessage {
                    topic: topic.to_string(),
                    payload: payload.into(),
                })
                .await
                .is_ok(),
            None => false,
        }
    }

    pub async fn subscribed_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.subscriptions.lock().await.keys().cloned().collect();
        topics.sort();
        topics
    }

    pub async fn clear_history(&self) {
        self.published_messages.lock().await.clear();
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Error = MockTransportError;

    async fn connect(&mut self) -> Result<(), Self::Error> {
        if self.is_failing() {
            return Err(MockTransportError("Mock connection failure".to_string()));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), Self::Error> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), Self::Error> {
        if self.is_failing() {
            return Err(MockTransportError("Mock publish failure".to_string()));
        }
        self.published_messages
            .lock()
            .await
            .push((topic.to_string(), payload));
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        sender: mpsc::Sender<InboundMessage>,
    ) -> Result<(), Self::Error> {
        if self.permanently_disconnected.load(Ordering::SeqCst) {
            return Err(MockTransportError("Mock permanently disconnected".to_string()));
        }
        self.subscriptions
            .lock()
            .await
            .insert(topic.to_string(), sender);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && !self.is_failing()
    }

    fn connection_state(&self) -> Option<ConnectionState> {
        if self.permanently_disconnected.load(Ordering::SeqCst) {
            Some(ConnectionState::PermanentlyDisconnected(
                "Mock permanent disconnection".to_string(),
            ))
        } else if self.is_connected() {
            Some(ConnectionState::Connected)
        } else {
            Some(ConnectionState::Disconnected(
                "Mock disconnection".to_string(),
            ))
        }
    }

    fn is_permanently_disconnected(&self) -> bool {
        self.permanently_disconnected.load(Ordering::SeqCst)
    }
}

/// Clock returning whatever time the test sets
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now_millis: i64) -> Self {
        Self {
            now: AtomicI64::new(now_millis),
        }
    }

    pub fn set(&self, now_millis: i64) {
        self.now.store(now_millis, Ordering::SeqCst);
    }

    pub fn advance(&self, millis: i64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// One recorded status report: action id, status kind and failure message
pub type RecordedReport = (String, String, Option<String>);

/// Status reporter that records reports instead of publishing them
#[derive(Debug, Default)]
pub struct RecordingReporter {
    reports: std::sync::Mutex<Vec<RecordedReport>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, action_id: &str, kind: &str, message: Option<&str>) {
        if let Ok(mut reports) = self.reports.lock() {
            reports.push((
                action_id.to_string(),
                kind.to_string(),
                message.map(str::to_string),
            ));
        }
    }

    pub fn reports(&self) -> Vec<RecordedReport> {
        self.reports
            .lock()
            .map(|reports| reports.clone())
            .unwrap_or_default()
    }

    /// Status kinds reported for `action_id`, in order
    pub fn kinds_for(&self, action_id: &str) -> Vec<String> {
        self.reports()
            .into_iter()
            .filter(|(id, _, _)| id == action_id)
            .map(|(_, kind, _)| kind)
            .collect()
    }

    /// Number of Completed or Failed reports for `action_id`
    pub fn terminal_count(&self, action_id: &str) -> usize {
        self.kinds_for(action_id)
            .iter()
            .filter(|kind| kind.as_str() == "Completed" || kind.as_str() == "Failed")
            .count()
    }
}

#[async_trait]
impl StatusReporter for RecordingReporter {
    async fn report_progress(&self, action_id: &str, percentage: u8) -> Result<(), StatusError> {
        if percentage > 100 {
            return Err(StatusError::InvalidPercentage(percentage));
        }
        self.record(action_id, "Progress", None);
        Ok(())
    }

    async fn report_completed(&self, action_id: &str) -> Result<(), StatusError> {
        self.record(action_id, "Completed", None);
        Ok(())
    }

    async fn report_failed(&self, action_id: &str, message: &str) -> Result<(), StatusError> {
        self.record(action_id, "Failed", Some(message));
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum MockBehavior {
    Succeed,
    Fail(String),
    Panic,
    ReportFailure(String),
    Detach,
    DetachToWorker,
    Abandon,
}

/// Scripted action handler that records the payloads it is invoked with
#[derive(Debug, Clone)]
pub struct MockHandler {
    behavior: MockBehavior,
    payloads: Arc<std::sync::Mutex<Vec<Value>>>,
    held: Arc<std::sync::Mutex<Vec<ActionHandle>>>,
}

impl MockHandler {
    fn with_behavior(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            payloads: Arc::new(std::sync::Mutex::new(Vec::new())),
            held: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    /// Returns `Finished` without reporting
    pub fn succeeding() -> Self {
        Self::with_behavior(MockBehavior::Succeed)
    }

    /// Returns a handler error with `message`
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_behavior(MockBehavior::Fail(message.into()))
    }

    pub fn panicking() -> Self {
        Self::with_behavior(MockBehavior::Panic)
    }

    /// Reports 50% progress and Failed itself, then returns `Finished`
    pub fn reports_failure_then_finishes(message: impl Into<String>) -> Self {
        Self::with_behavior(MockBehavior::ReportFailure(message.into()))
    }

    /// Returns `Detached` and keeps the handle unreported until
    /// [`MockHandler::release_held`]
    pub fn detaching() -> Self {
        Self::with_behavior(MockBehavior::Detach)
    }

    /// Returns `Detached` after handing the handle to a worker that drops it
    /// without reporting
    pub fn abandoning() -> Self {
        Self::with_behavior(MockBehavior::Abandon)
    }

    /// Drop every handle kept by a `detaching` handler
    pub fn release_held(&self) {
        if let Ok(mut held) = self.held.lock() {
            held.clear();
        }
    }

    /// Returns `Detached` after spawning a worker that reports 50% progress
    /// and then Completed
    pub fn detaching_to_worker() -> Self {
        Self::with_behavior(MockBehavior::DetachToWorker)
    }

    pub fn invocations(&self) -> usize {
        self.payloads().len()
    }

    pub fn payloads(&self) -> Vec<Value> {
        self.payloads
            .lock()
            .map(|payloads| payloads.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ActionHandler for MockHandler {
    async fn execute(&self, payload: Value, handle: ActionHandle) -> Result<Execution, HandlerError> {
        if let Ok(mut payloads) = self.payloads.lock() {
            payloads.push(payload);
        }

        match &self.behavior {
            MockBehavior::Succeed => Ok(Execution::Finished),
            MockBehavior::Fail(message) => Err(HandlerError::execution_failed(message.clone())),
            MockBehavior::Panic => panic!("mock handler panic"),
            MockBehavior::ReportFailure(message) => {
                let _ = handle.progress(50).await;
                let _ = handle.fail(message).await;
                Ok(Execution::Finished)
            }
            MockBehavior::Detach => {
                if let Ok(mut held) = self.held.lock() {
                    held.push(handle);
                }
                Ok(Execution::Detached)
            }
            MockBehavior::Abandon => {
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    drop(handle);
                });
                Ok(Execution::Detached)
            }
            MockBehavior::DetachToWorker => {
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    let _ = handle.progress(50).await;
                    let _ = handle.complete().await;
                });
                Ok(Execution::Detached)
            }
        }
    }
}
