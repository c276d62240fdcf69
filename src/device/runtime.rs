//! Device runtime: startup and shutdown sequence
//!
//! `start` connects the transport, subscribes to the actions topic and spawns
//! the dispatch loop and the device shadow loop. `shutdown` stops both and
//! disconnects.

use crate::actions::builtin::{UpdateConfigHandler, UPDATE_CONFIG_ACTION};
use crate::actions::{ActionDispatcher, ActionRegistry, ActionStatusReporter, RegistryError};
use crate::clock::{Clock, SystemClock};
use crate::config::DeviceConfig;
use crate::context::DeviceContext;
use crate::lifecycle_span;
use crate::observability::metrics;
use crate::telemetry::{DeviceShadow, TelemetryPublisher};
use crate::transport::Transport;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn, Instrument};

/// Inbound actions buffered between the transport and the dispatcher
pub const ACTION_CHANNEL_CAPACITY: usize = 32;

/// Runtime lifecycle errors
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Handler registration failed: {0}")]
    Registry(#[from] RegistryError),
    #[error("Device runtime already started")]
    AlreadyStarted,
}

struct RunningDevice<T: Transport + 'static> {
    transport: Arc<T>,
    telemetry: Arc<TelemetryPublisher<T>>,
    dispatcher: Arc<ActionDispatcher>,
    dispatch_handle: JoinHandle<()>,
    shadow_handle: JoinHandle<()>,
}

/// Device runtime with injected transport and action handlers
pub struct DeviceRuntime<T: Transport + 'static> {
    config: Arc<DeviceConfig>,
    clock: Arc<dyn Clock>,
    transport: Option<T>,
    registry: Option<ActionRegistry>,
    running: Option<RunningDevice<T>>,
}

impl<T: Transport + 'static> DeviceRuntime<T> {
    pub fn new(config: DeviceConfig, transport: T, registry: ActionRegistry) -> Self {
        Self::with_clock(config, transport, registry, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: DeviceConfig,
        transport: T,
        registry: ActionRegistry,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            clock,
            transport: Some(transport),
            registry: Some(registry),
            running: None,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.config.device.id
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Shared telemetry publisher, available once started
    pub fn telemetry(&self) -> Option<Arc<TelemetryPublisher<T>>> {
        self.running.as_ref().map(|r| r.telemetry.clone())
    }

    pub fn dispatcher(&self) -> Option<&Arc<ActionDispatcher>> {
        self.running.as_ref().map(|r| &r.dispatcher)
    }

    pub fn transport(&self) -> Option<&Arc<T>> {
        self.running.as_ref().map(|r| &r.transport)
    }

    /// Connect, subscribe and spawn the background tasks
    pub async fn start(&mut self) -> Result<(), LifecycleError> {
        let span = lifecycle_span!(device_id = %self.config.device.id, phase = "start");
        self.start_tasks().instrument(span).await
    }

    async fn start_tasks(&mut self) -> Result<(), LifecycleError> {
        info!("Starting device runtime");

        let (Some(mut transport), Some(mut registry)) =
            (self.transport.take(), self.registry.take())
        else {
            return Err(LifecycleError::AlreadyStarted);
        };

        transport
            .connect()
            .await
            .map_err(|e| LifecycleError::Transport(Box::new(e)))?;
        info!("Transport connected");

        let transport = Arc::new(transport);
        let context = DeviceContext::new(self.config.clone(), transport.clone(), self.clock.clone());

        let (period_tx, period_rx) = watch::channel(Duration::from_millis(
            self.config.telemetry.publish_period_ms,
        ));
        registry.register(UPDATE_CONFIG_ACTION, UpdateConfigHandler::new(period_tx))?;
        info!(actions = ?registry.list_actions(), "Action handlers registered");

        let reporter = Arc::new(ActionStatusReporter::new(context.clone()));
        let dispatcher = Arc::new(ActionDispatcher::new(Arc::new(registry), reporter));

        let (action_tx, action_rx) = mpsc::channel(ACTION_CHANNEL_CAPACITY);
        let actions_topic = context.topics().actions();
        transport
            .subscribe(&actions_topic, action_tx)
            .await
            .map_err(|e| LifecycleError::Transport(Box::new(e)))?;
        info!(topic = %actions_topic, "Subscribed to actions");

        let dispatch_handle = tokio::spawn(dispatcher.clone().run(action_rx));

        let telemetry = Arc::new(TelemetryPublisher::new(context));
        let shadow = DeviceShadow::new(
            self.config.telemetry.shadow_stream.clone(),
            self.config.device_info.clone(),
        );
        let shadow_handle = Self::spawn_shadow_task(telemetry.clone(), shadow, period_rx);

        self.running = Some(RunningDevice {
            transport,
            telemetry,
            dispatcher,
            dispatch_handle,
            shadow_handle,
        });

        info!("Device runtime started");
        Ok(())
    }

    /// Publish the device shadow every period, following period updates
    fn spawn_shadow_task(
        telemetry: Arc<TelemetryPublisher<T>>,
        shadow: DeviceShadow,
        mut period_rx: watch::Receiver<Duration>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut period = *period_rx.borrow_and_update();
            let mut ticker = interval_at(Instant::now(), period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut watching = true;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match shadow.publish(&telemetry).await {
                            Ok(sequence) => debug!(sequence, "Published device shadow"),
                            Err(e) => warn!(error = %e, "Failed to publish device shadow"),
                        }
                        if let Ok(snapshot) = serde_json::to_string(&metrics().snapshot()) {
                            debug!(metrics = %snapshot, "Metrics snapshot");
                        }
                    }
                    changed = period_rx.changed(), if watching => {
                        if changed.is_err() {
                            watching = false;
                            continue;
                        }
                        period = *period_rx.borrow_and_update();
                        ticker = interval_at(Instant::now() + period, period);
                        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                        info!(period_ms = period.as_millis() as u64, "Shadow publish period changed");
                    }
                }
            }
        })
    }

    /// Stop background tasks and disconnect
    pub async fn shutdown(&mut self) -> Result<(), LifecycleError> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };
        info!(device_id = %self.config.device.id, "Shutting down device runtime");

        for (name, handle) in [
            ("shadow", running.shadow_handle),
            ("dispatch", running.dispatch_handle),
        ] {
            handle.abort();
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    error!(task = name, error = %e, "Background task ended with error");
                }
            }
        }

        running
            .transport
            .disconnect()
            .await
            .map_err(|e| LifecycleError::Transport(Box::new(e)))?;

        info!("Device runtime stopped");
        Ok(())
    }

    /// True once the transport gave up reconnecting
    pub fn is_permanently_disconnected(&self) -> bool {
        match (&self.running, &self.transport) {
            (Some(running), _) => running.transport.is_permanently_disconnected(),
            (None, Some(transport)) => transport.is_permanently_disconnected(),
            (None, None) => false,
        }
    }
}
