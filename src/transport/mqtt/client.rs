//! Impure I/O operations for MQTT client
//!
//! This module owns the rumqttc client and event loop: connection
//! supervision, reconnection, resubscription and publish/subscribe.

use super::connection::{configure_mqtt_options, ConnectionState, MqttError, ReconnectConfig};
use super::health_monitor::{ConnectionEvent, HealthMonitor, ReconnectionDecision};
use super::message_handler::{EventRoute, ForwardError, MessageForwarder, MessageHandler};
use crate::config::DeviceConfig;
use crate::mqtt_span;
use crate::observability::metrics;
use crate::transport::{InboundMessage, Transport};
use async_trait::async_trait;
use rumqttc::v5::{mqttbytes::QoS, AsyncClient, EventLoop};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

const REQUEST_CHANNEL_CAPACITY: usize = 64;

/// MQTT transport client for a single Bytebeam device
pub struct MqttClient {
    device_id: String,
    config: DeviceConfig,
    client: Arc<Mutex<AsyncClient>>,
    event_loop: std::sync::Mutex<Option<EventLoop>>,
    event_loop_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
    state_rx: Option<watch::Receiver<ConnectionState>>,
    shutdown_tx: Option<watch::Sender<bool>>,
    reconnect_config: ReconnectConfig,
    message_forwarder: Arc<Mutex<MessageForwarder>>,
}

impl MqttClient {
    pub fn new(config: &DeviceConfig) -> Result<Self, MqttError> {
        let (client, event_loop) = Self::create_connection(config)?;

        Ok(MqttClient {
            device_id: config.device.id.clone(),
            config: config.clone(),
            client: Arc::new(Mutex::new(client)),
            event_loop: std::sync::Mutex::new(Some(event_loop)),
            event_loop_handle: std::sync::Mutex::new(None),
            state_rx: None,
            shutdown_tx: None,
            reconnect_config: ReconnectConfig::default(),
            message_forwarder: Arc::new(Mutex::new(MessageForwarder::new())),
        })
    }

    /// Replace the reconnection policy. Must be called before `connect`.
    pub fn with_reconnect_config(mut self, reconnect_config: ReconnectConfig) -> Self {
        self.reconnect_config = reconnect_config;
        self
    }

    fn create_connection(config: &DeviceConfig) -> Result<(AsyncClient, EventLoop), MqttError> {
        let mqtt_options = configure_mqtt_options(config)?;
        Ok(AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY))
    }

    /// Wait for connection confirmation (ConnAck) with timeout
    async fn wait_for_connection_confirmation(
        mut state_rx: watch::Receiver<ConnectionState>,
        timeout: Duration,
    ) -> Result<(), MqttError> {
        let timeout_result = tokio::time::timeout(timeout, async {
            loop {
                if state_rx.changed().await.is_err() {
                    return Err(MqttError::ConnectionFailedStr(
                        "State channel closed".to_string(),
                    ));
                }
                match *state_rx.borrow() {
                    ConnectionState::Connected => return Ok(()),
                    ConnectionState::Disconnected(ref reason) => {
                        return Err(MqttError::ConnectionFailedStr(reason.clone()));
                    }
                    ConnectionState::PermanentlyDisconnected(ref reason) => {
                        return Err(MqttError::ConnectionFailedStr(format!(
                            "Permanently disconnected: {reason}"
                        )));
                    }
                    ConnectionState::Connecting | ConnectionState::Reconnecting(_) => continue,
                }
            }
        })
        .await;

        match timeout_result {
            Ok(result) => result,
            Err(_) => Err(MqttError::ConnectionFailedStr(
                "ConnAck timeout - no connection confirmation received".to_string(),
            )),
        }
    }

    /// Connect to the broker.
    ///
    /// Spawns the event loop supervisor and returns only once the broker has
    /// acknowledged the session.
    pub async fn connect(&mut self) -> Result<(), MqttError> {
        let event_loop = self
            .event_loop
            .get_mut()
            .ok()
            .and_then(|slot| slot.take())
            .ok_or_else(|| {
                MqttError::ConnectionFailedStr("Event loop already started".to_string())
            })?;

        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.state_rx = Some(state_rx.clone());
        self.shutdown_tx = Some(shutdown_tx);

        let supervisor = EventLoopSupervisor {
            config: self.config.clone(),
            client: self.client.clone(),
            forwarder: self.message_forwarder.clone(),
            state_tx,
            shutdown_rx,
            reconnect_config: self.reconnect_config.clone(),
            reconnect_attempts: 0,
        };

        info!(
            device_id = %self.device_id,
            broker = %self.config.mqtt.broker_url,
            "Starting MQTT event loop"
        );
        let handle = tokio::spawn(supervisor.run(event_loop));
        if let Ok(mut slot) = self.event_loop_handle.lock() {
            *slot = Some(handle);
        }

        let connection_timeout =
            HealthMonitor::calculate_connection_timeout(&self.reconnect_config);
        Self::wait_for_connection_confirmation(state_rx, connection_timeout)
            .instrument(mqtt_span!(device_id = %self.device_id, operation = "connect"))
            .await
    }

    /// Disconnect from the broker and stop the event loop supervisor
    pub async fn disconnect(&self) -> Result<(), MqttError> {
        {
            let client = self.client.lock().await;
            if let Err(e) = client.try_disconnect() {
                debug!(target: "mqtt_transport", "Disconnect request not queued: {}", e);
            }
        }

        if let Some(shutdown_tx) = &self.shutdown_tx {
            let _ = shutdown_tx.send(true);
        }

        let handle = self
            .event_loop_handle
            .lock()
            .ok()
            .and_then(|mut slot| slot.take());
        if let Some(handle) = handle {
            match tokio::time::timeout(Duration::from_secs(2), handle).await {
                Ok(Ok(())) => info!("Event loop task shut down gracefully"),
                Ok(Err(e)) if !e.is_cancelled() => {
                    warn!("Event loop task ended with error: {}", e);
                }
                Err(_) => warn!("Event loop task didn't shut down in time, abandoning it"),
                _ => {}
            }
        }

        info!(device_id = %self.device_id, "MQTT client disconnected");
        Ok(())
    }

    /// Get current connection state
    /// Returns None if connection hasn't been established yet
    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.state_rx.as_ref().map(|rx| rx.borrow().clone())
    }

    /// Check if the connection is permanently disconnected
    pub fn is_permanently_disconnected(&self) -> bool {
        matches!(
            self.connection_state(),
            Some(ConnectionState::PermanentlyDisconnected(_))
        )
    }

    /// Check connection state before publishing
    fn check_connection_state(&self) -> Result<(), MqttError> {
        let Some(state_rx) = self.state_rx.as_ref() else {
            return Err(MqttError::NotConnected {
                state: ConnectionState::Disconnected("Never connected".to_string()),
            });
        };

        let current_state = state_rx.borrow().clone();
        if !HealthMonitor::can_publish(&current_state) {
            return Err(MqttError::NotConnected {
                state: current_state,
            });
        }

        Ok(())
    }

    /// Publish with QoS 1, never retained
    pub async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), MqttError> {
        self.check_connection_state()?;

        let client = self.client.lock().await;
        client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| MqttError::PublishFailed(Box::new(e)))?;

        debug!(target: "mqtt_transport", "Published to {}", topic);
        Ok(())
    }

    /// Register a receiver for `topic` and subscribe to it.
    ///
    /// When the session is not up yet the subscription is sent on the next
    /// ConnAck, the same way subscriptions are restored after a reconnect.
    pub async fn subscribe(
        &self,
        topic: &str,
        sender: mpsc::Sender<InboundMessage>,
    ) -> Result<(), MqttError> {
        let current_state = self.connection_state();
        if let Some(state @ ConnectionState::PermanentlyDisconnected(_)) = &current_state {
            return Err(MqttError::NotConnected {
                state: state.clone(),
            });
        }

        self.message_forwarder.lock().await.register(topic, sender);

        match current_state {
            Some(state) if HealthMonitor::can_subscribe(&state) => {
                info!("Subscribing to topic: {}", topic);
                let client = self.client.lock().await;
                client
                    .subscribe(topic, QoS::AtLeastOnce)
                    .await
                    .map_err(|e| {
                        MqttError::SubscriptionFailed(
                            format!("Failed to subscribe to {topic}: {e}").into(),
                        )
                    })?;
            }
            _ => {
                debug!(target: "mqtt_transport", "Subscription to {} deferred until ConnAck", topic);
            }
        }

        Ok(())
    }
}

/// Drives the rumqttc event loop, tracks connection state and reconnects
struct EventLoopSupervisor {
    config: DeviceConfig,
    client: Arc<Mutex<AsyncClient>>,
    forwarder: Arc<Mutex<MessageForwarder>>,
    state_tx: watch::Sender<ConnectionState>,
    shutdown_rx: watch::Receiver<bool>,
    reconnect_config: ReconnectConfig,
    reconnect_attempts: u32,
}

impl EventLoopSupervisor {
    async fn run(mut self, mut event_loop: EventLoop) {
        loop {
            tokio::select! {
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping MQTT event loop");
                        break;
                    }
                }

                event_result = event_loop.poll() => {
                    let keep_running = match event_result {
                        Ok(event) => {
                            let route = MessageHandler::route_mqtt_event(&event);
                            self.process_event_route(route, &mut event_loop).await
                        }
                        Err(e) => {
                            self.publish_state(ConnectionEvent::NetworkError(e.to_string()));
                            self.attempt_reconnection(&mut event_loop).await
                        }
                    };
                    if !keep_running {
                        break;
                    }
                }
            }
        }
        info!(device_id = %self.config.device.id, "MQTT event loop stopped");
    }

    fn publish_state(&self, event: ConnectionEvent) {
        let _ = self
            .state_tx
            .send(HealthMonitor::determine_next_state(event));
    }

    /// Returns true to continue the loop, false to stop
    async fn process_event_route(&mut self, route: EventRoute, event_loop: &mut EventLoop) -> bool {
        match route {
            EventRoute::ConnectionAcknowledged => {
                self.publish_state(ConnectionEvent::ConnAckReceived);
                self.reconnect_attempts = 0;
                self.resubscribe().await;
                true
            }
            EventRoute::MessageReceived {
                topic,
                payload,
                retain,
            } => {
                debug!(target: "mqtt_transport", "Received MQTT message on topic: {}", topic);
                metrics().mqtt_message_received();
                if MessageHandler::should_process_message(&topic, retain) {
                    match self.forwarder.lock().await.forward(&topic, payload) {
                        Ok(()) => {}
                        Err(e @ ForwardError::ReceiverFull(_)) => {
                            warn!(target: "mqtt_transport", "{}", e);
                            metrics().mqtt_message_dropped();
                        }
                        Err(e) => error!("Failed to forward inbound message: {}", e),
                    }
                }
                true
            }
            EventRoute::Disconnected => {
                self.publish_state(ConnectionEvent::DisconnectedByBroker);
                self.attempt_reconnection(event_loop).await
            }
            EventRoute::SubscriptionConfirmed {
                packet_id,
                rejected,
            } => {
                if rejected > 0 {
                    warn!(packet_id, rejected, "Broker rejected subscription");
                } else {
                    debug!(target: "mqtt_transport", "Subscription {} confirmed", packet_id);
                }
                true
            }
            EventRoute::InfrastructureEvent(event_str) => {
                debug!(target: "mqtt_transport", "MQTT event: {}", event_str);
                true
            }
            EventRoute::OutgoingEvent => true,
        }
    }

    async fn resubscribe(&self) {
        let topics = self.forwarder.lock().await.topics();
        let client = self.client.lock().await;
        for topic in topics {
            if let Err(e) = client.subscribe(&topic, QoS::AtLeastOnce).await {
                error!("Failed to subscribe to {}: {}", topic, e);
            } else {
                debug!(target: "mqtt_transport", "Subscribed to: {}", topic);
            }
        }
    }

    /// Sleep for `delay_ms`; returns false if shutdown was requested meanwhile
    async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay_ms: u64) -> bool {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                !(changed.is_err() || *shutdown_rx.borrow())
            }
            _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => true,
        }
    }

    /// Returns true to continue the loop, false to stop
    async fn attempt_reconnection(&mut self, event_loop: &mut EventLoop) -> bool {
        let decision = HealthMonitor::should_attempt_reconnection(
            self.reconnect_attempts,
            &self.reconnect_config,
            *self.shutdown_rx.borrow(),
        );

        match decision {
            ReconnectionDecision::Proceed { attempt, delay_ms } => {
                self.reconnect_attempts = attempt;
                self.publish_state(ConnectionEvent::ReconnectionStarted(attempt));
                info!(attempt, delay_ms, "Scheduling MQTT reconnection");

                if !Self::interruptible_sleep(self.shutdown_rx.clone(), delay_ms).await {
                    info!("Shutdown signal received during reconnection delay");
                    return false;
                }

                match MqttClient::create_connection(&self.config) {
                    Ok((new_client, new_event_loop)) => {
                        *event_loop = new_event_loop;
                        *self.client.lock().await = new_client;
                    }
                    Err(e) => error!("Failed to create new connection: {}", e),
                }
                true
            }
            ReconnectionDecision::AbortShutdownRequested => {
                info!("Shutdown signal received, stopping reconnection");
                false
            }
            ReconnectionDecision::AbortMaxAttemptsExceeded { max_attempts } => {
                self.publish_state(ConnectionEvent::PermanentFailure(format!(
                    "Max reconnection attempts ({max_attempts}) exceeded"
                )));
                false
            }
        }
    }
}

#[async_trait]
impl Transport for MqttClient {
    type Error = MqttError;

    async fn connect(&mut self) -> Result<(), Self::Error> {
        MqttClient::connect(self).await
    }

    async fn disconnect(&self) -> Result<(), Self::Error> {
        MqttClient::disconnect(self).await
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), Self::Error> {
        MqttClient::publish(self, topic, payload).await
    }

    async fn subscribe(
        &self,
        topic: &str,
        sender: mpsc::Sender<InboundMessage>,
    ) -> Result<(), Self::Error> {
        MqttClient::subscribe(self, topic, sender).await
    }

    fn is_connected(&self) -> bool {
        matches!(self.connection_state(), Some(ConnectionState::Connected))
    }

    fn connection_state(&self) -> Option<ConnectionState> {
        MqttClient::connection_state(self)
    }

    fn is_permanently_disconnected(&self) -> bool {
        MqttClient::is_permanently_disconnected(self)
    }
}

impl Drop for MqttClient {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = &self.shutdown_tx {
            let _ = shutdown_tx.send(true);
        }

        // Drop cannot await; call disconnect() for a graceful shutdown
        if let Some(handle) = self
            .event_loop_handle
            .get_mut()
            .ok()
            .and_then(|slot| slot.take())
        {
            handle.abort();
        }
    }
}
