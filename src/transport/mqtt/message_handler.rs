//! Pure message routing and inbound forwarding for MQTT events
//!
//! Routing decisions are pure functions over rumqttc events; the forwarder
//! hands accepted messages to whichever subscriber registered the topic.

use crate::transport::InboundMessage;
use rumqttc::v5::mqttbytes::v5::{Packet, SubscribeReasonCode};
use rumqttc::v5::Event;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Determine if an inbound message should be forwarded (pure function)
    pub fn should_process_message(topic: &str, retain: bool) -> bool {
        // Retained messages are stale commands from a previous session
        if retain {
            debug!("Ignoring retained message on topic: {}", topic);
            return false;
        }
        true
    }

    /// Route MQTT event to appropriate handler (pure routing decision)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
                Packet::Publish(publish) => EventRoute::MessageReceived {
                    topic: String::from_utf8_lossy(&publish.topic).to_string(),
                    payload: publish.payload.to_vec(),
                    retain: publish.retain,
                },
                Packet::Disconnect(_) => EventRoute::Disconnected,
                Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                    packet_id: suback.pkid,
                    rejected: suback
                        .return_codes
                        .iter()
                        .filter(|code| !matches!(code, SubscribeReasonCode::Success(_)))
                        .count(),
                },
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone)]
pub enum EventRoute {
    /// Connection acknowledged - ready to publish/subscribe
    ConnectionAcknowledged,
    /// Message received on subscribed topic
    MessageReceived {
        topic: String,
        payload: Vec<u8>,
        retain: bool,
    },
    /// MQTT broker disconnected
    Disconnected,
    /// Subscription confirmed; `rejected` counts refused filters
    SubscriptionConfirmed { packet_id: u16, rejected: usize },
    /// Infrastructure event (PingResp, etc.)
    InfrastructureEvent(String),
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}

/// Forwards inbound messages to the subscriber registered for their topic
#[derive(Default)]
pub struct MessageForwarder {
    routes: HashMap<String, mpsc::Sender<InboundMessage>>,
}

impl MessageForwarder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the receiver for a topic
    pub fn register(&mut self, topic: &str, sender: mpsc::Sender<InboundMessage>) {
        self.routes.insert(topic.to_string(), sender);
    }

    /// Topics with a registered receiver
    pub fn topics(&self) -> Vec<String> {
        self.routes.keys().cloned().collect()
    }

    /// Hand a message to its topic's receiver without waiting for capacity
    ///
    /// Runs on the event-loop poll path, so a full channel drops the message
    /// instead of stalling keep-alives and outgoing publishes.
    pub fn forward(&self, topic: &str, payload: Vec<u8>) -> Result<(), ForwardError> {
        let Some(sender) = self.routes.get(topic) else {
            warn!("Received message on unrouted topic {} - dropped", topic);
            return Err(ForwardError::Unrouted(topic.to_string()));
        };

        sender
            .try_send(InboundMessage {
                topic: topic.to_string(),
                payload,
            })
            .map_err(|e| match e {
                TrySendError::Full(_) => ForwardError::ReceiverFull(topic.to_string()),
                TrySendError::Closed(_) => ForwardError::ReceiverClosed(topic.to_string()),
            })
    }
}

/// Why an inbound message was not handed to its receiver
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ForwardError {
    #[error("No receiver registered for {0}")]
    Unrouted(String),
    #[error("Receiver for {0} is full - message dropped")]
    ReceiverFull(String),
    #[error("Receiver for {0} has been dropped")]
    ReceiverClosed(String),
}
