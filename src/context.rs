//! Shared device context
//!
//! Bundles the identity, transport, clock and telemetry sequence counters
//! that the action and telemetry subsystems need. Cloning is cheap; every
//! clone refers to the same transport and the same counters.

use crate::clock::{Clock, SystemClock};
use crate::config::DeviceConfig;
use crate::protocol::DeviceTopics;
use crate::telemetry::SequenceRegistry;
use crate::transport::Transport;
use std::sync::Arc;

pub struct DeviceContext<T: Transport> {
    config: Arc<DeviceConfig>,
    transport: Arc<T>,
    clock: Arc<dyn Clock>,
    topics: DeviceTopics,
    sequences: Arc<SequenceRegistry>,
}

impl<T: Transport> DeviceContext<T> {
    pub fn new(config: Arc<DeviceConfig>, transport: Arc<T>, clock: Arc<dyn Clock>) -> Self {
        let topics = DeviceTopics::new(&config.device.project_id, &config.device.id);
        Self {
            config,
            transport,
            clock,
            topics,
            sequences: Arc::new(SequenceRegistry::new()),
        }
    }

    /// Context using the system clock
    pub fn with_system_clock(config: Arc<DeviceConfig>, transport: Arc<T>) -> Self {
        Self::new(config, transport, Arc::new(SystemClock))
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn device_id(&self) -> &str {
        &self.config.device.id
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn topics(&self) -> &DeviceTopics {
        &self.topics
    }

    /// Per-stream sequence counters shared by every publisher on this device
    pub fn sequences(&self) -> &Arc<SequenceRegistry> {
        &self.sequences
    }

    /// Current wall-clock time in milliseconds since the Unix epoch
    pub fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }
}

impl<T: Transport> Clone for DeviceContext<T> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            transport: self.transport.clone(),
            clock: self.clock.clone(),
            topics: self.topics.clone(),
            sequences: self.sequences.clone(),
        }
    }
}
