//! Thread-safe metrics collection system
//!
//! Provides atomic counters and mutex-protected collections for tracking
//! action dispatch, status reporting, telemetry publishing and inbound MQTT
//! traffic.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

/// Samples kept per action for timing statistics
const MAX_TIMING_SAMPLES: usize = 1000;

/// Thread-safe metrics collector using atomics and mutexes
pub struct MetricsCollector {
    actions_received: AtomicU64,
    actions_rejected: AtomicU64,
    actions_duplicate: AtomicU64,
    actions_unsupported: AtomicU64,
    actions_completed: AtomicU64,
    actions_failed: AtomicU64,
    malformed_actions: AtomicU64,
    status_published: AtomicU64,
    status_publish_failures: AtomicU64,
    mqtt_messages_received: AtomicU64,
    mqtt_messages_dropped: AtomicU64,
    started_at: AtomicU64,

    action_stats: Mutex<HashMap<String, ActionExecutionStats>>,
    stream_stats: Mutex<HashMap<String, StreamStats>>,
}

#[derive(Debug, Clone, Default)]
struct ActionExecutionStats {
    executions: u64,
    failures: u64,
    execution_times: Vec<u64>,
}

#[derive(Debug, Clone, Default)]
struct StreamStats {
    published: u64,
    failures: u64,
    last_sequence: u64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            actions_received: AtomicU64::new(0),
            actions_rejected: AtomicU64::new(0),
            actions_duplicate: AtomicU64::new(0),
            actions_unsupported: AtomicU64::new(0),
            actions_completed: AtomicU64::new(0),
            actions_failed: AtomicU64::new(0),
            malformed_actions: AtomicU64::new(0),
            status_published: AtomicU64::new(0),
            status_publish_failures: AtomicU64::new(0),
            mqtt_messages_received: AtomicU64::new(0),
            mqtt_messages_dropped: AtomicU64::new(0),
            started_at: AtomicU64::new(current_timestamp()),
            action_stats: Mutex::new(HashMap::new()),
            stream_stats: Mutex::new(HashMap::new()),
        }
    }

    // Action dispatch metrics
    pub fn action_received(&self) {
        self.actions_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn action_malformed(&self) {
        self.malformed_actions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn action_duplicate(&self) {
        self.actions_duplicate.fetch_add(1, Ordering::Relaxed);
    }

    pub fn action_unsupported(&self) {
        self.actions_unsupported.fetch_add(1, Ordering::Relaxed);
    }

    pub fn action_rejected(&self) {
        self.actions_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a finished handler run for `action_name`
    pub fn action_executed(&self, action_name: &str, duration: Duration, success: bool) {
        if success {
            self.actions_completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.actions_failed.fetch_add(1, Ordering::Relaxed);
        }

        if let Ok(mut stats) = self.action_stats.lock() {
            let entry = stats.entry(action_name.to_string()).or_default();
            entry.executions += 1;
            if !success {
                entry.failures += 1;
            }
            entry.execution_times.push(duration.as_millis() as u64);
            if entry.execution_times.len() > MAX_TIMING_SAMPLES {
                entry.execution_times.remove(0);
            }
        }
    }

    // Status reporting metrics
    pub fn status_published(&self) {
        self.status_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn status_publish_failed(&self) {
        self.status_publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    // Telemetry metrics
    pub fn telemetry_published(&self, stream: &str, sequence: u64) {
        if let Ok(mut stats) = self.stream_stats.lock() {
            let entry = stats.entry(stream.to_string()).or_default();
            entry.published += 1;
            entry.last_sequence = entry.last_sequence.max(sequence);
        }
    }

    pub fn telemetry_publish_failed(&self, stream: &str) {
        if let Ok(mut stats) = self.stream_stats.lock() {
            stats.entry(stream.to_string()).or_default().failures += 1;
        }
    }

    // MQTT metrics
    pub fn mqtt_message_received(&self) {
        self.mqtt_messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Inbound message discarded because its receiver had no capacity
    pub fn mqtt_message_dropped(&self) {
        self.mqtt_messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Reset all metrics (useful for testing)
    pub fn reset(&self) {
        for counter in [
            &self.actions_received,
            &self.actions_rejected,
            &self.actions_duplicate,
            &self.actions_unsupported,
            &self.actions_completed,
            &self.actions_failed,
            &self.malformed_actions,
            &self.status_published,
            &self.status_publish_failures,
            &self.mqtt_messages_received,
            &self.mqtt_messages_dropped,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.started_at.store(current_timestamp(), Ordering::Relaxed);
        if let Ok(mut stats) = self.action_stats.lock() {
            stats.clear();
        }
        if let Ok(mut stats) = self.stream_stats.lock() {
            stats.clear();
        }
    }

    /// Take a point-in-time copy of every metric
    pub fn snapshot(&self) -> MetricsSnapshot {
        let now = current_timestamp();

        let actions = self
            .action_stats
            .lock()
            .map(|stats| {
                stats
                    .iter()
                    .map(|(name, s)| {
                        let avg = if s.execution_times.is_empty() {
                            0.0
                        } else {
                            s.execution_times.iter().sum::<u64>() as f64
                                / s.execution_times.len() as f64
                        };
                        let p95 = {
                            let mut sorted = s.execution_times.clone();
                            sorted.sort_unstable();
                            percentile(&sorted, 95.0)
                        };
                        (
                            name.clone(),
                            ActionStatsSnapshot {
                                executions: s.executions,
                                failures: s.failures,
                                avg_execution_time_ms: avg,
                                p95_execution_time_ms: p95,
                            },
                        )
                    })
                    .collect()
            })
            .unwrap_or_default();

        let streams = self
            .stream_stats
            .lock()
            .map(|stats| {
                stats
                    .iter()
                    .map(|(name, s)| {
                        (
                            name.clone(),
                            StreamStatsSnapshot {
                                published: s.published,
                                failures: s.failures,
                                last_sequence: s.last_sequence,
                            },
                        )
                    })
                    .collect()
            })
            .unwrap_or_default();

        MetricsSnapshot {
            timestamp: now,
            uptime_seconds: now.saturating_sub(self.started_at.load(Ordering::Relaxed)),
            actions_received: self.actions_received.load(Ordering::Relaxed),
            actions_rejected: self.actions_rejected.load(Ordering::Relaxed),
            actions_duplicate: self.actions_duplicate.load(Ordering::Relaxed),
            actions_unsupported: self.actions_unsupported.load(Ordering::Relaxed),
            actions_completed: self.actions_completed.load(Ordering::Relaxed),
            actions_failed: self.actions_failed.load(Ordering::Relaxed),
            malformed_actions: self.malformed_actions.load(Ordering::Relaxed),
            status_published: self.status_published.load(Ordering::Relaxed),
            status_publish_failures: self.status_publish_failures.load(Ordering::Relaxed),
            mqtt_messages_received: self.mqtt_messages_received.load(Ordering::Relaxed),
            mqtt_messages_dropped: self.mqtt_messages_dropped.load(Ordering::Relaxed),
            actions,
            streams,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time view of the collector
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: u64,
    pub uptime_seconds: u64,
    pub actions_received: u64,
    pub actions_rejected: u64,
    pub actions_duplicate: u64,
    pub actions_unsupported: u64,
    pub actions_completed: u64,
    pub actions_failed: u64,
    pub malformed_actions: u64,
    pub status_published: u64,
    pub status_publish_failures: u64,
    pub mqtt_messages_received: u64,
    pub mqtt_messages_dropped: u64,
    pub actions: HashMap<String, ActionStatsSnapshot>,
    pub streams: HashMap<String, StreamStatsSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionStatsSnapshot {
    pub executions: u64,
    pub failures: u64,
    pub avg_execution_time_ms: f64,
    pub p95_execution_time_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamStatsSnapshot {
    pub published: u64,
    pub failures: u64,
    pub last_sequence: u64,
}

/// Nearest-rank percentile over sorted samples
fn percentile(sorted: &[u64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1] as f64
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
