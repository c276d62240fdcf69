//! Observability for the device runtime
//!
//! Structured logging setup plus an in-process metrics collector whose
//! snapshot is logged alongside telemetry.

pub mod logging;
pub mod metrics;

pub use logging::{init_default_logging, init_logging, parse_level, LogFormat, LoggingSettings};
pub use metrics::{metrics, MetricsCollector, MetricsSnapshot};

// Span macros for structured logging
pub use logging::{action_span, lifecycle_span, mqtt_span, telemetry_span};
