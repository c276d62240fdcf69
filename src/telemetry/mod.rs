//! Sequenced telemetry publishing
//!
//! Each publish produces one record on a named stream. Records carry a
//! per-stream sequence number starting at 1 and are sent as a JSON array
//! holding exactly that record.

use crate::context::DeviceContext;
use crate::error::PublishError;
use crate::observability::metrics;
use crate::protocol::{validate_identifier, IdentifierKind};
use crate::telemetry_span;
use crate::transport::Transport;
use tracing::{debug, warn, Instrument};

pub mod envelope;
pub mod sequence;
pub mod shadow;

pub use envelope::{EnvelopeError, FieldValue, RecordBuilder, RESERVED_FIELDS};
pub use sequence::{SequenceRegistry, StreamSequence};
pub use shadow::DeviceShadow;

/// Publishes telemetry records through the device transport
///
/// Sequence counters live on the [`DeviceContext`], so publishers built from
/// clones of one context continue the same per-stream sequences.
pub struct TelemetryPublisher<T: Transport + 'static> {
    context: DeviceContext<T>,
}

impl<T: Transport + 'static> TelemetryPublisher<T> {
    pub fn new(context: DeviceContext<T>) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &DeviceContext<T> {
        &self.context
    }

    /// Publish one record on `stream` and return its sequence number.
    ///
    /// Fields are validated before a sequence number is taken, so invalid
    /// input never leaves a gap. A transport failure does: the number is
    /// consumed and the error is returned without retrying.
    ///
    /// ```no_run
    /// # async fn example(
    /// #     publisher: &bytebeam_device::telemetry::TelemetryPublisher<bytebeam_device::transport::MqttTransport>,
    /// # ) -> Result<(), bytebeam_device::error::PublishError> {
    /// let sequence = publisher
    ///     .publish("sht_stream", [("temperature", 21.5), ("humidity", 42.0)])
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn publish<I, K, V>(&self, stream: &str, fields: I) -> Result<u64, PublishError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<FieldValue>,
    {
        validate_identifier(IdentifierKind::Stream, stream).map_err(EnvelopeError::from)?;
        let builder = RecordBuilder::from_fields(fields)?;

        self.publish_fields(stream, builder)
            .instrument(telemetry_span!(stream = %stream))
            .await
    }

    async fn publish_fields(
        &self,
        stream: &str,
        builder: RecordBuilder,
    ) -> Result<u64, PublishError> {
        let topic = self.context.topics().stream(stream);

        // Held until the transport returns so records leave in sequence order
        let mut counter = self.context.sequences().lock(stream).await;
        let sequence = counter.advance();

        let record = builder.build(stream, self.context.now_millis(), sequence);
        let payload = record.to_envelope().map_err(PublishError::Serialization)?;

        match self.context.transport().publish(&topic, payload).await {
            Ok(()) => {
                metrics().telemetry_published(stream, sequence);
                debug!(sequence, "Published telemetry record");
                Ok(sequence)
            }
            Err(e) => {
                metrics().telemetry_publish_failed(stream);
                warn!(sequence, error = %e, "Failed to publish telemetry record");
                Err(PublishError::transport(&topic, e))
            }
        }
    }

    /// Last sequence number used on `stream`, 0 if nothing was published
    pub async fn last_sequence(&self, stream: &str) -> u64 {
        self.context.sequences().current(stream).await
    }

    /// Streams published to so far
    pub fn streams(&self) -> Vec<String> {
        self.context.sequences().streams()
    }
}
