//! Tracker metrics.
//!
//! The library only records through the `metrics` facade. Binaries that want to see the numbers
//! install a recorder, e.g. with [`install_prometheus`].
//!
//! # Example
//!
//! ```rust,no_run
//! use salus_runtime::metrics::install_prometheus;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let handle = install_prometheus()?;
//! // ... run the tracker ...
//! println!("{}", handle.render());
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use salus_core::{EventType, PublishErrorKind, RegistryError};
use std::time::Duration;
use thiserror::Error;

pub use metrics::{counter, gauge, histogram};

/// Events appended to the pending queue, labelled by `event_type`.
pub const EVENTS_ENQUEUED: &str = "salus.events.enqueued";
/// Completed flushes.
pub const FLUSH_COMPLETED: &str = "salus.flush.completed";
/// Events published per successful flush.
pub const FLUSH_BATCH_SIZE: &str = "salus.flush.batch_size";
/// Failed flushes, labelled by `error`.
pub const FLUSH_FAILED: &str = "salus.flush.failed";
/// Events dropped because a flush aborted before publishing.
pub const FLUSH_DROPPED_EVENTS: &str = "salus.flush.dropped_events";
/// Publish requests answered by the worker.
pub const PUBLISH_SUCCEEDED: &str = "salus.publish.succeeded";
/// Publish requests that failed, labelled by `error_type`.
pub const PUBLISH_FAILED: &str = "salus.publish.failed";
/// Time spent in the transport per batch.
pub const PUBLISH_DURATION: &str = "salus.publish.duration_seconds";
/// Publish requests awaiting a response.
pub const GATEWAY_IN_FLIGHT: &str = "salus.gateway.in_flight";

/// Errors installing a metrics recorder.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build the exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install the recorder
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Install a Prometheus recorder and describe every tracker metric.
///
/// # Errors
///
/// Returns [`MetricsError`] if the exporter cannot be built or a recorder is already installed.
pub fn install_prometheus() -> Result<PrometheusHandle, MetricsError> {
    describe_metrics();

    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
        )
        .map_err(|e| MetricsError::Build(e.to_string()))?
        .install_recorder()
        .map_err(|e| MetricsError::Install(e.to_string()))
}

/// Register descriptions for every tracker metric with the installed recorder.
pub fn describe_metrics() {
    describe_counter!(EVENTS_ENQUEUED, "Events appended to the pending queue");
    describe_counter!(FLUSH_COMPLETED, "Flushes that committed state and published");
    describe_histogram!(FLUSH_BATCH_SIZE, "Events published per successful flush");
    describe_counter!(FLUSH_FAILED, "Flushes that resolved to an error");
    describe_counter!(
        FLUSH_DROPPED_EVENTS,
        "Events discarded because site state could not be loaded or committed"
    );
    describe_counter!(PUBLISH_SUCCEEDED, "Batches accepted by the transport");
    describe_counter!(PUBLISH_FAILED, "Batches rejected by the transport or the worker");
    describe_histogram!(PUBLISH_DURATION, "Time taken by the transport per batch");
    describe_gauge!(GATEWAY_IN_FLIGHT, "Publish requests awaiting a worker response");
}

/// Event manager recorder.
pub struct ManagerMetrics;

impl ManagerMetrics {
    /// Record an event appended to the queue.
    pub fn record_enqueued(event_type: EventType) {
        counter!(EVENTS_ENQUEUED, "event_type" => event_type.as_str()).increment(1);
    }

    /// Record a flush that resolved successfully.
    #[allow(clippy::cast_precision_loss)]
    pub fn record_flush(count: usize) {
        counter!(FLUSH_COMPLETED).increment(1);
        histogram!(FLUSH_BATCH_SIZE).record(count as f64);
    }

    /// Record a flush that resolved to `error`.
    pub fn record_flush_failure(error: &RegistryError) {
        let label = match error {
            RegistryError::BadRequest(_) => "bad_request",
            RegistryError::Configuration(_) => "configuration",
            RegistryError::Internal(_) => "internal",
        };
        counter!(FLUSH_FAILED, "error" => label).increment(1);
    }

    /// Record events discarded without publishing.
    pub fn record_dropped(count: usize) {
        if count > 0 {
            counter!(FLUSH_DROPPED_EVENTS).increment(count as u64);
        }
    }
}

/// Background publisher recorder.
pub struct PublishMetrics;

impl PublishMetrics {
    /// Record a batch accepted by the transport.
    pub fn record_success(duration: Duration) {
        counter!(PUBLISH_SUCCEEDED).increment(1);
        histogram!(PUBLISH_DURATION).record(duration.as_secs_f64());
    }

    /// Record a batch that failed with `kind`.
    pub fn record_failure(kind: PublishErrorKind) {
        counter!(PUBLISH_FAILED, "error_type" => kind.as_str()).increment(1);
    }
}

/// Publishing gateway recorder.
pub struct GatewayMetrics;

impl GatewayMetrics {
    /// Record the number of requests awaiting a response.
    #[allow(clippy::cast_precision_loss)]
    pub fn record_in_flight(count: usize) {
        gauge!(GATEWAY_IN_FLIGHT).set(count as f64);
    }
}
