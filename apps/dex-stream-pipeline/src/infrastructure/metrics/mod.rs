//! Prometheus Metrics Module
//!
//! Exposes pipeline metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Publishing**: entries appended per stream and publish failures
//! - **Polling**: entries read, empty read windows, and read failures
//! - **Retry**: backoff delays applied after failed reads
//! - **Venue**: request outcomes and latency per venue
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if another global recorder is already installed.
#[allow(clippy::expect_used)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Publishing
    describe_counter!(
        "stream_pipeline_entries_published_total",
        "Total entries appended to streams"
    );
    describe_counter!(
        "stream_pipeline_publish_errors_total",
        "Total failed publish attempts by error type"
    );

    // Polling
    describe_counter!(
        "stream_pipeline_entries_read_total",
        "Total entries delivered by grouped reads"
    );
    describe_counter!(
        "stream_pipeline_empty_reads_total",
        "Total grouped reads that returned no entries"
    );
    describe_counter!(
        "stream_pipeline_read_errors_total",
        "Total failed grouped reads by error type"
    );
    describe_histogram!(
        "stream_pipeline_retry_delay_seconds",
        "Backoff delay applied after a failed read"
    );

    // Transform
    describe_counter!(
        "stream_pipeline_transform_errors_total",
        "Total raw entries the transformer could not adapt"
    );

    // Venue
    describe_counter!(
        "stream_pipeline_venue_requests_total",
        "Total venue requests by outcome"
    );
    describe_histogram!(
        "stream_pipeline_venue_request_seconds",
        "Venue request latency"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Outcome label for venue requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Response received and accepted.
    Success,
    /// Request or response failed.
    Failure,
}

impl RequestOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

/// Record an entry appended to a stream.
pub fn record_published(stream: &str) {
    counter!(
        "stream_pipeline_entries_published_total",
        "stream" => stream.to_string()
    )
    .increment(1);
}

/// Record a failed publish attempt.
pub fn record_publish_error(stream: &str, error_type: &'static str) {
    counter!(
        "stream_pipeline_publish_errors_total",
        "stream" => stream.to_string(),
        "error_type" => error_type
    )
    .increment(1);
}

/// Record entries delivered by a grouped read.
pub fn record_entries_read(stream: &str, count: u64) {
    counter!(
        "stream_pipeline_entries_read_total",
        "stream" => stream.to_string()
    )
    .increment(count);
}

/// Record a read window that elapsed with no entries.
pub fn record_empty_read(stream: &str) {
    counter!(
        "stream_pipeline_empty_reads_total",
        "stream" => stream.to_string()
    )
    .increment(1);
}

/// Record a failed grouped read.
pub fn record_read_error(stream: &str, error_type: &'static str) {
    counter!(
        "stream_pipeline_read_errors_total",
        "stream" => stream.to_string(),
        "error_type" => error_type
    )
    .increment(1);
}

/// Record the backoff applied after a failed read.
pub fn record_retry_delay(stream: &str, delay: Duration) {
    histogram!(
        "stream_pipeline_retry_delay_seconds",
        "stream" => stream.to_string()
    )
    .record(delay.as_secs_f64());
}

/// Record a raw entry the transformer rejected.
pub fn record_transform_error(stream: &str) {
    counter!(
        "stream_pipeline_transform_errors_total",
        "stream" => stream.to_string()
    )
    .increment(1);
}

/// Record a venue request and its latency.
pub fn record_venue_request(venue: &str, outcome: RequestOutcome, duration: Duration) {
    counter!(
        "stream_pipeline_venue_requests_total",
        "venue" => venue.to_string(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
    histogram!(
        "stream_pipeline_venue_request_seconds",
        "venue" => venue.to_string()
    )
    .record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_outcome_as_str() {
        assert_eq!(RequestOutcome::Success.as_str(), "success");
        assert_eq!(RequestOutcome::Failure.as_str(), "failure");
    }

    #[test]
    fn recording_without_recorder_is_a_no_op() {
        record_published("raw-hyperliquid-hyperliquid-prices");
        record_read_error("raw-hyperliquid-hyperliquid-prices", "unavailable");
        record_retry_delay("raw-hyperliquid-hyperliquid-prices", Duration::from_millis(5));
    }
}
