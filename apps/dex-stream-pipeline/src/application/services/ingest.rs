//! Ingest Job
//!
//! Queries a venue on a fixed interval and publishes each response, unaltered,
//! onto a raw stream. Failures are logged and the job waits for the next tick.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::job_stats::SharedJobStats;
use super::publish::{PublishError, with_publish};
use crate::application::ports::{SharedBroker, VenueError, VenueSource};
use crate::domain::payload::Payload;
use crate::domain::stream_key::StreamKey;
use crate::infrastructure::metrics::{self, RequestOutcome};

/// Periodic venue fetch published to a raw stream.
pub struct IngestJob<S> {
    source: Arc<S>,
    broker: SharedBroker,
    stream: StreamKey,
    query: Value,
    interval: Duration,
    stats: Option<SharedJobStats>,
}

impl<S: VenueSource> std::fmt::Debug for IngestJob<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestJob")
            .field("source", &self.source.name())
            .field("stream", &self.stream)
            .field("query", &self.query)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl<S: VenueSource + 'static> IngestJob<S> {
    /// Fetch `query` from `source` every `interval` into `stream`.
    pub fn new(
        source: S,
        broker: SharedBroker,
        stream: StreamKey,
        query: Value,
        interval: Duration,
    ) -> Self {
        Self {
            source: Arc::new(source),
            broker,
            stream,
            query,
            interval,
            stats: None,
        }
    }

    /// Record progress into job statistics.
    #[must_use]
    pub fn with_stats(mut self, stats: SharedJobStats) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Raw stream written by the job.
    #[must_use]
    pub const fn stream(&self) -> StreamKey {
        self.stream
    }

    /// Fetch and publish once.
    ///
    /// # Errors
    ///
    /// Returns the venue failure or the publish failure.
    pub async fn run_once(&self) -> Result<Payload, PublishError<VenueError>> {
        let source = Arc::clone(&self.source);
        let publish = with_publish(
            move |query: Value| {
                let source = Arc::clone(&source);
                async move {
                    let started = Instant::now();
                    let result = source.fetch(&query).await;
                    let outcome = if result.is_ok() {
                        RequestOutcome::Success
                    } else {
                        RequestOutcome::Failure
                    };
                    metrics::record_venue_request(source.name(), outcome, started.elapsed());
                    result
                }
            },
            self.stream,
            Arc::clone(&self.broker),
        );

        publish.call(self.query.clone()).await
    }

    /// Fetch and publish every interval until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(
            venue = self.source.name(),
            stream = %self.stream,
            interval_secs = self.interval.as_secs_f64(),
            "Ingest job started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.run_once().await {
                Ok(_) => {
                    tracing::debug!(venue = self.source.name(), stream = %self.stream, "Ingested");
                    if let Some(stats) = &self.stats {
                        stats.record_success(1);
                    }
                }
                Err(e) => {
                    tracing::error!(
                        venue = self.source.name(),
                        stream = %self.stream,
                        error = %e,
                        "Ingest failed"
                    );
                    if let Some(stats) = &self.stats {
                        stats.record_failure(e.to_string());
                    }
                }
            }
        }

        tracing::info!(stream = %self.stream, "Ingest job stopped");
    }
}
