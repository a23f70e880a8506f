//! Poll Loop
//!
//! Turns blocking grouped reads into a lazy, infinite sequence of entries.
//! Each iteration ensures the consumer group exists and performs one read.
//! Failures are logged, recorded, and followed by a backoff delay; the
//! sequence itself only ends when its cancellation token fires.
//!
//! Cancellation is checked between iterations. An iteration in flight runs
//! to completion, and entries it delivered are yielded before the sequence
//! ends.

use std::collections::VecDeque;
use std::time::Duration;

use futures::Stream;
use tokio_util::sync::CancellationToken;

use super::backoff::{Backoff, BackoffConfig};
use super::job_stats::SharedJobStats;
use crate::application::ports::{BrokerError, SharedBroker};
use crate::domain::consumer_group::GroupName;
use crate::domain::payload::StreamEntry;
use crate::domain::stream_key::StreamKey;
use crate::infrastructure::metrics;

/// Read parameters for each iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    /// Maximum entries per read.
    pub count: usize,
    /// How long a read waits for new entries.
    pub block: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            count: 1,
            block: Duration::from_millis(1000),
        }
    }
}

/// Result of one iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The read delivered entries.
    Entries(Vec<StreamEntry>),
    /// The block window elapsed with nothing new.
    Empty,
    /// Group creation or the read failed.
    Failed(BrokerError),
}

/// Grouped reader over one stream.
#[derive(Debug)]
pub struct PollLoop {
    broker: SharedBroker,
    stream: StreamKey,
    group: GroupName,
    consumer: String,
    settings: PollSettings,
    backoff: Box<dyn Backoff>,
    stats: Option<SharedJobStats>,
}

impl PollLoop {
    /// Create a loop with default settings and backoff.
    #[must_use]
    pub fn new(
        broker: SharedBroker,
        stream: StreamKey,
        group: GroupName,
        consumer: impl Into<String>,
    ) -> Self {
        Self {
            broker,
            stream,
            group,
            consumer: consumer.into(),
            settings: PollSettings::default(),
            backoff: BackoffConfig::default().into_policy(),
            stats: None,
        }
    }

    /// Override read parameters.
    #[must_use]
    pub const fn with_settings(mut self, settings: PollSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Override the backoff policy.
    #[must_use]
    pub fn with_backoff(mut self, backoff: Box<dyn Backoff>) -> Self {
        self.backoff = backoff;
        self
    }

    /// Record iterations into job statistics.
    #[must_use]
    pub fn with_stats(mut self, stats: SharedJobStats) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Stream being read.
    #[must_use]
    pub const fn stream(&self) -> StreamKey {
        self.stream
    }

    /// Consumer group.
    #[must_use]
    pub const fn group(&self) -> &GroupName {
        &self.group
    }

    /// Consumer name within the group.
    #[must_use]
    pub fn consumer(&self) -> &str {
        &self.consumer
    }

    /// Run one iteration: ensure the group, then read.
    pub async fn poll_once(&self) -> PollOutcome {
        let stream = self.stream.to_string();

        match self.read().await {
            Ok(entries) if entries.is_empty() => {
                tracing::debug!(stream = %stream, group = %self.group, "No new entries");
                metrics::record_empty_read(&stream);
                if let Some(stats) = &self.stats {
                    stats.record_success(0);
                }
                PollOutcome::Empty
            }
            Ok(entries) => {
                tracing::debug!(
                    stream = %stream,
                    group = %self.group,
                    count = entries.len(),
                    "Read entries"
                );
                metrics::record_entries_read(&stream, entries.len() as u64);
                if let Some(stats) = &self.stats {
                    stats.record_success(entries.len() as u64);
                }
                PollOutcome::Entries(entries)
            }
            Err(e) => {
                tracing::warn!(
                    stream = %stream,
                    group = %self.group,
                    error = %e,
                    transient = e.is_transient(),
                    "Grouped read failed"
                );
                metrics::record_read_error(&stream, e.kind());
                if let Some(stats) = &self.stats {
                    stats.record_failure(e.to_string());
                }
                PollOutcome::Failed(e)
            }
        }
    }

    async fn read(&self) -> Result<Vec<StreamEntry>, BrokerError> {
        self.broker
            .ensure_consumer_group(&self.stream, &self.group)
            .await?;
        self.broker
            .read_group(
                &self.stream,
                &self.group,
                &self.consumer,
                self.settings.count,
                self.settings.block,
            )
            .await
    }

    /// Consume the loop as an infinite sequence of entries, in delivery
    /// order, ending only once `cancel` fires.
    pub fn into_stream(self, cancel: CancellationToken) -> impl Stream<Item = StreamEntry> + Send {
        let state = PollState {
            poll: self,
            pending: VecDeque::new(),
            cancel,
        };

        futures::stream::unfold(state, |mut state| async move {
            loop {
                if let Some(entry) = state.pending.pop_front() {
                    return Some((entry, state));
                }
                if state.cancel.is_cancelled() {
                    tracing::debug!(stream = %state.poll.stream, "Poll loop cancelled");
                    return None;
                }

                match state.poll.poll_once().await {
                    PollOutcome::Entries(entries) => {
                        state.poll.backoff.reset();
                        state.pending.extend(entries);
                    }
                    PollOutcome::Empty => state.poll.backoff.reset(),
                    PollOutcome::Failed(_) => {
                        if !state.wait_backoff().await {
                            return None;
                        }
                    }
                }
            }
        })
    }
}

struct PollState {
    poll: PollLoop,
    pending: VecDeque<StreamEntry>,
    cancel: CancellationToken,
}

impl PollState {
    /// Sleep for the next backoff delay. Returns `false` if cancelled while
    /// waiting.
    async fn wait_backoff(&mut self) -> bool {
        let delay = self.poll.backoff.next_delay();
        if delay.is_zero() {
            tokio::task::yield_now().await;
            return true;
        }

        metrics::record_retry_delay(&self.poll.stream.to_string(), delay);
        tokio::select! {
            () = self.cancel.cancelled() => false,
            () = tokio::time::sleep(delay) => true,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
