//! Relay
//!
//! Reads a raw stream through a [`PollLoop`], adapts each entry with a
//! [`Transform`], and publishes the result onto the matching adapted stream.
//! A raw entry that cannot be adapted is logged and skipped. A transient
//! broker failure while appending is retried under the relay's backoff, so
//! an adapted entry is dropped only for permanent failures. The relay keeps
//! running until cancelled.

use std::future::ready;
use std::sync::Arc;

use futures::StreamExt;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use super::backoff::{Backoff, BackoffConfig};
use super::job_stats::SharedJobStats;
use super::poll::{PollLoop, PollSettings};
use super::publish::{PublishError, with_publish};
use crate::application::ports::SharedBroker;
use crate::domain::consumer_group::{GroupName, unique_consumer_name};
use crate::domain::payload::{Payload, StreamEntry};
use crate::domain::registry::StreamRegistry;
use crate::domain::stream_key::{StreamKey, StreamName};
use crate::infrastructure::metrics;

// =============================================================================
// Transforms
// =============================================================================

/// A raw entry could not be adapted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransformError {
    /// No field survived the transform.
    #[error("entry {entry_id} has no adaptable fields")]
    Empty {
        /// Raw entry id.
        entry_id: String,
    },

    /// The entry does not have the shape the transform expects.
    #[error("entry {entry_id} is malformed: {reason}")]
    Malformed {
        /// Raw entry id.
        entry_id: String,
        /// What was wrong.
        reason: String,
    },
}

/// Maps one raw entry to its adapted payload.
pub trait Transform: Send + Sync {
    /// Transform label for logs.
    fn name(&self) -> &'static str;

    /// Adapt a raw entry.
    ///
    /// # Errors
    ///
    /// Returns [`TransformError`] if the entry cannot be adapted.
    fn adapt(&self, entry: &StreamEntry) -> Result<Payload, TransformError>;
}

/// Republishes entries unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl Transform for Passthrough {
    fn name(&self) -> &'static str {
        "passthrough"
    }

    fn adapt(&self, entry: &StreamEntry) -> Result<Payload, TransformError> {
        let mapping = entry
            .fields
            .iter()
            .map(|(field, value)| (field.to_string(), Value::String(value.to_string())))
            .collect();
        Ok(Payload::Mapping(mapping))
    }
}

/// Normalizes venue price maps to the internal ticker standard.
///
/// Tickers are uppercased and quoted against `quote` when they carry no
/// quote currency; values are parsed as floats. Non-numeric fields are
/// dropped.
///
/// `{"btc": "39874.58"}` becomes `{"BTC/USD": 39874.58}`.
#[derive(Debug, Clone)]
pub struct QuoteNormalizer {
    quote: String,
}

impl Default for QuoteNormalizer {
    fn default() -> Self {
        Self::new("USD")
    }
}

impl QuoteNormalizer {
    /// Normalizer quoting bare tickers against `quote`.
    #[must_use]
    pub fn new(quote: impl Into<String>) -> Self {
        Self {
            quote: quote.into().to_uppercase(),
        }
    }

    /// Internal ticker for a venue symbol.
    #[must_use]
    pub fn ticker(&self, symbol: &str) -> String {
        let symbol = symbol.trim().to_uppercase();
        if symbol.contains('/') {
            symbol
        } else {
            format!("{symbol}/{}", self.quote)
        }
    }
}

impl Transform for QuoteNormalizer {
    fn name(&self) -> &'static str {
        "quote_normalizer"
    }

    fn adapt(&self, entry: &StreamEntry) -> Result<Payload, TransformError> {
        let mut prices = Map::new();

        for (symbol, price) in entry.fields.numeric() {
            if symbol.trim().is_empty() {
                return Err(TransformError::Malformed {
                    entry_id: entry.id.clone(),
                    reason: "empty ticker".to_string(),
                });
            }
            if let Some(number) = serde_json::Number::from_f64(price) {
                prices.insert(self.ticker(&symbol), Value::Number(number));
            }
        }

        if prices.is_empty() {
            return Err(TransformError::Empty {
                entry_id: entry.id.clone(),
            });
        }
        Ok(Payload::Mapping(prices))
    }
}

// =============================================================================
// Relay
// =============================================================================

/// Raw-to-adapted relay for one stream name.
pub struct Relay {
    broker: SharedBroker,
    raw: StreamKey,
    adapted: StreamKey,
    group: GroupName,
    consumer: String,
    transform: Arc<dyn Transform>,
    settings: PollSettings,
    backoff: BackoffConfig,
    stats: Option<SharedJobStats>,
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("raw", &self.raw)
            .field("adapted", &self.adapted)
            .field("group", &self.group)
            .field("transform", &self.transform.name())
            .finish_non_exhaustive()
    }
}

impl Relay {
    /// Relay `stream` from its raw key to its adapted key.
    ///
    /// Reads under the stable group for the raw stream so restarts resume
    /// from the last delivered entry.
    pub fn new(
        broker: SharedBroker,
        registry: &StreamRegistry,
        stream: StreamName,
        transform: impl Transform + 'static,
    ) -> Self {
        let raw = registry.raw(stream);
        Self {
            broker,
            raw,
            adapted: registry.adapted(stream),
            group: GroupName::stable(&raw),
            consumer: unique_consumer_name("relay"),
            transform: Arc::new(transform),
            settings: PollSettings::default(),
            backoff: BackoffConfig::default(),
            stats: None,
        }
    }

    /// Override the consumer group.
    #[must_use]
    pub fn with_group(mut self, group: GroupName) -> Self {
        self.group = group;
        self
    }

    /// Override read parameters.
    #[must_use]
    pub const fn with_settings(mut self, settings: PollSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Override the read backoff.
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Record progress into job statistics.
    #[must_use]
    pub fn with_stats(mut self, stats: SharedJobStats) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Raw stream read by the relay.
    #[must_use]
    pub const fn raw(&self) -> StreamKey {
        self.raw
    }

    /// Adapted stream written by the relay.
    #[must_use]
    pub const fn adapted(&self) -> StreamKey {
        self.adapted
    }

    /// Relay entries until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        let adapted = self.adapted.to_string();
        tracing::info!(
            raw = %self.raw,
            adapted = %adapted,
            group = %self.group,
            consumer = %self.consumer,
            transform = self.transform.name(),
            "Relay started"
        );

        let mut poll = PollLoop::new(
            Arc::clone(&self.broker),
            self.raw,
            self.group,
            self.consumer,
        )
        .with_settings(self.settings)
        .with_backoff(self.backoff.clone().into_policy());
        let stats = self.stats;
        if let Some(stats) = &stats {
            poll = poll.with_stats(Arc::clone(stats));
        }
        let record_failure = |error: String| {
            if let Some(stats) = &stats {
                stats.record_failure(error);
            }
        };

        let transform = self.transform;
        let publish = with_publish(
            move |entry: StreamEntry| ready(transform.adapt(&entry)),
            self.adapted,
            self.broker,
        );
        let mut retry = self.backoff.into_policy();

        let entries = poll.into_stream(cancel.clone());
        futures::pin_mut!(entries);

        'entries: while let Some(entry) = entries.next().await {
            let entry_id = entry.id.clone();
            loop {
                match publish.call(entry.clone()).await {
                    Ok(_) => {
                        retry.reset();
                        tracing::debug!(entry_id = %entry_id, adapted = %adapted, "Relayed entry");
                        break;
                    }
                    Err(PublishError::Inner(e)) => {
                        tracing::warn!(entry_id = %entry_id, error = %e, "Skipping raw entry");
                        metrics::record_transform_error(&adapted);
                        record_failure(e.to_string());
                        break;
                    }
                    Err(PublishError::Broker { source, .. }) if source.is_transient() => {
                        tracing::warn!(
                            entry_id = %entry_id,
                            adapted = %adapted,
                            error = %source,
                            "Append failed, retrying"
                        );
                        record_failure(source.to_string());
                        if !wait_retry(retry.as_mut(), &cancel, &adapted).await {
                            break 'entries;
                        }
                    }
                    Err(e) => {
                        tracing::error!(entry_id = %entry_id, error = %e, "Failed to relay entry");
                        record_failure(e.to_string());
                        break;
                    }
                }
            }
        }

        tracing::info!(raw = %self.raw, "Relay stopped");
    }
}

/// Wait out the next retry delay. Returns `false` once `cancel` fires.
async fn wait_retry(retry: &mut dyn Backoff, cancel: &CancellationToken, stream: &str) -> bool {
    let delay = retry.next_delay();
    if delay.is_zero() {
        tokio::task::yield_now().await;
        return !cancel.is_cancelled();
    }

    metrics::record_retry_delay(stream, delay);
    tokio::select! {
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(delay) => true,
    }
}

// =============================================================================
// Tests
// =============================================================================
