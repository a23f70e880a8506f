//! Adapted Stream Consumer
//!
//! Downstream read side of the pipeline. Consumers only ever read adapted
//! streams, never acknowledge or delete entries, and each instance reads
//! under its own consumer group so every consumer observes every entry.
//!
//! Group names are resolved from the instant the consumer was built, so
//! repeated reads through one consumer share a single group cursor.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::Stream;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use super::backoff::BackoffConfig;
use super::poll::{PollLoop, PollSettings};
use crate::application::ports::{BrokerError, SharedBroker};
use crate::domain::consumer_group::{GroupName, GroupNaming, unique_consumer_name};
use crate::domain::payload::StreamEntry;
use crate::domain::registry::SharedRegistry;
use crate::domain::stream_key::{StreamKey, StreamName};

/// Reader of adapted streams for one marketplace/blockchain pair.
#[derive(Debug, Clone)]
pub struct AdaptedConsumer {
    broker: SharedBroker,
    registry: SharedRegistry,
    naming: GroupNaming,
    consumer: String,
    started_at: DateTime<Utc>,
    block: Duration,
    backoff: BackoffConfig,
}

impl AdaptedConsumer {
    /// Consumer with per-run group names.
    #[must_use]
    pub fn new(broker: SharedBroker, registry: SharedRegistry) -> Self {
        Self {
            broker,
            registry,
            naming: GroupNaming::PerRun,
            consumer: unique_consumer_name("consumer"),
            started_at: Utc::now(),
            block: PollSettings::default().block,
            backoff: BackoffConfig::default(),
        }
    }

    /// Override the group naming scheme.
    #[must_use]
    pub const fn with_naming(mut self, naming: GroupNaming) -> Self {
        self.naming = naming;
        self
    }

    /// Override the start time per-run group names derive from.
    #[must_use]
    pub const fn with_started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.started_at = started_at;
        self
    }

    /// Override the read block window.
    #[must_use]
    pub const fn with_block(mut self, block: Duration) -> Self {
        self.block = block;
        self
    }

    /// Override the backoff used by subscriptions.
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Adapted key for a stream name.
    #[must_use]
    pub fn stream_key(&self, stream: StreamName) -> StreamKey {
        self.registry.adapted(stream)
    }

    /// Group this consumer reads `key` under.
    #[must_use]
    pub fn group_for(&self, key: &StreamKey) -> GroupName {
        self.naming.name_for(key, self.started_at)
    }

    /// Decode the next entry this consumer's group has not yet been
    /// delivered, waiting up to the block window.
    ///
    /// Successive calls walk the stream forward one entry at a time. This is
    /// not the newest entry of the stream unless the group has caught up.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError`] if group creation or the read fails.
    pub async fn read_latest(
        &self,
        stream: StreamName,
    ) -> Result<Option<Map<String, Value>>, BrokerError> {
        Ok(self.next_entry(stream).await?.as_ref().map(StreamEntry::decode))
    }

    /// Next undelivered adapted prices as `{"BTC/USD": 39874.58, ...}`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError`] if group creation or the read fails.
    pub async fn read_prices(&self) -> Result<Option<BTreeMap<String, f64>>, BrokerError> {
        Ok(self
            .next_entry(StreamName::Prices)
            .await?
            .map(|entry| entry.fields.numeric()))
    }

    async fn next_entry(&self, stream: StreamName) -> Result<Option<StreamEntry>, BrokerError> {
        let key = self.stream_key(stream);
        let group = self.group_for(&key);
        tracing::debug!(stream = %key, group = %group, "Consuming adapted stream");

        self.broker.ensure_consumer_group(&key, &group).await?;
        let entries = self
            .broker
            .read_group(&key, &group, &self.consumer, 1, self.block)
            .await?;

        Ok(entries.into_iter().next())
    }

    /// Every entry of an adapted stream, decoded, until `cancel` fires.
    pub fn subscribe(
        &self,
        stream: StreamName,
        cancel: CancellationToken,
    ) -> impl Stream<Item = Map<String, Value>> + Send + use<> {
        use futures::StreamExt;

        let key = self.stream_key(stream);
        PollLoop::new(
            self.broker.clone(),
            key,
            self.group_for(&key),
            self.consumer.clone(),
        )
        .with_settings(PollSettings {
            count: 1,
            block: self.block,
        })
        .with_backoff(self.backoff.clone().into_policy())
        .into_stream(cancel)
        .map(|entry| entry.decode())
    }
}
