//! Poll Loop Integration Tests
//!
//! Tests that the read loop survives broker failures without losing or
//! reordering entries, and that it stops only on cancellation.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use dex_stream_pipeline::application::services::{BackoffConfig, JobStats};
use dex_stream_pipeline::{
    Blockchain, BrokerError, EntryFields, GroupName, InMemoryBroker, Marketplace, PollLoop,
    PollSettings, StreamBroker, StreamEntry, StreamKey, StreamName, StreamRegistry,
};

const BLOCK: Duration = Duration::from_millis(10);

/// Broker whose every other grouped read fails with a transient error.
struct FlakyBroker {
    inner: InMemoryBroker,
    reads: AtomicU32,
}

impl FlakyBroker {
    fn new() -> Self {
        Self {
            inner: InMemoryBroker::new(),
            reads: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl StreamBroker for FlakyBroker {
    async fn ensure_consumer_group(
        &self,
        stream: &StreamKey,
        group: &GroupName,
    ) -> Result<(), BrokerError> {
        self.inner.ensure_consumer_group(stream, group).await
    }

    async fn append(&self, stream: &StreamKey, fields: &EntryFields) -> Result<String, BrokerError> {
        self.inner.append(stream, fields).await
    }

    async fn read_group(
        &self,
        stream: &StreamKey,
        group: &GroupName,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>, BrokerError> {
        if self.reads.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
            return Err(BrokerError::unavailable("connection reset by peer"));
        }
        self.inner
            .read_group(stream, group, consumer, count, block)
            .await
    }
}

fn prices() -> StreamKey {
    StreamRegistry::new(Marketplace::Vertex, Blockchain::Ethereum).raw(StreamName::Prices)
}

async fn append_n(broker: &dyn StreamBroker, n: usize) -> Vec<String> {
    let mut ids = Vec::with_capacity(n);
    for i in 0..n {
        let fields =
            EntryFields::try_from_pairs(vec![("seq".to_string(), i.to_string())]).unwrap();
        ids.push(broker.append(&prices(), &fields).await.unwrap());
    }
    ids
}

// =============================================================================
// Failure Recovery Tests
// =============================================================================

#[tokio::test]
async fn test_transient_failures_do_not_lose_entries() {
    let broker = Arc::new(FlakyBroker::new());
    let ids = append_n(broker.as_ref(), 5).await;
    let stats = JobStats::shared("reader");

    let cancel = CancellationToken::new();
    let entries: Vec<StreamEntry> = timeout(
        Duration::from_secs(5),
        PollLoop::new(broker.clone(), prices(), GroupName::custom("g"), "c1".to_string())
            .with_settings(PollSettings {
                count: 1,
                block: BLOCK,
            })
            .with_backoff(BackoffConfig::none().into_policy())
            .with_stats(Arc::clone(&stats))
            .into_stream(cancel.clone())
            .take(5)
            .collect(),
    )
    .await
    .unwrap();
    cancel.cancel();

    let received: Vec<String> = entries.into_iter().map(|e| e.id).collect();
    assert_eq!(received, ids);
    assert!(stats.failures() >= 5);
    assert_eq!(stats.processed(), 5);
}

#[tokio::test]
async fn test_backoff_delays_retries_but_keeps_reading() {
    let broker = Arc::new(FlakyBroker::new());
    let ids = append_n(broker.as_ref(), 3).await;

    let backoff = BackoffConfig {
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        multiplier: 2.0,
        jitter_factor: 0.0,
    };

    let cancel = CancellationToken::new();
    let received: Vec<String> = timeout(
        Duration::from_secs(5),
        PollLoop::new(broker.clone(), prices(), GroupName::custom("g"), "c1".to_string())
            .with_settings(PollSettings {
                count: 10,
                block: BLOCK,
            })
            .with_backoff(backoff.into_policy())
            .into_stream(cancel.clone())
            .map(|e| e.id)
            .take(3)
            .collect(),
    )
    .await
    .unwrap();
    cancel.cancel();

    assert_eq!(received, ids);
}

// =============================================================================
// Cancellation Tests
// =============================================================================

#[tokio::test]
async fn test_idle_loop_runs_until_cancelled() {
    let broker = Arc::new(InMemoryBroker::new());
    let cancel = CancellationToken::new();

    let stream = PollLoop::new(broker.clone(), prices(), GroupName::custom("g"), "c1".to_string())
        .with_settings(PollSettings {
            count: 1,
            block: BLOCK,
        })
        .into_stream(cancel.clone());

    let collector = tokio::spawn(stream.collect::<Vec<_>>());

    tokio::time::sleep(BLOCK * 10).await;
    assert!(!collector.is_finished());

    cancel.cancel();
    let entries = timeout(Duration::from_secs(5), collector)
        .await
        .unwrap()
        .unwrap();
    assert!(entries.is_empty());
}

#[tokio::test]
async fn test_cancel_interrupts_backoff_sleep() {
    let broker = Arc::new(FlakyBroker::new());
    let backoff = BackoffConfig {
        initial_delay: Duration::from_secs(60),
        max_delay: Duration::from_secs(60),
        multiplier: 1.0,
        jitter_factor: 0.0,
    };
    let cancel = CancellationToken::new();

    let stream = PollLoop::new(broker.clone(), prices(), GroupName::custom("g"), "c1".to_string())
        .with_backoff(backoff.into_policy())
        .into_stream(cancel.clone());
    let collector = tokio::spawn(stream.collect::<Vec<_>>());

    tokio::time::sleep(BLOCK).await;
    cancel.cancel();

    let entries = timeout(Duration::from_secs(1), collector)
        .await
        .expect("cancellation should interrupt the backoff delay")
        .unwrap();
    assert!(entries.is_empty());
}
