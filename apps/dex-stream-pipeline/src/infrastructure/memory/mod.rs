//! In-Memory Broker
//!
//! A [`StreamBroker`] that keeps streams in process memory with Redis Streams
//! semantics: `<millis>-<seq>` entry ids, consumer groups created at the
//! start of the stream, per-group delivery cursors, blocking reads, and
//! length-capped appends. Used by tests and local runs without Redis.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::application::ports::{BrokerError, StreamBroker};
use crate::domain::consumer_group::GroupName;
use crate::domain::payload::{EntryFields, StreamEntry};
use crate::domain::stream_key::StreamKey;

/// Default maximum entries retained per stream.
pub const DEFAULT_MAX_LEN: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
struct EntryId {
    millis: u64,
    seq: u64,
}

impl EntryId {
    fn next_after(last: Self) -> Self {
        let now = u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default();
        if now > last.millis {
            Self { millis: now, seq: 0 }
        } else {
            Self {
                millis: last.millis,
                seq: last.seq + 1,
            }
        }
    }
}

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.millis, self.seq)
    }
}

#[derive(Debug, Default)]
struct StreamLog {
    last_id: EntryId,
    entries: VecDeque<(EntryId, EntryFields)>,
    /// Group name to last delivered id.
    groups: HashMap<String, EntryId>,
}

/// Process-local broker.
#[derive(Debug)]
pub struct InMemoryBroker {
    streams: Mutex<HashMap<String, StreamLog>>,
    appended: Notify,
    max_len: usize,
    mkstream: bool,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    /// Empty broker with the default length cap.
    #[must_use]
    pub fn new() -> Self {
        Self {
            streams: Mutex::new(HashMap::new()),
            appended: Notify::new(),
            max_len: DEFAULT_MAX_LEN,
            mkstream: true,
        }
    }

    /// Override the per-stream length cap.
    #[must_use]
    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len.max(1);
        self
    }

    /// Whether group creation on a missing stream creates it.
    #[must_use]
    pub const fn with_mkstream(mut self, mkstream: bool) -> Self {
        self.mkstream = mkstream;
        self
    }

    /// Entries currently retained in a stream.
    #[must_use]
    pub fn len(&self, stream: &StreamKey) -> usize {
        self.streams
            .lock()
            .get(&stream.to_string())
            .map_or(0, |log| log.entries.len())
    }

    /// Whether no stream holds any entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.streams.lock().values().all(|log| log.entries.is_empty())
    }

    /// Retained entries of a stream, oldest first.
    #[must_use]
    pub fn entries(&self, stream: &StreamKey) -> Vec<StreamEntry> {
        self.streams
            .lock()
            .get(&stream.to_string())
            .map(|log| {
                log.entries
                    .iter()
                    .map(|(id, fields)| StreamEntry::new(id.to_string(), fields.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Consumer groups on a stream, sorted.
    #[must_use]
    pub fn groups(&self, stream: &StreamKey) -> Vec<String> {
        let mut groups: Vec<String> = self
            .streams
            .lock()
            .get(&stream.to_string())
            .map(|log| log.groups.keys().cloned().collect())
            .unwrap_or_default();
        groups.sort();
        groups
    }

    /// Whether `group` exists on `stream`.
    #[must_use]
    pub fn group_exists(&self, stream: &StreamKey, group: &GroupName) -> bool {
        self.streams
            .lock()
            .get(&stream.to_string())
            .is_some_and(|log| log.groups.contains_key(group.as_str()))
    }

    /// Deliver up to `count` entries past the group's cursor and advance it.
    fn deliver(
        &self,
        stream: &str,
        group: &str,
        count: usize,
    ) -> Result<Vec<StreamEntry>, BrokerError> {
        let mut streams = self.streams.lock();
        let log = streams.get_mut(stream).ok_or_else(|| no_group(stream, group))?;
        let cursor = *log
            .groups
            .get(group)
            .ok_or_else(|| no_group(stream, group))?;

        let delivered: Vec<(EntryId, EntryFields)> = log
            .entries
            .iter()
            .filter(|(id, _)| *id > cursor)
            .take(count)
            .cloned()
            .collect();

        if let Some((last, _)) = delivered.last() {
            log.groups.insert(group.to_string(), *last);
        }

        Ok(delivered
            .into_iter()
            .map(|(id, fields)| StreamEntry::new(id.to_string(), fields))
            .collect())
    }
}

fn no_group(stream: &str, group: &str) -> BrokerError {
    BrokerError::rejected(
        "XREADGROUP",
        format!("NOGROUP No such key '{stream}' or consumer group '{group}'"),
    )
}

#[async_trait]
impl StreamBroker for InMemoryBroker {
    async fn ensure_consumer_group(
        &self,
        stream: &StreamKey,
        group: &GroupName,
    ) -> Result<(), BrokerError> {
        let name = stream.to_string();
        let mut streams = self.streams.lock();

        if !self.mkstream && !streams.contains_key(&name) {
            return Err(BrokerError::rejected(
                "XGROUP",
                "ERR The XGROUP subcommand requires the key to exist",
            ));
        }
        let log = streams.entry(name.clone()).or_default();

        if log.groups.contains_key(group.as_str()) {
            tracing::debug!(stream = %name, group = %group, "Consumer group already exists");
        } else {
            log.groups.insert(group.to_string(), EntryId::default());
            tracing::debug!(stream = %name, group = %group, "Created consumer group");
        }
        Ok(())
    }

    async fn append(&self, stream: &StreamKey, fields: &EntryFields) -> Result<String, BrokerError> {
        let id = {
            let mut streams = self.streams.lock();
            let log = streams.entry(stream.to_string()).or_default();

            let id = EntryId::next_after(log.last_id);
            log.last_id = id;
            log.entries.push_back((id, fields.clone()));
            while log.entries.len() > self.max_len {
                log.entries.pop_front();
            }
            id
        };

        self.appended.notify_waiters();
        Ok(id.to_string())
    }

    async fn read_group(
        &self,
        stream: &StreamKey,
        group: &GroupName,
        _consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>, BrokerError> {
        let name = stream.to_string();
        let count = if count == 0 { usize::MAX } else { count };
        // BLOCK 0 waits indefinitely.
        let deadline = (!block.is_zero()).then(|| Instant::now() + block);

        loop {
            let notified = self.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let entries = self.deliver(&name, group.as_str(), count)?;
            if !entries.is_empty() {
                return Ok(entries);
            }

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Ok(Vec::new());
                    }
                }
                None => notified.await,
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
