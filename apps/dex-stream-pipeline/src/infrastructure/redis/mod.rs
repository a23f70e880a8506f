//! Redis Streams Broker
//!
//! [`StreamBroker`] over Redis. Appends and group creation share one managed,
//! multiplexed connection that reconnects on its own after a drop. Grouped
//! reads block server-side, and Redis answers a connection's commands in
//! order, so each `(stream, group, consumer)` reader gets a dedicated
//! connection from a [`ReaderPool`]. A reader connection that fails with a
//! transient error is evicted and reopened on the next read.
//!
//! # Wire Commands
//!
//! | Operation | Command |
//! |-----------|---------|
//! | append | `XADD key MAXLEN ~ <max_len> * f1 v1 ...` |
//! | group  | `XGROUP CREATE key group 0 [MKSTREAM]` |
//! | read   | `XREADGROUP GROUP group consumer COUNT n BLOCK ms STREAMS key >` |
//!
//! Replies are parsed from [`redis::Value`] directly so field order within
//! an entry is preserved under both RESP2 and RESP3.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::{ConnectionManager, ConnectionManagerConfig, MultiplexedConnection};
use redis::{AsyncConnectionConfig, Client, Cmd, RedisError, Value};

use crate::application::ports::{BrokerError, StreamBroker};
use crate::domain::consumer_group::GroupName;
use crate::domain::payload::{EntryFields, StreamEntry};
use crate::domain::stream_key::StreamKey;
use crate::infrastructure::config::BrokerSettings;

// =============================================================================
// Broker
// =============================================================================

/// Redis Streams broker.
#[derive(Clone)]
pub struct RedisBroker {
    client: Client,
    connection: ConnectionManager,
    readers: Arc<ReaderPool<MultiplexedConnection>>,
    io_timeout: Duration,
    max_len: usize,
    mkstream: bool,
}

impl std::fmt::Debug for RedisBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBroker")
            .field("readers", &self.readers.len())
            .field("io_timeout", &self.io_timeout)
            .field("max_len", &self.max_len)
            .field("mkstream", &self.mkstream)
            .finish_non_exhaustive()
    }
}

impl RedisBroker {
    /// Connect using broker settings. `block` is the longest read window any
    /// caller will request; responses are allowed that long plus the
    /// configured I/O timeout.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Unavailable`] if the URL is invalid or the
    /// first connection fails.
    pub async fn connect(settings: &BrokerSettings, block: Duration) -> Result<Self, BrokerError> {
        let client = redis::Client::open(settings.redis_url())
            .map_err(|e| BrokerError::unavailable(format!("invalid broker URL: {e}")))?;

        let config = ConnectionManagerConfig::new()
            .set_connection_timeout(settings.io_timeout)
            .set_response_timeout(block + settings.io_timeout);

        let connection = ConnectionManager::new_with_config(client.clone(), config)
            .await
            .map_err(|e| BrokerError::unavailable(format!("failed to connect: {e}")))?;

        tracing::info!(
            host = %settings.host,
            port = settings.port,
            db = settings.db,
            max_len = settings.max_len,
            "Connected to Redis"
        );

        Ok(Self {
            client,
            connection,
            readers: Arc::new(ReaderPool::new()),
            io_timeout: settings.io_timeout,
            max_len: settings.max_len,
            mkstream: settings.create_missing_streams,
        })
    }

    async fn query(&self, command: &'static str, cmd: &Cmd) -> Result<Value, BrokerError> {
        let mut connection = self.connection.clone();
        cmd.query_async(&mut connection)
            .await
            .map_err(|e| classify(command, &e))
    }

    /// Open a connection for a reader blocking up to `block` per command.
    async fn reader_connection(&self, block: Duration) -> Result<MultiplexedConnection, BrokerError> {
        let config = AsyncConnectionConfig::new()
            .set_connection_timeout(self.io_timeout)
            .set_response_timeout(block + self.io_timeout);
        self.client
            .get_multiplexed_async_connection_with_config(&config)
            .await
            .map_err(|e| BrokerError::unavailable(format!("failed to open reader connection: {e}")))
    }
}

#[async_trait]
impl StreamBroker for RedisBroker {
    async fn ensure_consumer_group(
        &self,
        stream: &StreamKey,
        group: &GroupName,
    ) -> Result<(), BrokerError> {
        let name = stream.to_string();
        let cmd = xgroup_create_command(&name, group.as_str(), self.mkstream);
        let mut connection = self.connection.clone();

        if group_create_result(cmd.query_async::<Value>(&mut connection).await)? {
            tracing::debug!(stream = %name, group = %group, "Created consumer group");
        } else {
            tracing::debug!(stream = %name, group = %group, "Consumer group already exists");
        }
        Ok(())
    }

    async fn append(&self, stream: &StreamKey, fields: &EntryFields) -> Result<String, BrokerError> {
        let cmd = xadd_command(&stream.to_string(), self.max_len, fields);
        let reply = self.query("XADD", &cmd).await?;
        value_to_string(&reply).ok_or_else(|| BrokerError::decode("-", "XADD reply is not an id"))
    }

    async fn read_group(
        &self,
        stream: &StreamKey,
        group: &GroupName,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>, BrokerError> {
        let name = stream.to_string();
        let reader = format!("{name}|{group}|{consumer}");
        let mut connection = self
            .readers
            .get_or_connect(&reader, || self.reader_connection(block))
            .await?;

        let cmd = xreadgroup_command(&name, group.as_str(), consumer, count, block);
        match cmd.query_async::<Value>(&mut connection).await {
            Ok(reply) => parse_read_reply(reply),
            Err(e) => {
                let err = classify("XREADGROUP", &e);
                if err.is_transient() {
                    tracing::debug!(reader = %reader, error = %err, "Dropping reader connection");
                    self.readers.evict(&reader);
                }
                Err(err)
            }
        }
    }
}

/// Outcome of `XGROUP CREATE`: `Ok(true)` if the group was created,
/// `Ok(false)` if it already existed.
fn group_create_result(result: Result<Value, RedisError>) -> Result<bool, BrokerError> {
    match result {
        Ok(_) => Ok(true),
        Err(e) if is_busy_group(&e) => Ok(false),
        Err(e) => Err(classify("XGROUP", &e)),
    }
}

fn is_busy_group(err: &RedisError) -> bool {
    err.code() == Some("BUSYGROUP") || err.to_string().contains("BUSYGROUP")
}

/// Map a driver error to the broker taxonomy.
fn classify(command: &'static str, err: &RedisError) -> BrokerError {
    if err.is_io_error() || err.is_timeout() || err.is_connection_dropped() || err.is_connection_refusal()
    {
        BrokerError::unavailable(err.to_string())
    } else {
        BrokerError::rejected(command, err.to_string())
    }
}

// =============================================================================
// Reader Pool
// =============================================================================

/// Dedicated connections keyed by reader identity.
///
/// The lock is never held across a connect, so a slow connect for one
/// reader does not stall the others.
#[derive(Debug)]
struct ReaderPool<C> {
    connections: Mutex<HashMap<String, C>>,
}

impl<C: Clone> ReaderPool<C> {
    fn new() -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Connection for `key`, opening one with `connect` if none is pooled.
    async fn get_or_connect<F, Fut, E>(&self, key: &str, connect: F) -> Result<C, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<C, E>>,
    {
        let pooled = self.connections.lock().get(key).cloned();
        if let Some(connection) = pooled {
            return Ok(connection);
        }

        let connection = connect().await?;
        Ok(self
            .connections
            .lock()
            .entry(key.to_string())
            .or_insert(connection)
            .clone())
    }

    fn evict(&self, key: &str) {
        self.connections.lock().remove(key);
    }

    fn len(&self) -> usize {
        self.connections.lock().len()
    }
}

// =============================================================================
// Command Builders
// =============================================================================

fn xadd_command(stream: &str, max_len: usize, fields: &EntryFields) -> Cmd {
    let mut cmd = redis::cmd("XADD");
    cmd.arg(stream).arg("MAXLEN").arg("~").arg(max_len).arg("*");
    for (field, value) in fields.iter() {
        cmd.arg(field).arg(value);
    }
    cmd
}

fn xgroup_create_command(stream: &str, group: &str, mkstream: bool) -> Cmd {
    let mut cmd = redis::cmd("XGROUP");
    cmd.arg("CREATE").arg(stream).arg(group).arg("0");
    if mkstream {
        cmd.arg("MKSTREAM");
    }
    cmd
}

fn xreadgroup_command(
    stream: &str,
    group: &str,
    consumer: &str,
    count: usize,
    block: Duration,
) -> Cmd {
    let block_ms = u64::try_from(block.as_millis()).unwrap_or(u64::MAX);
    let mut cmd = redis::cmd("XREADGROUP");
    cmd.arg("GROUP")
        .arg(group)
        .arg(consumer)
        .arg("COUNT")
        .arg(count)
        .arg("BLOCK")
        .arg(block_ms)
        .arg("STREAMS")
        .arg(stream)
        .arg(">");
    cmd
}

// =============================================================================
// Reply Parsing
// =============================================================================

/// Parse an `XREADGROUP` reply for a single stream.
///
/// RESP2: `[[key, [[id, [f, v, ...]], ...]]]`; RESP3: `{key: [[id, [f, v, ...]], ...]}`.
/// A nil reply means the block window elapsed.
fn parse_read_reply(reply: Value) -> Result<Vec<StreamEntry>, BrokerError> {
    let per_stream: Vec<Value> = match reply {
        Value::Nil => return Ok(Vec::new()),
        Value::Array(streams) => streams
            .into_iter()
            .map(|item| match item {
                Value::Array(mut pair) if pair.len() == 2 => Ok(pair.swap_remove(1)),
                other => Err(BrokerError::decode(
                    "-",
                    format!("unexpected stream reply: {other:?}"),
                )),
            })
            .collect::<Result<_, _>>()?,
        Value::Map(streams) => streams.into_iter().map(|(_, entries)| entries).collect(),
        other => {
            return Err(BrokerError::decode(
                "-",
                format!("unexpected XREADGROUP reply: {other:?}"),
            ));
        }
    };

    let mut entries = Vec::new();
    for stream_entries in per_stream {
        match stream_entries {
            Value::Array(items) => {
                for item in items {
                    entries.push(parse_entry(item)?);
                }
            }
            Value::Nil => {}
            other => {
                return Err(BrokerError::decode(
                    "-",
                    format!("unexpected entry list: {other:?}"),
                ));
            }
        }
    }
    Ok(entries)
}

fn parse_entry(item: Value) -> Result<StreamEntry, BrokerError> {
    let Value::Array(mut pair) = item else {
        return Err(BrokerError::decode("-", "entry is not an [id, fields] pair"));
    };
    if pair.len() != 2 {
        return Err(BrokerError::decode("-", "entry is not an [id, fields] pair"));
    }

    let raw_fields = pair.swap_remove(1);
    let id = value_to_string(&pair[0])
        .ok_or_else(|| BrokerError::decode("-", "entry id is not a string"))?;

    let flat: Vec<Value> = match raw_fields {
        Value::Array(values) => values,
        Value::Map(pairs) => pairs.into_iter().flat_map(|(f, v)| [f, v]).collect(),
        Value::Nil => return Err(BrokerError::decode(id, "entry was deleted")),
        other => return Err(BrokerError::decode(id, format!("unexpected fields: {other:?}"))),
    };
    if flat.len() % 2 != 0 {
        return Err(BrokerError::decode(id, "odd number of field values"));
    }

    let mut pairs = Vec::with_capacity(flat.len() / 2);
    for chunk in flat.chunks_exact(2) {
        let field = utf8(&chunk[0]).map_err(|m| BrokerError::decode(&id, m))?;
        let value = utf8(&chunk[1]).map_err(|m| BrokerError::decode(&id, m))?;
        pairs.push((field, value));
    }

    let fields =
        EntryFields::try_from_pairs(pairs).map_err(|e| BrokerError::decode(&id, e.to_string()))?;
    Ok(StreamEntry::new(id, fields))
}

fn utf8(value: &Value) -> Result<String, String> {
    match value {
        Value::BulkString(bytes) => {
            String::from_utf8(bytes.clone()).map_err(|_| "field is not valid UTF-8".to_string())
        }
        other => value_to_string(other).ok_or_else(|| format!("unexpected field value: {other:?}")),
    }
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::BulkString(bytes) => String::from_utf8(bytes.clone()).ok(),
        Value::SimpleString(s) => Some(s.clone()),
        Value::Int(i) => Some(i.to_string()),
        _ => None,
    }
}

// =============================================================================
// Tests
// =============================================================================
