//! Pipeline Configuration Settings
//!
//! Configuration types for the pipeline, loaded from environment variables
//! with an optional JSON file for broker connection details.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::application::services::{BackoffConfig, PollSettings};
use crate::domain::stream_key::{Blockchain, Marketplace, StreamKeyError, StreamName};
use crate::infrastructure::memory::DEFAULT_MAX_LEN;

/// Redis connection and write settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerSettings {
    /// Redis host.
    pub host: String,
    /// Redis port.
    pub port: u16,
    /// Logical database index.
    pub db: i64,
    /// Approximate cap applied on every append.
    pub max_len: usize,
    /// Create the stream when creating a group on a missing key.
    pub create_missing_streams: bool,
    /// Connect timeout, also added to the block window for responses.
    pub io_timeout: Duration,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            db: 0,
            max_len: DEFAULT_MAX_LEN,
            create_missing_streams: true,
            io_timeout: Duration::from_millis(5000),
        }
    }
}

/// Connection fields accepted from a JSON config file.
#[derive(Debug, Deserialize)]
struct BrokerFile {
    host: String,
    port: u16,
    #[serde(default)]
    db: i64,
}

impl BrokerSettings {
    /// Connection URL.
    #[must_use]
    pub fn redis_url(&self) -> String {
        format!("redis://{}:{}/{}", self.host, self.port, self.db)
    }

    /// Override host, port and db from a JSON file of the form
    /// `{"host": "...", "port": 6379, "db": 0}`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ConfigFile`] if the file cannot be read or parsed.
    pub fn with_json_file(mut self, path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ConfigFile {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let file: BrokerFile =
            serde_json::from_str(&contents).map_err(|e| ConfigError::ConfigFile {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;

        self.host = file.host;
        self.port = file.port;
        self.db = file.db;
        Ok(self)
    }
}

/// Which streams this process serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSettings {
    /// Venue.
    pub marketplace: Marketplace,
    /// Chain.
    pub blockchain: Blockchain,
    /// Stream fed by the ingest job and relayed.
    pub stream: StreamName,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            marketplace: Marketplace::Hyperliquid,
            blockchain: Blockchain::Hyperliquid,
            stream: StreamName::Prices,
        }
    }
}

/// Read loop settings.
#[derive(Debug, Clone, Default)]
pub struct PollingSettings {
    /// Batch size and block window.
    pub poll: PollSettings,
    /// Delay policy after failed reads.
    pub backoff: BackoffConfig,
}

/// Venue query settings.
#[derive(Debug, Clone)]
pub struct VenueSettings {
    /// Info endpoint.
    pub url: String,
    /// JSON request body.
    pub query: Value,
    /// Time between fetches.
    pub interval: Duration,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for VenueSettings {
    fn default() -> Self {
        Self {
            url: "https://api.hyperliquid.xyz/info".to_string(),
            query: serde_json::json!({"type": "allMids"}),
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// Complete pipeline configuration.
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    /// Broker connection.
    pub broker: BrokerSettings,
    /// Served streams.
    pub streams: StreamSettings,
    /// Read loop.
    pub polling: PollingSettings,
    /// Venue fetch.
    pub venue: VenueSettings,
    /// Server ports.
    pub server: ServerSettings,
}

impl PipelineConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a dimension name is unknown, the venue query is
    /// not JSON, or `REDIS_CONFIG_PATH` points at an unreadable file.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// See [`PipelineConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(&lookup);
        let defaults = Self::default();

        let mut broker = BrokerSettings {
            host: env
                .string("REDIS_HOST")
                .unwrap_or(defaults.broker.host),
            port: env.parse("REDIS_PORT", defaults.broker.port),
            db: env.parse("REDIS_DB", defaults.broker.db),
            max_len: env.parse("STREAM_PIPELINE_MAX_LEN", defaults.broker.max_len),
            create_missing_streams: env.bool(
                "STREAM_PIPELINE_MKSTREAM",
                defaults.broker.create_missing_streams,
            ),
            io_timeout: env.millis("STREAM_PIPELINE_IO_TIMEOUT_MS", defaults.broker.io_timeout),
        };
        if let Some(path) = env.string("REDIS_CONFIG_PATH") {
            broker = broker.with_json_file(path)?;
        }

        let streams = StreamSettings {
            marketplace: env.dimension("STREAM_PIPELINE_MARKETPLACE", defaults.streams.marketplace)?,
            blockchain: env.dimension("STREAM_PIPELINE_BLOCKCHAIN", defaults.streams.blockchain)?,
            stream: env.dimension("STREAM_PIPELINE_STREAM", defaults.streams.stream)?,
        };

        let backoff_defaults = BackoffConfig::default();
        let polling = PollingSettings {
            poll: PollSettings {
                count: env.parse("STREAM_PIPELINE_READ_COUNT", defaults.polling.poll.count),
                block: env.millis("STREAM_PIPELINE_BLOCK_MS", defaults.polling.poll.block),
            },
            backoff: BackoffConfig {
                initial_delay: env.millis(
                    "STREAM_PIPELINE_BACKOFF_INITIAL_MS",
                    backoff_defaults.initial_delay,
                ),
                max_delay: env.millis("STREAM_PIPELINE_BACKOFF_MAX_MS", backoff_defaults.max_delay),
                multiplier: env.parse(
                    "STREAM_PIPELINE_BACKOFF_MULTIPLIER",
                    backoff_defaults.multiplier,
                ),
                jitter_factor: backoff_defaults.jitter_factor,
            },
        };

        let query = match env.string("STREAM_PIPELINE_VENUE_QUERY") {
            Some(raw) => serde_json::from_str(&raw).map_err(|e| ConfigError::InvalidValue {
                key: "STREAM_PIPELINE_VENUE_QUERY".to_string(),
                message: e.to_string(),
            })?,
            None => defaults.venue.query,
        };
        let venue = VenueSettings {
            url: env
                .string("STREAM_PIPELINE_VENUE_URL")
                .unwrap_or(defaults.venue.url),
            query,
            interval: env.secs("STREAM_PIPELINE_VENUE_INTERVAL_SECS", defaults.venue.interval),
            timeout: env.secs("STREAM_PIPELINE_VENUE_TIMEOUT_SECS", defaults.venue.timeout),
        };

        let server = ServerSettings {
            health_port: env.parse("STREAM_PIPELINE_HEALTH_PORT", defaults.server.health_port),
        };

        Ok(Self {
            broker,
            streams,
            polling,
            venue,
            server,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A variable is set to a value that cannot be used.
    #[error("invalid value for {key}: {message}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Parse failure.
        message: String,
    },
    /// Broker config file could not be loaded.
    #[error("failed to load config file {path}: {message}")]
    ConfigFile {
        /// File path.
        path: String,
        /// Read or parse failure.
        message: String,
    },
    /// Unknown marketplace, blockchain or stream name.
    #[error(transparent)]
    InvalidDimension(#[from] StreamKeyError),
}

struct Env<'a, F>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.is_empty())
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.string(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn bool(&self, key: &str, default: bool) -> bool {
        match self.string(key).map(|v| v.trim().to_lowercase()).as_deref() {
            Some("1" | "true" | "yes" | "on") => true,
            Some("0" | "false" | "no" | "off") => false,
            _ => default,
        }
    }

    fn secs(&self, key: &str, default: Duration) -> Duration {
        self.string(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn millis(&self, key: &str, default: Duration) -> Duration {
        self.string(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }

    fn dimension<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: std::str::FromStr<Err = StreamKeyError>,
    {
        self.string(key)
            .map_or(Ok(default), |v| v.trim().parse().map_err(ConfigError::from))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<PipelineConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        PipelineConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_without_variables() {
        let config = load(&[]).unwrap();

        assert_eq!(config.broker.redis_url(), "redis://127.0.0.1:6379/0");
        assert_eq!(config.broker.max_len, 10_000);
        assert!(config.broker.create_missing_streams);
        assert_eq!(config.streams, StreamSettings::default());
        assert_eq!(config.polling.poll.count, 1);
        assert_eq!(config.polling.poll.block, Duration::from_millis(1000));
        assert_eq!(config.polling.backoff.initial_delay, Duration::from_millis(100));
        assert_eq!(config.venue.query, serde_json::json!({"type": "allMids"}));
        assert_eq!(config.venue.interval, Duration::from_secs(10));
        assert_eq!(config.server.health_port, 8083);
    }

    #[test]
    fn variables_override_defaults() {
        let config = load(&[
            ("REDIS_HOST", "redis.internal"),
            ("REDIS_PORT", "6380"),
            ("REDIS_DB", "2"),
            ("STREAM_PIPELINE_MKSTREAM", "false"),
            ("STREAM_PIPELINE_MARKETPLACE", "vertex"),
            ("STREAM_PIPELINE_BLOCKCHAIN", "ethereum"),
            ("STREAM_PIPELINE_STREAM", "pnl"),
            ("STREAM_PIPELINE_BLOCK_MS", "250"),
            ("STREAM_PIPELINE_BACKOFF_INITIAL_MS", "0"),
            ("STREAM_PIPELINE_VENUE_QUERY", r#"{"type":"meta"}"#),
        ])
        .unwrap();

        assert_eq!(config.broker.redis_url(), "redis://redis.internal:6380/2");
        assert!(!config.broker.create_missing_streams);
        assert_eq!(config.streams.marketplace, Marketplace::Vertex);
        assert_eq!(config.streams.blockchain, Blockchain::Ethereum);
        assert_eq!(config.streams.stream, StreamName::Pnl);
        assert_eq!(config.polling.poll.block, Duration::from_millis(250));
        assert!(config.polling.backoff.is_disabled());
        assert_eq!(config.venue.query, serde_json::json!({"type": "meta"}));
    }

    #[test]
    fn malformed_numbers_fall_back() {
        let config = load(&[
            ("REDIS_PORT", "not-a-port"),
            ("STREAM_PIPELINE_READ_COUNT", "-3"),
        ])
        .unwrap();

        assert_eq!(config.broker.port, 6379);
        assert_eq!(config.polling.poll.count, 1);
    }

    #[test]
    fn unknown_dimension_is_rejected() {
        let err = load(&[("STREAM_PIPELINE_BLOCKCHAIN", "bitcoin")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDimension(_)));
    }

    #[test]
    fn invalid_venue_query_is_rejected() {
        let err = load(&[("STREAM_PIPELINE_VENUE_QUERY", "{not json")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key, .. } if key == "STREAM_PIPELINE_VENUE_QUERY"));
    }

    #[test]
    fn json_file_overrides_connection() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"host": "10.0.0.5", "port": 7000, "db": 3}}"#).unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let config = load(&[("REDIS_HOST", "ignored"), ("REDIS_CONFIG_PATH", &path)]).unwrap();

        assert_eq!(config.broker.redis_url(), "redis://10.0.0.5:7000/3");
        assert_eq!(config.broker.max_len, 10_000);
    }

    #[test]
    fn json_file_db_defaults_to_zero() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"host": "cache", "port": 6379}}"#).unwrap();

        let settings = BrokerSettings::default().with_json_file(file.path()).unwrap();

        assert_eq!(settings.redis_url(), "redis://cache:6379/0");
    }

    #[test]
    fn missing_json_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = BrokerSettings::default()
            .with_json_file(dir.path().join("redis.json"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::ConfigFile { .. }));
    }
}
