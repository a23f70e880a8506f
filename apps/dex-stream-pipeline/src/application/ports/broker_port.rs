//! Broker Port
//!
//! Contract for a log-structured broker with consumer groups. Every method
//! is safe to call concurrently from many tasks and many processes on the
//! same handle; atomicity of each call is delegated to the broker.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::consumer_group::GroupName;
use crate::domain::payload::{EntryFields, StreamEntry};
use crate::domain::stream_key::StreamKey;

/// Shared broker handle.
pub type SharedBroker = Arc<dyn StreamBroker>;

/// Failure reported by a broker call.
///
/// "Group already exists" is not represented: it is absorbed by
/// [`StreamBroker::ensure_consumer_group`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    /// Connection refused, dropped, or timed out.
    #[error("broker unavailable: {message}")]
    Unavailable {
        /// Underlying failure.
        message: String,
    },

    /// The broker answered with an error reply.
    #[error("broker rejected {command}: {message}")]
    Rejected {
        /// Command name, e.g. `XADD`.
        command: &'static str,
        /// Error reply.
        message: String,
    },

    /// A reply could not be decoded into entries.
    #[error("failed to decode entry {entry_id}: {message}")]
    Decode {
        /// Entry id, or `-` when the reply shape itself was wrong.
        entry_id: String,
        /// Decoding failure.
        message: String,
    },
}

impl BrokerError {
    /// Create an unavailable error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Create a rejection error.
    #[must_use]
    pub fn rejected(command: &'static str, message: impl Into<String>) -> Self {
        Self::Rejected {
            command,
            message: message.into(),
        }
    }

    /// Create a decode error.
    #[must_use]
    pub fn decode(entry_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            entry_id: entry_id.into(),
            message: message.into(),
        }
    }

    /// Whether retrying the same call may succeed without intervention.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }

    /// Short label for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Unavailable { .. } => "unavailable",
            Self::Rejected { .. } => "rejected",
            Self::Decode { .. } => "decode",
        }
    }
}

/// Log-structured broker with consumer groups.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StreamBroker: Send + Sync {
    /// Create `group` on `stream` with its cursor at the start of the
    /// stream. Succeeds without change if the group already exists.
    async fn ensure_consumer_group(
        &self,
        stream: &StreamKey,
        group: &GroupName,
    ) -> Result<(), BrokerError>;

    /// Append one entry, trimming the stream to the configured approximate
    /// maximum length. Returns the broker-assigned entry id.
    async fn append(&self, stream: &StreamKey, fields: &EntryFields)
    -> Result<String, BrokerError>;

    /// Read up to `count` entries never delivered to `group`, waiting up to
    /// `block` for at least one. An empty vector means the window elapsed
    /// with nothing new. Entries are not acknowledged.
    async fn read_group(
        &self,
        stream: &StreamKey,
        group: &GroupName,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>, BrokerError>;
}

impl std::fmt::Debug for dyn StreamBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StreamBroker")
    }
}
