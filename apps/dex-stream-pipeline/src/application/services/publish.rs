//! Publish Interceptor
//!
//! Wraps an async producer so that every successful result is also appended
//! to a stream. The wrapped operation keeps the producer's inputs and returns
//! the producer's result unchanged.
//!
//! ```text
//! args ──► producer ──Ok(value)──► flatten ──► broker.append(stream) ──► Ok(value)
//!              │                      │                 │
//!              └─Err(e)──► Inner(e)   └─► Serialization └─► Broker
//! ```
//!
//! Nothing is appended unless the producer succeeds and its result flattens
//! into stream fields. Each wrapper appends once per call to its own stream,
//! so an adapted publisher layered over a raw publisher writes one entry to
//! each stream.

use std::future::Future;

use crate::application::ports::{BrokerError, SharedBroker};
use crate::domain::payload::{SerializationError, ToPayload};
use crate::domain::stream_key::StreamKey;
use crate::infrastructure::metrics;

/// Failure of a published call.
#[derive(Debug, thiserror::Error)]
pub enum PublishError<E> {
    /// The producer failed; nothing was published.
    #[error(transparent)]
    Inner(E),

    /// The result cannot be flattened into stream fields.
    #[error("result is not publishable: {0}")]
    Serialization(#[from] SerializationError),

    /// The broker refused or failed the append.
    #[error("failed to publish to {stream}: {source}")]
    Broker {
        /// Target stream.
        stream: String,
        /// Broker failure.
        #[source]
        source: BrokerError,
    },
}

impl<E> PublishError<E> {
    /// Producer error, if the producer failed.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            Self::Serialization(_) | Self::Broker { .. } => None,
        }
    }

    /// Whether the failure happened after the producer succeeded.
    #[must_use]
    pub const fn is_publish_failure(&self) -> bool {
        !matches!(self, Self::Inner(_))
    }
}

/// Wrap `op` so its results are appended to `stream`.
pub fn with_publish<F>(op: F, stream: StreamKey, broker: SharedBroker) -> Published<F> {
    Published { op, stream, broker }
}

/// A producer whose results are appended to a stream.
#[derive(Clone)]
pub struct Published<F> {
    op: F,
    stream: StreamKey,
    broker: SharedBroker,
}

impl<F> std::fmt::Debug for Published<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Published")
            .field("stream", &self.stream)
            .finish_non_exhaustive()
    }
}

impl<F> Published<F> {
    /// Target stream.
    #[must_use]
    pub const fn stream(&self) -> StreamKey {
        self.stream
    }

    /// Run the producer and publish its result.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::Inner`] with the producer's error untouched,
    /// [`PublishError::Serialization`] if the result is not a flat mapping,
    /// or [`PublishError::Broker`] if the append fails.
    pub async fn call<A, Fut, T, E>(&self, args: A) -> Result<T, PublishError<E>>
    where
        F: Fn(A) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        T: ToPayload,
    {
        let value = (self.op)(args).await.map_err(PublishError::Inner)?;
        let stream = self.stream.to_string();

        let fields = match value.to_payload().and_then(|payload| payload.to_fields()) {
            Ok(fields) => fields,
            Err(e) => {
                tracing::error!(stream = %stream, error = %e, "Result is not publishable");
                metrics::record_publish_error(&stream, "serialization");
                return Err(e.into());
            }
        };

        match self.broker.append(&self.stream, &fields).await {
            Ok(entry_id) => {
                tracing::debug!(
                    stream = %stream,
                    entry_id = %entry_id,
                    fields = fields.len(),
                    "Published entry"
                );
                metrics::record_published(&stream);
                Ok(value)
            }
            Err(source) => {
                tracing::warn!(stream = %stream, error = %source, "Publish failed");
                metrics::record_publish_error(&stream, source.kind());
                Err(PublishError::Broker { stream, source })
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
