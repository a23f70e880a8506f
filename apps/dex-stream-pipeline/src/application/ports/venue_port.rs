//! Venue Port
//!
//! A venue is any remote source of market data that can be queried on
//! demand. The pipeline never inspects what it returns beyond publishing it.

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::payload::Payload;

/// Venue request failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VenueError {
    /// The request did not complete.
    #[error("venue request failed: {0}")]
    Request(String),

    /// The venue answered with a non-success status.
    #[error("venue returned status {code}: {body}")]
    Status {
        /// HTTP status code.
        code: u16,
        /// Response body, possibly truncated.
        body: String,
    },
}

/// Queryable market data source.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VenueSource: Send + Sync {
    /// Venue label for logs and metrics.
    fn name(&self) -> &'static str;

    /// Run one query and return the venue's response.
    async fn fetch(&self, query: &Value) -> Result<Payload, VenueError>;
}
