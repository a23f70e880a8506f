//! HTTP Venue Source
//!
//! POSTs a JSON query to a venue's info endpoint and hands the response body
//! back untouched. Hyperliquid's `/info` endpoint is the default target.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::application::ports::{VenueError, VenueSource};
use crate::domain::payload::Payload;
use crate::domain::stream_key::Marketplace;

/// Error bodies longer than this are truncated.
const MAX_ERROR_BODY: usize = 512;

/// Venue queried over HTTP.
#[derive(Debug, Clone)]
pub struct HttpVenueSource {
    client: reqwest::Client,
    url: String,
    marketplace: Marketplace,
}

impl HttpVenueSource {
    /// Create a source for `marketplace` at `url`.
    ///
    /// # Errors
    ///
    /// Returns [`VenueError::Request`] if the HTTP client cannot be built.
    pub fn new(
        marketplace: Marketplace,
        url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, VenueError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VenueError::Request(e.to_string()))?;

        Ok(Self {
            client,
            url: url.into(),
            marketplace,
        })
    }

    /// Endpoint URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl VenueSource for HttpVenueSource {
    fn name(&self) -> &'static str {
        self.marketplace.as_str()
    }

    async fn fetch(&self, query: &Value) -> Result<Payload, VenueError> {
        let response = self
            .client
            .post(&self.url)
            .json(query)
            .send()
            .await
            .map_err(|e| VenueError::Request(e.to_string()))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| VenueError::Request(e.to_string()))?;

        if !status.is_success() {
            let mut text = String::from_utf8_lossy(&body).into_owned();
            if text.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !text.is_char_boundary(cut) {
                    cut -= 1;
                }
                text.truncate(cut);
            }
            return Err(VenueError::Status {
                code: status.as_u16(),
                body: text,
            });
        }

        tracing::trace!(venue = self.name(), bytes = body.len(), "Venue response");
        Ok(Payload::RawBytes(body.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use axum::Json;
    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::post;
    use serde_json::json;
    use tokio::net::TcpListener;

    use super::*;

    async fn serve(router: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/info")
    }

    #[tokio::test]
    async fn posts_query_and_returns_body() {
        let router = Router::new().route(
            "/info",
            post(|Json(query): Json<Value>| async move {
                assert_eq!(query, json!({"type": "allMids"}));
                r#"{"BTC":"39874.5","ETH":"2645.55"}"#
            }),
        );
        let url = serve(router).await;
        let source =
            HttpVenueSource::new(Marketplace::Hyperliquid, url, Duration::from_secs(5)).unwrap();

        let payload = source.fetch(&json!({"type": "allMids"})).await.unwrap();

        assert_eq!(source.name(), "hyperliquid");
        assert_eq!(
            payload,
            Payload::RawBytes(br#"{"BTC":"39874.5","ETH":"2645.55"}"#.to_vec())
        );
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let router = Router::new().route(
            "/info",
            post(|| async { (StatusCode::TOO_MANY_REQUESTS, "x".repeat(2_000)) }),
        );
        let url = serve(router).await;
        let source =
            HttpVenueSource::new(Marketplace::Hyperliquid, url, Duration::from_secs(5)).unwrap();

        let err = source.fetch(&json!({})).await.unwrap_err();

        match err {
            VenueError::Status { code, body } => {
                assert_eq!(code, 429);
                assert_eq!(body.len(), MAX_ERROR_BODY);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_venue_is_a_request_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let source = HttpVenueSource::new(
            Marketplace::Vertex,
            format!("http://{addr}/info"),
            Duration::from_secs(1),
        )
        .unwrap();

        assert!(matches!(
            source.fetch(&json!({})).await,
            Err(VenueError::Request(_))
        ));
    }
}
