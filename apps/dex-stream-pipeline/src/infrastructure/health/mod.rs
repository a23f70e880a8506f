//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, job status reporting, and Prometheus metrics.
//! Used by container orchestrators, load balancers, and monitoring systems.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status with per-job counters
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (at least one job succeeding)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::{JobSnapshot, SharedJobStats};
use crate::domain::registry::SharedRegistry;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Pipeline version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Marketplace served by this process.
    pub marketplace: String,
    /// Blockchain served by this process.
    pub blockchain: String,
    /// Per-job counters.
    pub jobs: Vec<JobSnapshot>,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Every job's last iteration succeeded.
    Healthy,
    /// Some jobs are failing.
    Degraded,
    /// Every job is failing.
    Unhealthy,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
#[derive(Debug)]
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    registry: SharedRegistry,
    jobs: Vec<SharedJobStats>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(version: String, registry: SharedRegistry, jobs: Vec<SharedJobStats>) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            registry,
            jobs,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = Router::new()
            .route("/health", get(health_handler))
            .route("/healthz", get(liveness_handler))
            .route("/readyz", get(readiness_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let jobs: Vec<JobSnapshot> = state.jobs.iter().map(|job| job.snapshot()).collect();

    if determine_health_status(&jobs) == HealthStatus::Unhealthy {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    } else {
        (StatusCode::OK, "READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let jobs: Vec<JobSnapshot> = state.jobs.iter().map(|job| job.snapshot()).collect();

    HealthResponse {
        status: determine_health_status(&jobs),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        marketplace: state.registry.marketplace().to_string(),
        blockchain: state.registry.blockchain().to_string(),
        jobs,
    }
}

fn determine_health_status(jobs: &[JobSnapshot]) -> HealthStatus {
    let failing = jobs.iter().filter(|job| job.consecutive_failures > 0).count();

    match failing {
        0 => HealthStatus::Healthy,
        n if n < jobs.len() => HealthStatus::Degraded,
        _ => HealthStatus::Unhealthy,
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use axum::response::Response;

    use super::*;
    use crate::application::services::JobStats;
    use crate::domain::registry::StreamRegistry;
    use crate::domain::stream_key::{Blockchain, Marketplace};

    fn state(jobs: Vec<SharedJobStats>) -> Arc<HealthServerState> {
        let registry = Arc::new(StreamRegistry::new(
            Marketplace::Hyperliquid,
            Blockchain::Hyperliquid,
        ));
        Arc::new(HealthServerState::new("0.1.0".to_string(), registry, jobs))
    }

    fn failing(name: &str) -> SharedJobStats {
        let stats = JobStats::shared(name);
        stats.record_failure("broker unavailable");
        stats
    }

    fn succeeding(name: &str) -> SharedJobStats {
        let stats = JobStats::shared(name);
        stats.record_success(1);
        stats
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Degraded).unwrap(),
            "\"degraded\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }

    #[test]
    fn status_follows_failing_jobs() {
        let ok = succeeding("ingest").snapshot();
        let bad = failing("relay").snapshot();

        assert_eq!(determine_health_status(&[]), HealthStatus::Healthy);
        assert_eq!(
            determine_health_status(&[ok.clone(), ok.clone()]),
            HealthStatus::Healthy
        );
        assert_eq!(
            determine_health_status(&[ok, bad.clone()]),
            HealthStatus::Degraded
        );
        assert_eq!(determine_health_status(&[bad]), HealthStatus::Unhealthy);
    }

    #[test]
    fn response_lists_jobs() {
        let state = state(vec![succeeding("ingest"), failing("relay")]);

        let response = build_health_response(&state);

        assert_eq!(response.status, HealthStatus::Degraded);
        assert_eq!(response.marketplace, "hyperliquid");
        assert_eq!(response.jobs.len(), 2);
        assert_eq!(
            response.jobs[1].last_error.as_deref(),
            Some("broker unavailable")
        );
    }

    #[tokio::test]
    async fn readiness_requires_a_working_job() {
        let ready: Response = readiness_handler(State(state(vec![
            failing("ingest"),
            succeeding("relay"),
        ])))
        .await
        .into_response();
        assert_eq!(ready.status(), StatusCode::OK);

        let not_ready: Response =
            readiness_handler(State(state(vec![failing("ingest"), failing("relay")])))
                .await
                .into_response();
        assert_eq!(not_ready.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn unhealthy_health_is_service_unavailable() {
        let response: Response = health_handler(State(state(vec![failing("relay")])))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
