//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Configuration loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// In-process stream broker.
pub mod memory;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Redis Streams broker.
pub mod redis;

/// OpenTelemetry tracing integration.
pub mod telemetry;

/// HTTP venue sources.
pub mod venue;
