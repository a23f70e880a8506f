#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! DEX Stream Pipeline - Venue Data over Redis Streams
//!
//! Fetches market data from decentralized exchange venues, publishes the
//! unmodified responses onto raw streams, relays each raw entry through a
//! transformer onto the matching adapted stream, and serves grouped readers
//! of the adapted streams to downstream consumers.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Naming and payload rules with no I/O
//!   - `stream_key`: `{data_type}-{marketplace}-{blockchain}-{stream}` keys and their builder
//!   - `registry`: raw and adapted keys for one marketplace/blockchain pair
//!   - `consumer_group`: group and consumer naming
//!   - `payload`: flat field mappings written to and read from streams
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: stream broker and venue source interfaces
//!   - `services`: publish wrapper, poll loop, relay, ingest job, consumer
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `redis`: Redis Streams broker
//!   - `memory`: in-process broker for tests and local runs
//!   - `venue`: HTTP venue source
//!   - `config`: environment and file configuration
//!   - `health`, `metrics`, `telemetry`: operational endpoints and logging
//!
//! # Data Flow
//!
//! ```text
//!                ┌────────────┐  XADD   ┌──────────────┐ XREADGROUP ┌─────────┐
//! Venue /info ──►│ Ingest Job │────────►│  raw-*-*-*   │───────────►│  Relay  │
//!                └────────────┘         └──────────────┘            └────┬────┘
//!                                                                        │ XADD
//!                                       ┌──────────────┐ XREADGROUP ┌────▼────┐
//!                    Consumer N ◄───────│ adapted-*-*-*│◄───────────│Transform│
//!                                       └──────────────┘            └─────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Stream naming and payload types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::consumer_group::{GroupName, GroupNaming};
pub use domain::payload::{EntryFields, Payload, SerializationError, StreamEntry, ToPayload};
pub use domain::registry::{SharedRegistry, StreamRegistry};
pub use domain::stream_key::{
    Blockchain, DataType, Marketplace, StreamKey, StreamKeyBuilder, StreamKeyError, StreamName,
};

// Ports
pub use application::ports::{
    BrokerError, SharedBroker, StreamBroker, VenueError, VenueSource,
};

// Services
pub use application::services::{
    AdaptedConsumer, BackoffConfig, IngestJob, PollLoop, PollSettings, PublishError, Published,
    QuoteNormalizer, Relay, Transform, TransformError, with_publish,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, PipelineConfig};

// Brokers and venues
pub use infrastructure::memory::InMemoryBroker;
pub use infrastructure::redis::RedisBroker;
pub use infrastructure::venue::HttpVenueSource;

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
