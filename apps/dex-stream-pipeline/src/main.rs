//! DEX Stream Pipeline Binary
//!
//! Runs the ingest job and relay for one marketplace/blockchain/stream.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin dex-stream-pipeline
//! ```
//!
//! # Environment Variables
//!
//! - `REDIS_HOST` / `REDIS_PORT` / `REDIS_DB`: broker address (default: 127.0.0.1:6379/0)
//! - `REDIS_CONFIG_PATH`: JSON file with `host`, `port`, `db`
//! - `STREAM_PIPELINE_MARKETPLACE`: hyperliquid | vertex (default: hyperliquid)
//! - `STREAM_PIPELINE_BLOCKCHAIN`: solana | ethereum | cosmos | hyperliquid (default: hyperliquid)
//! - `STREAM_PIPELINE_STREAM`: trades | pnl | prices (default: prices)
//! - `STREAM_PIPELINE_VENUE_URL`: venue info endpoint
//! - `STREAM_PIPELINE_HEALTH_PORT`: Health check HTTP port (default: 8083)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use dex_stream_pipeline::application::services::JobStats;
use dex_stream_pipeline::infrastructure::health::{HealthServer, HealthServerState};
use dex_stream_pipeline::infrastructure::telemetry;
use dex_stream_pipeline::{
    HttpVenueSource, IngestJob, PipelineConfig, QuoteNormalizer, RedisBroker, Relay, SharedBroker,
    StreamRegistry, init_metrics,
};
use tokio::signal;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting DEX Stream Pipeline");

    let _metrics_handle = init_metrics();

    let config = PipelineConfig::from_env()?;
    log_config(&config);

    let broker: SharedBroker =
        Arc::new(RedisBroker::connect(&config.broker, config.polling.poll.block).await?);
    let registry = Arc::new(StreamRegistry::new(
        config.streams.marketplace,
        config.streams.blockchain,
    ));
    let stream = config.streams.stream;

    let shutdown_token = CancellationToken::new();
    let mut tasks = JoinSet::new();

    let ingest_stats = JobStats::shared("ingest");
    let relay_stats = JobStats::shared("relay");

    let source = HttpVenueSource::new(
        config.streams.marketplace,
        config.venue.url.clone(),
        config.venue.timeout,
    )?;
    let ingest = IngestJob::new(
        source,
        Arc::clone(&broker),
        registry.raw(stream),
        config.venue.query.clone(),
        config.venue.interval,
    )
    .with_stats(Arc::clone(&ingest_stats));
    tasks.spawn(ingest.run(shutdown_token.clone()));

    let relay = Relay::new(
        Arc::clone(&broker),
        &registry,
        stream,
        QuoteNormalizer::default(),
    )
    .with_settings(config.polling.poll)
    .with_backoff(config.polling.backoff.clone())
    .with_stats(Arc::clone(&relay_stats));
    tasks.spawn(relay.run(shutdown_token.clone()));

    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&registry),
        vec![ingest_stats, relay_stats],
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    tasks.spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    tracing::info!("Stream pipeline ready");

    await_shutdown(shutdown_token).await;

    let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Task panicked during shutdown");
            }
        }
    })
    .await;

    if drained.is_err() {
        tracing::warn!(
            remaining = tasks.len(),
            "Shutdown timeout elapsed, aborting remaining tasks"
        );
        tasks.abort_all();
    }

    tracing::info!("Stream pipeline stopped");
    Ok(())
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        for dir in cwd.ancestors().skip(1) {
            let env_path = dir.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &PipelineConfig) {
    tracing::info!(
        marketplace = %config.streams.marketplace,
        blockchain = %config.streams.blockchain,
        stream = %config.streams.stream,
        redis_host = %config.broker.host,
        redis_port = config.broker.port,
        redis_db = config.broker.db,
        health_port = config.server.health_port,
        "Configuration loaded"
    );
    tracing::debug!(
        venue_url = %config.venue.url,
        venue_query = %config.venue.query,
        interval_secs = config.venue.interval.as_secs(),
        block_ms = u64::try_from(config.polling.poll.block.as_millis()).unwrap_or(u64::MAX),
        max_len = config.broker.max_len,
        "Pipeline settings"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
