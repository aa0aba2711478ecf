//! Series Engine Binary
//!
//! Starts the market time-series aggregation engine.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin series-engine
//! ```
//!
//! # Environment Variables
//!
//! ## Required (non-simulated mode)
//! - `FEED_API_KEY`: Feed API key
//! - `FEED_API_SECRET`: Feed API secret
//!
//! ## Optional
//! - `SERIES_ENGINE_SIMULATED`: Run against the simulated source (default: false)
//! - `SERIES_ENGINE_SYMBOLS`: Symbols subscribed at startup, comma-separated
//! - `SERIES_ENGINE_TIMEFRAMES`: Aggregated timeframes (default: 1m,5m,15m)
//! - `SERIES_ENGINE_BUFFER_CAPACITY`: Per-series bar history (default: 500)
//! - `SERIES_ENGINE_SUBSCRIPTION_TTL_SECS`: Idle feed TTL (default: 300)
//! - `SERIES_ENGINE_SEED_LIMIT`: Bars seeded per series (default: 100)
//! - `SERIES_ENGINE_SWEEP_INTERVAL_SECS`: Idle sweep interval (default: 60)
//! - `SERIES_ENGINE_HEALTH_PORT`: Health check HTTP port (default: 8082)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4318>)
//! - `OTEL_SERVICE_NAME`: Service name (default: tapecast-series-engine)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Instant;

use series_engine::infrastructure::telemetry;
use series_engine::{
    AggregationEngine, EngineConfig, EngineSettings, Epoch, EventBus, FeedEvent, FreshnessGuard,
    HealthServer, HealthServerState, IngestError, SeedOptions, Sequencer, SharedEngine,
    SimulatedFeed, SimulatedFeedConfig, SubscriptionManager, SubscriptionSettings, init_metrics,
    select_source,
};
use series_engine::infrastructure::metrics;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting series engine");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics();

    let config = EngineConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Core: epoch, sequencer, bus, series registry
    let epoch = Arc::new(Epoch::new());
    let bus = Arc::new(EventBus::new());
    let engine: SharedEngine = Arc::new(AggregationEngine::new(
        EngineSettings {
            buffer_capacity: config.aggregation.buffer_capacity,
            timeframes: config.aggregation.timeframes.clone(),
        },
        Arc::new(Sequencer::new()),
        Arc::clone(&bus),
    ));

    // Feed: the vendor adapter slots in as `primary` at deployment; this
    // build ships the simulated source, so fatal-health fallback and
    // simulated mode converge on the same implementation.
    let (feed_tx, feed_rx) = mpsc::channel::<FeedEvent>(1024);
    let simulated = Arc::new(SimulatedFeed::new(
        SimulatedFeedConfig {
            tick_interval: config.sim_tick_interval,
            ..SimulatedFeedConfig::default()
        },
        feed_tx,
        shutdown_token.clone(),
    ));
    let selected = select_source(Arc::clone(&simulated) as _, simulated).await;
    if selected.degraded {
        tracing::warn!(
            reason = selected.reason.as_deref().unwrap_or("unspecified"),
            "Ingesting in degraded mode"
        );
    }

    // Subscription manager over the selected feed
    let subscriptions = Arc::new(SubscriptionManager::new(
        Arc::clone(&engine),
        Arc::clone(&selected.feed),
        SubscriptionSettings {
            idle_ttl: config.subscriptions.idle_ttl,
            seed_limit: config.subscriptions.seed_limit,
        },
    ));

    // Freshness guard, marked on every feed delivery
    let freshness = Arc::new(FreshnessGuard::with_window(config.freshness_window));

    // Health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&epoch),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        Arc::clone(&health_state),
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    // Feed event loop
    let ingest_engine = Arc::clone(&engine);
    let ingest_freshness = Arc::clone(&freshness);
    tokio::spawn(async move {
        handle_feed_events(feed_rx, ingest_engine, ingest_freshness).await;
    });

    // Startup seeding for watchlist symbols, then readiness
    for symbol in &config.watch_symbols {
        match subscriptions.subscribe(symbol, SeedOptions::default()).await {
            Ok(outcome) => {
                subscriptions.set_watchlist(symbol, true);
                metrics::record_bars_seeded(outcome.seeded as u64);
            }
            Err(e) => {
                tracing::warn!(symbol = %symbol, error = %e, "Startup subscribe failed");
            }
        }
    }
    health_state.set_ready();
    tracing::info!(epoch_id = epoch.id(), "Series engine ready");

    // Idle subscription sweep
    let sweep_subscriptions = Arc::clone(&subscriptions);
    let sweep_engine = Arc::clone(&engine);
    let sweep_bus = Arc::clone(&bus);
    let sweep_token = shutdown_token.clone();
    let sweep_interval = config.subscriptions.sweep_interval;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_interval);
        loop {
            tokio::select! {
                () = sweep_token.cancelled() => break,
                _ = interval.tick() => {
                    let torn_down = sweep_subscriptions.sweep().await;
                    if !torn_down.is_empty() {
                        tracing::info!(symbols = ?torn_down, "Swept idle subscriptions");
                    }
                    metrics::set_active_series(sweep_engine.series_count() as f64);
                    metrics::set_active_subscriptions(sweep_subscriptions.count() as f64);
                    metrics::set_bus_subscribers(sweep_bus.total_subscribers() as f64);
                }
            }
        }
    });

    await_shutdown(shutdown_token).await;

    // Close every open interval so the final partial bars are not lost.
    let flushed = engine.flush_all();
    tracing::info!(flushed = flushed.len(), "Flushed open intervals");

    tracing::info!("Series engine stopped");
    Ok(())
}

/// Consume feed events and fold them into the engine.
async fn handle_feed_events(
    mut rx: mpsc::Receiver<FeedEvent>,
    engine: SharedEngine,
    freshness: Arc<FreshnessGuard>,
) {
    while let Some(event) = rx.recv().await {
        match event {
            FeedEvent::Connected => {
                tracing::info!("Feed connected");
            }
            FeedEvent::Disconnected => {
                tracing::warn!("Feed disconnected");
            }
            FeedEvent::Tick(tick) => {
                freshness.mark_fetched();
                let started = Instant::now();
                match engine.ingest_tick(&tick) {
                    Ok(finalized) => {
                        metrics::record_tick_ingested();
                        for bar in &finalized {
                            metrics::record_bars_finalized(bar.timeframe.as_str(), 1);
                        }
                    }
                    Err(err @ IngestError::InvalidInput { .. }) => {
                        metrics::record_ingest_reject(metrics::RejectReason::Invalid);
                        tracing::warn!(error = %err, "Rejected tick");
                    }
                    Err(err @ IngestError::OutOfOrder { .. }) => {
                        metrics::record_ingest_reject(metrics::RejectReason::OutOfOrder);
                        tracing::warn!(error = %err, "Rejected tick");
                    }
                }
                metrics::record_ingest_duration(started.elapsed());
            }
            FeedEvent::Bar { timeframe, bar } => {
                freshness.mark_fetched();
                let started = Instant::now();
                match engine.ingest_bar(timeframe, &bar) {
                    Ok(finalized) => {
                        for out in &finalized {
                            metrics::record_bars_finalized(out.timeframe.as_str(), 1);
                        }
                    }
                    Err(err @ IngestError::InvalidInput { .. }) => {
                        metrics::record_ingest_reject(metrics::RejectReason::Invalid);
                        tracing::warn!(error = %err, "Rejected bar");
                    }
                    Err(err @ IngestError::OutOfOrder { .. }) => {
                        metrics::record_ingest_reject(metrics::RejectReason::OutOfOrder);
                        tracing::warn!(error = %err, "Rejected bar");
                    }
                }
                metrics::record_ingest_duration(started.elapsed());
            }
            FeedEvent::Error(msg) => {
                tracing::error!(error = %msg, "Feed error");
            }
        }
    }
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_err() {
        load_dotenv_from_ancestors();
    }
}

/// Log the parsed configuration.
fn log_config(config: &EngineConfig) {
    tracing::info!(
        simulated = config.simulated,
        buffer_capacity = config.aggregation.buffer_capacity,
        timeframes = ?config.aggregation.timeframes,
        symbols = ?config.watch_symbols,
        subscription_ttl_secs = config.subscriptions.idle_ttl.as_secs(),
        health_port = config.server.health_port,
        "Configuration loaded"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv_from_ancestors() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
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
}
