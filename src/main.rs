// =============================================================================
// Borealis Signal Engine — Main Entry Point
// =============================================================================
//
// Boot order: env + logging, config (invalid config is fatal), store
// (unreachable store is fatal), warm start, stream supervisors, status loop.
// The process then runs until Ctrl+C or a fatal subscription error from a
// stream supervisor.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod analyzers;
mod config;
mod engine;
mod fusion;
mod indicators;
mod market_data;
mod notify;
mod store;
mod types;

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::BotConfig;
use crate::engine::SignalEngine;
use crate::fusion::SignalFuser;
use crate::market_data::stream::{supervise_stream, StreamError, MAX_STREAMS_PER_CONNECTION};
use crate::market_data::{CandleAggregator, HistoryClient};
use crate::notify::{NullNotifier, SignalNotifier, WebhookNotifier};
use crate::store::{SignalStore, SqliteStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & logging ─────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Borealis Signal Engine starting up");

    // ── 2. Configuration (invalid config is fatal) ───────────────────────
    let config_path =
        std::env::var("BOREALIS_CONFIG").unwrap_or_else(|_| "borealis_config.json".into());

    let mut config = if std::path::Path::new(&config_path).exists() {
        BotConfig::load(&config_path)?
    } else {
        warn!(path = %config_path, "config file not found; using defaults");
        BotConfig::default()
    };
    config.apply_env_overrides();
    config.validate()?;

    let keys = config.stream_keys();
    info!(
        symbols = config.symbols.len(),
        timeframes = config.timeframes.len(),
        streams = keys.len(),
        min_confidence = config.min_confidence,
        "configuration ready"
    );

    // ── 3. Store (unreachable store is fatal) ────────────────────────────
    let store: Arc<dyn SignalStore> = Arc::new(SqliteStore::connect(&config.database_url).await?);

    // ── 4. Notifier ──────────────────────────────────────────────────────
    let notifier: Arc<dyn SignalNotifier> = match &config.webhook_url {
        Some(url) => {
            info!("webhook notifier enabled");
            Arc::new(WebhookNotifier::new(url.clone()))
        }
        None => {
            warn!("no webhook configured; signals will only be persisted");
            Arc::new(NullNotifier)
        }
    };

    // ── 5. Pipeline assembly ─────────────────────────────────────────────
    let aggregator = Arc::new(CandleAggregator::new(config.window_size));
    let fuser = Arc::new(SignalFuser::new(config.fusion(), store.clone(), notifier));
    let engine = SignalEngine::new(aggregator.clone(), fuser, store);

    // ── 6. Warm start ────────────────────────────────────────────────────
    let history = HistoryClient::new();
    engine
        .warm_start(&history, &keys, config.startup_candles)
        .await;

    // ── 7. Stream supervisors (one connection per <=200 streams) ─────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (fatal_tx, mut fatal_rx) = mpsc::channel::<StreamError>(1);

    for chunk in keys.chunks(MAX_STREAMS_PER_CONNECTION) {
        let chunk = chunk.to_vec();
        let aggregator = aggregator.clone();
        let shutdown = shutdown_rx.clone();
        let fatal = fatal_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = supervise_stream(chunk, aggregator, shutdown).await {
                let _ = fatal.send(e).await;
            }
        });
    }
    drop(fatal_tx);
    info!("market data streams launched");

    // ── 8. Status loop ───────────────────────────────────────────────────
    let status_fuser = engine.fuser();
    let status_aggregator = engine.aggregator();
    let status_interval = config.status_interval_seconds.max(1);
    let min_candles = config.min_candles;
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(tokio::time::Duration::from_secs(status_interval));
        interval.tick().await; // immediate first tick carries no information
        loop {
            interval.tick().await;
            let stats = status_fuser.stats();
            let tracked = status_aggregator.tracked_keys();
            let analysis_ready = tracked
                .iter()
                .filter(|key| status_aggregator.window_len(key) >= min_candles)
                .count();
            info!(
                emitted = stats.emitted,
                rejects = ?stats.rejects,
                keys_on_cooldown = stats.keys_on_cooldown,
                tracked_keys = tracked.len(),
                analysis_ready,
                "engine status"
            );
        }
    });

    info!("all subsystems running; press Ctrl+C to stop");

    // ── 9. Run until shutdown or fatal stream error ──────────────────────
    let fatal = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            warn!("shutdown signal received; stopping gracefully");
            None
        }
        maybe_err = fatal_rx.recv() => maybe_err,
    };

    // Cooperative shutdown: stop the streams, drain in-flight close events.
    let _ = shutdown_tx.send(true);
    engine.shutdown().await;

    match fatal {
        Some(e) => {
            error!(error = %e, "stream subscription is unrecoverable");
            Err(e.into())
        }
        None => {
            info!("Borealis shut down complete");
            Ok(())
        }
    }
}
