//! EdgeWatch - Polymarket insider-trading monitor
//! Flags unusually large trades, tests the trader's history for improbable
//! returns, and serves a ranked leaderboard of the least-likely-lucky.

use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::{net::TcpListener, sync::broadcast};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use edgewatch_backend::{
    api::{self, ApiState},
    config::Args,
    scrapers::{MarketDataSource, PolymarketDataClient},
    signals::{
        DbLeaderboard, FeedWatcher, FlagQueue, PipelineStats, SignificanceWorker, SimulationPool,
    },
};

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();

    let config = Args::parse().into_config()?;

    info!("🚀 EdgeWatch starting up");
    info!(
        "⚙️  threshold={} trades/call={} interval={:?} history≤{} runs={} top_k={} workers={}",
        config.watcher.suspicious_size,
        config.watcher.max_trades_per_call,
        config.watcher.poll_interval,
        config.worker.max_history,
        config.worker.monte_carlo_runs,
        config.worker.top_k,
        config.workers,
    );

    let leaderboard = Arc::new(
        DbLeaderboard::new(&config.db_path).context("Leaderboard store is unavailable")?,
    );
    let source: Arc<dyn MarketDataSource> =
        Arc::new(PolymarketDataClient::new(&config.data_api_url)?);
    let queue = Arc::new(FlagQueue::new());
    let stats = Arc::new(PipelineStats::new());
    let pool = SimulationPool::new(config.sim_threads)?;

    let listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind))?;
    info!("🎯 API server listening on {}", config.bind);

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut tasks = Vec::with_capacity(config.workers + 1);

    let watcher = Arc::new(FeedWatcher::new(
        source.clone(),
        queue.clone(),
        stats.clone(),
        config.watcher.clone(),
    ));
    tasks.push(tokio::spawn(watcher.run(shutdown_tx.subscribe())));

    for id in 0..config.workers {
        let worker = SignificanceWorker::new(
            id,
            source.clone(),
            queue.clone(),
            leaderboard.clone(),
            pool.clone(),
            stats.clone(),
            config.worker.clone(),
        );
        tasks.push(tokio::spawn(worker.run(shutdown_tx.subscribe())));
    }

    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("🛑 Shutdown requested"),
            Err(e) => error!("Failed to listen for ctrl-c: {}", e),
        }
        let _ = signal_tx.send(());
    });

    let app = api::router(ApiState {
        leaderboard: leaderboard.clone(),
        queue: queue.clone(),
        stats: stats.clone(),
    });

    let mut server_shutdown = shutdown_tx.subscribe();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = server_shutdown.recv().await;
    })
    .await
    .context("Server error")?;

    // Server can also stop on its own; make sure the pipeline follows.
    let _ = shutdown_tx.send(());
    for task in tasks {
        if let Err(e) = task.await {
            warn!("Pipeline task ended abnormally: {}", e);
        }
    }

    let snapshot = stats.snapshot();
    info!(
        "👋 Stopped: {} polls, {} flagged, {} scored, {} skipped",
        snapshot.polls, snapshot.flagged, snapshot.scored, snapshot.skipped,
    );
    match leaderboard.len() {
        Ok(ranked) => info!("🏆 {} traders ranked", ranked),
        Err(e) => warn!("Failed to read final leaderboard size: {:#}", e),
    }
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "edgewatch_backend=debug,edgewatch=debug,tower_http=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_env() {
    // 1) Standard dotenv search (cwd + parents)
    let _ = dotenv();

    // 2) Crate-root .env, for runs started from another directory
    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    let candidates = [manifest_dir.join(".env"), manifest_dir.join("../.env")];

    for p in candidates {
        if p.exists() {
            let _ = dotenv::from_path(&p);
        }
    }
}
