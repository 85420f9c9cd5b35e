//! Significance Worker
//!
//! Consumer of the [`FlagQueue`]: pulls the flagged trader's position
//! history, runs the Monte Carlo test on the CPU pool, and records
//! `1 - p` on the leaderboard.
//!
//! The simulation never runs on the async runtime. It is handed to a
//! dedicated rayon pool and awaited through a oneshot channel; if the worker
//! is cancelled mid-simulation the result is dropped, never applied.

use crate::{
    models::{FlaggedEvent, Position, RawPosition},
    scrapers::polymarket_api::MarketDataSource,
    signals::{
        leaderboard::DbLeaderboard, monte_carlo, queue::FlagQueue, stats::PipelineStats,
    },
};
use anyhow::{Context, Result};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};

/// CPU-bound pool for significance tests, sized to the available cores by
/// default.
#[derive(Clone)]
pub struct SimulationPool {
    pool: Arc<rayon::ThreadPool>,
}

impl SimulationPool {
    /// `threads == 0` sizes the pool to the available cores.
    pub fn new(threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("mc-sim-{i}"))
            .build()
            .context("Failed to build simulation thread pool")?;

        info!("🧮 Simulation pool ready with {} threads", pool.current_num_threads());
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run the Monte Carlo test on the pool and wait for its p-value.
    pub async fn evaluate(&self, positions: Vec<Position>, runs: usize, seed: u64) -> Result<f64> {
        let (tx, rx) = oneshot::channel();
        self.pool.spawn(move || {
            let p = monte_carlo::monte_carlo(&positions, runs, seed);
            // Receiver is gone if the caller was cancelled.
            let _ = tx.send(p);
        });
        rx.await.context("Simulation dropped before completion")
    }
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub max_history: usize,
    pub monte_carlo_runs: usize,
    pub top_k: usize,
    /// Fixed seed for reproducible scoring; fresh entropy per event if `None`.
    pub seed: Option<u64>,
}

/// Why a flagged event produced no score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    EmptyHistory,
    Oversized(usize),
    Malformed,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyHistory => write!(f, "empty position history"),
            Self::Oversized(n) => write!(f, "history too long ({} positions)", n),
            Self::Malformed => write!(f, "malformed position records"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Evaluation {
    Scored { p_value: f64, score: f64 },
    Skipped(SkipReason),
}

/// Interpret raw position records as a position table.
///
/// Any record that is not an object with numeric `totalBought`,
/// `realizedPnl` and `avgPrice` (with `avgPrice` in `[0, 1]`) makes the
/// whole history unusable.
pub fn parse_history(raw: Vec<Value>, max_history: usize) -> Result<Vec<Position>, SkipReason> {
    if raw.is_empty() {
        return Err(SkipReason::EmptyHistory);
    }
    if raw.len() > max_history {
        return Err(SkipReason::Oversized(raw.len()));
    }

    raw.into_iter()
        .map(|record| {
            serde_json::from_value::<RawPosition>(record)
                .ok()
                .and_then(RawPosition::into_position)
                .ok_or(SkipReason::Malformed)
        })
        .collect()
}

pub struct SignificanceWorker {
    id: usize,
    source: Arc<dyn MarketDataSource>,
    queue: Arc<FlagQueue>,
    leaderboard: Arc<DbLeaderboard>,
    pool: SimulationPool,
    stats: Arc<PipelineStats>,
    settings: WorkerSettings,
}

impl SignificanceWorker {
    pub fn new(
        id: usize,
        source: Arc<dyn MarketDataSource>,
        queue: Arc<FlagQueue>,
        leaderboard: Arc<DbLeaderboard>,
        pool: SimulationPool,
        stats: Arc<PipelineStats>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            id,
            source,
            queue,
            leaderboard,
            pool,
            stats,
            settings,
        }
    }

    fn seed(&self) -> u64 {
        self.settings.seed.unwrap_or_else(rand::random)
    }

    /// Score one flagged event. Fetch, pool and store failures are errors;
    /// unusable histories are skips.
    pub async fn evaluate(&self, event: &FlaggedEvent) -> Result<Evaluation> {
        let trader = event.trader();

        // One extra record so an over-long history is detectable.
        let raw = self
            .source
            .position_history(trader, self.settings.max_history.saturating_add(1))
            .await
            .with_context(|| format!("Failed to fetch positions for {}", trader))?;

        let positions = match parse_history(raw, self.settings.max_history) {
            Ok(positions) => positions,
            Err(reason) => return Ok(Evaluation::Skipped(reason)),
        };

        let p_value = self
            .pool
            .evaluate(positions, self.settings.monte_carlo_runs, self.seed())
            .await?;
        let score = 1.0 - p_value;

        self.leaderboard
            .record(trader, score, self.settings.top_k)
            .context("Failed to record leaderboard score")?;

        Ok(Evaluation::Scored { p_value, score })
    }

    fn report(&self, event: &FlaggedEvent, result: Result<Evaluation>) {
        match result {
            Ok(Evaluation::Scored { p_value, score }) => {
                self.stats.record_scored();
                info!(
                    worker = self.id,
                    trader = %event.trader(),
                    size = event.size(),
                    p_value,
                    score,
                    std_err = monte_carlo::standard_error(p_value, self.settings.monte_carlo_runs),
                    "📊 Trader scored"
                );
            }
            Ok(Evaluation::Skipped(reason)) => {
                self.stats.record_skipped();
                debug!(
                    worker = self.id,
                    trader = %event.trader(),
                    %reason,
                    "Skipping flagged trader"
                );
            }
            Err(e) => {
                self.stats.record_failed_evaluation();
                warn!(
                    worker = self.id,
                    trader = %event.trader(),
                    "Flagged event abandoned: {:#}",
                    e
                );
            }
        }
    }

    /// Consume the queue one event at a time until shutdown.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            worker = self.id,
            runs = self.settings.monte_carlo_runs,
            max_history = self.settings.max_history,
            "🔎 Significance worker started"
        );

        loop {
            let event = tokio::select! {
                event = self.queue.pop() => event,
                _ = shutdown.recv() => break,
            };

            tokio::select! {
                result = self.evaluate(&event) => self.report(&event, result),
                _ = shutdown.recv() => {
                    info!(worker = self.id, trader = %event.trader(), "Abandoning in-flight evaluation");
                    break;
                }
            }
        }

        info!(worker = self.id, "Significance worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TradeEvent;
    use anyhow::anyhow;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::HashMap;
    use std::time::Duration;

    #[derive(Default)]
    struct FakeHistory {
        by_user: Mutex<HashMap<String, Option<Vec<Value>>>>,
        last_limit: Mutex<Option<usize>>,
    }

    impl FakeHistory {
        fn with(self, user: &str, records: Option<Vec<Value>>) -> Self {
            self.by_user.lock().insert(user.to_string(), records);
            self
        }
    }

    #[async_trait::async_trait]
    impl MarketDataSource for FakeHistory {
        async fn recent_trades(&self, _limit: usize, _min_size: f64) -> Result<Vec<TradeEvent>> {
            Ok(Vec::new())
        }

        async fn position_history(&self, user: &str, limit: usize) -> Result<Vec<Value>> {
            *self.last_limit.lock() = Some(limit);
            match self.by_user.lock().get(user) {
                Some(Some(records)) => Ok(records.clone()),
                Some(None) => Err(anyhow!("API error 500")),
                None => Ok(Vec::new()),
            }
        }
    }

    fn record(total_bought: f64, realized: f64, avg_price: f64) -> Value {
        json!({
            "totalBought": total_bought,
            "realizedPnl": realized,
            "avgPrice": avg_price,
            "title": "Some market",
        })
    }

    fn flagged(trader: &str, size: f64) -> FlaggedEvent {
        FlaggedEvent {
            trade: TradeEvent {
                market_id: "m".into(),
                asset_id: "a".into(),
                transaction_hash: format!("0x{trader}"),
                trader: trader.into(),
                size,
                timestamp: 1.0,
            },
            seq: 0,
        }
    }

    fn worker(source: FakeHistory) -> (SignificanceWorker, Arc<FlagQueue>, Arc<DbLeaderboard>) {
        worker_with(Arc::new(source))
    }

    fn settings() -> WorkerSettings {
        WorkerSettings {
            max_history: 30,
            monte_carlo_runs: 4_000,
            top_k: 1000,
            seed: Some(7),
        }
    }

    fn worker_with(
        source: Arc<FakeHistory>,
    ) -> (SignificanceWorker, Arc<FlagQueue>, Arc<DbLeaderboard>) {
        worker_with_settings(source, settings())
    }

    fn worker_with_settings(
        source: Arc<FakeHistory>,
        settings: WorkerSettings,
    ) -> (SignificanceWorker, Arc<FlagQueue>, Arc<DbLeaderboard>) {
        let queue = Arc::new(FlagQueue::new());
        let leaderboard = Arc::new(DbLeaderboard::new(":memory:").unwrap());
        let w = SignificanceWorker::new(
            0,
            source,
            queue.clone(),
            leaderboard.clone(),
            SimulationPool::new(2).unwrap(),
            Arc::new(PipelineStats::new()),
            settings,
        );
        (w, queue, leaderboard)
    }

    fn insider_history() -> Vec<Value> {
        (0..20).map(|_| record(100.0, 80.0, 0.2)).collect()
    }

    #[test]
    fn test_parse_history_skips() {
        assert_eq!(parse_history(vec![], 10), Err(SkipReason::EmptyHistory));

        let long: Vec<_> = (0..11).map(|_| record(1.0, 1.0, 0.5)).collect();
        assert_eq!(parse_history(long, 10), Err(SkipReason::Oversized(11)));

        // scalar rows: not a position table
        assert_eq!(parse_history(vec![json!(1.0), json!(2.0)], 10), Err(SkipReason::Malformed));

        let non_numeric = vec![json!({"totalBought": "lots", "realizedPnl": 1.0, "avgPrice": 0.5})];
        assert_eq!(parse_history(non_numeric, 10), Err(SkipReason::Malformed));
    }

    #[test]
    fn test_parse_history_preserves_order() {
        let parsed = parse_history(
            vec![record(10.0, 1.0, 0.1), record(20.0, -2.0, 0.2), record(30.0, 3.0, 0.3)],
            10,
        )
        .unwrap();
        let sizes: Vec<_> = parsed.iter().map(|p| p.size).collect();
        assert_eq!(sizes, vec![10.0, 20.0, 30.0]);
    }

    #[tokio::test]
    async fn test_pool_matches_direct_engine() {
        let pool = SimulationPool::new(3).unwrap();
        let positions = vec![Position::new(100.0, 70.0, 0.3), Position::new(100.0, -30.0, 0.3)];

        let via_pool = pool.evaluate(positions.clone(), 5_000, 3).await.unwrap();
        assert_eq!(via_pool, monte_carlo::monte_carlo(&positions, 5_000, 3));
    }

    #[tokio::test]
    async fn test_insider_is_scored_high() {
        let (w, _queue, leaderboard) =
            worker(FakeHistory::default().with("0xinsider", Some(insider_history())));

        let result = w.evaluate(&flagged("0xinsider", 50_000.0)).await.unwrap();
        match result {
            Evaluation::Scored { p_value, score } => {
                assert!(p_value < 0.001);
                assert_eq!(score, 1.0 - p_value);
            }
            other => panic!("expected score, got {other:?}"),
        }

        let entry = leaderboard.rank_of("0xinsider").unwrap().unwrap();
        assert_eq!(entry.rank, 1);
        assert!(entry.prob > 0.999);
    }

    #[tokio::test]
    async fn test_skips_leave_store_untouched() {
        let oversized: Vec<_> = (0..31).map(|_| record(1.0, 1.0, 0.5)).collect();
        let (w, _queue, leaderboard) = worker(
            FakeHistory::default()
                .with("0xbig", Some(oversized))
                .with("0xweird", Some(vec![json!([1, 2, 3])])),
        );

        assert_eq!(
            w.evaluate(&flagged("0xnobody", 1.0)).await.unwrap(),
            Evaluation::Skipped(SkipReason::EmptyHistory)
        );
        assert_eq!(
            w.evaluate(&flagged("0xbig", 1.0)).await.unwrap(),
            Evaluation::Skipped(SkipReason::Oversized(31))
        );
        assert_eq!(
            w.evaluate(&flagged("0xweird", 1.0)).await.unwrap(),
            Evaluation::Skipped(SkipReason::Malformed)
        );
        assert!(leaderboard.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_fetch_failure_is_error_without_store_update() {
        let (w, _queue, leaderboard) = worker(FakeHistory::default().with("0xdown", None));
        assert!(w.evaluate(&flagged("0xdown", 1.0)).await.is_err());
        assert!(leaderboard.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_rescoring_overwrites() {
        let fair: Vec<_> = (0..4)
            .flat_map(|_| [record(100.0, 50.0, 0.5), record(100.0, -50.0, 0.5)])
            .collect();
        let source = Arc::new(FakeHistory::default().with("0xflip", Some(insider_history())));
        let (w, _queue, leaderboard) = worker_with(source.clone());

        w.evaluate(&flagged("0xflip", 1.0)).await.unwrap();
        let first = leaderboard.rank_of("0xflip").unwrap().unwrap().prob;
        assert!(first > 0.999);

        source.by_user.lock().insert("0xflip".into(), Some(fair));
        w.evaluate(&flagged("0xflip", 1.0)).await.unwrap();

        let second = leaderboard.rank_of("0xflip").unwrap().unwrap().prob;
        assert!(second < 0.7, "score = {second}");
        assert_eq!(leaderboard.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_run_drains_queue_then_stops() {
        let (w, queue, leaderboard) = worker(
            FakeHistory::default()
                .with("0xa", Some(insider_history()))
                .with("0xb", Some(vec![])),
        );
        queue.push(flagged("0xa", 10.0).trade);
        queue.push(flagged("0xb", 20.0).trade);

        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(w.run(rx));

        for _ in 0..100 {
            if queue.is_empty() && leaderboard.len().unwrap() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("worker should stop")
            .unwrap();

        assert!(queue.is_empty());
        assert_eq!(leaderboard.len().unwrap(), 1);
        assert!(leaderboard.rank_of("0xa").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unbounded_history_limit_does_not_overflow() {
        let source = Arc::new(FakeHistory::default().with("0xa", Some(insider_history())));
        let (w, _queue, leaderboard) = worker_with_settings(
            source.clone(),
            WorkerSettings {
                max_history: usize::MAX,
                ..settings()
            },
        );

        let result = w.evaluate(&flagged("0xa", 1.0)).await.unwrap();
        assert!(matches!(result, Evaluation::Scored { .. }));
        assert_eq!(*source.last_limit.lock(), Some(usize::MAX));
        assert_eq!(leaderboard.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_mid_simulation_leaves_store_untouched() {
        let source = Arc::new(FakeHistory::default().with("0xslow", Some(insider_history())));
        let (w, queue, leaderboard) = worker_with_settings(
            source.clone(),
            WorkerSettings {
                monte_carlo_runs: 50_000_000,
                ..settings()
            },
        );
        let stats = w.stats.clone();
        queue.push(flagged("0xslow", 50_000.0).trade);

        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(w.run(rx));

        // The fetch is recorded before the hand-off to the pool.
        for _ in 0..200 {
            if source.last_limit.lock().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(source.last_limit.lock().is_some(), "worker never picked up the event");
        tokio::time::sleep(Duration::from_millis(20)).await;

        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("worker should stop without waiting for the simulation")
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(leaderboard.is_empty().unwrap());
        assert!(leaderboard.rank_of("0xslow").unwrap().is_none());
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.scored, 0);
        assert_eq!(snapshot.failed_evaluations, 0);
    }
}
