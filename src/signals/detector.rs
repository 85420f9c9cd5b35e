//! Feed Watcher
//!
//! Polls the trade feed, stops at the previously seen head of the feed, and
//! flags every new trade above the suspicious-size threshold onto the
//! [`FlagQueue`].

use crate::{
    models::{TradeEvent, Watermark},
    scrapers::polymarket_api::MarketDataSource,
    signals::{queue::FlagQueue, stats::PipelineStats},
};
use anyhow::Result;
use parking_lot::Mutex; // Faster than tokio::sync::Mutex for short critical sections
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct WatcherSettings {
    pub suspicious_size: f64,
    pub max_trades_per_call: usize,
    pub poll_interval: Duration,
}

/// Result of handling one feed response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollOutcome {
    /// Trades in the response
    pub received: usize,
    /// Trades newer than the previous watermark
    pub fresh: usize,
    /// Fresh trades pushed onto the queue
    pub flagged: usize,
}

pub struct FeedWatcher {
    source: Arc<dyn MarketDataSource>,
    queue: Arc<FlagQueue>,
    stats: Arc<PipelineStats>,
    settings: WatcherSettings,
    watermark: Mutex<Option<Watermark>>,
}

impl FeedWatcher {
    pub fn new(
        source: Arc<dyn MarketDataSource>,
        queue: Arc<FlagQueue>,
        stats: Arc<PipelineStats>,
        settings: WatcherSettings,
    ) -> Self {
        Self {
            source,
            queue,
            stats,
            settings,
            watermark: Mutex::new(None),
        }
    }

    /// Current head-of-feed watermark, if any poll has returned trades.
    pub fn watermark(&self) -> Option<Watermark> {
        self.watermark.lock().clone()
    }

    /// Move the watermark to the head of `trades` and return the one it
    /// replaced. An empty response leaves it untouched.
    fn advance_watermark(&self, trades: &[TradeEvent]) -> Option<Watermark> {
        let mut watermark = self.watermark.lock();
        let previous = watermark.clone();
        if let Some(head) = trades.first() {
            *watermark = Some(Watermark::of(head));
        }
        previous
    }

    /// Handle one newest-first feed response.
    ///
    /// Every trade, the head included, is checked against the watermark as it
    /// stood before this response, so the head is never compared with itself.
    pub fn process_trades(&self, trades: &[TradeEvent]) -> PollOutcome {
        let previous = self.advance_watermark(trades);

        let mut outcome = PollOutcome {
            received: trades.len(),
            ..Default::default()
        };

        for trade in trades {
            if previous.as_ref().is_some_and(|wm| wm.already_seen(trade)) {
                break;
            }
            outcome.fresh += 1;

            if trade.size > self.settings.suspicious_size {
                let seq = self.queue.push(trade.clone());
                outcome.flagged += 1;
                info!(
                    trader = %trade.trader,
                    market = %trade.market_id,
                    size = trade.size,
                    seq,
                    "🚩 Suspicious trade flagged"
                );
            }
        }

        self.stats.record_poll(outcome.fresh, outcome.flagged);
        outcome
    }

    /// Fetch the feed head once and process it.
    pub async fn poll_once(&self) -> Result<PollOutcome> {
        let trades = self
            .source
            .recent_trades(
                self.settings.max_trades_per_call,
                self.settings.suspicious_size,
            )
            .await?;
        Ok(self.process_trades(&trades))
    }

    /// Poll forever, sleeping `poll_interval` between polls, until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        info!(
            threshold = self.settings.suspicious_size,
            limit = self.settings.max_trades_per_call,
            interval_secs = self.settings.poll_interval.as_secs_f64(),
            "👀 Feed watcher started"
        );

        loop {
            tokio::select! {
                result = self.poll_once() => match result {
                    Ok(outcome) => debug!(
                        received = outcome.received,
                        fresh = outcome.fresh,
                        flagged = outcome.flagged,
                        queue_depth = self.queue.len(),
                        "Feed poll complete"
                    ),
                    Err(e) => {
                        self.stats.record_failed_poll();
                        warn!("Trade feed poll failed, retrying next interval: {:#}", e);
                    }
                },
                _ = shutdown.recv() => break,
            }

            tokio::select! {
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
                _ = shutdown.recv() => break,
            }
        }

        info!("Feed watcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use serde_json::Value;
    use std::collections::VecDeque;

    /// Serves canned feed responses in order; `None` entries are failures.
    struct ScriptedFeed {
        responses: Mutex<VecDeque<Option<Vec<TradeEvent>>>>,
    }

    impl ScriptedFeed {
        fn new(responses: Vec<Option<Vec<TradeEvent>>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
            }
        }
    }

    #[async_trait::async_trait]
    impl MarketDataSource for ScriptedFeed {
        async fn recent_trades(&self, _limit: usize, _min_size: f64) -> Result<Vec<TradeEvent>> {
            match self.responses.lock().pop_front() {
                Some(Some(trades)) => Ok(trades),
                Some(None) => Err(anyhow!("HTTP 503")),
                None => Ok(Vec::new()),
            }
        }

        async fn position_history(&self, _user: &str, _limit: usize) -> Result<Vec<Value>> {
            Ok(Vec::new())
        }
    }

    fn trade(hash: &str, ts: f64, size: f64) -> TradeEvent {
        TradeEvent {
            market_id: "0xmarket".into(),
            asset_id: "42".into(),
            transaction_hash: hash.into(),
            trader: format!("0x{hash}"),
            size,
            timestamp: ts,
        }
    }

    fn watcher(feed: ScriptedFeed, threshold: f64) -> (FeedWatcher, Arc<FlagQueue>) {
        let queue = Arc::new(FlagQueue::new());
        let w = FeedWatcher::new(
            Arc::new(feed),
            queue.clone(),
            Arc::new(PipelineStats::new()),
            WatcherSettings {
                suspicious_size: threshold,
                max_trades_per_call: 100,
                poll_interval: Duration::from_millis(10),
            },
        );
        (w, queue)
    }

    #[tokio::test]
    async fn test_unchanged_feed_flags_nothing_twice() {
        let page = vec![trade("A", 100.0, 500.0), trade("B", 90.0, 500.0)];
        let (w, queue) = watcher(ScriptedFeed::new(vec![Some(page.clone()), Some(page)]), 100.0);

        let first = w.poll_once().await.unwrap();
        assert_eq!(first.flagged, 2);

        let second = w.poll_once().await.unwrap();
        assert_eq!(second.flagged, 0);
        assert_eq!(second.fresh, 0);
        assert_eq!(queue.len(), 2);

        let wm = w.watermark().unwrap();
        assert_eq!(wm.timestamp, 100.0);
        assert_eq!(wm.transaction_hash, "A");
    }

    #[tokio::test]
    async fn test_only_new_head_trades_are_processed() {
        let first = vec![trade("A", 100.0, 500.0), trade("B", 90.0, 500.0)];
        let second = vec![
            trade("D", 120.0, 700.0),
            trade("C", 110.0, 5.0),
            trade("A", 100.0, 500.0),
            trade("B", 90.0, 500.0),
        ];
        let (w, queue) = watcher(ScriptedFeed::new(vec![Some(first), Some(second)]), 100.0);

        w.poll_once().await.unwrap();
        while queue.try_pop().is_some() {}

        let outcome = w.poll_once().await.unwrap();
        assert_eq!(outcome.fresh, 2);
        assert_eq!(outcome.flagged, 1);
        assert_eq!(queue.try_pop().unwrap().trade.transaction_hash, "D");
        assert_eq!(w.watermark().unwrap().transaction_hash, "D");
    }

    #[tokio::test]
    async fn test_older_timestamp_stops_even_with_new_hash() {
        let first = vec![trade("A", 100.0, 500.0)];
        // "Z" is unseen but older than the watermark
        let second = vec![trade("N", 105.0, 500.0), trade("Z", 95.0, 500.0)];
        let (w, queue) = watcher(ScriptedFeed::new(vec![Some(first), Some(second)]), 100.0);

        w.poll_once().await.unwrap();
        let outcome = w.poll_once().await.unwrap();
        assert_eq!(outcome.fresh, 1);
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn test_threshold_is_strict() {
        let page = vec![trade("A", 3.0, 100.0), trade("B", 2.0, 100.5), trade("C", 1.0, 99.0)];
        let (w, queue) = watcher(ScriptedFeed::new(vec![Some(page)]), 100.0);

        let outcome = w.poll_once().await.unwrap();
        assert_eq!(outcome.fresh, 3);
        assert_eq!(outcome.flagged, 1);
        assert_eq!(queue.try_pop().unwrap().trade.transaction_hash, "B");
    }

    #[tokio::test]
    async fn test_empty_response_keeps_watermark() {
        let (w, queue) = watcher(
            ScriptedFeed::new(vec![Some(vec![trade("A", 100.0, 500.0)]), Some(vec![])]),
            100.0,
        );

        w.poll_once().await.unwrap();
        let outcome = w.poll_once().await.unwrap();
        assert_eq!(outcome, PollOutcome::default());
        assert_eq!(w.watermark().unwrap().transaction_hash, "A");
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_poll_leaves_state_untouched() {
        let (w, queue) = watcher(
            ScriptedFeed::new(vec![None, Some(vec![trade("A", 100.0, 500.0)])]),
            100.0,
        );

        assert!(w.poll_once().await.is_err());
        assert!(w.watermark().is_none());

        let outcome = w.poll_once().await.unwrap();
        assert_eq!(outcome.flagged, 1);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (w, queue) = watcher(
            ScriptedFeed::new(vec![Some(vec![trade("A", 100.0, 500.0)])]),
            100.0,
        );
        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(Arc::new(w).run(rx));

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("watcher should stop")
            .unwrap();
        assert_eq!(queue.len(), 1);
    }
}
