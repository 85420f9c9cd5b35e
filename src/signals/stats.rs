//! Pipeline counters shared by the watcher, workers and the read API.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct PipelineStats {
    polls: AtomicU64,
    failed_polls: AtomicU64,
    trades_seen: AtomicU64,
    flagged: AtomicU64,
    scored: AtomicU64,
    skipped: AtomicU64,
    failed_evaluations: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub polls: u64,
    pub failed_polls: u64,
    pub trades_seen: u64,
    pub flagged: u64,
    pub scored: u64,
    pub skipped: u64,
    pub failed_evaluations: u64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_poll(&self, trades_seen: usize, flagged: usize) {
        self.polls.fetch_add(1, Ordering::Relaxed);
        self.trades_seen
            .fetch_add(trades_seen as u64, Ordering::Relaxed);
        self.flagged.fetch_add(flagged as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_failed_poll(&self) {
        self.failed_polls.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_scored(&self) {
        self.scored.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_failed_evaluation(&self) {
        self.failed_evaluations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            polls: self.polls.load(Ordering::Relaxed),
            failed_polls: self.failed_polls.load(Ordering::Relaxed),
            trades_seen: self.trades_seen.load(Ordering::Relaxed),
            flagged: self.flagged.load(Ordering::Relaxed),
            scored: self.scored.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed_evaluations: self.failed_evaluations.load(Ordering::Relaxed),
        }
    }
}
