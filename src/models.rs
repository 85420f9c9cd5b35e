//! Core data model for the insider-trading scan pipeline.
//!
//! Trades come off the Polymarket Data API feed, large ones become
//! [`FlaggedEvent`]s, and each flagged trader's [`Position`] history is
//! scored into a [`LeaderboardEntry`].

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// One observed trade from the Data API `/trades` feed.
///
/// Every field is required: a record missing any of them fails the whole
/// fetch rather than being skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeEvent {
    #[serde(rename = "conditionId")]
    pub market_id: String,
    #[serde(rename = "asset")]
    pub asset_id: String,
    #[serde(rename = "transactionHash")]
    pub transaction_hash: String,
    #[serde(rename = "proxyWallet")]
    pub trader: String,
    pub size: f64,
    pub timestamp: f64,
}

/// A trade above the suspicious-size threshold, queued for investigation.
///
/// `seq` is assigned by the queue at flag time and is strictly increasing.
#[derive(Debug, Clone, Serialize)]
pub struct FlaggedEvent {
    pub trade: TradeEvent,
    pub seq: u64,
}

impl FlaggedEvent {
    #[inline]
    pub fn size(&self) -> f64 {
        self.trade.size
    }

    #[inline]
    pub fn trader(&self) -> &str {
        &self.trade.trader
    }
}

impl PartialEq for FlaggedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FlaggedEvent {}

impl PartialOrd for FlaggedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Priority ordering for the max-heap: a "greater" event is investigated first.
impl Ord for FlaggedEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // Primary: trade size (larger first)
        self.trade
            .size
            .total_cmp(&other.trade.size)
            // Secondary: sequence number (earlier flag first)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// One of a trader's positions, open or closed.
///
/// `realized` is signed (its sign gives the win/loss direction) and
/// `probability` is the implied win probability at entry, in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub size: f64,
    pub realized: f64,
    pub probability: f64,
}

impl Position {
    pub fn new(size: f64, realized: f64, probability: f64) -> Self {
        Self {
            size,
            realized,
            probability,
        }
    }

    #[inline]
    pub fn is_win(&self) -> bool {
        self.realized > 0.0
    }

    /// Theoretical fair payout of the realized direction: `+size*(1-p)` for a
    /// win, `-size*p` for a loss.
    #[inline]
    pub fn fair_payout(&self) -> f64 {
        if self.is_win() {
            self.win_payout()
        } else {
            self.loss_payout()
        }
    }

    #[inline]
    pub fn win_payout(&self) -> f64 {
        self.size * (1.0 - self.probability)
    }

    #[inline]
    pub fn loss_payout(&self) -> f64 {
        -self.size * self.probability
    }
}

/// Raw position record as returned by `/positions` and `/closed-positions`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawPosition {
    #[serde(rename = "totalBought")]
    pub total_bought: f64,
    #[serde(rename = "realizedPnl")]
    pub realized_pnl: f64,
    #[serde(rename = "avgPrice")]
    pub avg_price: f64,
}

impl RawPosition {
    /// Validate ranges; `None` means the record cannot be interpreted.
    pub fn into_position(self) -> Option<Position> {
        let finite = self.total_bought.is_finite()
            && self.realized_pnl.is_finite()
            && self.avg_price.is_finite();
        if !finite || self.total_bought < 0.0 || !(0.0..=1.0).contains(&self.avg_price) {
            return None;
        }
        Some(Position::new(
            self.total_bought,
            self.realized_pnl,
            self.avg_price,
        ))
    }
}

/// Most recently seen trade at the head of the feed.
#[derive(Debug, Clone, PartialEq)]
pub struct Watermark {
    pub timestamp: f64,
    pub transaction_hash: String,
}

impl Watermark {
    pub fn of(trade: &TradeEvent) -> Self {
        Self {
            timestamp: trade.timestamp,
            transaction_hash: trade.transaction_hash.clone(),
        }
    }

    /// True if `trade` is at or behind this watermark.
    #[inline]
    pub fn already_seen(&self, trade: &TradeEvent) -> bool {
        trade.timestamp < self.timestamp || trade.transaction_hash == self.transaction_hash
    }
}

/// Ranked leaderboard row. `prob` is the stored score, `1 - p`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub rank: u64,
    pub user: String,
    pub prob: f64,
}
