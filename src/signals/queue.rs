//! Flag Queue
//!
//! Priority queue of flagged trades awaiting investigation.
//!
//! # Ordering Guarantees
//! Events are ordered by:
//! 1. Trade size (descending)
//! 2. Sequence number (flag order, ascending)
//!
//! The queue is unbounded. `push` only takes the heap lock; `pop` suspends
//! the caller until an event is available.

use crate::models::{FlaggedEvent, TradeEvent};
use parking_lot::Mutex;
use std::collections::BinaryHeap;
use tokio::sync::Notify;

struct Inner {
    heap: BinaryHeap<FlaggedEvent>,
    /// Next globally-monotone sequence number
    next_seq: u64,
}

pub struct FlagQueue {
    inner: Mutex<Inner>,
    available: Notify,
}

impl FlagQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                heap: BinaryHeap::new(),
                next_seq: 0,
            }),
            available: Notify::new(),
        }
    }

    /// Flag a trade, assigning the next sequence number. Returns that number.
    pub fn push(&self, trade: TradeEvent) -> u64 {
        let seq = {
            let mut inner = self.inner.lock();
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.heap.push(FlaggedEvent { trade, seq });
            seq
        };
        self.available.notify_one();
        seq
    }

    /// Pop the highest-priority event without waiting.
    #[inline]
    pub fn try_pop(&self) -> Option<FlaggedEvent> {
        self.inner.lock().heap.pop()
    }

    /// Pop the highest-priority event, waiting until one exists.
    pub async fn pop(&self) -> FlaggedEvent {
        loop {
            let notified = self.available.notified();
            if let Some(event) = self.try_pop() {
                return event;
            }
            notified.await;
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.lock().heap.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().heap.is_empty()
    }
}

impl Default for FlagQueue {
    fn default() -> Self {
        Self::new()
    }
}
