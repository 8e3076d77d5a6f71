//! Bounded, ordered queue between the loader and the pacer. Exactly one producer, exactly
//! one consumer; back-pressure is the sole throttle on the loader.
//!
//! A `tokio::sync::Mutex`-guarded `VecDeque` plus two `tokio::sync::Notify` handles standing
//! in for the not-full / not-empty condition variables, the async equivalent of
//! `std::sync::Condvar`.

use crate::types::QuotationRecord;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use tokio::sync::{Mutex, Notify};

/// A bounded FIFO ordered by `trade_time`, with capacity back-pressure.
#[derive(Debug)]
pub struct BoundedBuffer {
    capacity: usize,
    inner: Mutex<VecDeque<QuotationRecord>>,
    not_full: Notify,
    not_empty: Notify,
}

impl BoundedBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(VecDeque::new()),
            not_full: Notify::new(),
            not_empty: Notify::new(),
        }
    }

    /// Enqueue a batch, already sorted by `trade_time` (the source query orders by it).
    /// A batch larger than `capacity` is admitted incrementally, as room becomes available,
    /// rather than all at once — a single oversized window must never deadlock the pipeline
    /// by waiting for a `capacity` the batch itself can never fit under.
    pub async fn offer(&self, batch: Vec<QuotationRecord>) {
        let mut remaining: VecDeque<QuotationRecord> = batch.into();

        while !remaining.is_empty() {
            {
                let mut guard = self.inner.lock().await;
                let room = self.capacity.saturating_sub(guard.len());
                if room > 0 {
                    let take = room.min(remaining.len());
                    guard.extend(remaining.drain(..take));
                    self.not_empty.notify_one();
                    continue;
                }
            }
            self.not_full.notified().await;
        }
    }

    /// Return all records whose `trade_time <= virtual_now`, in non-decreasing `trade_time`
    /// order. Returns immediately (never suspends) — the pacer sleeps externally on its own
    /// cadence.
    pub async fn drain_due(&self, virtual_now: DateTime<Utc>) -> Vec<QuotationRecord> {
        let mut guard = self.inner.lock().await;
        let mut due = Vec::new();

        while let Some(front) = guard.front() {
            if front.trade_time <= virtual_now {
                due.push(guard.pop_front().unwrap());
            } else {
                break;
            }
        }

        if !due.is_empty() {
            self.not_full.notify_one();
        }

        due
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// `trade_time` of the front record, without removing it.
    pub async fn peek_front_time(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().await.front().map(|r| r.trade_time)
    }

    /// Resolve once there is at least one record to drain, or return immediately if there
    /// already is one.
    pub async fn wait_not_empty(&self) {
        if !self.is_empty().await {
            return;
        }
        self.not_empty.notified().await;
    }
}
