//! Paced emitter/scheduler: advances a virtual clock and drains due records from the
//! [`BoundedBuffer`] at a controlled rate.
//!
//! [`VirtualClock`] is a lock-guarded inner struct recomputing "now" from a wall-clock
//! anchor plus an offset, generalized with a `speedMultiplier` scale factor and the
//! `speedMultiplier == 0` (uncapped) special case.

use crate::broker::{publish_record_with_retry, BrokerPublisher};
use crate::buffer::BoundedBuffer;
use crate::cancel::CancelToken;
use crate::types::ReplayState;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::{Mutex as SyncMutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::Instant;
use tracing::debug;

/// Wall-clock polling cadence for the drain loop.
pub const TICK_CADENCE: std::time::Duration = std::time::Duration::from_millis(100);

struct ClockInner {
    virtual_anchor: DateTime<Utc>,
    wall_anchor: Instant,
}

/// Advances `virtualNow` at `speedMultiplier` times wall-clock speed; `speedMultiplier == 0`
/// means "uncapped" — `now()` only moves when [`VirtualClock::jump_to`] is called.
pub struct VirtualClock {
    speed_multiplier: u32,
    inner: RwLock<ClockInner>,
}

impl std::fmt::Debug for VirtualClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualClock")
            .field("speed_multiplier", &self.speed_multiplier)
            .field("now", &self.now())
            .finish()
    }
}

impl VirtualClock {
    pub fn new(start: DateTime<Utc>, speed_multiplier: u32) -> Self {
        Self {
            speed_multiplier,
            inner: RwLock::new(ClockInner {
                virtual_anchor: start,
                wall_anchor: Instant::now(),
            }),
        }
    }

    /// The engine's current virtual time.
    pub fn now(&self) -> DateTime<Utc> {
        let lock = self.inner.read();

        if self.speed_multiplier == 0 {
            return lock.virtual_anchor;
        }

        let elapsed_ms = Instant::now().duration_since(lock.wall_anchor).as_millis() as i64;
        let scaled_ms = elapsed_ms * i64::from(self.speed_multiplier);
        lock.virtual_anchor + ChronoDuration::milliseconds(scaled_ms)
    }

    /// Reset the clock so `now()` immediately reports `time`, re-anchoring wall time too.
    /// Used for the `speedMultiplier == 0` jump-after-drain rule and for day-boundary resets.
    pub fn jump_to(&self, time: DateTime<Utc>) {
        let mut lock = self.inner.write();
        lock.virtual_anchor = time;
        lock.wall_anchor = Instant::now();
    }
}

/// Outcome of draining one trading day to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacerDayOutcome {
    pub emitted: u64,
    pub cancelled: bool,
}

/// Atomically-updated counters the coordinator exposes via `GET /replay/status`.
#[derive(Debug, Default)]
pub struct PacerMetrics {
    pub emitted_count: AtomicU64,
    pub dropped_count: AtomicU64,
}

/// Drains `buffer` against `clock` until the day's `session_close` is reached and
/// `loader_done` has signalled no more windows are coming for this day, publishing each due
/// record via `publisher`. Returns once the day is fully drained, cancelled, or the buffer
/// is starved past `session_close`.
///
/// `state.current_virtual_time` and `state.buffer_depth` are refreshed on every tick so
/// `GET /replay/status` and `GET /metrics` reflect the live buffer, not just its value at the
/// end of the day.
pub async fn run_pacer_for_day(
    clock: &VirtualClock,
    buffer: &BoundedBuffer,
    publisher: &dyn BrokerPublisher,
    metrics: &PacerMetrics,
    session_close: DateTime<Utc>,
    loader_done: &std::sync::atomic::AtomicBool,
    cancel: &mut CancelToken,
    state: &SyncMutex<ReplayState>,
) -> PacerDayOutcome {
    let mut emitted = 0u64;

    loop {
        if cancel.is_cancelled() {
            return PacerDayOutcome {
                emitted,
                cancelled: true,
            };
        }

        let now = clock.now();
        let due = buffer.drain_due(now).await;

        if !due.is_empty() {
            let mut last_time = now;
            for record in due {
                last_time = record.trade_time;
                if publish_record_with_retry(publisher, &record).await {
                    metrics.emitted_count.fetch_add(1, Ordering::Relaxed);
                    emitted += 1;
                } else {
                    metrics.dropped_count.fetch_add(1, Ordering::Relaxed);
                }
            }

            if clock_is_uncapped(clock) {
                refresh_live_state(state, buffer, now).await;
                clock.jump_to(last_time + ChronoDuration::seconds(1));
                continue;
            }
        }

        refresh_live_state(state, buffer, now).await;

        let day_drained = loader_done.load(Ordering::Acquire) && buffer.is_empty().await;
        if day_drained && now >= session_close {
            debug!(emitted, "pacer drained trading day");
            return PacerDayOutcome {
                emitted,
                cancelled: false,
            };
        }

        if clock_is_uncapped(clock) {
            if due_is_empty_and_not_drained(day_drained) {
                tokio::task::yield_now().await;
            }
        } else {
            tokio::time::sleep(TICK_CADENCE).await;
        }
    }
}

async fn refresh_live_state(state: &SyncMutex<ReplayState>, buffer: &BoundedBuffer, now: DateTime<Utc>) {
    let depth = buffer.len().await;
    let mut guard = state.lock();
    guard.current_virtual_time = Some(now);
    guard.buffer_depth = depth;
}

fn clock_is_uncapped(clock: &VirtualClock) -> bool {
    clock.speed_multiplier == 0
}

fn due_is_empty_and_not_drained(day_drained: bool) -> bool {
    !day_drained
}
