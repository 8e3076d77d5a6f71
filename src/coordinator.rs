//! Lifecycle owner: `start`, `stop`, `status`. Composes and drives a four-phase
//! preheat-then-stream run loop, the way a `System`/`SystemBuilder` composes and drives an
//! engine's lifecycle.

use crate::broker::BrokerPublisher;
use crate::calendar::{TradingCalendar, SESSION_CLOSE, SESSION_OPEN};
use crate::cancel::{cancel_pair, CancelToken, CancelTrigger};
use crate::error::{ReplayError, UnrecoverableReplayError};
use crate::loader::DataLoader;
use crate::pacer::{run_pacer_for_day, PacerMetrics, VirtualClock};
use crate::preheat::PreheaterRegistry;
use crate::source::QuotationSource;
use crate::time_fmt::format_date;
use crate::types::{Phase, QuotationRecord, ReplayParams, ReplayState, TimeWindow};
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use parking_lot::Mutex as SyncMutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Validation rules applied before a run is accepted.
pub fn validate(
    params: &ReplayParams,
    calendar: &dyn TradingCalendar,
) -> Result<ReplayParams, UnrecoverableReplayError> {
    if params.start_date > params.end_date {
        return Err(UnrecoverableReplayError::Validation(format!(
            "start_date {} is after end_date {}",
            params.start_date, params.end_date
        )));
    }
    if params.preload_minutes < 1 || params.preload_minutes > 60 {
        return Err(UnrecoverableReplayError::Validation(format!(
            "preload_minutes {} out of range [1, 60]",
            params.preload_minutes
        )));
    }
    if params.buffer_max_size < 1_000 {
        return Err(UnrecoverableReplayError::Validation(format!(
            "buffer_max_size {} below minimum 1000",
            params.buffer_max_size
        )));
    }

    let mut adjusted = params.clone();
    adjusted.start_date = calendar.next_trading_day_forward(params.start_date);
    adjusted.end_date = calendar.next_trading_day_forward(params.end_date);
    if adjusted.start_date > adjusted.end_date {
        return Err(UnrecoverableReplayError::Validation(
            "no trading day in [start_date, end_date] after adjustment".to_owned(),
        ));
    }

    Ok(adjusted)
}

/// Tiles `[SESSION_OPEN, SESSION_CLOSE]` on `day` into half-open `preload_minutes` windows,
/// the final window clipped to end exactly at the session close.
pub fn session_windows(day: NaiveDate, preload_minutes: u32) -> Vec<TimeWindow> {
    let open = day.and_time(*SESSION_OPEN).and_utc();
    let close = day.and_time(*SESSION_CLOSE).and_utc();
    let delta = ChronoDuration::minutes(i64::from(preload_minutes));

    let mut windows = Vec::new();
    let mut cursor = open;
    while cursor < close {
        let end = std::cmp::min(cursor + delta, close);
        windows.push(TimeWindow::new(cursor, end));
        cursor = end;
    }
    windows
}

struct RunHandle {
    cancel: CancelTrigger,
    join: tokio::task::JoinHandle<()>,
}

/// Drives one replay run at a time end to end: validate, preheat, stream, stop.
pub struct ReplayCoordinator {
    source: Arc<dyn QuotationSource>,
    publisher: Arc<dyn BrokerPublisher>,
    calendar: Arc<dyn TradingCalendar + Send + Sync>,
    preheater: Arc<PreheaterRegistry>,
    state: Arc<SyncMutex<ReplayState>>,
    run: SyncMutex<Option<RunHandle>>,
}

impl std::fmt::Debug for ReplayCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayCoordinator")
            .field("phase", &self.state.lock().phase)
            .finish()
    }
}

impl ReplayCoordinator {
    pub fn new(
        source: Arc<dyn QuotationSource>,
        publisher: Arc<dyn BrokerPublisher>,
        calendar: Arc<dyn TradingCalendar + Send + Sync>,
        preheater: Arc<PreheaterRegistry>,
    ) -> Self {
        Self {
            source,
            publisher,
            calendar,
            preheater,
            state: Arc::new(SyncMutex::new(ReplayState::new())),
            run: SyncMutex::new(None),
        }
    }

    /// A read-only snapshot of the run's current state.
    pub fn status(&self) -> ReplayState {
        self.state.lock().clone()
    }

    /// `STOPPED|FAILED -- start(params) --> PREPARING`. Validates synchronously, then spawns
    /// the preheat+stream worker and returns once it is scheduled.
    #[instrument(skip(self, params))]
    pub async fn start(&self, params: ReplayParams) -> Result<(), ReplayError> {
        {
            let phase = self.state.lock().phase;
            if !matches!(phase, Phase::Stopped | Phase::Failed) {
                return Err(UnrecoverableReplayError::AlreadyRunning.into());
            }
        }

        let adjusted = validate(&params, self.calendar.as_ref())?;

        {
            let mut state = self.state.lock();
            *state = ReplayState::new();
            state.phase = Phase::Preparing;
        }

        let (trigger, token) = cancel_pair();
        let worker = ReplayWorker {
            source: Arc::clone(&self.source),
            publisher: Arc::clone(&self.publisher),
            calendar: Arc::clone(&self.calendar),
            preheater: Arc::clone(&self.preheater),
            state: Arc::clone(&self.state),
        };
        let join = tokio::spawn(worker.run(adjusted, token));

        *self.run.lock() = Some(RunHandle {
            cancel: trigger,
            join,
        });

        Ok(())
    }

    /// `RUNNING -- stop() --> STOPPING --> STOPPED`. Blocks until the worker has actually
    /// wound down, matching scenario E6's "STOPPED within 200ms of stop()" bound.
    #[instrument(skip(self))]
    pub async fn stop(&self) -> Result<(), ReplayError> {
        let handle = self.run.lock().take();
        let Some(handle) = handle else {
            return Err(UnrecoverableReplayError::NotRunning.into());
        };

        handle.cancel.cancel();
        let _ = handle.join.await;
        Ok(())
    }
}

/// Owns the per-run background task: preheat, then stream each trading day.
struct ReplayWorker {
    source: Arc<dyn QuotationSource>,
    publisher: Arc<dyn BrokerPublisher>,
    calendar: Arc<dyn TradingCalendar + Send + Sync>,
    preheater: Arc<PreheaterRegistry>,
    state: Arc<SyncMutex<ReplayState>>,
}

impl ReplayWorker {
    async fn run(self, params: ReplayParams, mut cancel: CancelToken) {
        self.state.lock().phase = Phase::Preheating;

        let outcomes = self
            .preheater
            .run_all(params.start_date, &params.stock_codes)
            .await;

        // "any task fatal" is interpreted as a total preheat outage: every
        // registered task failed. A partial failure is absorbed per §4.5 and logged above by
        // the registry itself.
        if !outcomes.is_empty() && outcomes.iter().all(|o| o.failed) {
            let cause = "all preheat tasks failed".to_owned();
            error!(cause, "preheat phase considered fatal");
            let mut state = self.state.lock();
            state.phase = Phase::Failed;
            state.error_cause = Some(cause);
            return;
        }

        self.state.lock().phase = Phase::Running;

        let mut day = params.start_date;
        let mut total_emitted = 0u64;

        while day <= params.end_date {
            if cancel.is_cancelled() {
                break;
            }
            if !self.calendar.is_trading_day(day) {
                day += ChronoDuration::days(1);
                continue;
            }

            match self.run_day(&params, day, &mut cancel).await {
                Ok(emitted) => {
                    total_emitted += emitted;
                    let mut state = self.state.lock();
                    state.emitted_count = total_emitted;
                }
                Err(err) => {
                    error!(?err, "replay day failed, transitioning to FAILED");
                    let mut state = self.state.lock();
                    state.phase = Phase::Failed;
                    state.error_cause = Some(err.to_string());
                    return;
                }
            }

            day += ChronoDuration::days(1);
        }

        // Cancellation already drained the in-flight day inside `run_day`'s pacer loop, so by
        // the time control reaches here STOPPING has no further work — go straight to STOPPED.
        self.state.lock().phase = Phase::Stopped;
    }

    async fn run_day(
        &self,
        params: &ReplayParams,
        day: NaiveDate,
        cancel: &mut CancelToken,
    ) -> Result<u64, ReplayError> {
        let windows = session_windows(day, params.preload_minutes);
        if windows.is_empty() {
            return Ok(0);
        }
        let session_close =
            day.and_time(*SESSION_CLOSE).and_utc();

        let buffer = Arc::new(crate::buffer::BoundedBuffer::new(params.buffer_max_size));
        let loader = DataLoader::new(Arc::clone(&self.source), params.stock_codes.clone());
        let loader_done = Arc::new(AtomicBool::new(false));

        let loader_done_for_task = Arc::clone(&loader_done);
        let buffer_for_loader = Arc::clone(&buffer);
        let state_for_loader = Arc::clone(&self.state);
        let mut cancel_for_loader = cancel.clone();
        let loader_task = tokio::spawn(async move {
            let result = run_loader_for_day(
                &loader,
                &buffer_for_loader,
                windows,
                &state_for_loader,
                &mut cancel_for_loader,
            )
            .await;
            loader_done_for_task.store(true, Ordering::Release);
            result
        });

        loop {
            if !buffer.is_empty().await || loader_done.load(Ordering::Acquire) {
                break;
            }
            tokio::select! {
                _ = buffer.wait_not_empty() => break,
                _ = tokio::time::sleep(std::time::Duration::from_millis(50)) => continue,
            }
        }

        let emitted = if buffer.is_empty().await && loader_done.load(Ordering::Acquire) {
            0
        } else {
            let first_time = buffer
                .peek_front_time()
                .await
                .unwrap_or_else(|| day.and_time(*SESSION_OPEN).and_utc());
            let clock = VirtualClock::new(first_time, params.speed_multiplier);
            let metrics = PacerMetrics::default();

            let outcome = run_pacer_for_day(
                &clock,
                &buffer,
                self.publisher.as_ref(),
                &metrics,
                session_close,
                &loader_done,
                cancel,
                self.state.as_ref(),
            )
            .await;

            {
                let mut state = self.state.lock();
                state.current_virtual_time = Some(clock.now());
                state.dropped_count += metrics.dropped_count.load(Ordering::Relaxed);
                state.buffer_depth = buffer.len().await;
            }

            outcome.emitted
        };

        match loader_task.await {
            Ok(Ok(())) => Ok(emitted),
            Ok(Err(err)) => Err(err),
            Err(join_err) => {
                warn!(?join_err, "loader task panicked");
                Err(UnrecoverableReplayError::Custom(join_err.to_string()).into())
            }
        }
    }
}

/// Sequentially loads every window for one trading day into `buffer`, retrying a failed
/// window exactly once before surfacing `SourceWindowLoadRetryExhausted`.
async fn run_loader_for_day(
    loader: &DataLoader,
    buffer: &crate::buffer::BoundedBuffer,
    windows: Vec<TimeWindow>,
    state: &SyncMutex<ReplayState>,
    cancel: &mut CancelToken,
) -> Result<(), ReplayError> {
    for window in windows {
        if cancel.is_cancelled() {
            break;
        }

        let records: Vec<QuotationRecord> = match loader.load_window(window).await {
            Ok(records) => records,
            Err(first_err) => {
                warn!(?first_err, "window load failed, retrying once");
                loader.load_window(window).await.map_err(|second_err| {
                    UnrecoverableReplayError::SourceWindowLoadRetryExhausted {
                        window_start: format_date(window.start.date_naive()),
                        window_end: format_date(window.end.date_naive()),
                        cause: second_err.cause,
                    }
                })?
            }
        };

        {
            let mut state = state.lock();
            state.last_loaded_window = Some((window.start, window.end));
        }

        if !records.is_empty() {
            buffer.offer(records).await;
        }
    }

    info!("loader finished all windows for the day");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::fake::FakeBrokerPublisher;
    use crate::calendar::DefaultTradingCalendar;
    use crate::preheat::fake::{AlwaysFailsTask, FixedCountTask};
    use crate::preheat::PreheaterRegistry;
    use crate::source::fake::FakeQuotationSource;
    use chrono::TimeZone;
    use smol_str::SmolStr;

    fn params(start: NaiveDate, end: NaiveDate, speed: u32) -> ReplayParams {
        ReplayParams {
            start_date: start,
            end_date: end,
            speed_multiplier: speed,
            preload_minutes: 5,
            buffer_max_size: 1_000,
            stock_codes: vec![SmolStr::from("000001.SZ")],
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_validate_rejects_start_after_end() {
        let result = validate(
            &params(date(2026, 1, 20), date(2026, 1, 19), 1),
            &DefaultTradingCalendar,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_preload_minutes_out_of_range() {
        let mut p = params(date(2026, 1, 19), date(2026, 1, 19), 1);
        p.preload_minutes = 0;
        assert!(validate(&p, &DefaultTradingCalendar).is_err());
    }

    #[test]
    fn test_validate_rejects_small_buffer() {
        let mut p = params(date(2026, 1, 19), date(2026, 1, 19), 1);
        p.buffer_max_size = 10;
        assert!(validate(&p, &DefaultTradingCalendar).is_err());
    }

    #[test]
    fn test_validate_adjusts_weekend_start_forward() {
        // 2026-01-17 is a Saturday; 2026-01-19 is the next Monday.
        let p = params(date(2026, 1, 17), date(2026, 1, 19), 1);
        let adjusted = validate(&p, &DefaultTradingCalendar).unwrap();
        assert_eq!(adjusted.start_date, date(2026, 1, 19));
    }

    #[test]
    fn test_session_windows_tile_exactly_and_clip_last() {
        let windows = session_windows(date(2026, 1, 19), 7);
        assert!(!windows.is_empty());
        for pair in windows.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
        let last = windows.last().unwrap();
        assert_eq!(
            last.end,
            date(2026, 1, 19).and_time(*SESSION_CLOSE).and_utc()
        );
    }

    fn t(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 19, h, m, s).unwrap()
    }

    #[tokio::test]
    async fn test_scenario_e1_uncapped_speed_emits_all_rows_in_order() {
        let rows = vec![
            QuotationRecord::new(SmolStr::from("000001.SZ"), t(9, 30, 0), Default::default(), Default::default(), Default::default()),
            QuotationRecord::new(SmolStr::from("000001.SZ"), t(9, 30, 1), Default::default(), Default::default(), Default::default()),
            QuotationRecord::new(SmolStr::from("000001.SZ"), t(9, 30, 2), Default::default(), Default::default(), Default::default()),
        ];
        let source = Arc::new(FakeQuotationSource::new(rows));
        let publisher = Arc::new(FakeBrokerPublisher::new());
        let calendar = Arc::new(DefaultTradingCalendar);
        let registry = Arc::new(PreheaterRegistry::new(Vec::new()));

        let coordinator = ReplayCoordinator::new(source, publisher.clone(), calendar, registry);
        coordinator
            .start(params(date(2026, 1, 19), date(2026, 1, 19), 0))
            .await
            .unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            loop {
                if matches!(coordinator.status().phase, Phase::Stopped) {
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("replay should finish well inside the timeout");

        let status = coordinator.status();
        assert_eq!(status.emitted_count, 3);
        let published = publisher.published();
        assert_eq!(published.len(), 3);
        assert_eq!(published[0].1, "000001.SZ");
    }

    #[tokio::test]
    async fn test_second_start_while_running_is_rejected() {
        let source = Arc::new(FakeQuotationSource::new(Vec::new()));
        let publisher = Arc::new(FakeBrokerPublisher::new());
        let calendar = Arc::new(DefaultTradingCalendar);
        let registry = Arc::new(PreheaterRegistry::new(Vec::new()));

        let coordinator = ReplayCoordinator::new(source, publisher, calendar, registry);
        coordinator
            .start(params(date(2026, 1, 19), date(2026, 1, 19), 0))
            .await
            .unwrap();

        let second = coordinator
            .start(params(date(2026, 1, 19), date(2026, 1, 19), 0))
            .await;
        assert!(matches!(
            second,
            Err(ReplayError::Unrecoverable(UnrecoverableReplayError::AlreadyRunning))
        ));

        coordinator.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_preheat_total_outage_transitions_to_failed() {
        let source = Arc::new(FakeQuotationSource::new(Vec::new()));
        let publisher = Arc::new(FakeBrokerPublisher::new());
        let calendar = Arc::new(DefaultTradingCalendar);
        let registry = Arc::new(PreheaterRegistry::new(vec![Box::new(AlwaysFailsTask {
            task_id: "only-task".into(),
        })]));

        let coordinator = ReplayCoordinator::new(source, publisher, calendar, registry);
        coordinator
            .start(params(date(2026, 1, 19), date(2026, 1, 19), 0))
            .await
            .unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            loop {
                if matches!(coordinator.status().phase, Phase::Failed) {
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("worker should reach FAILED");

        assert!(coordinator.status().error_cause.is_some());
    }

    #[tokio::test]
    async fn test_partial_preheat_failure_still_reaches_running() {
        let source = Arc::new(FakeQuotationSource::new(Vec::new()));
        let publisher = Arc::new(FakeBrokerPublisher::new());
        let calendar = Arc::new(DefaultTradingCalendar);
        let registry = Arc::new(PreheaterRegistry::new(vec![
            Box::new(FixedCountTask {
                task_id: "ok".into(),
                count: 1,
            }),
            Box::new(AlwaysFailsTask {
                task_id: "bad".into(),
            }),
        ]));

        let coordinator = ReplayCoordinator::new(source, publisher, calendar, registry);
        coordinator
            .start(params(date(2026, 1, 19), date(2026, 1, 19), 0))
            .await
            .unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            loop {
                if matches!(coordinator.status().phase, Phase::Stopped) {
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("worker should still complete");
    }
}
