//! Pluggable strategy-preheat task registry. Each task warms derived historical state into
//! the shared [`KvStore`] before emission begins; a task failure is logged and skipped, never
//! aborts the run.

use crate::calendar::TradingCalendar;
use crate::kv::{index_preclose_key, moving_average_key, nineturn_key, KvStore, PREHEAT_TTL};
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use smol_str::SmolStr;
use std::sync::Arc;
use tracing::{error, info, instrument};

/// How many trailing trading days the moving-average warmer materializes.
pub const MOVING_AVERAGE_WINDOW: usize = 59;
/// How many trailing trading days the nine-turn warmer materializes.
pub const NINE_TURN_WINDOW: usize = 20;

#[derive(Debug, thiserror::Error)]
#[error("preheat task {task_id} failed: {cause}")]
pub struct PreheatError {
    pub task_id: String,
    pub cause: String,
}

/// A single preheat warmup task, run once per replay start against a fixed `target_date` and
/// symbol set. `run` returns the count of keys it wrote.
#[async_trait]
pub trait PreheatTask: Send + Sync {
    fn id(&self) -> &str;

    async fn run(
        &self,
        target_date: NaiveDate,
        symbols: &[SmolStr],
    ) -> Result<usize, PreheatError>;
}

/// Result of running one task, kept for the coordinator's `GET /replay/status` reporting.
#[derive(Debug, Clone)]
pub struct PreheatOutcome {
    pub task_id: String,
    pub written: usize,
    pub failed: bool,
}

/// Fixed-at-startup list of [`PreheatTask`] implementations, run sequentially in registration
/// order. The registry's own state is just the task list, set once and never mutated
/// afterward.
pub struct PreheaterRegistry {
    tasks: Vec<Box<dyn PreheatTask>>,
}

impl std::fmt::Debug for PreheaterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreheaterRegistry")
            .field("task_count", &self.tasks.len())
            .finish()
    }
}

impl PreheaterRegistry {
    pub fn new(tasks: Vec<Box<dyn PreheatTask>>) -> Self {
        Self { tasks }
    }

    /// Run every registered task sequentially, absorbing individual failures. Returns one
    /// [`PreheatOutcome`] per task, in registration order.
    #[instrument(skip(self, symbols), fields(target_date = %target_date, symbol_count = symbols.len()))]
    pub async fn run_all(
        &self,
        target_date: NaiveDate,
        symbols: &[SmolStr],
    ) -> Vec<PreheatOutcome> {
        let mut outcomes = Vec::with_capacity(self.tasks.len());

        for task in &self.tasks {
            match task.run(target_date, symbols).await {
                Ok(written) => {
                    info!(task_id = task.id(), written, "preheat task completed");
                    outcomes.push(PreheatOutcome {
                        task_id: task.id().to_owned(),
                        written,
                        failed: false,
                    });
                }
                Err(err) => {
                    error!(task_id = task.id(), cause = %err.cause, "preheat task failed, continuing");
                    outcomes.push(PreheatOutcome {
                        task_id: task.id().to_owned(),
                        written: 0,
                        failed: true,
                    });
                }
            }
        }

        outcomes
    }
}

/// For each index symbol, writes `previousTradingDay(target_date).close` under
/// `index:preclose:{windCode}`. The "close" here is the last quotation the source has before
/// `target_date`; finding it is delegated to a [`CloseLookup`] so this warmer stays storage
/// agnostic, the way `DataLoader` stays storage-agnostic over `QuotationSource`.
pub struct IndexPrecloseWarmer {
    kv: Arc<dyn KvStore>,
    calendar: Arc<dyn TradingCalendar + Send + Sync>,
    lookup: Arc<dyn CloseLookup>,
}

impl IndexPrecloseWarmer {
    pub fn new(
        kv: Arc<dyn KvStore>,
        calendar: Arc<dyn TradingCalendar + Send + Sync>,
        lookup: Arc<dyn CloseLookup>,
    ) -> Self {
        Self {
            kv,
            calendar,
            lookup,
        }
    }
}

#[async_trait]
impl PreheatTask for IndexPrecloseWarmer {
    fn id(&self) -> &str {
        "index-preclose-warmer"
    }

    async fn run(
        &self,
        target_date: NaiveDate,
        symbols: &[SmolStr],
    ) -> Result<usize, PreheatError> {
        let previous = self.calendar.previous_trading_day(target_date);
        let mut written = 0usize;

        for symbol in symbols {
            let close = self
                .lookup
                .close_on(symbol, previous)
                .await
                .map_err(|cause| PreheatError {
                    task_id: self.id().to_owned(),
                    cause,
                })?;

            if let Some(close) = close {
                self.kv
                    .set_string(&index_preclose_key(symbol), &close.to_string(), PREHEAT_TTL)
                    .await
                    .map_err(|err| PreheatError {
                        task_id: self.id().to_owned(),
                        cause: err.to_string(),
                    })?;
                written += 1;
            }
        }

        Ok(written)
    }
}

/// For each symbol, writes the prior [`MOVING_AVERAGE_WINDOW`] trading days of closes as an
/// ordered JSON array, newest last.
pub struct MovingAverageWarmer {
    kv: Arc<dyn KvStore>,
    lookup: Arc<dyn CloseLookup>,
}

impl MovingAverageWarmer {
    pub fn new(kv: Arc<dyn KvStore>, lookup: Arc<dyn CloseLookup>) -> Self {
        Self { kv, lookup }
    }
}

#[async_trait]
impl PreheatTask for MovingAverageWarmer {
    fn id(&self) -> &str {
        "moving-average-warmer"
    }

    async fn run(
        &self,
        target_date: NaiveDate,
        symbols: &[SmolStr],
    ) -> Result<usize, PreheatError> {
        write_trailing_closes_window(
            self.id(),
            &self.kv,
            &self.lookup,
            target_date,
            symbols,
            MOVING_AVERAGE_WINDOW,
            moving_average_key,
        )
        .await
    }
}

/// For each symbol, writes the prior [`NINE_TURN_WINDOW`] trading days of closes.
pub struct NineTurnWarmer {
    kv: Arc<dyn KvStore>,
    lookup: Arc<dyn CloseLookup>,
}

impl NineTurnWarmer {
    pub fn new(kv: Arc<dyn KvStore>, lookup: Arc<dyn CloseLookup>) -> Self {
        Self { kv, lookup }
    }
}

#[async_trait]
impl PreheatTask for NineTurnWarmer {
    fn id(&self) -> &str {
        "nine-turn-warmer"
    }

    async fn run(
        &self,
        target_date: NaiveDate,
        symbols: &[SmolStr],
    ) -> Result<usize, PreheatError> {
        write_trailing_closes_window(
            self.id(),
            &self.kv,
            &self.lookup,
            target_date,
            symbols,
            NINE_TURN_WINDOW,
            nineturn_key,
        )
        .await
    }
}

async fn write_trailing_closes_window(
    task_id: &str,
    kv: &Arc<dyn KvStore>,
    lookup: &Arc<dyn CloseLookup>,
    target_date: NaiveDate,
    symbols: &[SmolStr],
    window: usize,
    key_fn: fn(&SmolStr) -> String,
) -> Result<usize, PreheatError> {
    let mut written = 0usize;

    for symbol in symbols {
        let closes = lookup
            .trailing_closes(symbol, target_date, window)
            .await
            .map_err(|cause| PreheatError {
                task_id: task_id.to_owned(),
                cause,
            })?;

        if closes.is_empty() {
            continue;
        }

        let payload = serde_json::to_string(&closes).map_err(|err| PreheatError {
            task_id: task_id.to_owned(),
            cause: err.to_string(),
        })?;

        kv.set_string(&key_fn(symbol), &payload, PREHEAT_TTL)
            .await
            .map_err(|err| PreheatError {
                task_id: task_id.to_owned(),
                cause: err.to_string(),
            })?;
        written += 1;
    }

    Ok(written)
}

/// Storage-agnostic lookup of a symbol's historical closing prices, used by every warmer in
/// this module. Kept separate from [`QuotationSource`](crate::source::QuotationSource) — the
/// replay engine only reads tick-level rows, never a daily-close aggregate, so this is a
/// distinct read path a real deployment would back with its own store or materialized view.
#[async_trait]
pub trait CloseLookup: Send + Sync {
    /// The symbol's closing price on `date`, or `None` if no row exists.
    async fn close_on(&self, symbol: &SmolStr, date: NaiveDate) -> Result<Option<Decimal>, String>;

    /// Oldest-first list of the symbol's closes for the `window` trading days strictly before
    /// `target_date`.
    async fn trailing_closes(
        &self,
        symbol: &SmolStr,
        target_date: NaiveDate,
        window: usize,
    ) -> Result<Vec<Decimal>, String>;
}

/// [`CloseLookup`] backed directly by the [`QuotationSource`](crate::source::QuotationSource):
/// a day's "close" is the `latest_price` of the last tick-level row on that day, since no
/// separate daily-aggregate store exists in this deployment.
pub struct SourceBackedCloseLookup {
    source: Arc<dyn crate::source::QuotationSource>,
    calendar: Arc<dyn TradingCalendar + Send + Sync>,
}

impl SourceBackedCloseLookup {
    pub fn new(
        source: Arc<dyn crate::source::QuotationSource>,
        calendar: Arc<dyn TradingCalendar + Send + Sync>,
    ) -> Self {
        Self { source, calendar }
    }

    async fn close_for_day(&self, symbol: &SmolStr, date: NaiveDate) -> Result<Option<Decimal>, String> {
        let open = date.and_time(*crate::calendar::SESSION_OPEN);
        let close = date.and_time(*crate::calendar::SESSION_CLOSE);
        let rows = self
            .source
            .get_by_time_range(open, close, std::slice::from_ref(symbol))
            .await
            .map_err(|err| err.to_string())?;

        Ok(rows.last().map(|r| r.latest_price))
    }
}

#[async_trait]
impl CloseLookup for SourceBackedCloseLookup {
    async fn close_on(&self, symbol: &SmolStr, date: NaiveDate) -> Result<Option<Decimal>, String> {
        self.close_for_day(symbol, date).await
    }

    async fn trailing_closes(
        &self,
        symbol: &SmolStr,
        target_date: NaiveDate,
        window: usize,
    ) -> Result<Vec<Decimal>, String> {
        let mut closes = Vec::with_capacity(window);
        let mut cursor = target_date;
        let max_scan = window.saturating_mul(4).max(30);

        for _ in 0..max_scan {
            if closes.len() >= window {
                break;
            }
            cursor = self.calendar.previous_trading_day(cursor);
            if let Some(close) = self.close_for_day(symbol, cursor).await? {
                closes.push(close);
            }
        }

        closes.reverse();
        Ok(closes)
    }
}

pub mod fake {
    use super::*;
    use std::collections::HashMap;

    /// In-memory [`CloseLookup`] seeded with a fixed `symbol -> [(date, close)]` table.
    #[derive(Debug, Clone, Default)]
    pub struct FakeCloseLookup {
        closes: HashMap<SmolStr, Vec<(NaiveDate, Decimal)>>,
    }

    impl FakeCloseLookup {
        pub fn new(closes: HashMap<SmolStr, Vec<(NaiveDate, Decimal)>>) -> Self {
            Self { closes }
        }
    }

    #[async_trait]
    impl CloseLookup for FakeCloseLookup {
        async fn close_on(
            &self,
            symbol: &SmolStr,
            date: NaiveDate,
        ) -> Result<Option<Decimal>, String> {
            Ok(self
                .closes
                .get(symbol)
                .and_then(|rows| rows.iter().find(|(d, _)| *d == date).map(|(_, c)| *c)))
        }

        async fn trailing_closes(
            &self,
            symbol: &SmolStr,
            target_date: NaiveDate,
            window: usize,
        ) -> Result<Vec<Decimal>, String> {
            let mut rows: Vec<(NaiveDate, Decimal)> = self
                .closes
                .get(symbol)
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .filter(|(d, _)| *d < target_date)
                .collect();
            rows.sort_by_key(|(d, _)| *d);
            let start = rows.len().saturating_sub(window);
            Ok(rows[start..].iter().map(|(_, c)| *c).collect())
        }
    }

    /// A [`PreheatTask`] that always fails, for exercising the registry's absorb-and-continue
    /// behavior.
    #[derive(Debug)]
    pub struct AlwaysFailsTask {
        pub task_id: String,
    }

    #[async_trait]
    impl PreheatTask for AlwaysFailsTask {
        fn id(&self) -> &str {
            &self.task_id
        }

        async fn run(
            &self,
            _target_date: NaiveDate,
            _symbols: &[SmolStr],
        ) -> Result<usize, PreheatError> {
            Err(PreheatError {
                task_id: self.task_id.clone(),
                cause: "synthetic failure".to_owned(),
            })
        }
    }

    /// A [`PreheatTask`] that always succeeds with a fixed count, writing nothing.
    #[derive(Debug)]
    pub struct FixedCountTask {
        pub task_id: String,
        pub count: usize,
    }

    #[async_trait]
    impl PreheatTask for FixedCountTask {
        fn id(&self) -> &str {
            &self.task_id
        }

        async fn run(
            &self,
            _target_date: NaiveDate,
            _symbols: &[SmolStr],
        ) -> Result<usize, PreheatError> {
            Ok(self.count)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::{AlwaysFailsTask, FakeCloseLookup, FixedCountTask};
    use super::*;
    use crate::calendar::DefaultTradingCalendar;
    use crate::kv::fake::FakeKvStore;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn test_registry_continues_past_a_failing_task() {
        let registry = PreheaterRegistry::new(vec![
            Box::new(FixedCountTask {
                task_id: "A".into(),
                count: 50,
            }),
            Box::new(AlwaysFailsTask {
                task_id: "B".into(),
            }),
        ]);

        let outcomes = registry
            .run_all(date(2026, 1, 19), &[SmolStr::from("000001.SZ")])
            .await;

        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].task_id, "A");
        assert_eq!(outcomes[0].written, 50);
        assert!(!outcomes[0].failed);
        assert_eq!(outcomes[1].task_id, "B");
        assert!(outcomes[1].failed);
    }

    #[tokio::test]
    async fn test_index_preclose_warmer_writes_previous_trading_day_close() {
        let symbol = SmolStr::from("000300.SH");
        let mut table = HashMap::new();
        table.insert(
            symbol.clone(),
            vec![(date(2026, 1, 16), dec!(3800.00)), (date(2026, 1, 19), dec!(3850.25))],
        );
        let lookup = Arc::new(FakeCloseLookup::new(table));
        let kv = Arc::new(FakeKvStore::new());
        let calendar = Arc::new(DefaultTradingCalendar);

        let warmer = IndexPrecloseWarmer::new(kv.clone(), calendar, lookup);
        let written = warmer.run(date(2026, 1, 19), &[symbol.clone()]).await.unwrap();

        assert_eq!(written, 1);
        assert_eq!(
            kv.snapshot().get("index:preclose:000300.SH").cloned(),
            Some("3800.00".to_owned())
        );
    }

    #[tokio::test]
    async fn test_moving_average_warmer_writes_ordered_json_array() {
        let symbol = SmolStr::from("600519.SH");
        let mut table = HashMap::new();
        table.insert(
            symbol.clone(),
            vec![
                (date(2026, 1, 15), dec!(1700.0)),
                (date(2026, 1, 16), dec!(1710.0)),
                (date(2026, 1, 19), dec!(1720.0)),
            ],
        );
        let lookup = Arc::new(FakeCloseLookup::new(table));
        let kv = Arc::new(FakeKvStore::new());

        let warmer = MovingAverageWarmer::new(kv.clone(), lookup);
        let written = warmer
            .run(date(2026, 1, 20), &[symbol.clone()])
            .await
            .unwrap();

        assert_eq!(written, 1);
        let raw = kv.snapshot().get("strategy:ma:600519.SH").cloned().unwrap();
        let parsed: Vec<Decimal> = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed, vec![dec!(1700.0), dec!(1710.0), dec!(1720.0)]);
    }

    #[tokio::test]
    async fn test_nine_turn_warmer_skips_symbol_with_no_history() {
        let lookup = Arc::new(FakeCloseLookup::new(HashMap::new()));
        let kv = Arc::new(FakeKvStore::new());

        let warmer = NineTurnWarmer::new(kv.clone(), lookup);
        let written = warmer
            .run(date(2026, 1, 20), &[SmolStr::from("000002.SZ")])
            .await
            .unwrap();

        assert_eq!(written, 0);
        assert!(kv.snapshot().is_empty());
    }
}
