use chrono::{DateTime, NaiveDate, Utc};
use derive_more::Constructor;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr as SymbolCode;

/// A single tick-level quotation row, the unit of flow through the pipeline.
///
/// Invariant: within a single [`wind_code`](Self::wind_code), `trade_time` is strictly
/// monotonic in the source store; across symbols no order is assumed.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Constructor)]
pub struct QuotationRecord {
    pub wind_code: SymbolCode,
    pub trade_time: DateTime<Utc>,
    pub latest_price: Decimal,
    pub average_price: Decimal,
    pub total_volume: Decimal,
}

impl QuotationRecord {
    /// Whether this record belongs on the index topic/partition rather than the stock one.
    ///
    /// Index wind codes in this market end `.SH`/`.SZ` with a `000...` numeric prefix; the
    /// engine treats the symbol class as opaque and defers to [`SymbolClass::of`].
    pub fn symbol_class(&self) -> SymbolClass {
        SymbolClass::of(&self.wind_code)
    }
}

/// Which broker topic / KV namespace a wind code belongs to.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum SymbolClass {
    Index,
    Stock,
}

impl SymbolClass {
    pub fn of(wind_code: &str) -> Self {
        match wind_code.split('.').next() {
            Some(code) if code.len() == 6 && code.starts_with("000") && is_index_code(code) => {
                SymbolClass::Index
            }
            _ => SymbolClass::Stock,
        }
    }

    pub fn topic(self) -> &'static str {
        match self {
            SymbolClass::Index => "quotation-index",
            SymbolClass::Stock => "quotation-stock",
        }
    }
}

/// Known broad-market index codes; anything else with a `000` prefix is still an A-share stock.
fn is_index_code(code: &str) -> bool {
    matches!(code, "000001" | "000300" | "000905" | "000016" | "000852")
}

/// Immutable-after-start parameters for a single replay run.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ReplayParams {
    /// Inclusive start calendar date, `yyyyMMdd`.
    pub start_date: NaiveDate,
    /// Inclusive end calendar date, `yyyyMMdd`.
    pub end_date: NaiveDate,
    /// `1` = real-time, `k>1` = k-times faster, `0` = maximum speed (no pacing).
    pub speed_multiplier: u32,
    /// Window width in minutes, typically 5-10.
    pub preload_minutes: u32,
    /// Back-pressure threshold; `size + batch.len() > buffer_max_size` blocks `offer`.
    pub buffer_max_size: usize,
    /// Empty/absent = whole market.
    pub stock_codes: Vec<SymbolCode>,
}

impl ReplayParams {
    /// Parse the allow-list from a comma-separated string, per the documented wire contract.
    pub fn stock_codes_from_csv(csv: &str) -> Vec<SymbolCode> {
        csv.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(SymbolCode::from)
            .collect()
    }
}

/// A half-open `[start, end)` virtual-time interval used to batch source queries.
///
/// Adjacent windows tile a trading day with no gaps and no overlaps; see
/// [`crate::loader::DataLoader`] for the boundary rule that makes the underlying closed-range
/// query line up with this half-open tiling.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Constructor)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// The coordinator's lifecycle phase.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Preparing,
    Preheating,
    Running,
    Stopping,
    Stopped,
    Failed,
}

/// Owned exclusively by the [`ReplayCoordinator`](crate::coordinator::ReplayCoordinator); other
/// components read it via a snapshot accessor.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ReplayState {
    pub phase: Phase,
    pub current_virtual_time: Option<DateTime<Utc>>,
    pub last_loaded_window: Option<(DateTime<Utc>, DateTime<Utc>)>,
    pub emitted_count: u64,
    pub dropped_count: u64,
    pub buffer_depth: usize,
    pub error_cause: Option<String>,
}

impl ReplayState {
    pub fn new() -> Self {
        Self {
            phase: Phase::Stopped,
            current_virtual_time: None,
            last_loaded_window: None,
            emitted_count: 0,
            dropped_count: 0,
            buffer_depth: 0,
            error_cause: None,
        }
    }
}

impl Default for ReplayState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_class_of() {
        assert_eq!(SymbolClass::of("000300.SH"), SymbolClass::Index);
        assert_eq!(SymbolClass::of("000001.SH"), SymbolClass::Index);
        assert_eq!(SymbolClass::of("000001.SZ"), SymbolClass::Index);
        assert_eq!(SymbolClass::of("600519.SH"), SymbolClass::Stock);
        assert_eq!(SymbolClass::of("000002.SZ"), SymbolClass::Stock);
    }

    #[test]
    fn test_stock_codes_from_csv() {
        let codes = ReplayParams::stock_codes_from_csv(" 600519.SH, 000001.SZ ,");
        assert_eq!(
            codes,
            vec![
                SymbolCode::from("600519.SH"),
                SymbolCode::from("000001.SZ"),
            ]
        );
    }

    #[test]
    fn test_stock_codes_from_csv_empty_is_whole_market() {
        assert!(ReplayParams::stock_codes_from_csv("").is_empty());
    }
}
