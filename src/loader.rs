//! Time-sliced data loader. Pulls windows from a [`QuotationSource`] and rewrites the
//! half-open `[start, end)` window boundary into the closed-range query the source expects.

use crate::calendar::SESSION_CLOSE;
use crate::error::LoadError;
use crate::source::QuotationSource;
use crate::time_fmt::format_date;
use crate::types::{QuotationRecord, TimeWindow};
use chrono::{Duration, Timelike};
use smol_str::SmolStr;
use std::sync::Arc;
use tracing::instrument;

/// Pulls quotation rows for a single [`TimeWindow`], rewriting the window's half-open upper
/// bound into the closed-range query the underlying [`QuotationSource`] expects.
#[derive(Clone)]
pub struct DataLoader {
    source: Arc<dyn QuotationSource>,
    allow_list: Vec<SmolStr>,
}

impl std::fmt::Debug for DataLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataLoader")
            .field("allow_list_len", &self.allow_list.len())
            .finish()
    }
}

impl DataLoader {
    pub fn new(source: Arc<dyn QuotationSource>, allow_list: Vec<SmolStr>) -> Self {
        Self { source, allow_list }
    }

    /// Load a [`TimeWindow`], applying the boundary rule documented on
    /// [`effective_query_end`] before delegating to the source.
    #[instrument(skip(self), fields(start = %window.start, end = %window.end))]
    pub async fn load_window(
        &self,
        window: TimeWindow,
    ) -> Result<Vec<QuotationRecord>, LoadError> {
        let effective_end = effective_query_end(window.end);

        self.source
            .get_by_time_range(
                window.start.naive_utc(),
                effective_end.naive_utc(),
                &self.allow_list,
            )
            .await
            .map_err(|cause| LoadError {
                window_start: format_date(window.start.date_naive()),
                window_end: format_date(window.end.date_naive()),
                cause: cause.to_string(),
            })
    }
}

/// The boundary rule: windows tile half-open `[s, s+delta)` but the underlying query is
/// closed `[a, b]`. To prevent the instant `s+delta` from appearing in two adjacent windows,
/// the query upper bound is rewritten: if `end` is **not** the session close and
/// `end.second() == 0`, the effective query end is `end - 1s`; otherwise it is `end` as
/// given. The session-close carve-out ensures the final second of the trading day is emitted
/// exactly once.
///
/// Precondition (an open question resolved in `DESIGN.md`): window boundaries land on a
/// minute mark except the session close — this assumes `preloadMinutes` is a positive
/// integer, never a sub-minute window width.
pub fn effective_query_end(end: chrono::DateTime<chrono::Utc>) -> chrono::DateTime<chrono::Utc> {
    let is_session_close = end.time() == *SESSION_CLOSE;

    if !is_session_close && end.second() == 0 {
        end - Duration::seconds(1)
    } else {
        end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::fake::FakeQuotationSource;
    use chrono::{TimeZone, Utc};

    fn t(h: u32, m: u32, s: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 18, h, m, s).unwrap()
    }

    #[test]
    fn test_effective_query_end_subtracts_one_second_on_minute_mark() {
        let end = t(9, 35, 0);
        assert_eq!(effective_query_end(end), t(9, 34, 59));
    }

    #[test]
    fn test_effective_query_end_session_close_carve_out() {
        let end = t(15, 30, 0);
        assert_eq!(effective_query_end(end), end);
    }

    #[test]
    fn test_effective_query_end_non_minute_mark_unchanged() {
        let end = t(9, 35, 17);
        assert_eq!(effective_query_end(end), end);
    }

    #[tokio::test]
    async fn test_adjacent_windows_do_not_duplicate_boundary_row() {
        let rows = vec![
            crate::types::QuotationRecord::new(
                SmolStr::from("000001.SZ"),
                t(9, 34, 59),
                Default::default(),
                Default::default(),
                Default::default(),
            ),
            crate::types::QuotationRecord::new(
                SmolStr::from("000001.SZ"),
                t(9, 35, 0),
                Default::default(),
                Default::default(),
                Default::default(),
            ),
            crate::types::QuotationRecord::new(
                SmolStr::from("000001.SZ"),
                t(9, 35, 1),
                Default::default(),
                Default::default(),
                Default::default(),
            ),
        ];
        let source = Arc::new(FakeQuotationSource::new(rows));
        let loader = DataLoader::new(source, Vec::new());

        let window_a = TimeWindow::new(t(9, 30, 0), t(9, 35, 0));
        let window_b = TimeWindow::new(t(9, 35, 0), t(9, 40, 0));

        let a = loader.load_window(window_a).await.unwrap();
        let b = loader.load_window(window_b).await.unwrap();

        assert_eq!(a.len(), 1, "window A should only contain 09:34:59");
        assert_eq!(a[0].trade_time, t(9, 34, 59));
        assert_eq!(b.len(), 2, "window B should contain 09:35:00 and 09:35:01");
    }
}
