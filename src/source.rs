//! Read-only quotation source interface over historical quotations, and the
//! Postgres-backed implementation used in production.
//!
//! Storage of quotations is explicitly out of scope — this module only ever reads.

use crate::types::QuotationRecord;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use smol_str::SmolStr;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use std::time::Duration;
use thiserror::Error;

/// Per-window query timeout.
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("malformed row: {0}")]
    MalformedRow(String),
    #[error("query timed out after {0:?}")]
    Timeout(Duration),
}

/// Read-only query interface over historical quotations.
#[async_trait]
pub trait QuotationSource: Send + Sync {
    /// Closed-range `[start, end]` fetch, ordered by `trade_time` ascending within each
    /// `wind_code`. `allow_list` empty means an all-market query.
    async fn get_by_time_range(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
        allow_list: &[SmolStr],
    ) -> Result<Vec<QuotationRecord>, SourceError>;
}

/// Postgres-backed [`QuotationSource`].
#[derive(Debug, Clone)]
pub struct PostgresQuotationSource {
    pool: PgPool,
}

impl PostgresQuotationSource {
    pub async fn connect(dsn: &str) -> Result<Self, SourceError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(QUERY_TIMEOUT)
            .connect(dsn)
            .await
            .map_err(|err| SourceError::Connection(err.to_string()))?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QuotationSource for PostgresQuotationSource {
    async fn get_by_time_range(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
        allow_list: &[SmolStr],
    ) -> Result<Vec<QuotationRecord>, SourceError> {
        let fut = async {
            let rows = if allow_list.is_empty() {
                sqlx::query(
                    "SELECT wind_code, trade_time, latest_price, average_price, total_volume \
                     FROM quotation WHERE trade_time BETWEEN $1 AND $2 ORDER BY trade_time ASC",
                )
                .bind(start)
                .bind(end)
                .fetch_all(&self.pool)
                .await
            } else {
                let codes: Vec<String> = allow_list.iter().map(|c| c.to_string()).collect();
                sqlx::query(
                    "SELECT wind_code, trade_time, latest_price, average_price, total_volume \
                     FROM quotation WHERE trade_time BETWEEN $1 AND $2 AND wind_code = ANY($3) \
                     ORDER BY trade_time ASC",
                )
                .bind(start)
                .bind(end)
                .bind(&codes)
                .fetch_all(&self.pool)
                .await
            }
            .map_err(|err| SourceError::Connection(err.to_string()))?;

            rows.into_iter().map(row_to_record).collect()
        };

        match tokio::time::timeout(QUERY_TIMEOUT, fut).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::Timeout(QUERY_TIMEOUT)),
        }
    }
}

fn row_to_record(row: sqlx::postgres::PgRow) -> Result<QuotationRecord, SourceError> {
    let wind_code: String = row
        .try_get("wind_code")
        .map_err(|err| SourceError::MalformedRow(err.to_string()))?;
    let trade_time: NaiveDateTime = row
        .try_get("trade_time")
        .map_err(|err| SourceError::MalformedRow(err.to_string()))?;
    let latest_price: Decimal = row
        .try_get("latest_price")
        .map_err(|err| SourceError::MalformedRow(err.to_string()))?;
    let average_price: Decimal = row
        .try_get("average_price")
        .map_err(|err| SourceError::MalformedRow(err.to_string()))?;
    let total_volume: Decimal = row
        .try_get("total_volume")
        .map_err(|err| SourceError::MalformedRow(err.to_string()))?;

    Ok(QuotationRecord::new(
        SmolStr::from(wind_code),
        trade_time.and_utc(),
        latest_price,
        average_price,
        total_volume,
    ))
}

pub mod fake {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    /// In-memory [`QuotationSource`] for tests: returns whatever rows were seeded, filtered
    /// by the closed range and allow-list exactly like the real store would.
    #[derive(Debug, Clone, Default)]
    pub struct FakeQuotationSource {
        rows: Arc<Mutex<Vec<QuotationRecord>>>,
    }

    impl FakeQuotationSource {
        pub fn new(rows: Vec<QuotationRecord>) -> Self {
            Self {
                rows: Arc::new(Mutex::new(rows)),
            }
        }
    }

    #[async_trait]
    impl QuotationSource for FakeQuotationSource {
        async fn get_by_time_range(
            &self,
            start: NaiveDateTime,
            end: NaiveDateTime,
            allow_list: &[SmolStr],
        ) -> Result<Vec<QuotationRecord>, SourceError> {
            let start = start.and_utc();
            let end = end.and_utc();
            let rows = self.rows.lock().await;
            let mut matched: Vec<QuotationRecord> = rows
                .iter()
                .filter(|r| r.trade_time >= start && r.trade_time <= end)
                .filter(|r| allow_list.is_empty() || allow_list.iter().any(|c| c == &r.wind_code))
                .cloned()
                .collect();
            matched.sort_by_key(|r| r.trade_time);
            Ok(matched)
        }
    }
}
