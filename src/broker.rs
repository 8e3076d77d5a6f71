//! Broker publisher: serializes a [`QuotationRecord`] to JSON and publishes it to a named
//! topic with a partition key, retrying transient failures with exponential backoff.
//!
//! The backoff shape (fixed schedule, multiply-then-sleep) is the same one
//! `barter-data`'s reconnecting-stream machinery uses for stream reconnects; here it's
//! applied per record rather than per stream reconnect.

use crate::time_fmt::format_timestamp;
use crate::types::QuotationRecord;
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use serde::Serialize;
use smol_str::SmolStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, warn};

/// Retry schedule: 50ms / 200ms / 800ms, three attempts total.
const RETRY_BACKOFF: [Duration; 3] = [
    Duration::from_millis(50),
    Duration::from_millis(200),
    Duration::from_millis(800),
];

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("transient publish failure: {0}")]
    Transient(String),
    #[error("permanent publish failure (malformed payload): {0}")]
    Permanent(String),
}

/// Canonical wire payload with the documented key names.
#[derive(Debug, Serialize)]
struct QuotationPayload {
    #[serde(rename = "windCode")]
    wind_code: SmolStr,
    #[serde(rename = "tradeDate")]
    trade_date: String,
    #[serde(rename = "latestPrice", with = "rust_decimal::serde::float")]
    latest_price: rust_decimal::Decimal,
    #[serde(rename = "totalVolume", with = "rust_decimal::serde::float")]
    total_volume: rust_decimal::Decimal,
    #[serde(rename = "averagePrice", with = "rust_decimal::serde::float")]
    average_price: rust_decimal::Decimal,
}

impl From<&QuotationRecord> for QuotationPayload {
    fn from(record: &QuotationRecord) -> Self {
        Self {
            wind_code: record.wind_code.clone(),
            trade_date: format_timestamp(record.trade_time),
            latest_price: record.latest_price,
            total_volume: record.total_volume,
            average_price: record.average_price,
        }
    }
}

/// `publish(topic, partitionKey, payload)` to the partitioned event bus.
#[async_trait]
pub trait BrokerPublisher: Send + Sync {
    async fn publish(
        &self,
        topic: &str,
        partition_key: &str,
        payload: &[u8],
    ) -> Result<(), PublishError>;
}

/// Publish a [`QuotationRecord`] with the standard retry policy, returning whether the
/// publish ultimately succeeded. A terminal failure increments the caller's dropped-count
/// metric; it does not stall the pipeline.
pub async fn publish_record_with_retry(
    publisher: &dyn BrokerPublisher,
    record: &QuotationRecord,
) -> bool {
    let topic = record.symbol_class().topic();
    let payload = match serde_json::to_vec(&QuotationPayload::from(record)) {
        Ok(bytes) => bytes,
        Err(err) => {
            error!(?err, wind_code = %record.wind_code, "failed to serialise QuotationRecord, dropping");
            return false;
        }
    };

    let mut attempt = 0usize;
    loop {
        match publisher
            .publish(topic, &record.wind_code, &payload)
            .await
        {
            Ok(()) => return true,
            Err(PublishError::Permanent(cause)) => {
                error!(wind_code = %record.wind_code, cause, "permanent publish failure, dropping record");
                return false;
            }
            Err(PublishError::Transient(cause)) => {
                if attempt >= RETRY_BACKOFF.len() {
                    error!(
                        wind_code = %record.wind_code,
                        cause,
                        attempts = attempt,
                        "publish retries exhausted, dropping record"
                    );
                    return false;
                }
                warn!(
                    wind_code = %record.wind_code,
                    cause,
                    attempt,
                    "transient publish failure, retrying"
                );
                tokio::time::sleep(RETRY_BACKOFF[attempt]).await;
                attempt += 1;
            }
        }
    }
}

/// Kafka-backed [`BrokerPublisher`].
pub struct KafkaBrokerPublisher {
    producer: FutureProducer,
}

impl std::fmt::Debug for KafkaBrokerPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaBrokerPublisher").finish()
    }
}

impl KafkaBrokerPublisher {
    pub fn new(bootstrap_servers: &[String]) -> Result<Self, PublishError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", bootstrap_servers.join(","))
            .set("message.timeout.ms", "5000")
            .create()
            .map_err(|err| PublishError::Transient(err.to_string()))?;

        Ok(Self { producer })
    }
}

#[async_trait]
impl BrokerPublisher for KafkaBrokerPublisher {
    async fn publish(
        &self,
        topic: &str,
        partition_key: &str,
        payload: &[u8],
    ) -> Result<(), PublishError> {
        let record = FutureRecord::to(topic).key(partition_key).payload(payload);

        self.producer
            .send(record, Duration::from_secs(0))
            .await
            .map(|_| ())
            .map_err(|(err, _)| PublishError::Transient(err.to_string()))
    }
}

pub mod fake {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Debug, Clone, Default)]
    pub struct FakeBrokerPublisher {
        pub published: Arc<Mutex<Vec<(String, String, Vec<u8>)>>>,
        pub fail_times: Arc<Mutex<usize>>,
    }

    impl FakeBrokerPublisher {
        pub fn new() -> Self {
            Self::default()
        }

        /// Fail the next `n` publish calls transiently, then succeed.
        pub fn fail_next(&self, n: usize) {
            *self.fail_times.lock() = n;
        }

        pub fn published(&self) -> Vec<(String, String, Vec<u8>)> {
            self.published.lock().clone()
        }
    }

    #[async_trait]
    impl BrokerPublisher for FakeBrokerPublisher {
        async fn publish(
            &self,
            topic: &str,
            partition_key: &str,
            payload: &[u8],
        ) -> Result<(), PublishError> {
            let mut remaining = self.fail_times.lock();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(PublishError::Transient("fake failure".into()));
            }
            drop(remaining);

            self.published
                .lock()
                .push((topic.to_owned(), partition_key.to_owned(), payload.to_owned()));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::QuotationRecord;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn sample_record() -> QuotationRecord {
        QuotationRecord::new(
            SmolStr::from("000300.SH"),
            Utc.with_ymd_and_hms(2026, 1, 18, 13, 1, 1).unwrap(),
            dec!(3850.25),
            dec!(3845.50),
            dec!(1234567890.0),
        )
    }

    #[test]
    fn test_payload_wire_format_keys() {
        let payload = QuotationPayload::from(&sample_record());
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["windCode"], "000300.SH");
        assert_eq!(json["tradeDate"], "2026-01-18 13:01:01");
        assert!(json["latestPrice"].is_number(), "latestPrice must be a bare JSON number, not a quoted string");
        assert!(json["totalVolume"].is_number(), "totalVolume must be a bare JSON number, not a quoted string");
        assert!(json["averagePrice"].is_number(), "averagePrice must be a bare JSON number, not a quoted string");
        assert_eq!(json["latestPrice"].as_f64(), Some(3850.25));
    }

    #[tokio::test]
    async fn test_publish_with_retry_succeeds_after_transient_failures() {
        let publisher = fake::FakeBrokerPublisher::new();
        publisher.fail_next(2);

        let ok = publish_record_with_retry(&publisher, &sample_record()).await;

        assert!(ok);
        assert_eq!(publisher.published().len(), 1);
    }

    #[tokio::test]
    async fn test_publish_with_retry_drops_after_exhausting_retries() {
        let publisher = fake::FakeBrokerPublisher::new();
        publisher.fail_next(10);

        let ok = publish_record_with_retry(&publisher, &sample_record()).await;

        assert!(!ok);
        assert!(publisher.published().is_empty());
    }
}
