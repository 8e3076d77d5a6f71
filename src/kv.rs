//! Key/value store client plus the well-known key-prefix builders written by preheaters.
//!
//! The source system string-concatenates ad hoc prefixes; here they live as named builder
//! functions in one module so nothing downstream constructs a raw key string by hand.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use smol_str::SmolStr;
use thiserror::Error;
use std::time::Duration;

/// TTL applied to every key a preheater writes.
pub const PREHEAT_TTL: Duration = Duration::from_secs(36 * 60 * 60);

#[derive(Debug, Error)]
pub enum KvError {
    #[error("kv connection error: {0}")]
    Connection(String),
    #[error("kv write error: {0}")]
    Write(String),
}

/// Opaque key/value interface: string keys, string or hash values, TTL.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn set_string(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError>;
    async fn get_string(&self, key: &str) -> Result<Option<String>, KvError>;
}

/// Redis-backed [`KvStore`], using the async connection manager so callers don't manage
/// reconnects themselves.
#[derive(Debug, Clone)]
pub struct RedisKvStore {
    conn: ConnectionManager,
}

impl RedisKvStore {
    pub async fn connect(endpoint: &str) -> Result<Self, KvError> {
        let client =
            redis::Client::open(endpoint).map_err(|err| KvError::Connection(err.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|err| KvError::Connection(err.to_string()))?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn set_string(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs())
            .await
            .map_err(|err| KvError::Write(err.to_string()))
    }

    async fn get_string(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut conn = self.conn.clone();
        conn.get(key)
            .await
            .map_err(|err| KvError::Write(err.to_string()))
    }
}

/// `index:preclose:{windCode}` → decimal string.
pub fn index_preclose_key(wind_code: &SmolStr) -> String {
    format!("index:preclose:{wind_code}")
}

/// `strategy:nineturn:{windCode}` → JSON array of 20 decimals, newest last.
pub fn nineturn_key(wind_code: &SmolStr) -> String {
    format!("strategy:nineturn:{wind_code}")
}

/// `strategy:ma:{windCode}` → JSON array of 59 decimals, newest last.
pub fn moving_average_key(wind_code: &SmolStr) -> String {
    format!("strategy:ma:{wind_code}")
}

pub mod fake {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::Arc;

    /// In-memory [`KvStore`] for tests. TTL is recorded but not enforced (no clock driving
    /// expiry in a unit test).
    #[derive(Debug, Clone, Default)]
    pub struct FakeKvStore {
        values: Arc<Mutex<HashMap<String, String>>>,
    }

    impl FakeKvStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn snapshot(&self) -> HashMap<String, String> {
            self.values.lock().clone()
        }
    }

    #[async_trait]
    impl KvStore for FakeKvStore {
        async fn set_string(&self, key: &str, value: &str, _ttl: Duration) -> Result<(), KvError> {
            self.values.lock().insert(key.to_owned(), value.to_owned());
            Ok(())
        }

        async fn get_string(&self, key: &str) -> Result<Option<String>, KvError> {
            Ok(self.values.lock().get(key).cloned())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_builders_match_wire_layout() {
        let code = SmolStr::from("000300.SH");
        assert_eq!(index_preclose_key(&code), "index:preclose:000300.SH");
        assert_eq!(nineturn_key(&code), "strategy:nineturn:000300.SH");
        assert_eq!(moving_average_key(&code), "strategy:ma:000300.SH");
    }
}
