//! Time-bounded result cache
//!
//! Entries go `absent -> pending -> present -> expired -> absent`. Expiry is
//! enforced by a background reaper only: a read between an entry's
//! expiration and the next reaper pass still returns it.

use std::time::Duration;

use chrono::{DateTime, Utc};

use common::model::Value;

mod memory;

pub use memory::MemoryCache;

/// Errors raised by cache operations
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("value for key [{key}] not in cache")]
    NotFound { key: String },
    #[error("fetch for key [{key}] failed: {reason}")]
    FetchFailed { key: String, reason: String },
    #[error("timed out waiting for in-flight fetch of key [{key}]")]
    WaitTimeout { key: String },
    #[error("cache reaper needs a running tokio runtime")]
    NoRuntime,
}

/// A cached value and its absolute expiration
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: String,
    pub value: Value,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, value: Value, ttl: Duration) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        Self {
            key: key.into(),
            value,
            expires_at: Utc::now().checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

/// Key-value store for query results
pub trait Cache: Send + Sync {
    /// Insert or overwrite `key`, expiring `ttl` from now
    fn store(&self, key: &str, value: Value, ttl: Duration) -> Result<(), CacheError>;

    /// The value for `key`, or [`CacheError::NotFound`]
    fn retrieve(&self, key: &str) -> Result<Value, CacheError>;

    /// Release backing resources
    fn close(&self) -> Result<(), CacheError>;
}
