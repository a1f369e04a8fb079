//! Cache (C2): TTL-bounded read-through layer over the Store. A cache miss
//! must never cause an error; the Store is always authoritative.

mod keys;
mod memory;
mod sqlite;

pub use keys::{analysis_dedup_key, ocr_key};
pub use memory::MemoryCache;
pub use sqlite::SqliteCache;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CacheError>;

pub const OCR_TTL_SECS: i64 = 604_800; // 7 days
pub const ANALYSIS_DEDUP_TTL_SECS: i64 = 86_400; // 24 hours

/// A TTL-bounded key-value cache. Implementations must treat a missing or
/// expired key as `Ok(None)`, never an error.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn put(&self, key: &str, value: &str, ttl_secs: i64) -> Result<()>;
    async fn invalidate(&self, key: &str) -> Result<()>;
}
