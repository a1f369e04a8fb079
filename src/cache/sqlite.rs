//! Default Cache backend: a SQLite table alongside the Store, so the whole
//! pipeline runs against a single file with no external cache service.
//! `redis-backend` offers an alternate implementation for distributed
//! deployments but is not wired here (its `Cache` impl is a drop-in swap).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::params;

use super::{Cache, Result};

pub struct SqliteCache {
    db_path: PathBuf,
}

impl SqliteCache {
    pub fn new(db_path: &Path) -> Result<Self> {
        let conn = rusqlite::Connection::open(db_path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS cache_entries (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                expires_at TEXT NOT NULL
            );",
        )?;
        Ok(Self {
            db_path: db_path.to_path_buf(),
        })
    }
}

#[async_trait]
impl Cache for SqliteCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = rusqlite::Connection::open(&self.db_path)?;
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT value, expires_at FROM cache_entries WHERE key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .ok();

        match row {
            Some((value, expires_at)) => {
                let expires_at = crate::store::parse_datetime(&expires_at);
                if expires_at > Utc::now() {
                    Ok(Some(value))
                } else {
                    conn.execute("DELETE FROM cache_entries WHERE key = ?1", params![key])?;
                    Ok(None)
                }
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: &str, ttl_secs: i64) -> Result<()> {
        let conn = rusqlite::Connection::open(&self.db_path)?;
        let expires_at = Utc::now() + chrono::Duration::seconds(ttl_secs);
        conn.execute(
            "INSERT INTO cache_entries (key, value, expires_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
            params![key, value, expires_at.to_rfc3339()],
        )?;
        Ok(())
    }

    async fn invalidate(&self, key: &str) -> Result<()> {
        let conn = rusqlite::Connection::open(&self.db_path)?;
        conn.execute("DELETE FROM cache_entries WHERE key = ?1", params![key])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_through_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SqliteCache::new(&dir.path().join("cache.sqlite3")).unwrap();
        cache.put("ocr:abc", "text", 60).await.unwrap();
        assert_eq!(cache.get("ocr:abc").await.unwrap(), Some("text".to_string()));
    }

    #[tokio::test]
    async fn expired_entries_are_pruned_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SqliteCache::new(&dir.path().join("cache.sqlite3")).unwrap();
        cache.put("k", "v", -10).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
    }
}
