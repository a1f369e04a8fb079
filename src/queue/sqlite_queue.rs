//! Default Queue fabric backend: a SQLite table, giving the whole pipeline
//! at-least-once delivery without an external broker. Claiming a batch uses
//! the same conditional-UPDATE pattern as the Store's claim protocol, so a
//! message is never handed to two consumers at once.

use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::params;
use serde::{de::DeserializeOwned, Serialize};

use super::{BatchOutcome, Delivery, Queue, QueueName, Result};

pub struct SqliteQueue<M> {
    db_path: PathBuf,
    _marker: PhantomData<M>,
}

impl<M> SqliteQueue<M> {
    pub fn new(db_path: &Path) -> Result<Self> {
        let conn = rusqlite::Connection::open(db_path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS queue_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                queue_name TEXT NOT NULL,
                payload TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'ready',
                attempts INTEGER NOT NULL DEFAULT 0,
                visible_at TEXT NOT NULL,
                dead_letter INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_queue_messages_claimable
                ON queue_messages(queue_name, status, visible_at);",
        )?;
        Ok(Self {
            db_path: db_path.to_path_buf(),
            _marker: PhantomData,
        })
    }
}

#[async_trait]
impl<M: Serialize + DeserializeOwned + Send + Sync + 'static> Queue<M> for SqliteQueue<M> {
    async fn send(&self, queue: QueueName, message: &M) -> Result<()> {
        let conn = rusqlite::Connection::open(&self.db_path)?;
        let payload = serde_json::to_string(message)?;
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO queue_messages (queue_name, payload, status, attempts, visible_at, created_at)
             VALUES (?1, ?2, 'ready', 0, ?3, ?3)",
            params![queue.as_str(), payload, now],
        )?;
        Ok(())
    }

    async fn send_batch(&self, queue: QueueName, messages: &[M]) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();
        // Batches of <=100; on full-batch failure, fall back to individual
        // sends and count enqueued vs failed.
        for chunk in messages.chunks(100) {
            if self.send_chunk(queue, chunk).await.is_ok() {
                outcome.enqueued += chunk.len();
                continue;
            }
            for message in chunk {
                match self.send(queue, message).await {
                    Ok(()) => outcome.enqueued += 1,
                    Err(_) => outcome.failed += 1,
                }
            }
        }
        Ok(outcome)
    }

    async fn receive(&self, queue: QueueName, max: usize) -> Result<Vec<Delivery<M>>> {
        let conn = rusqlite::Connection::open(&self.db_path)?;
        let now = Utc::now().to_rfc3339();

        let mut stmt = conn.prepare(
            "SELECT id FROM queue_messages
             WHERE queue_name = ?1 AND status = 'ready' AND visible_at <= ?2 AND dead_letter = 0
             ORDER BY id ASC LIMIT ?3",
        )?;
        let ids: Vec<i64> = stmt
            .query_map(params![queue.as_str(), now, max as i64], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();

        let mut deliveries = Vec::with_capacity(ids.len());
        for id in ids {
            let claimed = conn.execute(
                "UPDATE queue_messages SET status = 'claimed' WHERE id = ?1 AND status = 'ready'",
                params![id],
            )?;
            if claimed == 0 {
                continue; // another consumer claimed it first
            }
            let (payload, attempts): (String, i64) = conn.query_row(
                "SELECT payload, attempts FROM queue_messages WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            let payload: M = serde_json::from_str(&payload)?;
            deliveries.push(Delivery {
                id,
                queue,
                attempts: attempts as u32,
                payload,
            });
        }
        Ok(deliveries)
    }

    async fn ack(&self, delivery: &Delivery<M>) -> Result<()> {
        let conn = rusqlite::Connection::open(&self.db_path)?;
        conn.execute("DELETE FROM queue_messages WHERE id = ?1", params![delivery.id])?;
        Ok(())
    }

    async fn retry(&self, delivery: &Delivery<M>, max_retries: u32) -> Result<()> {
        let conn = rusqlite::Connection::open(&self.db_path)?;
        let attempts = delivery.attempts + 1;
        if attempts >= max_retries {
            conn.execute(
                "UPDATE queue_messages SET status = 'ready', attempts = ?2, dead_letter = 1
                 WHERE id = ?1",
                params![delivery.id, attempts],
            )?;
            return Ok(());
        }
        let delay_secs = 2i64.saturating_pow(attempts.min(10));
        let visible_at = (Utc::now() + chrono::Duration::seconds(delay_secs)).to_rfc3339();
        conn.execute(
            "UPDATE queue_messages SET status = 'ready', attempts = ?2, visible_at = ?3
             WHERE id = ?1",
            params![delivery.id, attempts, visible_at],
        )?;
        Ok(())
    }
}

impl<M> SqliteQueue<M> {
    /// Non-dead-lettered, not-yet-acked message count for `/health/queue`.
    pub fn pending_count(&self, queue: QueueName) -> Result<i64> {
        let conn = rusqlite::Connection::open(&self.db_path)?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM queue_messages WHERE queue_name = ?1 AND dead_letter = 0",
            params![queue.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

impl<M: Serialize> SqliteQueue<M> {
    async fn send_chunk(&self, queue: QueueName, messages: &[M]) -> Result<()> {
        let mut conn = rusqlite::Connection::open(&self.db_path)?;
        let now = Utc::now().to_rfc3339();
        let tx = conn.transaction()?;
        for message in messages {
            let payload = serde_json::to_string(message)?;
            tx.execute(
                "INSERT INTO queue_messages (queue_name, payload, status, attempts, visible_at, created_at)
                 VALUES (?1, ?2, 'ready', 0, ?3, ?3)",
                params![queue.as_str(), payload, now],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Msg {
        n: u32,
    }

    #[tokio::test]
    async fn send_then_receive_then_ack() {
        let dir = tempfile::tempdir().unwrap();
        let queue: SqliteQueue<Msg> = SqliteQueue::new(&dir.path().join("q.sqlite3")).unwrap();
        queue.send(QueueName::Ocr, &Msg { n: 1 }).await.unwrap();

        let deliveries = queue.receive(QueueName::Ocr, 10).await.unwrap();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].payload, Msg { n: 1 });

        queue.ack(&deliveries[0]).await.unwrap();
        let remaining = queue.receive(QueueName::Ocr, 10).await.unwrap();
        assert!(remaining.is_empty());
    }

    #[tokio::test]
    async fn retry_past_max_dead_letters_without_redelivery() {
        let dir = tempfile::tempdir().unwrap();
        let queue: SqliteQueue<Msg> = SqliteQueue::new(&dir.path().join("q.sqlite3")).unwrap();
        queue.send(QueueName::Ocr, &Msg { n: 7 }).await.unwrap();
        let delivery = queue.receive(QueueName::Ocr, 1).await.unwrap().remove(0);

        queue.retry(&delivery, 1).await.unwrap();

        let redelivered = queue.receive(QueueName::Ocr, 10).await.unwrap();
        assert!(redelivered.is_empty(), "dead-lettered message must not be redelivered");
    }

    #[tokio::test]
    async fn a_message_is_not_delivered_to_two_consumers() {
        let dir = tempfile::tempdir().unwrap();
        let queue: SqliteQueue<Msg> = SqliteQueue::new(&dir.path().join("q.sqlite3")).unwrap();
        queue.send(QueueName::Ocr, &Msg { n: 3 }).await.unwrap();

        let first = queue.receive(QueueName::Ocr, 10).await.unwrap();
        let second = queue.receive(QueueName::Ocr, 10).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 0);
    }
}
