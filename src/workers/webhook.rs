//! Webhook worker (C4d): resolves the subscription, delivers the
//! notification, classifies the response, and records the delivery,
//! leaving the retry-vs-dead-letter call to the shared `finish_delivery`
//! helper via the error's `Classify` impl.

use std::time::Instant;

use chrono::{Duration, Utc};
use serde_json::json;
use thiserror::Error;

use crate::error::{Classify, ErrorClass};
use crate::queue::WebhookMessage;
use crate::store::{Severity, StoreError, TelemetryRepository, WebhookDeliveryStatus, WebhookRepository};
use crate::webhook_client::{DeliveryOutcome, SubscriptionLookupError, SubscriptionRegistry, WebhookClient};

use super::log_step_safe;

#[derive(Debug, Error)]
pub enum WebhookWorkerError {
    #[error("subscription lookup failed: {0}")]
    SubscriptionLookup(#[from] SubscriptionLookupError),
    #[error("delivery failed, retriable: {0}")]
    Retriable(String),
    #[error("delivery rejected by subscriber: {0}")]
    PermanentFailure(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl Classify for WebhookWorkerError {
    fn classify(&self) -> ErrorClass {
        match self {
            WebhookWorkerError::SubscriptionLookup(_) => ErrorClass::Transient,
            WebhookWorkerError::Retriable(_) => ErrorClass::Transient,
            WebhookWorkerError::PermanentFailure(_) => ErrorClass::PermanentForItem,
            WebhookWorkerError::Store(_) => ErrorClass::Transient,
        }
    }
}

pub struct WebhookWorker {
    subscriptions: std::sync::Arc<dyn SubscriptionRegistry>,
    deliveries: WebhookRepository,
    telemetry: TelemetryRepository,
    client: WebhookClient,
    max_attempts: u32,
}

impl WebhookWorker {
    pub fn new(
        subscriptions: std::sync::Arc<dyn SubscriptionRegistry>,
        deliveries: WebhookRepository,
        telemetry: TelemetryRepository,
        max_attempts: u32,
    ) -> Self {
        Self {
            subscriptions,
            deliveries,
            telemetry,
            client: WebhookClient::new(),
            max_attempts,
        }
    }

    /// Returns `Ok(())` on success or a terminal/dead-lettered failure (both
    /// acked by the caller); returns `Err` only for the retriable case, so
    /// `Classify` alone decides ack vs retry in `workers::finish_delivery`.
    pub async fn process_one(&self, msg: &WebhookMessage) -> Result<(), WebhookWorkerError> {
        let start = Instant::now();
        log_step_safe(
            &self.telemetry,
            "webhook_start",
            "started",
            json!({ "messageId": msg.message_id, "subscriptionId": msg.subscription_id }),
        );

        let subscription = match self.subscriptions.find(&msg.subscription_id).await? {
            Some(s) if s.active => s,
            _ => {
                log_step_safe(
                    &self.telemetry,
                    "webhook_end",
                    "skipped_inactive_or_missing_subscription",
                    json!({ "subscriptionId": msg.subscription_id }),
                );
                return Ok(());
            }
        };

        let delivery_row = self.deliveries.find_or_create(
            &msg.message_id,
            &msg.subscription_id,
            msg.metadata.crawl_job_id.as_deref(),
            "analysis.completed",
        )?;

        let attempt_number = delivery_row.attempts as u32 + 1;
        let attempt = self.client.deliver(&subscription, &msg.notification, attempt_number).await;

        let status = match attempt.outcome {
            DeliveryOutcome::Success => WebhookDeliveryStatus::Sent,
            DeliveryOutcome::Retriable if attempt_number < self.max_attempts => WebhookDeliveryStatus::Retry,
            _ => WebhookDeliveryStatus::Failed,
        };

        let next_retry_at = (status == WebhookDeliveryStatus::Retry)
            .then(|| Utc::now() + retry_delay(attempt_number));

        self.deliveries.record_attempt(
            &msg.message_id,
            status,
            attempt.status_code,
            attempt.response_body.as_deref(),
            attempt.error_message.as_deref(),
            next_retry_at,
        )?;

        log_step_safe(
            &self.telemetry,
            "webhook_end",
            status.as_str(),
            json!({
                "messageId": msg.message_id,
                "statusCode": attempt.status_code,
                "deliveryTimeMs": attempt.delivery_time_ms,
                "executionTimeMs": start.elapsed().as_millis() as i64,
            }),
        );

        match attempt.outcome {
            DeliveryOutcome::Success => Ok(()),
            DeliveryOutcome::PermanentFailure => {
                self.telemetry.log_error(
                    "webhook",
                    "deliver",
                    Severity::Error,
                    json!({ "messageId": msg.message_id, "statusCode": attempt.status_code }),
                )?;
                Err(WebhookWorkerError::PermanentFailure(format!(
                    "status {:?}",
                    attempt.status_code
                )))
            }
            DeliveryOutcome::Retriable if attempt_number >= self.max_attempts => {
                self.telemetry.log_error(
                    "webhook",
                    "deliver",
                    Severity::Error,
                    json!({ "messageId": msg.message_id, "attempts": attempt_number, "deadLettered": true }),
                )?;
                Err(WebhookWorkerError::PermanentFailure("retry budget exhausted".to_string()))
            }
            DeliveryOutcome::Retriable => Err(WebhookWorkerError::Retriable(
                attempt.error_message.unwrap_or_else(|| "non-2xx/5xx response".to_string()),
            )),
        }
    }
}

const RETRY_BASE_DELAY_SECS: i64 = 30;

/// Exponential backoff for `WebhookDelivery.nextRetryAt`: 30s, 60s, 120s, ...
fn retry_delay(attempt_number: u32) -> Duration {
    let exponent = attempt_number.saturating_sub(1).min(6);
    Duration::seconds(RETRY_BASE_DELAY_SECS * (1i64 << exponent))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::run_all_migrations;
    use crate::webhook_client::{AuthMethod, Subscription};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct FixedRegistry(Option<Subscription>);

    #[async_trait]
    impl SubscriptionRegistry for FixedRegistry {
        async fn find(&self, _id: &str) -> Result<Option<Subscription>, SubscriptionLookupError> {
            Ok(self.0.clone())
        }
    }

    fn worker(sub: Option<Subscription>) -> (tempfile::TempDir, WebhookWorker) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.sqlite3");
        run_all_migrations(&db_path).unwrap();
        let worker = WebhookWorker::new(
            Arc::new(FixedRegistry(sub)),
            WebhookRepository::new(&db_path),
            TelemetryRepository::new(&db_path),
            3,
        );
        (dir, worker)
    }

    fn message() -> WebhookMessage {
        WebhookMessage {
            message_id: format!("webhookmsg-{}", uuid::Uuid::new_v4()),
            subscription_id: "sub-1".to_string(),
            notification: json!({ "ok": true }),
            attempts: 0,
            metadata: Default::default(),
        }
    }

    #[tokio::test]
    async fn missing_subscription_is_acked_without_delivery() {
        let (_dir, worker) = worker(None);
        let result = worker.process_one(&message()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn inactive_subscription_is_acked_without_delivery() {
        let sub = Subscription {
            id: "sub-1".to_string(),
            endpoint: "https://example.invalid/hook".to_string(),
            active: false,
            auth: AuthMethod::None,
        };
        let (_dir, worker) = worker(Some(sub));
        let result = worker.process_one(&message()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_retried_and_stamps_next_retry_at() {
        let sub = Subscription {
            id: "sub-1".to_string(),
            endpoint: "http://127.0.0.1:9/hook".to_string(),
            active: true,
            auth: AuthMethod::None,
        };
        let (_dir, worker) = worker(Some(sub));
        let msg = message();

        let result = worker.process_one(&msg).await;
        assert!(matches!(result, Err(WebhookWorkerError::Retriable(_))));
        assert_eq!(result.unwrap_err().classify(), ErrorClass::Transient);

        let delivery = worker
            .deliveries
            .find_by_notification(&msg.message_id)
            .unwrap()
            .unwrap();
        assert_eq!(delivery.status, WebhookDeliveryStatus::Retry);
        assert_eq!(delivery.attempts, 1);
        assert!(delivery.next_retry_at.is_some());
    }

    #[test]
    fn retry_delay_grows_exponentially_from_the_base() {
        assert_eq!(retry_delay(1), Duration::seconds(30));
        assert_eq!(retry_delay(2), Duration::seconds(60));
        assert_eq!(retry_delay(3), Duration::seconds(120));
    }
}
