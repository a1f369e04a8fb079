//! WebhookDelivery repository.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use uuid::Uuid;

use super::{connect, parse_datetime, parse_datetime_opt, to_option, Result, StoreError,
            WebhookDelivery, WebhookDeliveryStatus};

pub struct WebhookRepository {
    db_path: PathBuf,
}

impl WebhookRepository {
    pub fn new(db_path: &Path) -> Self {
        Self {
            db_path: db_path.to_path_buf(),
        }
    }

    pub fn find_by_notification(&self, notification_id: &str) -> Result<Option<WebhookDelivery>> {
        let conn = connect(&self.db_path)?;
        to_option(conn.query_row(
            "SELECT id, notification_id, subscription_id, analysis_job_id, event_type, status,
                    status_code, attempts, response_body, error_message, created_at,
                    delivered_at, next_retry_at
             FROM webhook_deliveries WHERE notification_id = ?1",
            params![notification_id],
            row_to_delivery,
        ))
    }

    /// Insert the first delivery row for a notification, or return the
    /// existing one, so `attempts` accumulates on a single row per
    /// `notificationId`.
    pub fn find_or_create(
        &self,
        notification_id: &str,
        subscription_id: &str,
        analysis_job_id: Option<&str>,
        event_type: &str,
    ) -> Result<WebhookDelivery> {
        let conn = connect(&self.db_path)?;
        let id = format!("whd-{}", Uuid::new_v4());
        conn.execute(
            "INSERT OR IGNORE INTO webhook_deliveries
                (id, notification_id, subscription_id, analysis_job_id, event_type, status,
                 attempts, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'pending', 0, ?6)",
            params![
                id,
                notification_id,
                subscription_id,
                analysis_job_id,
                event_type,
                Utc::now().to_rfc3339(),
            ],
        )?;
        self.find_by_notification(notification_id)?
            .ok_or_else(|| StoreError::NotFound(notification_id.to_string()))
    }

    pub fn record_attempt(
        &self,
        notification_id: &str,
        status: WebhookDeliveryStatus,
        status_code: Option<i64>,
        response_body: Option<&str>,
        error_message: Option<&str>,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let conn = connect(&self.db_path)?;
        let delivered_at = if status == WebhookDeliveryStatus::Sent {
            Some(Utc::now().to_rfc3339())
        } else {
            None
        };
        conn.execute(
            "UPDATE webhook_deliveries
             SET status = ?2, status_code = ?3, attempts = attempts + 1,
                 response_body = ?4, error_message = ?5, delivered_at = ?6, next_retry_at = ?7
             WHERE notification_id = ?1",
            params![
                notification_id,
                status.as_str(),
                status_code,
                response_body,
                error_message,
                delivered_at,
                next_retry_at.map(|d| d.to_rfc3339()),
            ],
        )?;
        Ok(())
    }
}

fn row_to_delivery(row: &Row) -> rusqlite::Result<WebhookDelivery> {
    let status_str: String = row.get(5)?;
    Ok(WebhookDelivery {
        id: row.get(0)?,
        notification_id: row.get(1)?,
        subscription_id: row.get(2)?,
        analysis_job_id: row.get(3)?,
        event_type: row.get(4)?,
        status: WebhookDeliveryStatus::from_str(&status_str)
            .unwrap_or(WebhookDeliveryStatus::Pending),
        status_code: row.get(6)?,
        attempts: row.get(7)?,
        response_body: row.get(8)?,
        error_message: row.get(9)?,
        created_at: parse_datetime(&row.get::<_, String>(10)?),
        delivered_at: parse_datetime_opt(row.get(11)?),
        next_retry_at: parse_datetime_opt(row.get(12)?),
    })
}
