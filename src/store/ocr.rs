//! OcrJob and OcrResult repository.

use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::{params, Row};
use uuid::Uuid;

use super::{connect, parse_datetime, parse_datetime_opt, to_option, OcrJob, OcrJobStatus,
            OcrResult, Result, StoreError};

pub struct OcrRepository {
    db_path: PathBuf,
}

impl OcrRepository {
    pub fn new(db_path: &Path) -> Self {
        Self {
            db_path: db_path.to_path_buf(),
        }
    }

    /// Insert a processing job keyed by `(document_id, metadata.jobId)`.
    /// On conflict, returns the existing row ("race survivor" behavior).
    pub fn create_processing(&self, document_id: &str, message_job_id: &str) -> Result<OcrJob> {
        let conn = connect(&self.db_path)?;
        let id = format!("ocrjob-{}", Uuid::new_v4());
        let metadata = serde_json::json!({ "jobId": message_job_id }).to_string();
        conn.execute(
            "INSERT OR IGNORE INTO ocr_jobs
                (id, document_id, status, created_at, metadata)
             VALUES (?1, ?2, 'processing', ?3, ?4)",
            params![id, document_id, Utc::now().to_rfc3339(), metadata],
        )?;
        self.find_by_message_job_id(document_id, message_job_id)?
            .ok_or_else(|| StoreError::NotFound(message_job_id.to_string()))
    }

    pub fn find_by_message_job_id(
        &self,
        document_id: &str,
        message_job_id: &str,
    ) -> Result<Option<OcrJob>> {
        let conn = connect(&self.db_path)?;
        to_option(conn.query_row(
            "SELECT id, document_id, status, pages_processed, processing_time_ms, text_length,
                    error_code, error_message, created_at, completed_at, metadata
             FROM ocr_jobs
             WHERE document_id = ?1 AND json_extract(metadata, '$.jobId') = ?2",
            params![document_id, message_job_id],
            row_to_ocr_job,
        ))
    }

    pub fn mark_retry(&self, document_id: &str, message_job_id: &str) -> Result<OcrJob> {
        let conn = connect(&self.db_path)?;
        let id = format!("ocrjob-{}", Uuid::new_v4());
        let metadata = serde_json::json!({ "jobId": message_job_id, "isRetry": true }).to_string();
        conn.execute(
            "INSERT OR IGNORE INTO ocr_jobs
                (id, document_id, status, created_at, metadata)
             VALUES (?1, ?2, 'processing', ?3, ?4)",
            params![id, document_id, Utc::now().to_rfc3339(), metadata],
        )?;
        self.find_by_message_job_id(document_id, message_job_id)?
            .ok_or_else(|| StoreError::NotFound(message_job_id.to_string()))
    }

    pub fn complete(
        &self,
        id: &str,
        status: OcrJobStatus,
        pages_processed: Option<i64>,
        processing_time_ms: Option<i64>,
        text_length: Option<i64>,
        error_code: Option<&str>,
        error_message: Option<&str>,
    ) -> Result<()> {
        let conn = connect(&self.db_path)?;
        conn.execute(
            "UPDATE ocr_jobs
             SET status = ?2, pages_processed = ?3, processing_time_ms = ?4,
                 text_length = ?5, error_code = ?6, error_message = ?7, completed_at = ?8
             WHERE id = ?1",
            params![
                id,
                status.as_str(),
                pages_processed,
                processing_time_ms,
                text_length,
                error_code,
                error_message,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// At most one `OcrResult` per `documentId` with `status=success`.
    /// Storage is retried by the caller with the stage-level backoff
    /// helper; on final failure the caller downgrades the outcome instead
    /// of calling this again.
    pub fn store_result(
        &self,
        document_id: &str,
        extracted_text: &str,
        confidence_score: Option<f64>,
        language_detected: &str,
        processing_method: &str,
    ) -> Result<OcrResult> {
        let conn = connect(&self.db_path)?;
        let id = format!("ocrres-{}", Uuid::new_v4());
        let text_length = extracted_text.chars().count() as i64;
        conn.execute(
            "INSERT INTO ocr_results
                (id, document_id, extracted_text, text_length, confidence_score,
                 language_detected, processing_method, created_at, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, '{}')",
            params![
                id,
                document_id,
                extracted_text,
                text_length,
                confidence_score,
                language_detected,
                processing_method,
                Utc::now().to_rfc3339(),
            ],
        )?;
        self.find_by_document(document_id)?
            .ok_or_else(|| StoreError::NotFound(document_id.to_string()))
    }

    pub fn find_by_document(&self, document_id: &str) -> Result<Option<OcrResult>> {
        let conn = connect(&self.db_path)?;
        to_option(conn.query_row(
            "SELECT id, document_id, extracted_text, text_length, confidence_score,
                    language_detected, processing_method, created_at, metadata
             FROM ocr_results WHERE document_id = ?1
             ORDER BY created_at DESC LIMIT 1",
            params![document_id],
            row_to_ocr_result,
        ))
    }
}

fn row_to_ocr_job(row: &Row) -> rusqlite::Result<OcrJob> {
    let status_str: String = row.get(2)?;
    let metadata_str: String = row.get(10)?;
    Ok(OcrJob {
        id: row.get(0)?,
        document_id: row.get(1)?,
        status: OcrJobStatus::from_str(&status_str).unwrap_or(OcrJobStatus::Pending),
        pages_processed: row.get(3)?,
        processing_time_ms: row.get(4)?,
        text_length: row.get(5)?,
        error_code: row.get(6)?,
        error_message: row.get(7)?,
        created_at: parse_datetime(&row.get::<_, String>(8)?),
        completed_at: parse_datetime_opt(row.get(9)?),
        metadata: serde_json::from_str(&metadata_str).unwrap_or(serde_json::json!({})),
    })
}

fn row_to_ocr_result(row: &Row) -> rusqlite::Result<OcrResult> {
    let metadata_str: String = row.get(8)?;
    Ok(OcrResult {
        id: row.get(0)?,
        document_id: row.get(1)?,
        extracted_text: row.get(2)?,
        text_length: row.get(3)?,
        confidence_score: row.get(4)?,
        language_detected: row.get(5)?,
        processing_method: row.get(6)?,
        created_at: parse_datetime(&row.get::<_, String>(7)?),
        metadata: serde_json::from_str(&metadata_str).unwrap_or(serde_json::json!({})),
    })
}
