//! Store (C1): persists all pipeline state and provides atomic claim/update
//! primitives. SQLite via `rusqlite`, WAL-tuned, with a generic retry helper
//! for lock contention.

mod analysis;
mod crawl_jobs;
mod gazette_crawls;
mod gazette_registry;
mod models;
mod ocr;
mod telemetry;
mod webhooks;

pub use analysis::AnalysisRepository;
pub use crawl_jobs::CrawlJobRepository;
pub use gazette_crawls::GazetteCrawlRepository;
pub use gazette_registry::{ClaimOutcome, GazetteRegistryRepository};
pub use models::*;
pub use ocr::OcrRepository;
pub use telemetry::TelemetryRepository;
pub use webhooks::WebhookRepository;

use std::path::Path;
use std::thread;
use std::time::Duration;

use rusqlite::Connection;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Open a connection tuned for many concurrent readers and one writer.
pub fn connect(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 30000;
        PRAGMA cache_size = -64000;
        PRAGMA mmap_size = 268435456;
        PRAGMA temp_store = MEMORY;
        "#,
    )?;
    Ok(conn)
}

/// Create every table the ten-entity data model names ("ten tables"),
/// returning the list of tables present afterwards.
pub fn run_all_migrations(db_path: &Path) -> Result<Vec<String>> {
    let conn = connect(db_path)?;
    conn.execute_batch(SCHEMA)?;

    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let tables: Vec<String> = stmt
        .query_map([], |row| row.get(0))?
        .filter_map(|r| r.ok())
        .collect();
    Ok(tables)
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS crawl_jobs (
    id TEXT PRIMARY KEY,
    job_type TEXT NOT NULL,
    status TEXT NOT NULL,
    total_cities INTEGER NOT NULL,
    completed_cities INTEGER NOT NULL DEFAULT 0,
    failed_cities INTEGER NOT NULL DEFAULT 0,
    start_date TEXT NOT NULL,
    end_date TEXT NOT NULL,
    platform_filter TEXT,
    created_at TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT,
    metadata TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_crawl_jobs_status_created ON crawl_jobs(status, created_at);

CREATE TABLE IF NOT EXISTS gazette_registry (
    id TEXT PRIMARY KEY,
    publication_date TEXT NOT NULL,
    edition_number TEXT,
    pdf_url TEXT NOT NULL UNIQUE,
    pdf_object_key TEXT,
    is_extra_edition INTEGER NOT NULL DEFAULT 0,
    power TEXT NOT NULL,
    created_at TEXT NOT NULL,
    status TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}'
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_gazette_registry_pdf_url ON gazette_registry(pdf_url);

CREATE TABLE IF NOT EXISTS gazette_crawls (
    id TEXT PRIMARY KEY,
    job_id TEXT NOT NULL UNIQUE,
    territory_id TEXT NOT NULL,
    spider_id TEXT NOT NULL,
    gazette_id TEXT NOT NULL REFERENCES gazette_registry(id),
    analysis_result_id TEXT,
    status TEXT NOT NULL,
    scraped_at TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_gazette_crawls_territory_date
    ON gazette_crawls(territory_id, scraped_at);
CREATE INDEX IF NOT EXISTS idx_gazette_crawls_gazette ON gazette_crawls(gazette_id);

CREATE TABLE IF NOT EXISTS ocr_jobs (
    id TEXT PRIMARY KEY,
    document_id TEXT NOT NULL REFERENCES gazette_registry(id),
    status TEXT NOT NULL,
    pages_processed INTEGER,
    processing_time_ms INTEGER,
    text_length INTEGER,
    error_code TEXT,
    error_message TEXT,
    created_at TEXT NOT NULL,
    completed_at TEXT,
    metadata TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_ocr_jobs_document ON ocr_jobs(document_id);
CREATE UNIQUE INDEX IF NOT EXISTS idx_ocr_jobs_document_msg
    ON ocr_jobs(document_id, json_extract(metadata, '$.jobId'));

CREATE TABLE IF NOT EXISTS ocr_results (
    id TEXT PRIMARY KEY,
    document_id TEXT NOT NULL REFERENCES gazette_registry(id),
    extracted_text TEXT NOT NULL,
    text_length INTEGER NOT NULL,
    confidence_score REAL,
    language_detected TEXT NOT NULL,
    processing_method TEXT NOT NULL,
    created_at TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_ocr_results_document ON ocr_results(document_id);

CREATE TABLE IF NOT EXISTS analysis_results (
    id TEXT PRIMARY KEY,
    job_id TEXT NOT NULL UNIQUE,
    gazette_id TEXT NOT NULL REFERENCES gazette_registry(id),
    territory_id TEXT NOT NULL,
    publication_date TEXT NOT NULL,
    total_findings INTEGER NOT NULL DEFAULT 0,
    high_confidence_findings INTEGER NOT NULL DEFAULT 0,
    categories TEXT NOT NULL DEFAULT '[]',
    keywords TEXT NOT NULL DEFAULT '[]',
    findings TEXT NOT NULL DEFAULT '[]',
    summary TEXT NOT NULL DEFAULT '',
    processing_time_ms INTEGER,
    analyzed_at TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}'
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_analysis_results_job ON analysis_results(job_id);
CREATE INDEX IF NOT EXISTS idx_analysis_results_territory_date
    ON analysis_results(territory_id, publication_date);

CREATE TABLE IF NOT EXISTS concurso_findings (
    id TEXT PRIMARY KEY,
    analysis_job_id TEXT NOT NULL,
    gazette_id TEXT NOT NULL,
    territory_id TEXT NOT NULL,
    document_type TEXT,
    confidence REAL NOT NULL,
    orgao TEXT,
    edital_numero TEXT,
    total_vagas INTEGER,
    cargos TEXT NOT NULL DEFAULT '[]',
    datas TEXT NOT NULL DEFAULT '[]',
    taxas TEXT NOT NULL DEFAULT '[]',
    banca TEXT,
    extraction_method TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_concurso_findings_territory
    ON concurso_findings(territory_id, created_at);

CREATE TABLE IF NOT EXISTS webhook_deliveries (
    id TEXT PRIMARY KEY,
    notification_id TEXT NOT NULL UNIQUE,
    subscription_id TEXT NOT NULL,
    analysis_job_id TEXT,
    event_type TEXT NOT NULL,
    status TEXT NOT NULL,
    status_code INTEGER,
    attempts INTEGER NOT NULL DEFAULT 0,
    response_body TEXT,
    error_message TEXT,
    created_at TEXT NOT NULL,
    delivered_at TEXT,
    next_retry_at TEXT
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_webhook_deliveries_notification
    ON webhook_deliveries(notification_id);

CREATE TABLE IF NOT EXISTS error_logs (
    id TEXT PRIMARY KEY,
    worker TEXT NOT NULL,
    operation TEXT NOT NULL,
    severity TEXT NOT NULL,
    context TEXT NOT NULL DEFAULT '{}',
    resolved INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_error_logs_unresolved ON error_logs(created_at)
    WHERE resolved = 0;

CREATE TABLE IF NOT EXISTS telemetry_events (
    id TEXT PRIMARY KEY,
    step TEXT NOT NULL,
    status TEXT NOT NULL,
    context TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_telemetry_events_step ON telemetry_events(step, created_at);
"#;

/// Parse an RFC3339 timestamp, defaulting to the Unix epoch on error.
pub fn parse_datetime(s: &str) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .unwrap_or(chrono::DateTime::UNIX_EPOCH)
}

pub fn parse_datetime_opt(s: Option<String>) -> Option<chrono::DateTime<chrono::Utc>> {
    s.and_then(|s| {
        chrono::DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .ok()
    })
}

pub fn to_option<T>(result: rusqlite::Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Run a fallible SQLite operation with exponential backoff on lock
/// contention (5 attempts, 100ms base, doubling), the low-level helper
/// underneath the stage-level business retry helper in [`crate::queue`].
pub fn with_retry<T, F>(mut operation: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let max_retries = 5;
    let mut delay_ms = 100;

    for attempt in 0..max_retries {
        match operation() {
            Ok(result) => return Ok(result),
            Err(StoreError::Database(ref e)) => {
                let is_lock_error = e.to_string().contains("database is locked")
                    || e.to_string().contains("SQLITE_BUSY")
                    || e.to_string().contains("SQLITE_LOCKED");

                if is_lock_error && attempt < max_retries - 1 {
                    tracing::debug!(
                        "database locked, retrying in {}ms (attempt {}/{})",
                        delay_ms,
                        attempt + 1,
                        max_retries
                    );
                    thread::sleep(Duration::from_millis(delay_ms));
                    delay_ms *= 2;
                    continue;
                }
                return Err(StoreError::Database(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(
                        e.sqlite_error_code()
                            .unwrap_or(rusqlite::ffi::ErrorCode::Unknown) as i32,
                    ),
                    Some(e.to_string()),
                )));
            }
            Err(e) => return Err(e),
        }
    }

    operation()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_create_all_ten_tables() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.sqlite3");
        let tables = run_all_migrations(&db_path).unwrap();
        for expected in [
            "crawl_jobs",
            "gazette_registry",
            "gazette_crawls",
            "ocr_jobs",
            "ocr_results",
            "analysis_results",
            "concurso_findings",
            "webhook_deliveries",
            "error_logs",
            "telemetry_events",
        ] {
            assert!(tables.iter().any(|t| t == expected), "missing {expected}");
        }
    }

    #[test]
    fn parse_datetime_defaults_to_epoch_on_garbage() {
        let dt = parse_datetime("not-a-date");
        assert_eq!(dt, chrono::DateTime::UNIX_EPOCH);
    }
}
