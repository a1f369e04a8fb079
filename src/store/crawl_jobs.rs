//! CrawlJob repository.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use uuid::Uuid;

use super::{connect, parse_datetime, parse_datetime_opt, to_option, CrawlJob, CrawlJobStatus,
            CrawlJobType, Result, StoreError};

pub struct CrawlJobRepository {
    db_path: PathBuf,
}

impl CrawlJobRepository {
    /// Assumes [`super::run_all_migrations`] has already been run against
    /// `db_path` (the CLI's `migrate`/`serve` entry points do this once at
    /// startup rather than having every repository re-run its own DDL).
    pub fn new(db_path: &Path) -> Self {
        Self {
            db_path: db_path.to_path_buf(),
        }
    }

    pub fn create(
        &self,
        job_type: CrawlJobType,
        total_cities: i64,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
        platform_filter: Option<String>,
    ) -> Result<CrawlJob> {
        let conn = connect(&self.db_path)?;
        let id = format!("job-{}", Uuid::new_v4());
        let now = Utc::now();
        conn.execute(
            "INSERT INTO crawl_jobs
                (id, job_type, status, total_cities, completed_cities, failed_cities,
                 start_date, end_date, platform_filter, created_at, started_at, metadata)
             VALUES (?1, ?2, 'running', ?3, 0, 0, ?4, ?5, ?6, ?7, ?7, '{}')",
            params![
                id,
                job_type.as_str(),
                total_cities,
                start_date.to_rfc3339(),
                end_date.to_rfc3339(),
                platform_filter,
                now.to_rfc3339(),
            ],
        )?;
        self.get(&id)?.ok_or_else(|| StoreError::NotFound(id))
    }

    pub fn get(&self, id: &str) -> Result<Option<CrawlJob>> {
        let conn = connect(&self.db_path)?;
        to_option(conn.query_row(
            "SELECT id, job_type, status, total_cities, completed_cities, failed_cities,
                    start_date, end_date, platform_filter, created_at, started_at,
                    completed_at, metadata
             FROM crawl_jobs WHERE id = ?1",
            params![id],
            row_to_crawl_job,
        ))
    }

    /// Increment completed/failed counters for `job_id` by the given amount
    /// and flip status to `completed`/`failed` once every city has resolved.
    pub fn record_city_outcomes(&self, job_id: &str, completed: i64, failed: i64) -> Result<()> {
        let conn = connect(&self.db_path)?;
        conn.execute(
            "UPDATE crawl_jobs
             SET completed_cities = completed_cities + ?2,
                 failed_cities = failed_cities + ?3
             WHERE id = ?1",
            params![job_id, completed, failed],
        )?;

        let job = self.get(job_id)?.ok_or_else(|| StoreError::NotFound(job_id.to_string()))?;
        if job.is_done() {
            let status = if job.failed_cities >= job.total_cities {
                CrawlJobStatus::Failed
            } else {
                CrawlJobStatus::Completed
            };
            conn.execute(
                "UPDATE crawl_jobs SET status = ?2, completed_at = ?3 WHERE id = ?1",
                params![job_id, status.as_str(), Utc::now().to_rfc3339()],
            )?;
        }
        Ok(())
    }
}

fn row_to_crawl_job(row: &Row) -> rusqlite::Result<CrawlJob> {
    let job_type_str: String = row.get(1)?;
    let status_str: String = row.get(2)?;
    let metadata_str: String = row.get(12)?;
    Ok(CrawlJob {
        id: row.get(0)?,
        job_type: CrawlJobType::from_str(&job_type_str).unwrap_or(CrawlJobType::Manual),
        status: CrawlJobStatus::from_str(&status_str).unwrap_or(CrawlJobStatus::Pending),
        total_cities: row.get(3)?,
        completed_cities: row.get(4)?,
        failed_cities: row.get(5)?,
        start_date: parse_datetime(&row.get::<_, String>(6)?),
        end_date: parse_datetime(&row.get::<_, String>(7)?),
        platform_filter: row.get(8)?,
        created_at: parse_datetime(&row.get::<_, String>(9)?),
        started_at: parse_datetime_opt(row.get(10)?),
        completed_at: parse_datetime_opt(row.get(11)?),
        metadata: serde_json::from_str(&metadata_str).unwrap_or(serde_json::json!({})),
    })
}
