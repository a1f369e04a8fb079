//! GazetteCrawl repository.

use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::{params, Row};
use uuid::Uuid;

use super::{connect, parse_datetime, to_option, GazetteCrawl, GazetteCrawlStatus, Result,
            StoreError};

pub struct GazetteCrawlRepository {
    db_path: PathBuf,
}

impl GazetteCrawlRepository {
    pub fn new(db_path: &Path) -> Self {
        Self {
            db_path: db_path.to_path_buf(),
        }
    }

    /// `job_id` is unique: inserting for the same originating message
    /// twice is a no-op that returns the existing row.
    pub fn create(
        &self,
        job_id: &str,
        territory_id: &str,
        spider_id: &str,
        gazette_id: &str,
        status: GazetteCrawlStatus,
        scraped_at: chrono::DateTime<Utc>,
    ) -> Result<GazetteCrawl> {
        let conn = connect(&self.db_path)?;
        let id = format!("crawl-{}", Uuid::new_v4());
        conn.execute(
            "INSERT OR IGNORE INTO gazette_crawls
                (id, job_id, territory_id, spider_id, gazette_id, status, scraped_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                id,
                job_id,
                territory_id,
                spider_id,
                gazette_id,
                status.as_str(),
                scraped_at.to_rfc3339(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        self.get_by_job_id(job_id)?
            .ok_or_else(|| StoreError::NotFound(job_id.to_string()))
    }

    pub fn get(&self, id: &str) -> Result<Option<GazetteCrawl>> {
        let conn = connect(&self.db_path)?;
        to_option(conn.query_row(
            "SELECT id, job_id, territory_id, spider_id, gazette_id, analysis_result_id,
                    status, scraped_at, created_at
             FROM gazette_crawls WHERE id = ?1",
            params![id],
            row_to_crawl,
        ))
    }

    pub fn get_by_job_id(&self, job_id: &str) -> Result<Option<GazetteCrawl>> {
        let conn = connect(&self.db_path)?;
        to_option(conn.query_row(
            "SELECT id, job_id, territory_id, spider_id, gazette_id, analysis_result_id,
                    status, scraped_at, created_at
             FROM gazette_crawls WHERE job_id = ?1",
            params![job_id],
            row_to_crawl,
        ))
    }

    pub fn list_by_gazette(&self, gazette_id: &str) -> Result<Vec<GazetteCrawl>> {
        let conn = connect(&self.db_path)?;
        let mut stmt = conn.prepare(
            "SELECT id, job_id, territory_id, spider_id, gazette_id, analysis_result_id,
                    status, scraped_at, created_at
             FROM gazette_crawls WHERE gazette_id = ?1",
        )?;
        let rows = stmt
            .query_map(params![gazette_id], row_to_crawl)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn set_status(&self, id: &str, status: GazetteCrawlStatus) -> Result<()> {
        let conn = connect(&self.db_path)?;
        conn.execute(
            "UPDATE gazette_crawls SET status = ?2 WHERE id = ?1",
            params![id, status.as_str()],
        )?;
        Ok(())
    }

    /// Bulk-transition every crawl of a gazette to `failed` ("bulk-update
    /// every GazetteCrawl for that gazette to status=failed").
    pub fn mark_all_failed_for_gazette(&self, gazette_id: &str) -> Result<usize> {
        let conn = connect(&self.db_path)?;
        let changed = conn.execute(
            "UPDATE gazette_crawls SET status = 'failed' WHERE gazette_id = ?1",
            params![gazette_id],
        )?;
        Ok(changed)
    }

    pub fn link_analysis(&self, id: &str, analysis_result_id: &str) -> Result<()> {
        let conn = connect(&self.db_path)?;
        conn.execute(
            "UPDATE gazette_crawls
             SET analysis_result_id = ?2, status = 'success'
             WHERE id = ?1",
            params![id, analysis_result_id],
        )?;
        Ok(())
    }
}

fn row_to_crawl(row: &Row) -> rusqlite::Result<GazetteCrawl> {
    let status_str: String = row.get(6)?;
    Ok(GazetteCrawl {
        id: row.get(0)?,
        job_id: row.get(1)?,
        territory_id: row.get(2)?,
        spider_id: row.get(3)?,
        gazette_id: row.get(4)?,
        analysis_result_id: row.get(5)?,
        status: GazetteCrawlStatus::from_str(&status_str).unwrap_or(GazetteCrawlStatus::Created),
        scraped_at: parse_datetime(&row.get::<_, String>(7)?),
        created_at: parse_datetime(&row.get::<_, String>(8)?),
    })
}
