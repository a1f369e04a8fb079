//! GazetteRegistry repository, including the OCR claim/CAS protocol:
//! conditional `UPDATE ... WHERE status NOT IN (...)`, not advisory
//! locks, so it behaves correctly under at-least-once delivery with
//! multiple racing workers.

use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::{params, Row};
use uuid::Uuid;

use super::{connect, parse_datetime, to_option, GazetteRegistry, GazetteStatus, Power, Result,
            StoreError};

pub struct GazetteRegistryRepository {
    db_path: PathBuf,
}

/// Outcome of the atomic claim attempt in [`GazetteRegistryRepository::claim_for_ocr`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// CAS succeeded: this caller now owns OCR processing for the row.
    Claimed,
    /// Another worker already holds or completed the claim; caller should
    /// re-read `status` and route accordingly ("retry the message" /
    /// "reuse result").
    AlreadyClaimed,
}

impl GazetteRegistryRepository {
    pub fn new(db_path: &Path) -> Self {
        Self {
            db_path: db_path.to_path_buf(),
        }
    }

    pub fn find_by_pdf_url(&self, pdf_url: &str) -> Result<Option<GazetteRegistry>> {
        let conn = connect(&self.db_path)?;
        to_option(conn.query_row(
            "SELECT id, publication_date, edition_number, pdf_url, pdf_object_key,
                    is_extra_edition, power, created_at, status, metadata
             FROM gazette_registry WHERE pdf_url = ?1",
            params![pdf_url],
            row_to_registry,
        ))
    }

    pub fn get(&self, id: &str) -> Result<Option<GazetteRegistry>> {
        let conn = connect(&self.db_path)?;
        to_option(conn.query_row(
            "SELECT id, publication_date, edition_number, pdf_url, pdf_object_key,
                    is_extra_edition, power, created_at, status, metadata
             FROM gazette_registry WHERE id = ?1",
            params![id],
            row_to_registry,
        ))
    }

    /// Insert a brand-new registry row at `status=pending`. `pdf_url` is a
    /// unique key; on conflict, returns the existing row
    /// instead (race survivor, mirroring the Crawl worker's "Lookup
    /// existing... if none, insert" branch needing to be safe when two
    /// crawl messages discover the same candidate concurrently).
    pub fn find_or_insert(
        &self,
        publication_date: chrono::DateTime<Utc>,
        edition_number: Option<String>,
        pdf_url: &str,
        is_extra_edition: bool,
        power: Power,
    ) -> Result<(GazetteRegistry, bool)> {
        let conn = connect(&self.db_path)?;
        let id = format!("gaz-{}", Uuid::new_v4());
        let now = Utc::now();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO gazette_registry
                (id, publication_date, edition_number, pdf_url, is_extra_edition, power,
                 created_at, status, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending', '{}')",
            params![
                id,
                publication_date.to_rfc3339(),
                edition_number,
                pdf_url,
                is_extra_edition as i64,
                power.as_str(),
                now.to_rfc3339(),
            ],
        )?;

        let row = self
            .find_by_pdf_url(pdf_url)?
            .ok_or_else(|| StoreError::NotFound(pdf_url.to_string()))?;
        Ok((row, inserted > 0))
    }

    /// Atomic compare-and-set: move `status` from `{pending, uploaded}` to
    /// `ocr_processing`, but only if it isn't already claimed or finished.
    /// Implements "update registry status from any of {pending, uploaded}
    /// to ocr_processing only if current status is not already
    /// {ocr_processing, ocr_retrying, ocr_success}".
    pub fn claim_for_ocr(&self, id: &str) -> Result<ClaimOutcome> {
        let conn = connect(&self.db_path)?;
        let changed = conn.execute(
            "UPDATE gazette_registry
             SET status = 'ocr_processing'
             WHERE id = ?1
               AND status IN ('pending', 'uploaded')",
            params![id],
        )?;
        if changed > 0 {
            Ok(ClaimOutcome::Claimed)
        } else {
            Ok(ClaimOutcome::AlreadyClaimed)
        }
    }

    /// Re-drive an `ocr_failure` row into `ocr_retrying` ("treat as
    /// intentional retry").
    pub fn mark_retrying(&self, id: &str) -> Result<()> {
        let conn = connect(&self.db_path)?;
        conn.execute(
            "UPDATE gazette_registry SET status = 'ocr_retrying' WHERE id = ?1",
            params![id],
        )?;
        Ok(())
    }

    pub fn mark_processing(&self, id: &str) -> Result<()> {
        let conn = connect(&self.db_path)?;
        conn.execute(
            "UPDATE gazette_registry SET status = 'ocr_processing' WHERE id = ?1",
            params![id],
        )?;
        Ok(())
    }

    pub fn mark_ocr_success(&self, id: &str, pdf_object_key: Option<&str>) -> Result<()> {
        let conn = connect(&self.db_path)?;
        conn.execute(
            "UPDATE gazette_registry
             SET status = 'ocr_success',
                 pdf_object_key = COALESCE(?2, pdf_object_key)
             WHERE id = ?1",
            params![id, pdf_object_key],
        )?;
        Ok(())
    }

    pub fn mark_ocr_failure(&self, id: &str) -> Result<()> {
        let conn = connect(&self.db_path)?;
        conn.execute(
            "UPDATE gazette_registry SET status = 'ocr_failure' WHERE id = ?1",
            params![id],
        )?;
        Ok(())
    }

    /// Total registered gazettes, for the Dispatcher's `/stats` endpoint.
    pub fn count_all(&self) -> Result<i64> {
        let conn = connect(&self.db_path)?;
        Ok(conn.query_row("SELECT COUNT(*) FROM gazette_registry", [], |row| row.get(0))?)
    }
}

fn row_to_registry(row: &Row) -> rusqlite::Result<GazetteRegistry> {
    let power_str: String = row.get(6)?;
    let status_str: String = row.get(8)?;
    let metadata_str: String = row.get(9)?;
    Ok(GazetteRegistry {
        id: row.get(0)?,
        publication_date: parse_datetime(&row.get::<_, String>(1)?),
        edition_number: row.get(2)?,
        pdf_url: row.get(3)?,
        pdf_object_key: row.get(4)?,
        is_extra_edition: row.get::<_, i64>(5)? != 0,
        power: Power::from_str(&power_str).unwrap_or(Power::Executive),
        created_at: parse_datetime(&row.get::<_, String>(7)?),
        status: GazetteStatus::from_str(&status_str).unwrap_or(GazetteStatus::Pending),
        metadata: serde_json::from_str(&metadata_str).unwrap_or(serde_json::json!({})),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::run_all_migrations;

    fn repo() -> (tempfile::TempDir, GazetteRegistryRepository) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.sqlite3");
        run_all_migrations(&db_path).unwrap();
        let repo = GazetteRegistryRepository::new(&db_path);
        (dir, repo)
    }

    #[test]
    fn find_or_insert_is_idempotent_on_pdf_url() {
        let (_dir, repo) = repo();
        let (first, inserted_first) = repo
            .find_or_insert(Utc::now(), None, "https://example/gaz.pdf", false, Power::Executive)
            .unwrap();
        let (second, inserted_second) = repo
            .find_or_insert(Utc::now(), None, "https://example/gaz.pdf", false, Power::Executive)
            .unwrap();
        assert!(inserted_first);
        assert!(!inserted_second);
        assert_eq!(first.id, second.id);
    }

    #[test]
    fn claim_for_ocr_only_succeeds_once() {
        let (_dir, repo) = repo();
        let (row, _) = repo
            .find_or_insert(Utc::now(), None, "https://example/gaz2.pdf", false, Power::Executive)
            .unwrap();

        let first = repo.claim_for_ocr(&row.id).unwrap();
        let second = repo.claim_for_ocr(&row.id).unwrap();

        assert_eq!(first, ClaimOutcome::Claimed);
        assert_eq!(second, ClaimOutcome::AlreadyClaimed);
    }

    #[test]
    fn claim_refuses_once_already_succeeded() {
        let (_dir, repo) = repo();
        let (row, _) = repo
            .find_or_insert(Utc::now(), None, "https://example/gaz3.pdf", false, Power::Executive)
            .unwrap();
        repo.claim_for_ocr(&row.id).unwrap();
        repo.mark_ocr_success(&row.id, None).unwrap();

        let outcome = repo.claim_for_ocr(&row.id).unwrap();
        assert_eq!(outcome, ClaimOutcome::AlreadyClaimed);
    }
}
