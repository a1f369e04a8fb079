//! AnalysisResult and ConcursoFinding repository.

use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::{params, Row};
use uuid::Uuid;

use super::{connect, parse_datetime, to_option, AnalysisResult, ConcursoFinding, Finding, Result,
            StoreError};

pub struct AnalysisRepository {
    db_path: PathBuf,
}

impl AnalysisRepository {
    pub fn new(db_path: &Path) -> Self {
        Self {
            db_path: db_path.to_path_buf(),
        }
    }

    pub fn find_by_job_id(&self, job_id: &str) -> Result<Option<AnalysisResult>> {
        let conn = connect(&self.db_path)?;
        to_option(conn.query_row(
            "SELECT id, job_id, gazette_id, territory_id, publication_date, total_findings,
                    high_confidence_findings, categories, keywords, findings, summary,
                    processing_time_ms, analyzed_at, metadata
             FROM analysis_results WHERE job_id = ?1",
            params![job_id],
            row_to_analysis,
        ))
    }

    /// Scan candidate rows by `(territoryId, gazetteId)` and compare
    /// `metadata.configSignature.configHash`; used as the fallback when the
    /// dedup cache key misses.
    pub fn find_by_territory_gazette_config(
        &self,
        territory_id: &str,
        gazette_id: &str,
        config_hash: &str,
    ) -> Result<Option<AnalysisResult>> {
        let conn = connect(&self.db_path)?;
        let mut stmt = conn.prepare(
            "SELECT id, job_id, gazette_id, territory_id, publication_date, total_findings,
                    high_confidence_findings, categories, keywords, findings, summary,
                    processing_time_ms, analyzed_at, metadata
             FROM analysis_results WHERE territory_id = ?1 AND gazette_id = ?2",
        )?;
        let mut rows = stmt.query_map(params![territory_id, gazette_id], row_to_analysis)?;
        while let Some(row) = rows.next() {
            let result = row?;
            let hash = result
                .metadata
                .get("configSignature")
                .and_then(|s| s.get("configHash"))
                .and_then(|v| v.as_str());
            if hash == Some(config_hash) {
                return Ok(Some(result));
            }
        }
        Ok(None)
    }

    /// Upsert keyed by the deterministic `jobId`: the unique constraint
    /// makes repeated submissions of the same
    /// `(territoryId, gazetteId, configHash)` a no-op.
    pub fn upsert(&self, result: &AnalysisResult) -> Result<AnalysisResult> {
        let conn = connect(&self.db_path)?;
        let id = format!("analysis-{}", Uuid::new_v4());
        conn.execute(
            "INSERT INTO analysis_results
                (id, job_id, gazette_id, territory_id, publication_date, total_findings,
                 high_confidence_findings, categories, keywords, findings, summary,
                 processing_time_ms, analyzed_at, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
             ON CONFLICT(job_id) DO NOTHING",
            params![
                id,
                result.job_id,
                result.gazette_id,
                result.territory_id,
                result.publication_date.to_rfc3339(),
                result.total_findings,
                result.high_confidence_findings,
                serde_json::to_string(&result.categories)?,
                serde_json::to_string(&result.keywords)?,
                serde_json::to_string(&result.findings)?,
                result.summary,
                result.processing_time_ms,
                result.analyzed_at.to_rfc3339(),
                serde_json::to_string(&result.metadata)?,
            ],
        )?;
        self.find_by_job_id(&result.job_id)?
            .ok_or_else(|| StoreError::NotFound(result.job_id.clone()))
    }

    pub fn insert_concurso_finding(&self, finding: &ConcursoFinding) -> Result<()> {
        let conn = connect(&self.db_path)?;
        conn.execute(
            "INSERT INTO concurso_findings
                (id, analysis_job_id, gazette_id, territory_id, document_type, confidence,
                 orgao, edital_numero, total_vagas, cargos, datas, taxas, banca,
                 extraction_method, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                finding.id,
                finding.analysis_job_id,
                finding.gazette_id,
                finding.territory_id,
                finding.document_type,
                finding.confidence,
                finding.orgao,
                finding.edital_numero,
                finding.total_vagas,
                serde_json::to_string(&finding.cargos)?,
                serde_json::to_string(&finding.datas)?,
                serde_json::to_string(&finding.taxas)?,
                finding.banca,
                finding.extraction_method,
                finding.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Re-query the true stored count rather than assuming insert success
    /// ("storage success or failure is observed from the store... not
    /// assumed").
    pub fn count_concurso_findings(&self, analysis_job_id: &str) -> Result<i64> {
        let conn = connect(&self.db_path)?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM concurso_findings WHERE analysis_job_id = ?1",
            params![analysis_job_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Bounded recent-window scan for finding dedup ("store-backed
    /// recent-window scan, bounded to 1000 rows per territory").
    pub fn recent_concurso_findings(
        &self,
        territory_id: &str,
        since: chrono::DateTime<Utc>,
    ) -> Result<Vec<ConcursoFinding>> {
        let conn = connect(&self.db_path)?;
        let mut stmt = conn.prepare(
            "SELECT id, analysis_job_id, gazette_id, territory_id, document_type, confidence,
                    orgao, edital_numero, total_vagas, cargos, datas, taxas, banca,
                    extraction_method, created_at
             FROM concurso_findings
             WHERE territory_id = ?1 AND created_at >= ?2
             ORDER BY created_at DESC
             LIMIT 1000",
        )?;
        let rows = stmt
            .query_map(params![territory_id, since.to_rfc3339()], row_to_concurso)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

fn row_to_analysis(row: &Row) -> rusqlite::Result<AnalysisResult> {
    let categories: String = row.get(7)?;
    let keywords: String = row.get(8)?;
    let findings: String = row.get(9)?;
    let metadata: String = row.get(13)?;
    Ok(AnalysisResult {
        id: row.get(0)?,
        job_id: row.get(1)?,
        gazette_id: row.get(2)?,
        territory_id: row.get(3)?,
        publication_date: parse_datetime(&row.get::<_, String>(4)?),
        total_findings: row.get(5)?,
        high_confidence_findings: row.get(6)?,
        categories: serde_json::from_str(&categories).unwrap_or_default(),
        keywords: serde_json::from_str(&keywords).unwrap_or_default(),
        findings: serde_json::from_str::<Vec<Finding>>(&findings).unwrap_or_default(),
        summary: row.get(10)?,
        processing_time_ms: row.get(11)?,
        analyzed_at: parse_datetime(&row.get::<_, String>(12)?),
        metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::json!({})),
    })
}

fn row_to_concurso(row: &Row) -> rusqlite::Result<ConcursoFinding> {
    let cargos: String = row.get(9)?;
    let datas: String = row.get(10)?;
    let taxas: String = row.get(11)?;
    Ok(ConcursoFinding {
        id: row.get(0)?,
        analysis_job_id: row.get(1)?,
        gazette_id: row.get(2)?,
        territory_id: row.get(3)?,
        document_type: row.get(4)?,
        confidence: row.get(5)?,
        orgao: row.get(6)?,
        edital_numero: row.get(7)?,
        total_vagas: row.get(8)?,
        cargos: serde_json::from_str(&cargos).unwrap_or_default(),
        datas: serde_json::from_str(&datas).unwrap_or_default(),
        taxas: serde_json::from_str(&taxas).unwrap_or_default(),
        banca: row.get(12)?,
        extraction_method: row.get(13)?,
        created_at: parse_datetime(&row.get::<_, String>(14)?),
    })
}
