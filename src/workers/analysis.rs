//! Analysis worker (C4c): three-level lookup (cache, store, full
//! analysis), deterministic job identity, pluggable analyzer backends,
//! finding deduplication, and concurso per-finding retry-persisted storage
//! with re-query-before-trusting semantics.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::json;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::analyzer::{AnalysisBackend, AnalysisInput};
use crate::cache::{analysis_dedup_key, ocr_key, Cache, ANALYSIS_DEDUP_TTL_SECS};
use crate::config::EnabledAnalyzers;
use crate::dedup::DedupEngine;
use crate::error::{Classify, ErrorClass};
use crate::queue::{with_backoff, AnalysisMessage, WebhookMessage, WebhookMessageMetadata};
use crate::store::{
    AnalysisRepository, AnalysisResult, ConcursoFinding, GazetteCrawlRepository,
    GazetteCrawlStatus, OcrRepository, StoreError, TelemetryRepository,
};

#[derive(Debug, Error)]
pub enum AnalysisWorkerError {
    #[error("missing required field: {0}")]
    MissingField(String),
    #[error("no OCR text available for gazette {0}")]
    NoOcrText(String),
    #[error("analyzer error: {0}")]
    Analyzer(#[from] crate::analyzer::AnalyzerError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl Classify for AnalysisWorkerError {
    fn classify(&self) -> ErrorClass {
        match self {
            AnalysisWorkerError::MissingField(_) => ErrorClass::PermanentForItem,
            AnalysisWorkerError::NoOcrText(_) => ErrorClass::PermanentForItem,
            AnalysisWorkerError::Analyzer(_) => ErrorClass::Transient,
            AnalysisWorkerError::Store(_) => ErrorClass::Transient,
        }
    }
}

pub struct AnalysisWorker {
    analysis_repo: AnalysisRepository,
    ocr_repo: OcrRepository,
    crawl_repo: GazetteCrawlRepository,
    telemetry: TelemetryRepository,
    cache: Arc<dyn Cache>,
    dedup: Arc<DedupEngine>,
    backends: Vec<Arc<dyn AnalysisBackend>>,
    analyzer_settings: EnabledAnalyzers,
    concurso_storage_retries: u32,
    concurso_storage_base_delay: Duration,
}

impl AnalysisWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        analysis_repo: AnalysisRepository,
        ocr_repo: OcrRepository,
        crawl_repo: GazetteCrawlRepository,
        telemetry: TelemetryRepository,
        cache: Arc<dyn Cache>,
        dedup: Arc<DedupEngine>,
        backends: Vec<Arc<dyn AnalysisBackend>>,
        analyzer_settings: EnabledAnalyzers,
        concurso_storage_retries: u32,
        concurso_storage_base_delay: Duration,
    ) -> Self {
        Self {
            analysis_repo,
            ocr_repo,
            crawl_repo,
            telemetry,
            cache,
            dedup,
            backends,
            analyzer_settings,
            concurso_storage_retries,
            concurso_storage_base_delay,
        }
    }

    /// `configHash = H(analyzerConfig || territoryId)`.
    fn config_hash(&self, territory_id: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(serde_json::to_vec(&self.analyzer_settings).unwrap_or_default());
        hasher.update(territory_id.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub async fn process_one(
        &self,
        msg: &AnalysisMessage,
    ) -> Result<Vec<WebhookMessage>, AnalysisWorkerError> {
        let start = Instant::now();
        crate::workers::log_step_safe(
            &self.telemetry,
            "analysis_start",
            "started",
            json!({ "gazetteId": msg.gazette_id }),
        );

        if msg.gazette_id.is_empty() {
            return Err(AnalysisWorkerError::MissingField("gazetteId".to_string()));
        }

        let config_hash = self.config_hash(&msg.territory_id);
        let deterministic_job_id = format!(
            "analysis-{}",
            short_hash(&format!("{}{}{}", msg.territory_id, msg.gazette_id, config_hash))
        );

        // Level A: cache
        let dedup_key = analysis_dedup_key(&msg.territory_id, &msg.gazette_id, &config_hash);
        if let Some(cached) = self.cache.get(&dedup_key).await.unwrap_or(None) {
            if let Ok(result) = serde_json::from_str::<AnalysisResult>(&cached) {
                return self.finish(msg, result, 0).await;
            }
        }

        // Level B: store, scanning by (territoryId, gazetteId) for a matching configHash.
        if let Some(result) = self
            .analysis_repo
            .find_by_territory_gazette_config(&msg.territory_id, &msg.gazette_id, &config_hash)?
        {
            let _ = self
                .cache
                .put(&dedup_key, &serde_json::to_string(&result).unwrap_or_default(), ANALYSIS_DEDUP_TTL_SECS)
                .await;
            return self.finish(msg, result, 0).await;
        }

        // Level C: full analysis, needing the OCR text.
        let text = self.load_ocr_text(&msg.gazette_id, &msg.pdf_url).await?;

        let input = AnalysisInput {
            text: &text,
            territory_id: &msg.territory_id,
            gazette_id: &msg.gazette_id,
        };

        let mut all_findings = Vec::new();
        let mut categories = Vec::new();
        for backend in &self.backends {
            let output = backend.analyze(&input).await?;
            if !output.findings.is_empty() {
                categories.push(backend.name().to_string());
            }
            all_findings.extend(output.findings);
        }

        let extracted_date = Utc::now().to_rfc3339();
        let mut deduped = Vec::new();
        let mut duplicates_removed = 0;
        for finding in all_findings {
            let analysis_repo_ref = if finding.finding_type == "concurso" {
                Some(&self.analysis_repo)
            } else {
                None
            };
            if self.dedup.is_duplicate(&msg.territory_id, &extracted_date, &finding, analysis_repo_ref) {
                duplicates_removed += 1;
                continue;
            }
            self.dedup.record(&msg.territory_id, &extracted_date, &finding);
            deduped.push(finding);
        }

        let high_confidence = deduped.iter().filter(|f| f.confidence >= 0.8).count() as i64;
        let keywords: Vec<String> = deduped
            .iter()
            .filter(|f| f.finding_type == "keyword")
            .filter_map(|f| f.data.get("keyword").and_then(|v| v.as_str()).map(|s| s.to_string()))
            .collect();

        let total_findings = deduped.len() as i64;
        let result = AnalysisResult {
            id: format!("analysisres-{}", uuid::Uuid::new_v4()),
            job_id: deterministic_job_id,
            gazette_id: msg.gazette_id.clone(),
            territory_id: msg.territory_id.clone(),
            publication_date: msg.gazette_date,
            total_findings,
            high_confidence_findings: high_confidence,
            categories,
            keywords,
            findings: deduped,
            summary: format!("{total_findings} findings extracted"),
            processing_time_ms: Some(start.elapsed().as_millis() as i64),
            analyzed_at: Utc::now(),
            metadata: json!({
                "configSignature": { "configHash": config_hash },
                "duplicatesRemoved": duplicates_removed,
            }),
        };

        let persisted = self.analysis_repo.upsert(&result)?;

        let stored_count = self.store_concurso_findings(&persisted).await?;

        let _ = self
            .cache
            .put(&dedup_key, &serde_json::to_string(&persisted).unwrap_or_default(), ANALYSIS_DEDUP_TTL_SECS)
            .await;

        crate::workers::log_step_safe(
            &self.telemetry,
            "analysis_end",
            "completed",
            json!({ "totalFindings": persisted.total_findings, "storedConcursoCount": stored_count }),
        );

        self.finish(msg, persisted, stored_count).await
    }

    async fn load_ocr_text(&self, gazette_id: &str, pdf_url: &str) -> Result<String, AnalysisWorkerError> {
        let key = ocr_key(pdf_url);
        if let Some(cached) = self.cache.get(&key).await.unwrap_or(None) {
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(&cached) {
                if let Some(text) = value.get("extractedText").and_then(|v| v.as_str()) {
                    return Ok(text.to_string());
                }
            }
        }

        let result = self
            .ocr_repo
            .find_by_document(gazette_id)?
            .ok_or_else(|| AnalysisWorkerError::NoOcrText(gazette_id.to_string()))?;

        let payload = json!({ "extractedText": result.extracted_text }).to_string();
        let _ = self.cache.put(&key, &payload, crate::cache::OCR_TTL_SECS).await;
        Ok(result.extracted_text)
    }

    /// Insert each `concurso` finding with per-finding retry, then trust
    /// only the re-queried count.
    async fn store_concurso_findings(&self, result: &AnalysisResult) -> Result<i64, AnalysisWorkerError> {
        for finding in result.findings.iter().filter(|f| f.finding_type == "concurso") {
            let concurso = ConcursoFinding {
                id: format!("concurso-{}", uuid::Uuid::new_v4()),
                analysis_job_id: result.job_id.clone(),
                gazette_id: result.gazette_id.clone(),
                territory_id: result.territory_id.clone(),
                document_type: Some("concurso".to_string()),
                confidence: finding.confidence,
                orgao: finding.data.get("orgao").and_then(|v| v.as_str()).map(|s| s.to_string()),
                edital_numero: finding.data.get("editalNumero").and_then(|v| v.as_str()).map(|s| s.to_string()),
                total_vagas: finding.data.get("totalVagas").and_then(|v| v.as_i64()),
                cargos: vec![],
                datas: vec![],
                taxas: vec![],
                banca: None,
                extraction_method: "regex".to_string(),
                created_at: Utc::now(),
            };

            let insert_result = with_backoff(
                "concurso_finding_store",
                self.concurso_storage_retries,
                self.concurso_storage_base_delay,
                || async { self.analysis_repo.insert_concurso_finding(&concurso) },
            )
            .await;

            if let Err(e) = insert_result {
                self.telemetry.log_error(
                    "analysis",
                    "insert_concurso_finding",
                    crate::store::Severity::Error,
                    json!({ "analysisJobId": result.job_id, "error": e.to_string() }),
                )?;
            }
        }

        Ok(self.analysis_repo.count_concurso_findings(&result.job_id)?)
    }

    async fn finish(
        &self,
        msg: &AnalysisMessage,
        result: AnalysisResult,
        stored_concurso_count: i64,
    ) -> Result<Vec<WebhookMessage>, AnalysisWorkerError> {
        if let Some(crawl_id) = &msg.gazette_crawl_id {
            self.crawl_repo.link_analysis(crawl_id, &result.id)?;
            self.crawl_repo.set_status(crawl_id, GazetteCrawlStatus::Success)?;
        }

        let notification = json!({
            "analysisJobId": result.job_id,
            "gazetteId": result.gazette_id,
            "territoryId": result.territory_id,
            "totalFindings": result.total_findings,
            "storedConcursoCount": stored_concurso_count,
        });

        Ok(vec![WebhookMessage {
            message_id: format!("webhookmsg-{}", uuid::Uuid::new_v4()),
            subscription_id: crate::webhook_client::DEFAULT_SUBSCRIPTION_ID.to_string(),
            notification,
            attempts: 0,
            metadata: WebhookMessageMetadata {
                crawl_job_id: Some(msg.metadata.crawl_job_id.clone()),
                territory_id: Some(result.territory_id.clone()),
            },
        }])
    }
}

fn short_hash(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())[..16].to_string()
}

