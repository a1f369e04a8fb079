//! OCR worker (C4b): the most intricate stage, safe under at-least-once
//! delivery where multiple workers may race to OCR the same PDF. Routes on
//! the registry row's current status, claims via atomic CAS for the fresh
//! case, and always persists with retry before reconciling
//! registry/cache/crawl state.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use thiserror::Error;

use crate::cache::{ocr_key, Cache, OCR_TTL_SECS};
use crate::error::{Classify, ErrorClass};
use crate::ocr_provider::{OcrOutcomeStatus, OcrProvider, OcrProviderError};
use crate::queue::{with_backoff, AnalysisMessage, AnalysisMessageMetadata, OcrMessage};
use crate::store::{
    ClaimOutcome, GazetteCrawlRepository, GazetteCrawlStatus, GazetteStatus, OcrJobStatus,
    OcrRepository, Severity, StoreError, TelemetryRepository,
};

use super::log_step_safe;

#[derive(Debug, Error)]
pub enum OcrWorkerError {
    #[error("no registry row for pdfUrl {0}")]
    UnknownPdfUrl(String),
    #[error("another worker holds the OCR claim")]
    AlreadyClaimed,
    #[error("no OcrJob row for message job {0}")]
    OcrJobNotFound(String),
    #[error("OCR provider transport error: {0}")]
    Provider(#[from] OcrProviderError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl Classify for OcrWorkerError {
    fn classify(&self) -> ErrorClass {
        match self {
            OcrWorkerError::UnknownPdfUrl(_) => ErrorClass::PermanentForItem,
            OcrWorkerError::AlreadyClaimed => ErrorClass::Transient,
            OcrWorkerError::OcrJobNotFound(_) => ErrorClass::Transient,
            OcrWorkerError::Provider(_) => ErrorClass::Transient,
            OcrWorkerError::Store(_) => ErrorClass::Transient,
        }
    }
}

pub struct OcrWorker {
    registry_repo: crate::store::GazetteRegistryRepository,
    ocr_repo: OcrRepository,
    crawl_repo: GazetteCrawlRepository,
    telemetry: TelemetryRepository,
    cache: Arc<dyn Cache>,
    provider: Arc<dyn OcrProvider>,
    storage_retries: u32,
    storage_base_delay: Duration,
}

enum Route {
    Reuse(String),
    Invoke { is_retry: bool },
    WaitRetry,
}

impl OcrWorker {
    pub fn new(
        registry_repo: crate::store::GazetteRegistryRepository,
        ocr_repo: OcrRepository,
        crawl_repo: GazetteCrawlRepository,
        telemetry: TelemetryRepository,
        cache: Arc<dyn Cache>,
        provider: Arc<dyn OcrProvider>,
        storage_retries: u32,
        storage_base_delay: Duration,
    ) -> Self {
        Self {
            registry_repo,
            ocr_repo,
            crawl_repo,
            telemetry,
            cache,
            provider,
            storage_retries,
            storage_base_delay,
        }
    }

    fn route(&self, status: GazetteStatus, document_id: &str) -> Result<Route, OcrWorkerError> {
        match status {
            GazetteStatus::OcrSuccess => match self.ocr_repo.find_by_document(document_id)? {
                Some(result) => Ok(Route::Reuse(result.extracted_text)),
                None => {
                    self.registry_repo.mark_processing(document_id)?;
                    Ok(Route::Invoke { is_retry: false })
                }
            },
            GazetteStatus::OcrProcessing | GazetteStatus::OcrRetrying => Ok(Route::WaitRetry),
            GazetteStatus::OcrFailure => Ok(Route::Invoke { is_retry: true }),
            GazetteStatus::Pending | GazetteStatus::Uploaded => Ok(Route::Invoke { is_retry: false }),
        }
    }

    pub async fn process_one(
        &self,
        msg: &OcrMessage,
    ) -> Result<Vec<AnalysisMessage>, OcrWorkerError> {
        let start = Instant::now();
        log_step_safe(&self.telemetry, "ocr_start", "started", json!({ "pdfUrl": msg.pdf_url }));

        let registry = self
            .registry_repo
            .find_by_pdf_url(&msg.pdf_url)?
            .ok_or_else(|| OcrWorkerError::UnknownPdfUrl(msg.pdf_url.clone()))?;

        let mut route = self.route(registry.status, &registry.id)?;

        if let Route::Invoke { is_retry: false } = route {
            self.ocr_repo.create_processing(&registry.id, &msg.job_id)?;
            if registry.status == GazetteStatus::Pending || registry.status == GazetteStatus::Uploaded {
                match self.registry_repo.claim_for_ocr(&registry.id)? {
                    ClaimOutcome::Claimed => {}
                    ClaimOutcome::AlreadyClaimed => {
                        let reread = self
                            .registry_repo
                            .get(&registry.id)?
                            .ok_or_else(|| OcrWorkerError::UnknownPdfUrl(msg.pdf_url.clone()))?;
                        route = self.route(reread.status, &reread.id)?;
                    }
                }
            }
        }

        let extracted_text = match route {
            Route::Reuse(text) => text,
            Route::WaitRetry => return Err(OcrWorkerError::AlreadyClaimed),
            Route::Invoke { is_retry } => {
                if is_retry {
                    self.ocr_repo.mark_retry(&registry.id, &msg.job_id)?;
                    self.registry_repo.mark_retrying(&registry.id)?;
                }

                let ocr_job_id = self
                    .ocr_repo
                    .find_by_message_job_id(&registry.id, &msg.job_id)?
                    .map(|job| job.id)
                    .ok_or_else(|| OcrWorkerError::OcrJobNotFound(msg.job_id.clone()))?;

                let outcome = self
                    .provider
                    .process(&msg.pdf_url, &serde_json::to_value(&msg.metadata).unwrap_or(json!({})))
                    .await?;

                self.reconcile(&registry.id, &ocr_job_id, &msg.pdf_url, outcome).await?
            }
        };

        let ocr_job_id = self
            .ocr_repo
            .find_by_message_job_id(&registry.id, &msg.job_id)?
            .map(|job| job.id)
            .unwrap_or_else(|| registry.id.clone());

        // Only the crawl this message was raised for advances, not the
        // gazette's whole crawl history, or a rediscovery of an
        // already-analyzed gazette would re-trigger analysis for every
        // past crawl of it.
        let mut downstream = Vec::new();
        let crawl = self
            .crawl_repo
            .get_by_job_id(&msg.metadata.gazette_crawl_id)?
            .filter(|c| c.status != GazetteCrawlStatus::Failed);
        if let Some(crawl) = crawl {
            self.crawl_repo.set_status(&crawl.id, GazetteCrawlStatus::AnalysisPending)?;
            downstream.push(AnalysisMessage {
                job_id: format!("analysismsg-{}", uuid::Uuid::new_v4()),
                ocr_job_id,
                gazette_crawl_id: Some(crawl.id.clone()),
                gazette_id: registry.id.clone(),
                territory_id: crawl.territory_id.clone(),
                gazette_date: registry.publication_date,
                pdf_url: registry.pdf_url.clone(),
                queued_at: chrono::Utc::now(),
                metadata: AnalysisMessageMetadata {
                    crawl_job_id: crawl.job_id.clone(),
                    spider_id: crawl.spider_id.clone(),
                    spider_type: None,
                },
            });
        }

        log_step_safe(
            &self.telemetry,
            "ocr_end",
            "completed",
            json!({ "textLength": extracted_text.len(), "executionTimeMs": start.elapsed().as_millis() as i64 }),
        );

        let _ = extracted_text;
        Ok(downstream)
    }

    /// Persist the OCR outcome with retry, then reconcile registry/cache/
    /// OcrJob state. Storage failure past the retry budget downgrades the
    /// outcome to `failure/STORAGE_FAILED` instead of propagating.
    /// `document_id` keys the GazetteRegistry row; `ocr_job_id` keys the
    /// OcrJob row this invocation created, and the two are never the same
    /// id.
    async fn reconcile(
        &self,
        document_id: &str,
        ocr_job_id: &str,
        pdf_url: &str,
        outcome: crate::ocr_provider::OcrOutcome,
    ) -> Result<String, OcrWorkerError> {
        let is_success = outcome.status == OcrOutcomeStatus::Success
            && outcome.extracted_text.as_deref().map(|t| !t.is_empty()).unwrap_or(false);

        if !is_success {
            self.registry_repo.mark_ocr_failure(document_id)?;
            self.crawl_repo.mark_all_failed_for_gazette(document_id)?;
            self.ocr_repo.complete(
                ocr_job_id,
                OcrJobStatus::Failure,
                Some(outcome.pages_processed),
                Some(outcome.processing_time_ms),
                None,
                outcome.error.as_ref().map(|e| e.code.as_str()),
                outcome.error.as_ref().map(|e| e.message.as_str()),
            )?;
            self.telemetry.log_error(
                "ocr",
                "process",
                Severity::Error,
                json!({ "documentId": document_id, "pdfUrl": pdf_url, "error": outcome.error }),
            )?;
            return Ok(String::new());
        }

        let text = outcome.extracted_text.unwrap_or_default();
        let store_attempt = with_backoff(
            "ocr_result_store",
            self.storage_retries,
            self.storage_base_delay,
            || async {
                self.ocr_repo.store_result(document_id, &text, None, "pt", "external")
            },
        )
        .await;

        match store_attempt {
            Ok(_) => {
                self.registry_repo.mark_ocr_success(document_id, outcome.pdf_object_key.as_deref())?;
                self.ocr_repo.complete(
                    ocr_job_id,
                    OcrJobStatus::Success,
                    Some(outcome.pages_processed),
                    Some(outcome.processing_time_ms),
                    Some(text.chars().count() as i64),
                    None,
                    None,
                )?;
                let cache_payload = json!({ "extractedText": text }).to_string();
                let _ = self.cache.put(&ocr_key(pdf_url), &cache_payload, OCR_TTL_SECS).await;
                Ok(text)
            }
            Err(e) => {
                self.registry_repo.mark_ocr_failure(document_id)?;
                self.crawl_repo.mark_all_failed_for_gazette(document_id)?;
                self.ocr_repo.complete(
                    ocr_job_id,
                    OcrJobStatus::Failure,
                    Some(outcome.pages_processed),
                    Some(outcome.processing_time_ms),
                    None,
                    Some("STORAGE_FAILED"),
                    Some(&e.to_string()),
                )?;
                self.telemetry.log_error(
                    "ocr",
                    "store_result",
                    Severity::Critical,
                    json!({ "documentId": document_id, "code": "STORAGE_FAILED", "error": e.to_string() }),
                )?;
                Ok(String::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory::MemoryCache;
    use crate::ocr_provider::{OcrOutcomeStatus, OcrProviderErrorDetail};
    use crate::store::{run_all_migrations, Power};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeProvider {
        outcome_status: OcrOutcomeStatus,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl OcrProvider for FakeProvider {
        async fn process(
            &self,
            _pdf_url: &str,
            _metadata: &serde_json::Value,
        ) -> Result<crate::ocr_provider::OcrOutcome, OcrProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(match self.outcome_status {
                OcrOutcomeStatus::Success => crate::ocr_provider::OcrOutcome {
                    status: OcrOutcomeStatus::Success,
                    extracted_text: Some("extracted gazette text".to_string()),
                    pages_processed: 3,
                    processing_time_ms: 500,
                    error: None,
                    pdf_object_key: Some("key-1".to_string()),
                },
                _ => crate::ocr_provider::OcrOutcome {
                    status: OcrOutcomeStatus::Failure,
                    extracted_text: None,
                    pages_processed: 0,
                    processing_time_ms: 10,
                    error: Some(OcrProviderErrorDetail {
                        code: "BAD_PDF".to_string(),
                        message: "could not decode".to_string(),
                        details: None,
                    }),
                    pdf_object_key: None,
                },
            })
        }
    }

    fn setup(
        outcome_status: OcrOutcomeStatus,
    ) -> (tempfile::TempDir, OcrWorker, crate::store::GazetteRegistryRepository) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.sqlite3");
        run_all_migrations(&db_path).unwrap();

        let registry_repo = crate::store::GazetteRegistryRepository::new(&db_path);
        let worker = OcrWorker::new(
            crate::store::GazetteRegistryRepository::new(&db_path),
            OcrRepository::new(&db_path),
            GazetteCrawlRepository::new(&db_path),
            TelemetryRepository::new(&db_path),
            Arc::new(MemoryCache::new()),
            Arc::new(FakeProvider {
                outcome_status,
                calls: AtomicUsize::new(0),
            }),
            3,
            Duration::from_millis(1),
        );
        (dir, worker, registry_repo)
    }

    fn message(pdf_url: &str, gazette_crawl_id: &str) -> OcrMessage {
        OcrMessage {
            job_id: format!("ocrmsg-{}", uuid::Uuid::new_v4()),
            pdf_url: pdf_url.to_string(),
            territory_id: "3550308".to_string(),
            publication_date: Utc::now(),
            edition_number: None,
            spider_id: "sp1".to_string(),
            queued_at: Utc::now(),
            metadata: crate::queue::OcrMessageMetadata {
                power: Some(Power::Executive.as_str().to_string()),
                is_extra_edition: Some(false),
                source_text: None,
                crawl_job_id: "job-1".to_string(),
                gazette_crawl_id: gazette_crawl_id.to_string(),
            },
        }
    }

    #[tokio::test]
    async fn fresh_pending_gazette_is_claimed_and_ocred_successfully() {
        let (_dir, worker, registry_repo) = setup(OcrOutcomeStatus::Success);
        let pdf_url = "https://example/gaz.pdf";
        let (registry, _) = registry_repo
            .find_or_insert(Utc::now(), None, pdf_url, false, Power::Executive)
            .unwrap();
        worker
            .crawl_repo
            .create("job-1", "3550308", "sp1", &registry.id, GazetteCrawlStatus::Created, Utc::now())
            .unwrap();

        let msg = message(pdf_url, "job-1");
        let downstream = worker.process_one(&msg).await.unwrap();
        assert_eq!(downstream.len(), 1);

        let updated = registry_repo.find_by_pdf_url(pdf_url).unwrap().unwrap();
        assert_eq!(updated.status, GazetteStatus::OcrSuccess);

        let ocr_job = worker
            .ocr_repo
            .find_by_message_job_id(&registry.id, &msg.job_id)
            .unwrap()
            .unwrap();
        assert_eq!(ocr_job.status, OcrJobStatus::Success);
        assert_eq!(ocr_job.pages_processed, Some(3));
        assert_eq!(ocr_job.text_length, Some("extracted gazette text".len() as i64));
    }

    #[tokio::test]
    async fn already_claimed_row_waits_for_retry() {
        let (_dir, worker, registry_repo) = setup(OcrOutcomeStatus::Success);
        let pdf_url = "https://example/gaz-claimed.pdf";
        let (registry, _) = registry_repo
            .find_or_insert(Utc::now(), None, pdf_url, false, Power::Executive)
            .unwrap();
        registry_repo.mark_processing(&registry.id).unwrap();

        let result = worker.process_one(&message(pdf_url, "job-1")).await;
        assert!(matches!(result, Err(OcrWorkerError::AlreadyClaimed)));
        assert_eq!(result.unwrap_err().classify(), ErrorClass::Transient);
    }

    #[tokio::test]
    async fn ocr_success_row_reuses_stored_text_without_invoking_provider() {
        let (_dir, worker, registry_repo) = setup(OcrOutcomeStatus::Failure);
        let pdf_url = "https://example/gaz-cached.pdf";
        let (registry, _) = registry_repo
            .find_or_insert(Utc::now(), None, pdf_url, false, Power::Executive)
            .unwrap();
        worker
            .ocr_repo
            .store_result(&registry.id, "already extracted", None, "pt", "external")
            .unwrap();
        registry_repo.mark_ocr_success(&registry.id, None).unwrap();
        worker
            .crawl_repo
            .create("job-2", "3550308", "sp1", &registry.id, GazetteCrawlStatus::Created, Utc::now())
            .unwrap();

        let downstream = worker.process_one(&message(pdf_url, "job-2")).await.unwrap();
        assert_eq!(downstream.len(), 1);
    }

    #[tokio::test]
    async fn rediscovery_only_advances_its_own_crawl_not_earlier_ones() {
        let (_dir, worker, registry_repo) = setup(OcrOutcomeStatus::Failure);
        let pdf_url = "https://example/gaz-rediscovered.pdf";
        let (registry, _) = registry_repo
            .find_or_insert(Utc::now(), None, pdf_url, false, Power::Executive)
            .unwrap();
        worker
            .ocr_repo
            .store_result(&registry.id, "already extracted", None, "pt", "external")
            .unwrap();
        registry_repo.mark_ocr_success(&registry.id, None).unwrap();

        let earlier = worker
            .crawl_repo
            .create("job-earlier", "3550308", "sp1", &registry.id, GazetteCrawlStatus::Success, Utc::now())
            .unwrap();
        worker
            .crawl_repo
            .create("job-rediscovered", "3550308", "sp1", &registry.id, GazetteCrawlStatus::Created, Utc::now())
            .unwrap();

        let downstream = worker.process_one(&message(pdf_url, "job-rediscovered")).await.unwrap();
        assert_eq!(downstream.len(), 1);
        assert_eq!(downstream[0].metadata.crawl_job_id, "job-rediscovered");

        let earlier_reread = worker.crawl_repo.get(&earlier.id).unwrap().unwrap();
        assert_eq!(earlier_reread.status, GazetteCrawlStatus::Success);
    }
}
