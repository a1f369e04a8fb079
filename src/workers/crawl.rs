//! Crawl worker (C4a): resolves a `Crawler`, runs it, and for every
//! candidate either inserts a new `GazetteRegistry` row or routes based on
//! the existing row's status, always emitting exactly one `GazetteCrawl`
//! per message and the matching downstream `OcrMessage` (or none).

use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use thiserror::Error;

use crate::crawler::{CrawlerError, CrawlerRegistry, DateRange as CrawlerDateRange};
use crate::error::{Classify, ErrorClass};
use crate::queue::{CrawlMessage, OcrMessage, OcrMessageMetadata};
use crate::store::{
    CrawlJobRepository, GazetteCrawlRepository, GazetteCrawlStatus, GazetteRegistryRepository,
    GazetteStatus, StoreError, TelemetryRepository,
};

use super::log_step_safe;

#[derive(Debug, Error)]
pub enum CrawlWorkerError {
    #[error("unknown spider type: {0}")]
    UnknownSpiderType(String),
    #[error("crawler failed: {0}")]
    CrawlerFailed(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl Classify for CrawlWorkerError {
    fn classify(&self) -> ErrorClass {
        match self {
            CrawlWorkerError::UnknownSpiderType(_) => ErrorClass::PermanentForItem,
            CrawlWorkerError::CrawlerFailed(_) => ErrorClass::Transient,
            CrawlWorkerError::Store(_) => ErrorClass::Transient,
        }
    }
}

pub struct CrawlWorker {
    crawlers: Arc<CrawlerRegistry>,
    registry_repo: GazetteRegistryRepository,
    crawl_repo: GazetteCrawlRepository,
    job_repo: CrawlJobRepository,
    telemetry: TelemetryRepository,
}

impl CrawlWorker {
    pub fn new(
        crawlers: Arc<CrawlerRegistry>,
        registry_repo: GazetteRegistryRepository,
        crawl_repo: GazetteCrawlRepository,
        job_repo: CrawlJobRepository,
        telemetry: TelemetryRepository,
    ) -> Self {
        Self {
            crawlers,
            registry_repo,
            crawl_repo,
            job_repo,
            telemetry,
        }
    }

    /// Process one `CrawlMessage`, returning the `OcrMessage`s to enqueue
    /// downstream. Crawl-job city counters are updated before returning, so
    /// the caller's `record_city_outcomes` bookkeeping is never skipped on
    /// either the success or the permanent-failure path.
    pub async fn process_one(
        &self,
        msg: &CrawlMessage,
    ) -> Result<Vec<OcrMessage>, CrawlWorkerError> {
        let start = Instant::now();
        log_step_safe(&self.telemetry, "crawl_start", "started", json!({ "spiderId": msg.spider_id }));

        let crawler = match self.crawlers.resolve(
            &msg.spider_type,
            &msg.config,
            &CrawlerDateRange {
                start: msg.date_range.start,
                end: msg.date_range.end,
            },
        ) {
            Ok(c) => c,
            Err(CrawlerError::UnknownSpiderType(t)) => {
                self.job_repo
                    .record_city_outcomes(&msg.metadata.crawl_job_id, 0, 1)?;
                return Err(CrawlWorkerError::UnknownSpiderType(t));
            }
            Err(CrawlerError::Failed(e)) => return Err(CrawlWorkerError::CrawlerFailed(e)),
        };

        let candidates = crawler
            .crawl()
            .await
            .map_err(|e| CrawlWorkerError::CrawlerFailed(e.to_string()))?;

        let mut downstream = Vec::new();
        for candidate in &candidates {
            let (registry, inserted) = self.registry_repo.find_or_insert(
                candidate.publication_date,
                candidate.edition_number.clone(),
                &candidate.pdf_url,
                candidate.is_extra_edition,
                candidate.power,
            )?;

            let job_id = format!("crawljob-{}-{}", msg.metadata.crawl_job_id, registry.id);

            let (crawl_status, enqueue) = if inserted {
                (GazetteCrawlStatus::Created, true)
            } else {
                match registry.status {
                    GazetteStatus::OcrSuccess => (GazetteCrawlStatus::Success, true),
                    GazetteStatus::OcrFailure => (GazetteCrawlStatus::Failed, false),
                    _ => (GazetteCrawlStatus::Processing, true),
                }
            };

            self.crawl_repo.create(
                &job_id,
                &candidate.territory_id,
                &msg.spider_id,
                &registry.id,
                crawl_status,
                candidate.scraped_at,
            )?;

            if enqueue {
                downstream.push(OcrMessage {
                    job_id: format!("ocrmsg-{}", uuid::Uuid::new_v4()),
                    pdf_url: registry.pdf_url.clone(),
                    territory_id: candidate.territory_id.clone(),
                    publication_date: candidate.publication_date,
                    edition_number: candidate.edition_number.clone(),
                    spider_id: msg.spider_id.clone(),
                    queued_at: chrono::Utc::now(),
                    metadata: OcrMessageMetadata {
                        power: Some(candidate.power.as_str().to_string()),
                        is_extra_edition: Some(candidate.is_extra_edition),
                        source_text: candidate.source_text.clone(),
                        crawl_job_id: msg.metadata.crawl_job_id.clone(),
                        gazette_crawl_id: job_id,
                    },
                });
            }
        }

        self.job_repo
            .record_city_outcomes(&msg.metadata.crawl_job_id, 1, 0)?;
        log_step_safe(
            &self.telemetry,
            "crawl_end",
            "completed",
            json!({
                "gazettesFound": candidates.len(),
                "executionTimeMs": start.elapsed().as_millis() as i64,
            }),
        );

        Ok(downstream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::{Crawler, CrawlerFactory, GazetteCandidate};
    use crate::store::{run_all_migrations, CrawlJobType, Power};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Arc;

    struct OneGazetteCrawler;

    #[async_trait]
    impl Crawler for OneGazetteCrawler {
        async fn crawl(&self) -> Result<Vec<GazetteCandidate>, CrawlerError> {
            Ok(vec![GazetteCandidate {
                territory_id: "3550308".to_string(),
                publication_date: Utc::now(),
                edition_number: None,
                pdf_url: "https://example/gaz.pdf".to_string(),
                is_extra_edition: false,
                power: Power::Executive,
                scraped_at: Utc::now(),
                source_text: None,
            }])
        }
        fn get_request_count(&self) -> u64 {
            1
        }
    }

    struct OneGazetteFactory;
    impl CrawlerFactory for OneGazetteFactory {
        fn create(
            &self,
            _config: &serde_json::Value,
            _date_range: &CrawlerDateRange,
        ) -> Result<Box<dyn Crawler>, CrawlerError> {
            Ok(Box::new(OneGazetteCrawler))
        }
    }

    fn worker() -> (tempfile::TempDir, CrawlWorker, CrawlJobRepository) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.sqlite3");
        run_all_migrations(&db_path).unwrap();

        let mut registry = CrawlerRegistry::new();
        registry.register("sample", Arc::new(OneGazetteFactory));

        let job_repo = CrawlJobRepository::new(&db_path);
        let worker = CrawlWorker::new(
            Arc::new(registry),
            GazetteRegistryRepository::new(&db_path),
            GazetteCrawlRepository::new(&db_path),
            CrawlJobRepository::new(&db_path),
            TelemetryRepository::new(&db_path),
        );
        (dir, worker, job_repo)
    }

    #[tokio::test]
    async fn new_candidate_enqueues_one_ocr_message() {
        let (_dir, worker, job_repo) = worker();
        let job = job_repo
            .create(CrawlJobType::Manual, 1, Utc::now(), Utc::now(), None)
            .unwrap();

        let msg = CrawlMessage {
            spider_id: "sp1".to_string(),
            territory_id: "3550308".to_string(),
            spider_type: "sample".to_string(),
            config: serde_json::json!({}),
            date_range: crate::queue::DateRange {
                start: Utc::now(),
                end: Utc::now(),
            },
            metadata: crate::queue::CrawlMessageMetadata {
                crawl_job_id: job.id.clone(),
            },
        };

        let downstream = worker.process_one(&msg).await.unwrap();
        assert_eq!(downstream.len(), 1);

        let updated = job_repo.get(&job.id).unwrap().unwrap();
        assert_eq!(updated.completed_cities, 1);
    }

    #[tokio::test]
    async fn unknown_spider_type_is_permanent_and_counts_as_failed() {
        let (_dir, worker, job_repo) = worker();
        let job = job_repo
            .create(CrawlJobType::Manual, 1, Utc::now(), Utc::now(), None)
            .unwrap();

        let msg = CrawlMessage {
            spider_id: "sp1".to_string(),
            territory_id: "3550308".to_string(),
            spider_type: "nonexistent".to_string(),
            config: serde_json::json!({}),
            date_range: crate::queue::DateRange {
                start: Utc::now(),
                end: Utc::now(),
            },
            metadata: crate::queue::CrawlMessageMetadata {
                crawl_job_id: job.id.clone(),
            },
        };

        let result = worker.process_one(&msg).await;
        assert!(matches!(result, Err(CrawlWorkerError::UnknownSpiderType(_))));
        assert_eq!(result.unwrap_err().classify(), ErrorClass::PermanentForItem);

        let updated = job_repo.get(&job.id).unwrap().unwrap();
        assert_eq!(updated.failed_cities, 1);
    }
}
