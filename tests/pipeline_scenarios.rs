//! End-to-end pipeline scenarios driven directly through the stage workers
//! (no HTTP, no real network), chaining crawl -> OCR -> analysis the same
//! way the CLI's worker loops do, and checking the store ends up in the
//! states the pipeline promises.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use gazette_pipeline::analyzer::KeywordAnalyzer;
use gazette_pipeline::cache::MemoryCache;
use gazette_pipeline::config::EnabledAnalyzers;
use gazette_pipeline::crawler::{
    Crawler, CrawlerError, CrawlerFactory, CrawlerRegistry, DateRange as CrawlerDateRange,
    GazetteCandidate,
};
use gazette_pipeline::dedup::DedupEngine;
use gazette_pipeline::ocr_provider::{OcrOutcome, OcrOutcomeStatus, OcrProvider, OcrProviderError};
use gazette_pipeline::queue::{CrawlMessage, CrawlMessageMetadata, DateRange};
use gazette_pipeline::store::{
    run_all_migrations, AnalysisRepository, CrawlJobRepository, CrawlJobStatus, CrawlJobType,
    GazetteCrawlRepository, GazetteCrawlStatus, GazetteRegistryRepository, OcrRepository, Power,
    TelemetryRepository,
};
use gazette_pipeline::workers::analysis::AnalysisWorker;
use gazette_pipeline::workers::crawl::CrawlWorker;
use gazette_pipeline::workers::ocr::OcrWorker;

struct OneGazetteCrawler;

#[async_trait]
impl Crawler for OneGazetteCrawler {
    async fn crawl(&self) -> Result<Vec<GazetteCandidate>, CrawlerError> {
        Ok(vec![GazetteCandidate {
            territory_id: "3550308".to_string(),
            publication_date: Utc::now(),
            edition_number: Some("123".to_string()),
            pdf_url: "https://example.invalid/gazette-123.pdf".to_string(),
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
    fn create(&self, _config: &Value, _date_range: &CrawlerDateRange) -> Result<Box<dyn Crawler>, CrawlerError> {
        Ok(Box::new(OneGazetteCrawler))
    }
}

struct FixedTextOcrProvider(String);

#[async_trait]
impl OcrProvider for FixedTextOcrProvider {
    async fn process(&self, _pdf_url: &str, _metadata: &Value) -> Result<OcrOutcome, OcrProviderError> {
        Ok(OcrOutcome {
            status: OcrOutcomeStatus::Success,
            extracted_text: Some(self.0.clone()),
            pages_processed: 3,
            processing_time_ms: 50,
            error: None,
            pdf_object_key: None,
        })
    }
}

/// Scenario: a 100-city-style dispatch collapsed to one city, carried all
/// the way from crawl through analysis: dispatch counters, job completion,
/// and the keyword analyzer's end of the findings pipeline.
#[tokio::test]
async fn crawl_to_analysis_completes_the_crawl_job_and_produces_a_webhook_message() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("test.sqlite3");
    run_all_migrations(&db_path).unwrap();

    let mut crawlers = CrawlerRegistry::new();
    crawlers.register("sample", Arc::new(OneGazetteFactory));

    let job_repo = CrawlJobRepository::new(&db_path);
    let job = job_repo
        .create(CrawlJobType::Manual, 1, Utc::now(), Utc::now(), None)
        .unwrap();

    let crawl_worker = CrawlWorker::new(
        Arc::new(crawlers),
        GazetteRegistryRepository::new(&db_path),
        GazetteCrawlRepository::new(&db_path),
        CrawlJobRepository::new(&db_path),
        TelemetryRepository::new(&db_path),
    );

    let crawl_msg = CrawlMessage {
        spider_id: "sp1".to_string(),
        territory_id: "3550308".to_string(),
        spider_type: "sample".to_string(),
        config: json!({}),
        date_range: DateRange { start: Utc::now(), end: Utc::now() },
        metadata: CrawlMessageMetadata { crawl_job_id: job.id.clone() },
    };

    let ocr_messages = crawl_worker.process_one(&crawl_msg).await.unwrap();
    assert_eq!(ocr_messages.len(), 1);

    let updated_job = job_repo.get(&job.id).unwrap().unwrap();
    assert_eq!(updated_job.completed_cities, 1);
    assert_eq!(updated_job.status, CrawlJobStatus::Completed);

    let ocr_provider: Arc<dyn OcrProvider> =
        Arc::new(FixedTextOcrProvider("edital de concurso público nº 123".to_string()));
    let cache = Arc::new(MemoryCache::new());

    let ocr_worker = OcrWorker::new(
        GazetteRegistryRepository::new(&db_path),
        OcrRepository::new(&db_path),
        GazetteCrawlRepository::new(&db_path),
        TelemetryRepository::new(&db_path),
        cache.clone(),
        ocr_provider,
        3,
        std::time::Duration::from_millis(1),
    );

    let analysis_messages = ocr_worker.process_one(&ocr_messages[0]).await.unwrap();
    assert_eq!(analysis_messages.len(), 1);

    let backends: Vec<Arc<dyn gazette_pipeline::analyzer::AnalysisBackend>> =
        vec![Arc::new(KeywordAnalyzer::new(vec!["edital".to_string()]))];

    let analysis_worker = AnalysisWorker::new(
        AnalysisRepository::new(&db_path),
        OcrRepository::new(&db_path),
        GazetteCrawlRepository::new(&db_path),
        TelemetryRepository::new(&db_path),
        cache,
        Arc::new(DedupEngine::new()),
        backends,
        EnabledAnalyzers::default(),
        3,
        std::time::Duration::from_millis(1),
    );

    let webhook_messages = analysis_worker.process_one(&analysis_messages[0]).await.unwrap();
    assert_eq!(webhook_messages.len(), 1);
    assert_eq!(webhook_messages[0].notification["totalFindings"], 1);

    // The one crawl row created for this gazette should have reached its
    // terminal `success` state (analysis linked) rather than staying
    // `analysis_pending`.
    let registry = GazetteRegistryRepository::new(&db_path)
        .find_by_pdf_url("https://example.invalid/gazette-123.pdf")
        .unwrap()
        .unwrap();
    let crawl_repo = GazetteCrawlRepository::new(&db_path);
    let crawls = crawl_repo.list_by_gazette(&registry.id).unwrap();
    assert_eq!(crawls.len(), 1);
    assert_eq!(crawls[0].status, GazetteCrawlStatus::Success);
}

/// Scenario: the same `(territory, gazette, configHash)` submitted twice
/// produces only one `AnalysisResult`, answered the second time from the
/// cache.
#[tokio::test]
async fn resubmitting_an_analysis_message_is_a_cache_hit_with_no_new_result() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("test.sqlite3");
    run_all_migrations(&db_path).unwrap();

    let registry_repo = GazetteRegistryRepository::new(&db_path);
    let (registry, _) = registry_repo
        .find_or_insert(Utc::now(), None, "https://example.invalid/g.pdf", false, Power::Executive)
        .unwrap();
    OcrRepository::new(&db_path)
        .store_result(&registry.id, "edital de concurso", None, "pt", "external")
        .unwrap();

    let cache = Arc::new(MemoryCache::new());
    let backends: Vec<Arc<dyn gazette_pipeline::analyzer::AnalysisBackend>> =
        vec![Arc::new(KeywordAnalyzer::new(vec!["edital".to_string()]))];

    let worker = || {
        AnalysisWorker::new(
            AnalysisRepository::new(&db_path),
            OcrRepository::new(&db_path),
            GazetteCrawlRepository::new(&db_path),
            TelemetryRepository::new(&db_path),
            cache.clone(),
            Arc::new(DedupEngine::new()),
            backends.clone(),
            EnabledAnalyzers::default(),
            3,
            std::time::Duration::from_millis(1),
        )
    };

    let msg = gazette_pipeline::queue::AnalysisMessage {
        job_id: "ocrjob-1".to_string(),
        ocr_job_id: "ocrjob-1".to_string(),
        gazette_crawl_id: None,
        gazette_id: registry.id.clone(),
        territory_id: "3550308".to_string(),
        gazette_date: Utc::now(),
        pdf_url: registry.pdf_url.clone(),
        queued_at: Utc::now(),
        metadata: gazette_pipeline::queue::AnalysisMessageMetadata {
            crawl_job_id: "job-1".to_string(),
            spider_id: "sp1".to_string(),
            spider_type: None,
        },
    };

    let first = worker().process_one(&msg).await.unwrap();
    let second = worker().process_one(&msg).await.unwrap();

    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 1);
    assert_eq!(
        first[0].notification["analysisJobId"],
        second[0].notification["analysisJobId"],
        "resubmission must resolve to the same analysis job rather than creating a new one"
    );
}
