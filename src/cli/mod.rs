//! Command-line front end: `serve` (Dispatcher HTTP surface), `worker
//! <stage>` (run a single stage loop standalone), `migrate`, and `dispatch`
//! (a thin front-end onto the same enqueue logic the Dispatcher uses).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};

use crate::analyzer::{AiAnalyzer, AnalysisBackend, ConcursoAnalyzer, EntityAnalyzer, KeywordAnalyzer};
use crate::cache::{Cache, SqliteCache};
use crate::config::Config;
use crate::crawler::{CityDirectory, CrawlerRegistry, StaticCityDirectory};
use crate::dedup::DedupEngine;
use crate::ocr_provider::{HttpOcrProvider, OcrProvider};
use crate::queue::{
    AnalysisMessage, CrawlMessage, CrawlMessageMetadata, DateRange, OcrMessage, Queue, QueueName,
    SqliteQueue, WebhookMessage,
};
use crate::store::{
    AnalysisRepository, CrawlJobRepository, CrawlJobType, GazetteCrawlRepository,
    GazetteRegistryRepository, OcrRepository, TelemetryRepository, WebhookRepository,
};
use crate::webhook_client::SingleEndpointRegistry;
use crate::workers::{analysis::AnalysisWorker, crawl::CrawlWorker, finish_delivery,
                      ocr::OcrWorker, webhook::WebhookWorker};

/// Scan raw args for `-v`/`--verbose` before clap parses, so logging can be
/// configured ahead of `Cli::parse()`.
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Parser)]
#[command(name = "gazetted")]
#[command(about = "Crawl-OCR-analysis-webhook pipeline for municipal gazettes")]
#[command(version)]
pub struct Cli {
    /// Enable verbose (info-level) logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Stage {
    Crawl,
    Ocr,
    Analysis,
    Webhook,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the Dispatcher HTTP surface.
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },

    /// Run one stage worker loop, polling its queue until interrupted.
    Worker {
        stage: Stage,
    },

    /// Apply database migrations and print the resulting table list.
    Migrate,

    /// Enqueue a crawl dispatch without going through HTTP.
    Dispatch {
        /// Dispatch every city in the directory.
        #[arg(long, conflicts_with_all = ["cities", "today_yesterday"])]
        all: bool,
        /// Dispatch only these territory ids (comma-separated).
        #[arg(long, value_delimiter = ',')]
        cities: Vec<String>,
        /// Dispatch yesterday-to-today for every city (optionally filtered by platform).
        #[arg(long, conflicts_with_all = ["all", "cities"])]
        today_yesterday: bool,
        #[arg(long)]
        platform: Option<String>,
    },
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Serve { host, port } => cmd_serve(&config, host, port).await,
        Commands::Worker { stage } => cmd_worker(&config, stage).await,
        Commands::Migrate => cmd_migrate(&config),
        Commands::Dispatch { all, cities, today_yesterday, platform } => {
            cmd_dispatch(&config, all, cities, today_yesterday, platform).await
        }
    }
}

fn city_directory(config: &Config) -> anyhow::Result<Arc<dyn CityDirectory>> {
    match &config.city_directory_file {
        Some(path) => Ok(Arc::new(StaticCityDirectory::from_json_file(path)?)),
        None => Ok(Arc::new(StaticCityDirectory::default())),
    }
}

fn cmd_migrate(config: &Config) -> anyhow::Result<()> {
    let tables = crate::store::run_all_migrations(&config.db_path)?;
    println!("migrated {}: {} tables", config.db_path.display(), tables.len());
    for table in tables {
        println!("  - {table}");
    }
    Ok(())
}

async fn cmd_serve(config: &Config, host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    crate::store::run_all_migrations(&config.db_path)?;

    let state = crate::server::AppState {
        config: Arc::new(config.clone()),
        crawlers: Arc::new(CrawlerRegistry::new()),
        cities: city_directory(config)?,
        crawl_jobs: Arc::new(CrawlJobRepository::new(&config.db_path)),
        registry: Arc::new(GazetteRegistryRepository::new(&config.db_path)),
        crawl_queue: Arc::new(SqliteQueue::new(&config.db_path)?),
        ocr_queue: Arc::new(SqliteQueue::new(&config.db_path)?),
        analysis_queue: Arc::new(SqliteQueue::new(&config.db_path)?),
        webhook_queue: Arc::new(SqliteQueue::new(&config.db_path)?),
    };

    let host = host.unwrap_or_else(|| config.host.clone());
    let port = port.unwrap_or(config.port);
    let addr = format!("{host}:{port}");

    info!(%addr, "starting dispatcher");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, crate::server::router(state)).await?;
    Ok(())
}

async fn cmd_worker(config: &Config, stage: Stage) -> anyhow::Result<()> {
    crate::store::run_all_migrations(&config.db_path)?;
    match stage {
        Stage::Crawl => run_crawl_worker(config).await,
        Stage::Ocr => run_ocr_worker(config).await,
        Stage::Analysis => run_analysis_worker(config).await,
        Stage::Webhook => run_webhook_worker(config).await,
    }
}

/// How long an idle worker sleeps between empty poll cycles.
const IDLE_POLL_DELAY: Duration = Duration::from_secs(2);

async fn run_crawl_worker(config: &Config) -> anyhow::Result<()> {
    let worker = CrawlWorker::new(
        Arc::new(CrawlerRegistry::new()),
        GazetteRegistryRepository::new(&config.db_path),
        GazetteCrawlRepository::new(&config.db_path),
        CrawlJobRepository::new(&config.db_path),
        TelemetryRepository::new(&config.db_path),
    );
    let in_queue: SqliteQueue<CrawlMessage> = SqliteQueue::new(&config.db_path)?;
    let out_queue: SqliteQueue<OcrMessage> = SqliteQueue::new(&config.db_path)?;

    info!("crawl worker started");
    loop {
        let deliveries = in_queue.receive(QueueName::Crawl, config.queue_batch_size).await?;
        if deliveries.is_empty() {
            tokio::time::sleep(IDLE_POLL_DELAY).await;
            continue;
        }
        for delivery in deliveries {
            match worker.process_one(&delivery.payload).await {
                Ok(downstream) => {
                    if !downstream.is_empty() {
                        if let Err(e) = out_queue.send_batch(QueueName::Ocr, &downstream).await {
                            warn!(error = %e, "failed to enqueue ocr messages");
                        }
                    }
                    finish_delivery(&in_queue, &delivery, Ok(()), config.max_retries_per_message).await?;
                }
                Err(e) => {
                    finish_delivery(&in_queue, &delivery, Err(e), config.max_retries_per_message).await?;
                }
            }
        }
    }
}

async fn run_ocr_worker(config: &Config) -> anyhow::Result<()> {
    let endpoint = config
        .ocr_provider_endpoint
        .clone()
        .ok_or_else(|| anyhow::anyhow!("OCR_PROVIDER_ENDPOINT must be set to run the OCR worker"))?;
    let provider: Arc<dyn OcrProvider> = Arc::new(HttpOcrProvider::new(endpoint));
    let cache: Arc<dyn Cache> = Arc::new(SqliteCache::new(&config.db_path)?);

    let worker = OcrWorker::new(
        GazetteRegistryRepository::new(&config.db_path),
        OcrRepository::new(&config.db_path),
        GazetteCrawlRepository::new(&config.db_path),
        TelemetryRepository::new(&config.db_path),
        cache,
        provider,
        config.ocr_storage_retries,
        Duration::from_millis(config.ocr_storage_base_delay_ms),
    );
    let in_queue: SqliteQueue<OcrMessage> = SqliteQueue::new(&config.db_path)?;
    let out_queue: SqliteQueue<AnalysisMessage> = SqliteQueue::new(&config.db_path)?;

    info!("ocr worker started");
    loop {
        let deliveries = in_queue.receive(QueueName::Ocr, config.queue_batch_size).await?;
        if deliveries.is_empty() {
            tokio::time::sleep(IDLE_POLL_DELAY).await;
            continue;
        }
        for delivery in deliveries {
            match worker.process_one(&delivery.payload).await {
                Ok(downstream) => {
                    if !downstream.is_empty() {
                        if let Err(e) = out_queue.send_batch(QueueName::Analysis, &downstream).await {
                            warn!(error = %e, "failed to enqueue analysis messages");
                        }
                    }
                    finish_delivery(&in_queue, &delivery, Ok(()), config.max_retries_per_message).await?;
                }
                Err(e) => {
                    finish_delivery(&in_queue, &delivery, Err(e), config.max_retries_per_message).await?;
                }
            }
        }
    }
}

/// Build the analyzer backends enabled in `config.enabled_analyzers`.
fn build_backends(config: &Config) -> Vec<Arc<dyn AnalysisBackend>> {
    let mut backends: Vec<Arc<dyn AnalysisBackend>> = Vec::new();
    let analyzers = &config.enabled_analyzers;

    if analyzers.keyword.enabled {
        backends.push(Arc::new(KeywordAnalyzer::new(config.keywords.clone())));
    }
    if analyzers.entity.enabled {
        backends.push(Arc::new(EntityAnalyzer::new()));
    }
    if analyzers.concurso.enabled {
        backends.push(Arc::new(ConcursoAnalyzer::new()));
    }
    if analyzers.ai.enabled {
        if let Some(endpoint) = &config.ai_analyzer_endpoint {
            let model = analyzers.ai.model.clone().unwrap_or_else(|| "default".to_string());
            backends.push(Arc::new(AiAnalyzer::new(endpoint.clone(), model)));
        } else {
            warn!("ai analyzer enabled but AI_ANALYZER_ENDPOINT is unset; skipping");
        }
    }
    backends
}

async fn run_analysis_worker(config: &Config) -> anyhow::Result<()> {
    let cache: Arc<dyn Cache> = Arc::new(SqliteCache::new(&config.db_path)?);
    let backends = build_backends(config);

    let worker = AnalysisWorker::new(
        AnalysisRepository::new(&config.db_path),
        OcrRepository::new(&config.db_path),
        GazetteCrawlRepository::new(&config.db_path),
        TelemetryRepository::new(&config.db_path),
        cache,
        Arc::new(DedupEngine::new()),
        backends,
        config.enabled_analyzers.clone(),
        config.ocr_storage_retries,
        Duration::from_millis(config.ocr_storage_base_delay_ms),
    );
    let in_queue: SqliteQueue<AnalysisMessage> = SqliteQueue::new(&config.db_path)?;
    let out_queue: SqliteQueue<WebhookMessage> = SqliteQueue::new(&config.db_path)?;

    info!("analysis worker started");
    loop {
        let deliveries = in_queue.receive(QueueName::Analysis, config.queue_batch_size).await?;
        if deliveries.is_empty() {
            tokio::time::sleep(IDLE_POLL_DELAY).await;
            continue;
        }
        for delivery in deliveries {
            match worker.process_one(&delivery.payload).await {
                Ok(downstream) => {
                    if !downstream.is_empty() {
                        if let Err(e) = out_queue.send_batch(QueueName::Webhook, &downstream).await {
                            warn!(error = %e, "failed to enqueue webhook messages");
                        }
                    }
                    finish_delivery(&in_queue, &delivery, Ok(()), config.max_retries_per_message).await?;
                }
                Err(e) => {
                    finish_delivery(&in_queue, &delivery, Err(e), config.max_retries_per_message).await?;
                }
            }
        }
    }
}

async fn run_webhook_worker(config: &Config) -> anyhow::Result<()> {
    let registry = Arc::new(SingleEndpointRegistry::new(config.webhook_endpoint.clone()));
    let worker = WebhookWorker::new(
        registry,
        WebhookRepository::new(&config.db_path),
        TelemetryRepository::new(&config.db_path),
        config.max_retries_per_message,
    );
    let queue: SqliteQueue<WebhookMessage> = SqliteQueue::new(&config.db_path)?;

    info!("webhook worker started");
    loop {
        let deliveries = queue.receive(QueueName::Webhook, config.queue_batch_size).await?;
        if deliveries.is_empty() {
            tokio::time::sleep(IDLE_POLL_DELAY).await;
            continue;
        }
        for delivery in deliveries {
            let outcome = worker.process_one(&delivery.payload).await;
            finish_delivery(&queue, &delivery, outcome, config.max_retries_per_message).await?;
        }
    }
}

async fn cmd_dispatch(
    config: &Config,
    all: bool,
    city_ids: Vec<String>,
    today_yesterday: bool,
    platform: Option<String>,
) -> anyhow::Result<()> {
    crate::store::run_all_migrations(&config.db_path)?;
    let cities_dir = city_directory(config)?;

    let (job_type, cities, range) = if today_yesterday {
        let now = Utc::now();
        let cities = match &platform {
            Some(p) => cities_dir.by_platform(p),
            None => cities_dir.all(),
        };
        (CrawlJobType::Scheduled, cities, DateRange { start: now - chrono::Duration::days(1), end: now })
    } else if all {
        (CrawlJobType::Manual, cities_dir.all(), DateRange { start: Utc::now(), end: Utc::now() })
    } else {
        (CrawlJobType::Cities, cities_dir.by_ids(&city_ids), DateRange { start: Utc::now(), end: Utc::now() })
    };

    if cities.is_empty() {
        anyhow::bail!("no cities matched the requested dispatch");
    }

    let crawl_jobs = CrawlJobRepository::new(&config.db_path);
    let job = crawl_jobs.create(job_type, cities.len() as i64, range.start, range.end, platform)?;

    let messages: Vec<CrawlMessage> = cities
        .iter()
        .map(|c| CrawlMessage {
            spider_id: c.spider_id.clone(),
            territory_id: c.territory_id.clone(),
            spider_type: c.spider_type.clone(),
            config: c.config.clone(),
            date_range: range.clone(),
            metadata: CrawlMessageMetadata { crawl_job_id: job.id.clone() },
        })
        .collect();

    let queue: SqliteQueue<CrawlMessage> = SqliteQueue::new(&config.db_path)?;
    let outcome = queue.send_batch(QueueName::Crawl, &messages).await?;

    println!(
        "dispatched crawl job {} ({} cities, {} enqueued, {} failed)",
        job.id,
        cities.len(),
        outcome.enqueued,
        outcome.failed
    );
    Ok(())
}
