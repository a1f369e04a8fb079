//! Dispatcher HTTP surface (C5): accepts crawl requests, creates the
//! parent `CrawlJob`, fans crawl messages out in batches, and exposes
//! health/status read endpoints.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::config::Config;
use crate::crawler::{CityDescriptor, CityDirectory, CrawlerRegistry};
use crate::queue::{CrawlMessage, CrawlMessageMetadata, DateRange as MessageDateRange, OcrMessage,
                    AnalysisMessage, Queue, QueueName, SqliteQueue, WebhookMessage};
use crate::store::{CrawlJobRepository, CrawlJobType, GazetteRegistryRepository};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub crawlers: Arc<CrawlerRegistry>,
    pub cities: Arc<dyn CityDirectory>,
    pub crawl_jobs: Arc<CrawlJobRepository>,
    pub registry: Arc<GazetteRegistryRepository>,
    pub crawl_queue: Arc<SqliteQueue<CrawlMessage>>,
    pub ocr_queue: Arc<SqliteQueue<OcrMessage>>,
    pub analysis_queue: Arc<SqliteQueue<AnalysisMessage>>,
    pub webhook_queue: Arc<SqliteQueue<WebhookMessage>>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/crawl", post(crawl_all_or_listed))
        .route("/crawl/today-yesterday", post(crawl_today_yesterday))
        .route("/crawl/cities", post(crawl_cities))
        .route("/spiders", get(spiders))
        .route("/stats", get(stats))
        .route("/health/queue", get(health_queue))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn index(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "service": "gazette-pipeline",
        "version": env!("CARGO_PKG_VERSION"),
        "crawlersRegistered": state.crawlers.registered_count(),
        "handlers": ["/crawl", "/crawl/today-yesterday", "/crawl/cities", "/spiders", "/stats", "/health/queue"],
    }))
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CitiesField {
    All(String),
    Ids(Vec<String>),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CrawlRequest {
    cities: CitiesField,
    start_date: Option<DateTime<Utc>>,
    end_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TodayYesterdayRequest {
    platform: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CrawlResponse {
    success: bool,
    tasks_enqueued: usize,
    cities: usize,
    crawl_job_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    failed_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    date_range: Option<MessageDateRange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    estimated_time_minutes: Option<i64>,
}

async fn crawl_all_or_listed(
    State(state): State<AppState>,
    Json(body): Json<CrawlRequest>,
) -> impl IntoResponse {
    let cities = match &body.cities {
        CitiesField::All(tag) if tag == "all" => state.cities.all(),
        CitiesField::All(_) => Vec::new(),
        CitiesField::Ids(ids) => state.cities.by_ids(ids),
    };
    let job_type = match body.cities {
        CitiesField::All(_) => CrawlJobType::Manual,
        CitiesField::Ids(_) => CrawlJobType::Cities,
    };
    let range = MessageDateRange {
        start: body.start_date.unwrap_or_else(Utc::now),
        end: body.end_date.unwrap_or_else(Utc::now),
    };
    dispatch(&state, job_type, cities, range, None).await
}

async fn crawl_cities(
    State(state): State<AppState>,
    Json(body): Json<CrawlRequest>,
) -> impl IntoResponse {
    let cities = match &body.cities {
        CitiesField::Ids(ids) => state.cities.by_ids(ids),
        CitiesField::All(_) => Vec::new(),
    };
    let range = MessageDateRange {
        start: body.start_date.unwrap_or_else(Utc::now),
        end: body.end_date.unwrap_or_else(Utc::now),
    };
    dispatch(&state, CrawlJobType::Cities, cities, range, None).await
}

async fn crawl_today_yesterday(
    State(state): State<AppState>,
    Json(body): Json<TodayYesterdayRequest>,
) -> impl IntoResponse {
    let now = Utc::now();
    let range = MessageDateRange {
        start: now - Duration::days(1),
        end: now,
    };
    let cities = match &body.platform {
        Some(platform) => state.cities.by_platform(platform),
        None => state.cities.all(),
    };
    dispatch(&state, CrawlJobType::Scheduled, cities, range, Some(60)).await
}

async fn dispatch(
    state: &AppState,
    job_type: CrawlJobType,
    cities: Vec<CityDescriptor>,
    range: MessageDateRange,
    estimated_time_minutes: Option<i64>,
) -> axum::response::Response {
    if cities.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "error": "no valid cities" })),
        )
            .into_response();
    }

    let job = match state.crawl_jobs.create(job_type, cities.len() as i64, range.start, range.end, None) {
        Ok(job) => job,
        Err(e) => {
            warn!(error = %e, "failed to create crawl job");
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "success": false }))).into_response();
        }
    };

    let messages: Vec<CrawlMessage> = cities
        .iter()
        .map(|c| CrawlMessage {
            spider_id: c.spider_id.clone(),
            territory_id: c.territory_id.clone(),
            spider_type: c.spider_type.clone(),
            config: c.config.clone(),
            date_range: range.clone(),
            metadata: CrawlMessageMetadata {
                crawl_job_id: job.id.clone(),
            },
        })
        .collect();

    let outcome = match state.crawl_queue.send_batch(QueueName::Crawl, &messages).await {
        Ok(o) => o,
        Err(e) => {
            warn!(error = %e, "crawl batch send failed entirely");
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "success": false, "crawlJobId": job.id }))).into_response();
        }
    };

    info!(crawl_job_id = %job.id, enqueued = outcome.enqueued, failed = outcome.failed, "crawl dispatched");

    let body = CrawlResponse {
        success: outcome.failed == 0,
        tasks_enqueued: outcome.enqueued,
        cities: cities.len(),
        crawl_job_id: job.id,
        failed_count: if outcome.failed > 0 { Some(outcome.failed) } else { None },
        date_range: Some(range),
        estimated_time_minutes,
    };

    let status = if outcome.failed == 0 {
        StatusCode::OK
    } else if outcome.enqueued > 0 {
        StatusCode::from_u16(207).unwrap()
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(body)).into_response()
}

#[derive(Debug, Deserialize)]
struct SpiderQuery {
    #[serde(rename = "type")]
    spider_type: Option<String>,
}

async fn spiders(State(state): State<AppState>, Query(query): Query<SpiderQuery>) -> impl IntoResponse {
    let mut types = state.crawlers.registered_types();
    if let Some(filter) = &query.spider_type {
        types.retain(|t| t == filter);
    }
    let descriptors: Vec<_> = types.into_iter().map(|t| json!({ "spiderType": t, "registered": true })).collect();
    Json(descriptors)
}

async fn stats(State(state): State<AppState>) -> impl IntoResponse {
    let total = state.registry.count_all().unwrap_or(0);
    Json(json!({
        "total": total,
        "platforms": state.crawlers.registered_count(),
        "webhookConfigured": state.config.webhook_endpoint.is_some(),
        "endpoint": state.config.webhook_endpoint,
    }))
}

async fn health_queue(State(state): State<AppState>) -> impl IntoResponse {
    let crawl = state.crawl_queue.pending_count(QueueName::Crawl).unwrap_or(-1);
    let ocr = state.ocr_queue.pending_count(QueueName::Ocr).unwrap_or(-1);
    let analysis = state.analysis_queue.pending_count(QueueName::Analysis).unwrap_or(-1);
    let webhook = state.webhook_queue.pending_count(QueueName::Webhook).unwrap_or(-1);

    Json(json!({
        "queues": {
            "crawl": crawl,
            "ocr": ocr,
            "analysis": analysis,
            "webhook": { "pending": webhook, "configured": state.config.webhook_endpoint.is_some() },
        },
        "worker": {
            "maxRetriesPerMessage": state.config.max_retries_per_message,
            "queueBatchSize": state.config.queue_batch_size,
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::StaticCityDirectory;
    use crate::store::run_all_migrations;
    use tower::ServiceExt;

    fn config() -> Config {
        Config {
            mistral_api_key: "test-key".to_string(),
            openai_api_key: None,
            pdf_object_store_public_url: None,
            ocr_provider_endpoint: None,
            ai_analyzer_endpoint: None,
            city_directory_file: None,
            enabled_analyzers: Default::default(),
            webhook_endpoint: Some("https://hooks.example/gazette".to_string()),
            queue_batch_size: 100,
            max_retries_per_message: 3,
            ocr_storage_retries: 3,
            ocr_storage_base_delay_ms: 1000,
            db_path: "unused".into(),
            host: "0.0.0.0".to_string(),
            port: 8080,
            keywords: vec!["edital".to_string()],
        }
    }

    fn app(cities: Vec<CityDescriptor>) -> (tempfile::TempDir, Router) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.sqlite3");
        run_all_migrations(&db_path).unwrap();

        let state = AppState {
            config: Arc::new(config()),
            crawlers: Arc::new(CrawlerRegistry::new()),
            cities: Arc::new(StaticCityDirectory::new(cities)),
            crawl_jobs: Arc::new(CrawlJobRepository::new(&db_path)),
            registry: Arc::new(GazetteRegistryRepository::new(&db_path)),
            crawl_queue: Arc::new(SqliteQueue::new(&db_path).unwrap()),
            ocr_queue: Arc::new(SqliteQueue::new(&db_path).unwrap()),
            analysis_queue: Arc::new(SqliteQueue::new(&db_path).unwrap()),
            webhook_queue: Arc::new(SqliteQueue::new(&db_path).unwrap()),
        };
        (dir, router(state))
    }

    fn city(id: &str) -> CityDescriptor {
        CityDescriptor {
            territory_id: id.to_string(),
            spider_id: format!("sp-{id}"),
            spider_type: "sample".to_string(),
            config: json!({}),
        }
    }

    #[tokio::test]
    async fn index_reports_service_metadata() {
        let (_dir, app) = app(vec![]);
        let response = app
            .oneshot(axum::http::Request::builder().uri("/").body(axum::body::Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn crawl_all_enqueues_one_message_per_city() {
        let cities: Vec<_> = (0..100).map(|n| city(&n.to_string())).collect();
        let (_dir, app) = app(cities);

        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/crawl")
                    .header("content-type", "application/json")
                    .body(axum::body::Body::from(json!({ "cities": "all" }).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["tasksEnqueued"], 100);
        assert_eq!(body["success"], true);
    }

    #[tokio::test]
    async fn crawl_with_no_matching_cities_is_bad_request() {
        let (_dir, app) = app(vec![city("3550308")]);
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/crawl/cities")
                    .header("content-type", "application/json")
                    .body(axum::body::Body::from(json!({ "cities": ["nonexistent"] }).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn stats_reports_webhook_configuration() {
        let (_dir, app) = app(vec![]);
        let response = app
            .oneshot(axum::http::Request::builder().uri("/stats").body(axum::body::Body::empty()).unwrap())
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["webhookConfigured"], true);
    }
}
