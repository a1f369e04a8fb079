//! Data-model types for the ten persisted entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlJobType {
    Scheduled,
    Manual,
    Cities,
}

impl CrawlJobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrawlJobType::Scheduled => "scheduled",
            CrawlJobType::Manual => "manual",
            CrawlJobType::Cities => "cities",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(Self::Scheduled),
            "manual" => Some(Self::Manual),
            "cities" => Some(Self::Cities),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlJobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl CrawlJobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrawlJobStatus::Pending => "pending",
            CrawlJobStatus::Running => "running",
            CrawlJobStatus::Completed => "completed",
            CrawlJobStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlJob {
    pub id: String,
    pub job_type: CrawlJobType,
    pub status: CrawlJobStatus,
    pub total_cities: i64,
    pub completed_cities: i64,
    pub failed_cities: i64,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub platform_filter: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub metadata: Value,
}

impl CrawlJob {
    /// `true` once every dispatched city has either completed or failed
    /// ("transitions to completed or failed when
    /// completedCities + failedCities >= totalCities").
    pub fn is_done(&self) -> bool {
        self.completed_cities + self.failed_cities >= self.total_cities
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Power {
    Executive,
    Legislative,
    ExecutiveLegislative,
}

impl Power {
    pub fn as_str(&self) -> &'static str {
        match self {
            Power::Executive => "executive",
            Power::Legislative => "legislative",
            Power::ExecutiveLegislative => "executive_legislative",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "executive" => Some(Self::Executive),
            "legislative" => Some(Self::Legislative),
            "executive_legislative" => Some(Self::ExecutiveLegislative),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GazetteStatus {
    Pending,
    Uploaded,
    OcrProcessing,
    OcrRetrying,
    OcrFailure,
    OcrSuccess,
}

impl GazetteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GazetteStatus::Pending => "pending",
            GazetteStatus::Uploaded => "uploaded",
            GazetteStatus::OcrProcessing => "ocr_processing",
            GazetteStatus::OcrRetrying => "ocr_retrying",
            GazetteStatus::OcrFailure => "ocr_failure",
            GazetteStatus::OcrSuccess => "ocr_success",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "uploaded" => Some(Self::Uploaded),
            "ocr_processing" => Some(Self::OcrProcessing),
            "ocr_retrying" => Some(Self::OcrRetrying),
            "ocr_failure" => Some(Self::OcrFailure),
            "ocr_success" => Some(Self::OcrSuccess),
            _ => None,
        }
    }

    /// Statuses that mean "another worker already holds (or finished) the
    /// OCR claim"; the claim CAS refuses to move out of these.
    pub fn is_claimed_or_done(&self) -> bool {
        matches!(
            self,
            GazetteStatus::OcrProcessing | GazetteStatus::OcrRetrying | GazetteStatus::OcrSuccess
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GazetteRegistry {
    pub id: String,
    pub publication_date: DateTime<Utc>,
    pub edition_number: Option<String>,
    pub pdf_url: String,
    pub pdf_object_key: Option<String>,
    pub is_extra_edition: bool,
    pub power: Power,
    pub created_at: DateTime<Utc>,
    pub status: GazetteStatus,
    pub metadata: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GazetteCrawlStatus {
    Created,
    Processing,
    Success,
    Failed,
    AnalysisPending,
}

impl GazetteCrawlStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GazetteCrawlStatus::Created => "created",
            GazetteCrawlStatus::Processing => "processing",
            GazetteCrawlStatus::Success => "success",
            GazetteCrawlStatus::Failed => "failed",
            GazetteCrawlStatus::AnalysisPending => "analysis_pending",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "created" => Some(Self::Created),
            "processing" => Some(Self::Processing),
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            "analysis_pending" => Some(Self::AnalysisPending),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GazetteCrawl {
    pub id: String,
    pub job_id: String,
    pub territory_id: String,
    pub spider_id: String,
    pub gazette_id: String,
    pub analysis_result_id: Option<String>,
    pub status: GazetteCrawlStatus,
    pub scraped_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OcrJobStatus {
    Pending,
    Processing,
    Success,
    Failure,
    Partial,
}

impl OcrJobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OcrJobStatus::Pending => "pending",
            OcrJobStatus::Processing => "processing",
            OcrJobStatus::Success => "success",
            OcrJobStatus::Failure => "failure",
            OcrJobStatus::Partial => "partial",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "success" => Some(Self::Success),
            "failure" => Some(Self::Failure),
            "partial" => Some(Self::Partial),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrJob {
    pub id: String,
    pub document_id: String,
    pub status: OcrJobStatus,
    pub pages_processed: Option<i64>,
    pub processing_time_ms: Option<i64>,
    pub text_length: Option<i64>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub metadata: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrResult {
    pub id: String,
    pub document_id: String,
    pub extracted_text: String,
    pub text_length: i64,
    pub confidence_score: Option<f64>,
    pub language_detected: String,
    pub processing_method: String,
    pub created_at: DateTime<Utc>,
    pub metadata: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    #[serde(rename = "type")]
    pub finding_type: String,
    pub confidence: f64,
    pub data: Value,
    pub context: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub id: String,
    pub job_id: String,
    pub gazette_id: String,
    pub territory_id: String,
    pub publication_date: DateTime<Utc>,
    pub total_findings: i64,
    pub high_confidence_findings: i64,
    pub categories: Vec<String>,
    pub keywords: Vec<String>,
    pub findings: Vec<Finding>,
    pub summary: String,
    pub processing_time_ms: Option<i64>,
    pub analyzed_at: DateTime<Utc>,
    pub metadata: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcursoFinding {
    pub id: String,
    pub analysis_job_id: String,
    pub gazette_id: String,
    pub territory_id: String,
    pub document_type: Option<String>,
    pub confidence: f64,
    pub orgao: Option<String>,
    pub edital_numero: Option<String>,
    pub total_vagas: Option<i64>,
    pub cargos: Vec<String>,
    pub datas: Vec<String>,
    pub taxas: Vec<String>,
    pub banca: Option<String>,
    pub extraction_method: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookDeliveryStatus {
    Pending,
    Sent,
    Failed,
    Retry,
}

impl WebhookDeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookDeliveryStatus::Pending => "pending",
            WebhookDeliveryStatus::Sent => "sent",
            WebhookDeliveryStatus::Failed => "failed",
            WebhookDeliveryStatus::Retry => "retry",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "sent" => Some(Self::Sent),
            "failed" => Some(Self::Failed),
            "retry" => Some(Self::Retry),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookDelivery {
    pub id: String,
    pub notification_id: String,
    pub subscription_id: String,
    pub analysis_job_id: Option<String>,
    pub event_type: String,
    pub status: WebhookDeliveryStatus,
    pub status_code: Option<i64>,
    pub attempts: i64,
    pub response_body: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "info" => Some(Self::Info),
            "warning" => Some(Self::Warning),
            "error" => Some(Self::Error),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    pub id: String,
    pub worker: String,
    pub operation: String,
    pub severity: Severity,
    pub context: Value,
    pub resolved: bool,
    pub created_at: DateTime<Utc>,
}

/// A per-city/per-message step event: `crawl_start/end`, `ocr_start/end`,
/// `analysis_start/end`, `webhook_sent`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub id: String,
    pub step: String,
    pub status: String,
    pub context: Value,
    pub created_at: DateTime<Utc>,
}
