//! Typed queue message envelopes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueName {
    Crawl,
    Ocr,
    Analysis,
    Webhook,
}

impl QueueName {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::Crawl => "crawl",
            QueueName::Ocr => "ocr",
            QueueName::Analysis => "analysis",
            QueueName::Webhook => "webhook",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "crawl" => Some(Self::Crawl),
            "ocr" => Some(Self::Ocr),
            "analysis" => Some(Self::Analysis),
            "webhook" => Some(Self::Webhook),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlMessage {
    pub spider_id: String,
    pub territory_id: String,
    pub spider_type: String,
    pub config: Value,
    pub date_range: DateRange,
    pub metadata: CrawlMessageMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlMessageMetadata {
    pub crawl_job_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrMessage {
    pub job_id: String,
    pub pdf_url: String,
    pub territory_id: String,
    pub publication_date: DateTime<Utc>,
    pub edition_number: Option<String>,
    pub spider_id: String,
    pub queued_at: DateTime<Utc>,
    pub metadata: OcrMessageMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrMessageMetadata {
    pub power: Option<String>,
    pub is_extra_edition: Option<bool>,
    pub source_text: Option<String>,
    pub crawl_job_id: String,
    pub gazette_crawl_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisMessage {
    pub job_id: String,
    pub ocr_job_id: String,
    pub gazette_crawl_id: Option<String>,
    pub gazette_id: String,
    pub territory_id: String,
    pub gazette_date: DateTime<Utc>,
    pub pdf_url: String,
    pub queued_at: DateTime<Utc>,
    pub metadata: AnalysisMessageMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisMessageMetadata {
    pub crawl_job_id: String,
    pub spider_id: String,
    pub spider_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookMessage {
    pub message_id: String,
    pub subscription_id: String,
    pub notification: Value,
    #[serde(default)]
    pub attempts: u32,
    pub metadata: WebhookMessageMetadata,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookMessageMetadata {
    pub crawl_job_id: Option<String>,
    pub territory_id: Option<String>,
}
