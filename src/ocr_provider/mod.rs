//! The OCR provider interface: an external HTTP service returning extracted
//! text for a PDF URL. Never throws on a documented OCR failure; transport
//! failures surface as errors.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OcrProviderError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrProviderErrorDetail {
    pub code: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OcrOutcomeStatus {
    Success,
    Failure,
    Partial,
}

/// `process(pdfUrl, metadata) -> {status, extractedText?, pagesProcessed,
/// processingTimeMs, error?, pdfObjectKey?}`. Documented failures come back
/// as `status=failure` with `error` populated, never as an `Err`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrOutcome {
    pub status: OcrOutcomeStatus,
    pub extracted_text: Option<String>,
    pub pages_processed: i64,
    pub processing_time_ms: i64,
    pub error: Option<OcrProviderErrorDetail>,
    pub pdf_object_key: Option<String>,
}

#[async_trait]
pub trait OcrProvider: Send + Sync {
    async fn process(
        &self,
        pdf_url: &str,
        metadata: &serde_json::Value,
    ) -> Result<OcrOutcome, OcrProviderError>;
}

/// HTTP-backed OCR provider client, the concrete shape of the external
/// collaborator contract.
pub struct HttpOcrProvider {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpOcrProvider {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl OcrProvider for HttpOcrProvider {
    async fn process(
        &self,
        pdf_url: &str,
        metadata: &serde_json::Value,
    ) -> Result<OcrOutcome, OcrProviderError> {
        if let Some(mime) = self.sniff_mime(pdf_url).await {
            if !is_pdf_mime(&mime) {
                return Ok(OcrOutcome {
                    status: OcrOutcomeStatus::Failure,
                    extracted_text: None,
                    pages_processed: 0,
                    processing_time_ms: 0,
                    error: Some(OcrProviderErrorDetail {
                        code: "UNSUPPORTED_MIME_TYPE".to_string(),
                        message: format!("pdfUrl content sniffed as {mime}, not a PDF"),
                        details: None,
                    }),
                    pdf_object_key: None,
                });
            }
        }

        let response = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({ "pdfUrl": pdf_url, "metadata": metadata }))
            .send()
            .await?;
        let outcome: OcrOutcome = response.json().await?;
        Ok(outcome)
    }
}

impl HttpOcrProvider {
    /// Re-read the first bytes of `pdf_url` and sniff its real type by magic
    /// bytes rather than trusting the extension/crawler-reported type.
    /// `None` means the sniff itself failed (network error, empty body,
    /// unrecognized magic) is treated as inconclusive, not as a rejection.
    async fn sniff_mime(&self, pdf_url: &str) -> Option<String> {
        let response = self
            .client
            .get(pdf_url)
            .header(reqwest::header::RANGE, "bytes=0-8191")
            .send()
            .await
            .ok()?;
        let bytes = response.bytes().await.ok()?;
        infer::get(&bytes).map(|kind| kind.mime_type().to_string())
    }
}

fn is_pdf_mime(mime: &str) -> bool {
    mime == "application/pdf"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_pdf_mime_exactly() {
        assert!(is_pdf_mime("application/pdf"));
        assert!(!is_pdf_mime("text/html"));
        assert!(!is_pdf_mime("application/pdf; charset=binary"));
    }
}
