//! Request/response contract for the external LLM-based analyzer backend,
//! out of scope as an implementation, in scope as an HTTP contract. Used
//! when `AnalyzerSettings::use_ai_extraction` is set for a finding type.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use super::{AnalysisBackend, AnalysisInput, AnalyzerError, AnalyzerOutput};
use crate::store::Finding;

#[derive(Debug, Serialize)]
struct AiRequest<'a> {
    text: &'a str,
    territory_id: &'a str,
    gazette_id: &'a str,
    model: &'a str,
}

#[derive(Debug, Deserialize)]
struct AiResponse {
    findings: Vec<Finding>,
}

pub struct AiAnalyzer {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

impl AiAnalyzer {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl AnalysisBackend for AiAnalyzer {
    fn name(&self) -> &'static str {
        "ai"
    }

    async fn analyze(&self, input: &AnalysisInput<'_>) -> Result<AnalyzerOutput, AnalyzerError> {
        let start = Instant::now();
        let request = AiRequest {
            text: input.text,
            territory_id: input.territory_id,
            gazette_id: input.gazette_id,
            model: &self.model,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AnalyzerError::Failed(format!(
                "ai backend returned {}",
                response.status()
            )));
        }

        let parsed: AiResponse = response.json().await?;

        Ok(AnalyzerOutput {
            findings: parsed.findings,
            processing_time_ms: start.elapsed().as_millis() as i64,
        })
    }
}
