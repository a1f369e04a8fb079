//! Keyword-matching analyzer: flags configured terms appearing in the OCR
//! text, case-insensitively.

use async_trait::async_trait;
use serde_json::json;
use std::time::Instant;

use super::{AnalysisBackend, AnalysisInput, AnalyzerError, AnalyzerOutput};
use crate::store::Finding;

pub struct KeywordAnalyzer {
    keywords: Vec<String>,
}

impl KeywordAnalyzer {
    pub fn new(keywords: Vec<String>) -> Self {
        Self { keywords }
    }
}

#[async_trait]
impl AnalysisBackend for KeywordAnalyzer {
    fn name(&self) -> &'static str {
        "keyword"
    }

    async fn analyze(&self, input: &AnalysisInput<'_>) -> Result<AnalyzerOutput, AnalyzerError> {
        let start = Instant::now();
        let haystack = input.text.to_lowercase();

        let findings = self
            .keywords
            .iter()
            .filter_map(|keyword| {
                let needle = keyword.to_lowercase();
                let count = haystack.matches(&needle).count();
                if count == 0 {
                    return None;
                }
                Some(Finding {
                    finding_type: "keyword".to_string(),
                    confidence: 1.0,
                    data: json!({ "keyword": keyword, "occurrences": count }),
                    context: None,
                })
            })
            .collect();

        Ok(AnalyzerOutput {
            findings,
            processing_time_ms: start.elapsed().as_millis() as i64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn finds_configured_keyword_case_insensitively() {
        let analyzer = KeywordAnalyzer::new(vec!["concurso".to_string()]);
        let input = AnalysisInput {
            text: "Edital de CONCURSO público número 1",
            territory_id: "3550308",
            gazette_id: "gaz-1",
        };
        let output = analyzer.analyze(&input).await.unwrap();
        assert_eq!(output.findings.len(), 1);
        assert_eq!(output.findings[0].data["occurrences"], 1);
    }

    #[tokio::test]
    async fn no_match_produces_no_findings() {
        let analyzer = KeywordAnalyzer::new(vec!["concurso".to_string()]);
        let input = AnalysisInput {
            text: "Nada a ver por aqui.",
            territory_id: "3550308",
            gazette_id: "gaz-1",
        };
        let output = analyzer.analyze(&input).await.unwrap();
        assert!(output.findings.is_empty());
    }
}
