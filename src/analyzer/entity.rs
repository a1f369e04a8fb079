//! Named-entity extraction, surfaces person/CPF/CNPJ-shaped tokens from the
//! OCR text. A lightweight regex pass; richer entity models are an AI-backend
//! concern (see [`super::AiAnalyzer`]).

use async_trait::async_trait;
use regex::Regex;
use serde_json::json;
use std::time::Instant;

use super::{AnalysisBackend, AnalysisInput, AnalyzerError, AnalyzerOutput};
use crate::store::Finding;

pub struct EntityAnalyzer {
    cpf_re: Regex,
    cnpj_re: Regex,
}

impl Default for EntityAnalyzer {
    fn default() -> Self {
        Self {
            cpf_re: Regex::new(r"\b\d{3}\.\d{3}\.\d{3}-\d{2}\b").unwrap(),
            cnpj_re: Regex::new(r"\b\d{2}\.\d{3}\.\d{3}/\d{4}-\d{2}\b").unwrap(),
        }
    }
}

impl EntityAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AnalysisBackend for EntityAnalyzer {
    fn name(&self) -> &'static str {
        "entity"
    }

    async fn analyze(&self, input: &AnalysisInput<'_>) -> Result<AnalyzerOutput, AnalyzerError> {
        let start = Instant::now();
        let mut findings = Vec::new();

        for m in self.cpf_re.find_iter(input.text) {
            findings.push(Finding {
                finding_type: "entity".to_string(),
                confidence: 0.9,
                data: json!({ "entityType": "cpf", "value": m.as_str() }),
                context: None,
            });
        }
        for m in self.cnpj_re.find_iter(input.text) {
            findings.push(Finding {
                finding_type: "entity".to_string(),
                confidence: 0.9,
                data: json!({ "entityType": "cnpj", "value": m.as_str() }),
                context: None,
            });
        }

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
    async fn extracts_cpf_and_cnpj() {
        let analyzer = EntityAnalyzer::new();
        let input = AnalysisInput {
            text: "Requerente 123.456.789-01, empresa 12.345.678/0001-99.",
            territory_id: "3550308",
            gazette_id: "gaz-1",
        };
        let output = analyzer.analyze(&input).await.unwrap();
        assert_eq!(output.findings.len(), 2);
    }

    #[tokio::test]
    async fn no_entities_yields_no_findings() {
        let analyzer = EntityAnalyzer::new();
        let input = AnalysisInput {
            text: "Sem identificadores aqui.",
            territory_id: "3550308",
            gazette_id: "gaz-1",
        };
        let output = analyzer.analyze(&input).await.unwrap();
        assert!(output.findings.is_empty());
    }
}
