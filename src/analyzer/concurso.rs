//! Concurso (Brazilian public-service competition) extraction, the
//! first-class finding type with its own store table (`ConcursoFinding`).
//! This is a regex-based reference implementation; `use_ai_extraction`
//! configuration can route through [`super::AiAnalyzer`] instead, since the
//! LLM-based analyzer backend is an external collaborator.

use async_trait::async_trait;
use regex::Regex;
use serde_json::json;
use std::time::Instant;

use super::{AnalysisBackend, AnalysisInput, AnalyzerError, AnalyzerOutput};
use crate::store::Finding;

pub struct ConcursoAnalyzer {
    edital_re: Regex,
    vagas_re: Regex,
    orgao_re: Regex,
}

impl Default for ConcursoAnalyzer {
    fn default() -> Self {
        Self {
            edital_re: Regex::new(r"(?i)edital\s*n[º°o]?\s*[:.]?\s*([0-9./\-]+)").unwrap(),
            vagas_re: Regex::new(r"(?i)(\d+)\s*vagas?").unwrap(),
            orgao_re: Regex::new(r"(?i)(prefeitura|secretaria)[^\n.]{0,80}").unwrap(),
        }
    }
}

impl ConcursoAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AnalysisBackend for ConcursoAnalyzer {
    fn name(&self) -> &'static str {
        "concurso"
    }

    async fn analyze(&self, input: &AnalysisInput<'_>) -> Result<AnalyzerOutput, AnalyzerError> {
        let start = Instant::now();

        if !input.text.to_lowercase().contains("concurso") {
            return Ok(AnalyzerOutput {
                findings: vec![],
                processing_time_ms: start.elapsed().as_millis() as i64,
            });
        }

        let edital_numero = self
            .edital_re
            .captures(input.text)
            .map(|c| c[1].to_string());
        let total_vagas: Option<i64> = self
            .vagas_re
            .captures(input.text)
            .and_then(|c| c[1].parse().ok());
        let orgao = self
            .orgao_re
            .find(input.text)
            .map(|m| m.as_str().trim().to_string());

        let confidence = [edital_numero.is_some(), total_vagas.is_some(), orgao.is_some()]
            .iter()
            .filter(|present| **present)
            .count() as f64
            / 3.0;

        let finding = Finding {
            finding_type: "concurso".to_string(),
            confidence: confidence.max(0.34),
            data: json!({
                "editalNumero": edital_numero,
                "totalVagas": total_vagas,
                "orgao": orgao,
            }),
            context: None,
        };

        Ok(AnalyzerOutput {
            findings: vec![finding],
            processing_time_ms: start.elapsed().as_millis() as i64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn extracts_edital_and_vagas() {
        let analyzer = ConcursoAnalyzer::new();
        let input = AnalysisInput {
            text: "A Prefeitura Municipal abre CONCURSO público, Edital n. 12/2024, 30 vagas.",
            territory_id: "3550308",
            gazette_id: "gaz-1",
        };
        let output = analyzer.analyze(&input).await.unwrap();
        assert_eq!(output.findings.len(), 1);
        assert_eq!(output.findings[0].data["editalNumero"], "12/2024");
        assert_eq!(output.findings[0].data["totalVagas"], 30);
    }

    #[tokio::test]
    async fn no_concurso_mention_yields_no_findings() {
        let analyzer = ConcursoAnalyzer::new();
        let input = AnalysisInput {
            text: "Ata da reunião ordinária de quarta-feira.",
            territory_id: "3550308",
            gazette_id: "gaz-1",
        };
        let output = analyzer.analyze(&input).await.unwrap();
        assert!(output.findings.is_empty());
    }
}
