//! Pluggable analyzer backends run by the Analysis worker: `keyword`,
//! `entity`, `concurso`, and `ai` (the LLM-based backend, an external
//! collaborator, only its request/response contract is implemented here).

mod ai;
mod concurso;
mod entity;
mod keyword;

pub use ai::AiAnalyzer;
pub use concurso::ConcursoAnalyzer;
pub use entity::EntityAnalyzer;
pub use keyword::KeywordAnalyzer;

use async_trait::async_trait;
use thiserror::Error;

use crate::store::Finding;

#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("analyzer failed: {0}")]
    Failed(String),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Input handed to every analyzer: the OCR text plus the gazette's
/// identifying fields, so findings can be stamped with territory/gazette
/// context without each analyzer re-deriving it.
#[derive(Debug, Clone)]
pub struct AnalysisInput<'a> {
    pub text: &'a str,
    pub territory_id: &'a str,
    pub gazette_id: &'a str,
}

#[derive(Debug, Clone)]
pub struct AnalyzerOutput {
    pub findings: Vec<Finding>,
    pub processing_time_ms: i64,
}

#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    fn name(&self) -> &'static str;
    async fn analyze(&self, input: &AnalysisInput<'_>) -> Result<AnalyzerOutput, AnalyzerError>;
}
