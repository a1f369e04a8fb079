//! Finding deduplication engine: a stable per-finding hash of normalized
//! fields backs an in-memory 24-hour window, and a similarity score against
//! that window (plus, for concurso findings, a store-backed scan) decides
//! whether an incoming finding is a duplicate.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};

use crate::store::{AnalysisRepository, ConcursoFinding, Finding};

pub const SIMILARITY_THRESHOLD: f64 = 0.85;
pub const WINDOW: i64 = 24 * 3600;

/// The normalized field set used for both hashing and similarity (Open
/// Question resolution: one field list for every finding type).
#[derive(Debug, Clone)]
struct NormalizedFields {
    finding_type: String,
    category: String,
    orgao: String,
    edital_numero: String,
    cargo: String,
    total_vagas: String,
    extracted_date: String,
    territory_id: String,
}

fn normalize(s: &str) -> String {
    s.trim().to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

fn extract_fields(territory_id: &str, extracted_date: &str, finding: &Finding) -> NormalizedFields {
    let data = &finding.data;
    let field = |key: &str| -> String {
        data.get(key)
            .and_then(|v| v.as_str().map(|s| s.to_string()).or_else(|| Some(v.to_string())))
            .map(|s| normalize(&s))
            .unwrap_or_default()
    };
    NormalizedFields {
        finding_type: normalize(&finding.finding_type),
        category: field("category"),
        orgao: field("orgao"),
        edital_numero: field("editalNumero"),
        cargo: field("cargo"),
        total_vagas: field("totalVagas"),
        extracted_date: normalize(extracted_date),
        territory_id: normalize(territory_id),
    }
}

/// Stable hash of the normalized fields, collapsing case and whitespace on
/// the selected fields.
fn stable_hash(fields: &NormalizedFields) -> String {
    let mut hasher = Sha256::new();
    hasher.update(fields.finding_type.as_bytes());
    hasher.update(b"|");
    hasher.update(fields.category.as_bytes());
    hasher.update(b"|");
    hasher.update(fields.orgao.as_bytes());
    hasher.update(b"|");
    hasher.update(fields.edital_numero.as_bytes());
    hasher.update(b"|");
    hasher.update(fields.cargo.as_bytes());
    hasher.update(b"|");
    hasher.update(fields.total_vagas.as_bytes());
    hasher.update(b"|");
    hasher.update(fields.extracted_date.as_bytes());
    hasher.update(b"|");
    hasher.update(fields.territory_id.as_bytes());
    hex::encode(hasher.finalize())
}

/// Weighted similarity across type/category/organization/edital/cargo.
/// Equal weighting across the five comparable fields keeps the score in
/// `[0, 1]`, matching the `>= 0.85` threshold findings are compared against.
fn similarity(a: &NormalizedFields, b: &NormalizedFields) -> f64 {
    if a.territory_id != b.territory_id {
        return 0.0;
    }
    let pairs = [
        (&a.finding_type, &b.finding_type),
        (&a.category, &b.category),
        (&a.orgao, &b.orgao),
        (&a.edital_numero, &b.edital_numero),
        (&a.cargo, &b.cargo),
    ];
    let matches = pairs
        .iter()
        .filter(|(x, y)| !x.is_empty() && x == y)
        .count();
    matches as f64 / pairs.len() as f64
}

struct WindowEntry {
    fields: NormalizedFields,
    seen_at: DateTime<Utc>,
}

/// Per-territory in-memory recent-finding window. One instance is shared
/// across the Analysis worker's runtime; every entry carries a timestamp
/// and is pruned on access rather than by a background sweep.
pub struct DedupEngine {
    windows: Mutex<HashMap<String, Vec<WindowEntry>>>,
}

impl Default for DedupEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DedupEngine {
    pub fn new() -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Decide whether `finding` duplicates something already seen for
    /// `territory_id` in the last 24 hours, checking the in-memory window
    /// and, for `concurso` findings, the store-backed recent scan.
    pub fn is_duplicate(
        &self,
        territory_id: &str,
        extracted_date: &str,
        finding: &Finding,
        analysis_repo: Option<&AnalysisRepository>,
    ) -> bool {
        let candidate = extract_fields(territory_id, extracted_date, finding);
        let now = Utc::now();
        let cutoff = now - Duration::seconds(WINDOW);

        {
            let mut windows = self.windows.lock().unwrap();
            let entries = windows.entry(territory_id.to_string()).or_default();
            entries.retain(|e| e.seen_at >= cutoff);
            if entries
                .iter()
                .any(|e| similarity(&candidate, &e.fields) >= SIMILARITY_THRESHOLD)
            {
                return true;
            }
        }

        if finding.finding_type == "concurso" {
            if let Some(repo) = analysis_repo {
                if let Ok(rows) = repo.recent_concurso_findings(territory_id, cutoff) {
                    if rows.iter().any(|row| {
                        similarity(&candidate, &concurso_fields(territory_id, row)) >= SIMILARITY_THRESHOLD
                    }) {
                        return true;
                    }
                }
            }
        }

        false
    }

    /// Record a finding as seen, so subsequent findings in the same
    /// territory can be compared against it.
    pub fn record(&self, territory_id: &str, extracted_date: &str, finding: &Finding) {
        let fields = extract_fields(territory_id, extracted_date, finding);
        let mut windows = self.windows.lock().unwrap();
        windows
            .entry(territory_id.to_string())
            .or_default()
            .push(WindowEntry {
                fields,
                seen_at: Utc::now(),
            });
    }

    pub fn finding_hash(&self, territory_id: &str, extracted_date: &str, finding: &Finding) -> String {
        stable_hash(&extract_fields(territory_id, extracted_date, finding))
    }
}

fn concurso_fields(territory_id: &str, row: &ConcursoFinding) -> NormalizedFields {
    NormalizedFields {
        finding_type: "concurso".to_string(),
        category: String::new(),
        orgao: row.orgao.as_deref().map(normalize).unwrap_or_default(),
        edital_numero: row.edital_numero.as_deref().map(normalize).unwrap_or_default(),
        cargo: row.cargos.first().map(|s| normalize(s)).unwrap_or_default(),
        total_vagas: row.total_vagas.map(|v| v.to_string()).unwrap_or_default(),
        extracted_date: normalize(&row.created_at.to_rfc3339()),
        territory_id: normalize(territory_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn finding(finding_type: &str, orgao: &str, edital: &str) -> Finding {
        Finding {
            finding_type: finding_type.to_string(),
            confidence: 0.9,
            data: json!({ "orgao": orgao, "editalNumero": edital }),
            context: None,
        }
    }

    #[test]
    fn identical_finding_is_a_duplicate_within_window() {
        let engine = DedupEngine::new();
        let f1 = finding("concurso", "Prefeitura de Sao Paulo", "12/2024");
        engine.record("3550308", "2026-07-28", &f1);

        let f2 = finding("concurso", "  PREFEITURA DE   SAO PAULO ", "12/2024");
        assert!(engine.is_duplicate("3550308", "2026-07-28", &f2, None));
    }

    #[test]
    fn different_territory_is_never_a_duplicate() {
        let engine = DedupEngine::new();
        let f1 = finding("concurso", "Prefeitura de Sao Paulo", "12/2024");
        engine.record("3550308", "2026-07-28", &f1);

        let f2 = finding("concurso", "Prefeitura de Sao Paulo", "12/2024");
        assert!(!engine.is_duplicate("3509502", "2026-07-28", &f2, None));
    }

    #[test]
    fn dissimilar_finding_is_not_a_duplicate() {
        let engine = DedupEngine::new();
        let f1 = finding("concurso", "Prefeitura de Sao Paulo", "12/2024");
        engine.record("3550308", "2026-07-28", &f1);

        let f2 = finding("keyword", "Secretaria de Saude", "99/2024");
        assert!(!engine.is_duplicate("3550308", "2026-07-28", &f2, None));
    }

    #[test]
    fn hash_is_stable_across_whitespace_and_case() {
        let engine = DedupEngine::new();
        let f1 = finding("concurso", "Prefeitura de Sao Paulo", "12/2024");
        let f2 = finding("concurso", "  PREFEITURA DE   SAO PAULO ", "12/2024");
        assert_eq!(
            engine.finding_hash("3550308", "2026-07-28", &f1),
            engine.finding_hash("3550308", "2026-07-28", &f2)
        );
    }
}
