//! Bit-exact cache key formats.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};

/// `ocr:{base64url(pdfUrl, no padding)}`
pub fn ocr_key(pdf_url: &str) -> String {
    format!("ocr:{}", URL_SAFE_NO_PAD.encode(pdf_url))
}

/// `analysis:dedup:{territoryId}:{gazetteId}:{configHash}`
pub fn analysis_dedup_key(territory_id: &str, gazette_id: &str, config_hash: &str) -> String {
    format!("analysis:dedup:{territory_id}:{gazette_id}:{config_hash}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ocr_key_uses_unpadded_url_safe_base64() {
        let key = ocr_key("https://example.com/gazette.pdf?x=1");
        assert!(key.starts_with("ocr:"));
        assert!(!key.contains('='));
        assert!(!key.contains('/'));
    }

    #[test]
    fn analysis_dedup_key_matches_spec_format() {
        let key = analysis_dedup_key("3550308", "gaz-1", "abc123");
        assert_eq!(key, "analysis:dedup:3550308:gaz-1:abc123");
    }
}
