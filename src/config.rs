//! Environment configuration.
//!
//! Loaded from `.env` (via `dotenvy`) plus process environment, with an
//! optional `gazette.toml` for the parts that don't fit comfortably in
//! environment variables (the per-analyzer settings).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingVar(String),
    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),
    #[error("failed to read config file {0}: {1}")]
    Io(PathBuf, std::io::Error),
    #[error("failed to parse config file {0}: {1}")]
    Parse(PathBuf, toml::de::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerSettings {
    pub enabled: bool,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_analyzer_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub use_ai_extraction: bool,
    #[serde(default)]
    pub model: Option<String>,
}

fn default_analyzer_timeout_secs() -> u64 {
    20
}

impl Default for AnalyzerSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            priority: 0,
            timeout_secs: default_analyzer_timeout_secs(),
            use_ai_extraction: false,
            model: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EnabledAnalyzers {
    #[serde(default)]
    pub keyword: AnalyzerSettings,
    #[serde(default)]
    pub entity: AnalyzerSettings,
    #[serde(default)]
    pub concurso: AnalyzerSettings,
    #[serde(default)]
    pub ai: AnalyzerSettings,
}

/// The environment configuration enumerated in the external-interfaces
/// section: API keys, analyzer toggles, webhook/queue tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub mistral_api_key: String,
    #[serde(default)]
    pub openai_api_key: Option<String>,
    #[serde(default)]
    pub pdf_object_store_public_url: Option<String>,
    #[serde(default)]
    pub ocr_provider_endpoint: Option<String>,
    #[serde(default)]
    pub ai_analyzer_endpoint: Option<String>,
    #[serde(default)]
    pub city_directory_file: Option<PathBuf>,
    #[serde(default)]
    pub enabled_analyzers: EnabledAnalyzers,
    #[serde(default)]
    pub webhook_endpoint: Option<String>,
    #[serde(default = "default_queue_batch_size")]
    pub queue_batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries_per_message: u32,
    #[serde(default = "default_ocr_storage_retries")]
    pub ocr_storage_retries: u32,
    #[serde(default = "default_ocr_storage_base_delay_ms")]
    pub ocr_storage_base_delay_ms: u64,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_keywords")]
    pub keywords: Vec<String>,
}

fn default_keywords() -> Vec<String> {
    vec![
        "concurso público".to_string(),
        "edital".to_string(),
        "nomeação".to_string(),
        "exoneração".to_string(),
        "licitação".to_string(),
    ]
}

fn default_queue_batch_size() -> usize {
    100
}

fn default_max_retries() -> u32 {
    3
}

fn default_ocr_storage_retries() -> u32 {
    3
}

fn default_ocr_storage_base_delay_ms() -> u64 {
    1000
}

fn default_db_path() -> PathBuf {
    PathBuf::from("gazette.sqlite3")
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Config {
    /// Load from `.env`/process environment, optionally overlaid with a
    /// TOML file for the analyzer settings block.
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let mistral_api_key = std::env::var("MISTRAL_API_KEY")
            .map_err(|_| ConfigError::MissingVar("MISTRAL_API_KEY".into()))?;

        let mut config = Config {
            mistral_api_key,
            openai_api_key: std::env::var("OPENAI_API_KEY").ok(),
            pdf_object_store_public_url: std::env::var("PDF_OBJECT_STORE_PUBLIC_URL").ok(),
            ocr_provider_endpoint: std::env::var("OCR_PROVIDER_ENDPOINT").ok(),
            ai_analyzer_endpoint: std::env::var("AI_ANALYZER_ENDPOINT").ok(),
            city_directory_file: std::env::var("CITY_DIRECTORY_FILE").ok().map(PathBuf::from),
            enabled_analyzers: EnabledAnalyzers::default(),
            webhook_endpoint: std::env::var("WEBHOOK_ENDPOINT").ok(),
            queue_batch_size: env_parsed("QUEUE_BATCH_SIZE", default_queue_batch_size())?,
            max_retries_per_message: env_parsed("MAX_RETRIES_PER_MESSAGE", default_max_retries())?,
            ocr_storage_retries: env_parsed("OCR_STORAGE_RETRIES", default_ocr_storage_retries())?,
            ocr_storage_base_delay_ms: env_parsed(
                "OCR_STORAGE_BASE_DELAY_MS",
                default_ocr_storage_base_delay_ms(),
            )?,
            db_path: std::env::var("DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| default_db_path()),
            host: std::env::var("HOST").unwrap_or_else(|_| default_host()),
            port: env_parsed("PORT", default_port())?,
            keywords: default_keywords(),
        };

        if let Ok(toml_path) = std::env::var("GAZETTE_CONFIG_FILE") {
            config.overlay_toml(Path::new(&toml_path))?;
        }

        Ok(config)
    }

    fn overlay_toml(&mut self, path: &Path) -> Result<()> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let overlay: TomlOverlay =
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        if let Some(analyzers) = overlay.enabled_analyzers {
            self.enabled_analyzers = analyzers;
        }
        if let Some(keywords) = overlay.keywords {
            self.keywords = keywords;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct TomlOverlay {
    enabled_analyzers: Option<EnabledAnalyzers>,
    #[serde(default)]
    keywords: Option<Vec<String>>,
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string(), raw)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analyzer_settings_default_disabled() {
        let settings = AnalyzerSettings::default();
        assert!(!settings.enabled);
        assert_eq!(settings.timeout_secs, 20);
    }

    #[test]
    fn env_parsed_falls_back_to_default() {
        std::env::remove_var("GAZETTE_TEST_UNSET_KEY");
        let value: usize = env_parsed("GAZETTE_TEST_UNSET_KEY", 42).unwrap();
        assert_eq!(value, 42);
    }
}
