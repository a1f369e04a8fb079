//! The abstract `Crawler` interface. Per-source crawlers are external
//! collaborators; only the contract and an in-memory registry for
//! resolving `spiderType` -> crawler instance live here.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::store::Power;

#[derive(Debug, Error)]
pub enum CrawlerError {
    #[error("crawler failed: {0}")]
    Failed(String),
    #[error("unknown spider type: {0}")]
    UnknownSpiderType(String),
}

/// A single candidate gazette surfaced by a crawl.
#[derive(Debug, Clone)]
pub struct GazetteCandidate {
    pub territory_id: String,
    pub publication_date: DateTime<Utc>,
    pub edition_number: Option<String>,
    pub pdf_url: String,
    pub is_extra_edition: bool,
    pub power: Power,
    pub scraped_at: DateTime<Utc>,
    pub source_text: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// The crawler plug-in interface consumed from external collaborators.
/// `crawl()` may be lazy or eager but must be finite.
#[async_trait]
pub trait Crawler: Send + Sync {
    async fn crawl(&self) -> Result<Vec<GazetteCandidate>, CrawlerError>;
    fn get_request_count(&self) -> u64;
}

/// Constructs a [`Crawler`] for a given `spiderType` + config + date range.
pub trait CrawlerFactory: Send + Sync {
    fn create(
        &self,
        config: &Value,
        date_range: &DateRange,
    ) -> Result<Box<dyn Crawler>, CrawlerError>;
}

/// Resolves `spiderType` to a registered [`CrawlerFactory`].
/// Holding zero factories is valid: crawlers are supplied by the embedding
/// deployment, not this crate.
#[derive(Default, Clone)]
pub struct CrawlerRegistry {
    factories: HashMap<String, Arc<dyn CrawlerFactory>>,
}

impl CrawlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, spider_type: impl Into<String>, factory: Arc<dyn CrawlerFactory>) {
        self.factories.insert(spider_type.into(), factory);
    }

    pub fn resolve(
        &self,
        spider_type: &str,
        config: &Value,
        date_range: &DateRange,
    ) -> Result<Box<dyn Crawler>, CrawlerError> {
        let factory = self
            .factories
            .get(spider_type)
            .ok_or_else(|| CrawlerError::UnknownSpiderType(spider_type.to_string()))?;
        factory.create(config, date_range)
    }

    pub fn registered_count(&self) -> usize {
        self.factories.len()
    }

    pub fn registered_types(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }
}

/// A known (city, spider) pairing the Dispatcher can fan crawl messages out
/// to. The concrete directory of cities is an external collaborator, same
/// boundary as the `Crawler` plug-ins themselves, but the Dispatcher needs
/// *some* source to resolve "all"/"by id"/"by platform" dispatch requests
/// against (`POST /crawl*`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CityDescriptor {
    pub territory_id: String,
    pub spider_id: String,
    pub spider_type: String,
    #[serde(default)]
    pub config: Value,
}

pub trait CityDirectory: Send + Sync {
    fn all(&self) -> Vec<CityDescriptor>;

    fn by_ids(&self, territory_ids: &[String]) -> Vec<CityDescriptor> {
        self.all()
            .into_iter()
            .filter(|c| territory_ids.contains(&c.territory_id))
            .collect()
    }

    fn by_platform(&self, spider_type: &str) -> Vec<CityDescriptor> {
        self.all().into_iter().filter(|c| c.spider_type == spider_type).collect()
    }
}

/// An in-memory directory backed by a fixed list, the default for tests
/// and for deployments that configure their city list statically rather
/// than through a separate management service.
#[derive(Default, Clone)]
pub struct StaticCityDirectory {
    cities: Vec<CityDescriptor>,
}

impl StaticCityDirectory {
    pub fn new(cities: Vec<CityDescriptor>) -> Self {
        Self { cities }
    }

    /// Load a city list from a JSON file (array of [`CityDescriptor`]), the
    /// deployment-time way to populate the directory without a separate
    /// management service.
    pub fn from_json_file(path: &Path) -> Result<Self, CrawlerError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| CrawlerError::Failed(format!("reading {}: {e}", path.display())))?;
        let cities: Vec<CityDescriptor> = serde_json::from_str(&contents)
            .map_err(|e| CrawlerError::Failed(format!("parsing {}: {e}", path.display())))?;
        Ok(Self::new(cities))
    }
}

impl CityDirectory for StaticCityDirectory {
    fn all(&self) -> Vec<CityDescriptor> {
        self.cities.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullCrawler;

    #[async_trait]
    impl Crawler for NullCrawler {
        async fn crawl(&self) -> Result<Vec<GazetteCandidate>, CrawlerError> {
            Ok(vec![])
        }
        fn get_request_count(&self) -> u64 {
            0
        }
    }

    struct NullFactory;
    impl CrawlerFactory for NullFactory {
        fn create(
            &self,
            _config: &Value,
            _date_range: &DateRange,
        ) -> Result<Box<dyn Crawler>, CrawlerError> {
            Ok(Box::new(NullCrawler))
        }
    }

    #[test]
    fn resolve_unknown_spider_type_errors() {
        let registry = CrawlerRegistry::new();
        let range = DateRange {
            start: Utc::now(),
            end: Utc::now(),
        };
        let result = registry.resolve("unknown", &Value::Null, &range);
        assert!(matches!(result, Err(CrawlerError::UnknownSpiderType(_))));
    }

    #[test]
    fn registered_factory_resolves() {
        let mut registry = CrawlerRegistry::new();
        registry.register("sample", Arc::new(NullFactory));
        let range = DateRange {
            start: Utc::now(),
            end: Utc::now(),
        };
        assert!(registry.resolve("sample", &Value::Null, &range).is_ok());
        assert_eq!(registry.registered_count(), 1);
    }

    fn sample_city(territory_id: &str, spider_type: &str) -> CityDescriptor {
        CityDescriptor {
            territory_id: territory_id.to_string(),
            spider_id: format!("sp-{territory_id}"),
            spider_type: spider_type.to_string(),
            config: Value::Null,
        }
    }

    #[test]
    fn static_directory_filters_by_ids_and_platform() {
        let directory = StaticCityDirectory::new(vec![
            sample_city("3550308", "sample"),
            sample_city("3304557", "other"),
        ]);
        assert_eq!(directory.all().len(), 2);
        assert_eq!(directory.by_ids(&["3550308".to_string()]).len(), 1);
        assert_eq!(directory.by_platform("other").len(), 1);
    }

    #[test]
    fn static_directory_loads_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cities.json");
        std::fs::write(
            &path,
            r#"[{"territoryId": "3550308", "spiderId": "sp-sp", "spiderType": "sample"}]"#,
        )
        .unwrap();

        let directory = StaticCityDirectory::from_json_file(&path).unwrap();
        assert_eq!(directory.all().len(), 1);
        assert_eq!(directory.all()[0].territory_id, "3550308");
    }
}
