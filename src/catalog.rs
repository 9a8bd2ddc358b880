//! Product catalogs and the fallback chain in front of them.
//!
//! Barcodes are looked up in the primary catalog first (`catalog.provider`)
//! and then in each of `catalog.fallbacks`, in order, until one of them knows
//! the product:
//!
//! | Catalog | Module | Nutrition | Ingredients |
//! |---------|--------|-----------|-------------|
//! | OpenFoodFacts | [`crate::openfoodfacts`] | per 100 g | yes |
//! | UPCitemdb | [`crate::upcitemdb`] | no | no |
//! | Barcode Lookup | [`crate::barcodelookup`] | no (per serving only) | yes |
//!
//! The HTTP clients share [`get_json`] so every catalog classifies failures
//! the same way:
//!
//! | Outcome | Classified as |
//! |---------|---------------|
//! | 404 | `NotFound` |
//! | 429, 5xx, connect/timeout error | `Transient` |
//! | other 4xx, undecodable body | `Fatal` |

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::barcodelookup::BarcodeLookupClient;
use crate::config::CatalogConfig;
use crate::openfoodfacts::OpenFoodFactsClient;
use crate::traits::{CatalogError, CatalogProduct, DisabledCatalog, ProductCatalog};
use crate::upcitemdb::UpcItemDbClient;

/// Names accepted in `catalog.provider` (besides `disabled`) and `catalog.fallbacks`.
pub const CATALOG_NAMES: [&str; 3] = ["openfoodfacts", "upcitemdb", "barcodelookup"];

/// Build the catalog chain described by `config`.
pub fn create_catalog(config: &CatalogConfig) -> anyhow::Result<Arc<dyn ProductCatalog>> {
    if config.provider == "disabled" {
        return Ok(Arc::new(DisabledCatalog));
    }

    let mut chain = vec![create_one(&config.provider, config)?];
    for name in &config.fallbacks {
        chain.push(create_one(name, config)?);
    }
    if chain.len() == 1 {
        return Ok(chain.remove(0));
    }
    Ok(Arc::new(FallbackCatalog::new(chain)))
}

fn create_one(name: &str, config: &CatalogConfig) -> anyhow::Result<Arc<dyn ProductCatalog>> {
    let catalog: Arc<dyn ProductCatalog> = match name {
        "openfoodfacts" => Arc::new(OpenFoodFactsClient::new(config)?),
        "upcitemdb" => Arc::new(UpcItemDbClient::new(config)?),
        "barcodelookup" => Arc::new(BarcodeLookupClient::new(config)?),
        other => anyhow::bail!(
            "Unknown catalog: '{}'. Must be one of {}.",
            other,
            CATALOG_NAMES.join(", ")
        ),
    };
    Ok(catalog)
}

/// Shared reqwest client with the catalog timeout and user agent.
pub(crate) fn http_client(config: &CatalogConfig) -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .user_agent(config.user_agent.clone())
        .build()?)
}

/// Send one request and classify the outcome.
pub(crate) async fn get_json(req: reqwest::RequestBuilder) -> Result<Value, CatalogError> {
    let response = req.send().await.map_err(classify_transport)?;
    let status = response.status();

    if status.is_success() {
        return response
            .json::<Value>()
            .await
            .map_err(|e| CatalogError::Fatal(format!("invalid JSON from catalog: {}", e)));
    }
    if status.as_u16() == 404 {
        return Err(CatalogError::NotFound);
    }

    let body = response.text().await.unwrap_or_default();
    let body: String = body.chars().take(200).collect();
    if status.as_u16() == 429 || status.is_server_error() {
        Err(CatalogError::Transient(format!("HTTP {}: {}", status, body)))
    } else {
        Err(CatalogError::Fatal(format!("HTTP {}: {}", status, body)))
    }
}

fn classify_transport(e: reqwest::Error) -> CatalogError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        CatalogError::Transient(e.to_string())
    } else {
        CatalogError::Fatal(e.to_string())
    }
}

/// Non-empty, trimmed string field of a JSON object.
pub(crate) fn text_field(obj: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| obj.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

/// `"Food, Beverages & Tobacco > Beverages > Soft Drinks"` as separate tags.
pub(crate) fn category_path(path: &str) -> Vec<String> {
    path.split('>')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Tries each catalog in turn until one knows the product.
///
/// A catalog that answers `NotFound` (or an empty search) passes the request
/// on. When every catalog fails, the combined error is `Transient` if any
/// failure was transient (so the resolver retries the chain), else
/// `NotFound` if any catalog answered cleanly, else `Fatal`.
pub struct FallbackCatalog {
    catalogs: Vec<Arc<dyn ProductCatalog>>,
    name: String,
}

impl FallbackCatalog {
    pub fn new(catalogs: Vec<Arc<dyn ProductCatalog>>) -> Self {
        let name = catalogs
            .iter()
            .map(|c| c.name())
            .collect::<Vec<_>>()
            .join(" → ");
        Self { catalogs, name }
    }
}

#[derive(Default)]
struct Failures {
    not_found: bool,
    transient: Option<String>,
    fatal: Option<String>,
}

impl Failures {
    fn record(&mut self, catalog: &dyn ProductCatalog, err: CatalogError) {
        match err {
            CatalogError::NotFound => {
                debug!(catalog = catalog.name(), "not in catalog, trying next");
                self.not_found = true;
            }
            CatalogError::Transient(reason) => {
                warn!(catalog = catalog.name(), %reason, "catalog unavailable, trying next");
                self.transient = Some(format!("{}: {}", catalog.name(), reason));
            }
            CatalogError::Fatal(reason) => {
                warn!(catalog = catalog.name(), %reason, "catalog failed, trying next");
                self.fatal = Some(format!("{}: {}", catalog.name(), reason));
            }
        }
    }

    fn into_error(self) -> CatalogError {
        match (self.transient, self.not_found, self.fatal) {
            (Some(reason), _, _) => CatalogError::Transient(reason),
            (None, true, _) => CatalogError::NotFound,
            (None, false, Some(reason)) => CatalogError::Fatal(reason),
            (None, false, None) => CatalogError::NotFound,
        }
    }
}

#[async_trait]
impl ProductCatalog for FallbackCatalog {
    fn name(&self) -> &str {
        &self.name
    }

    async fn lookup(&self, code: &str) -> Result<CatalogProduct, CatalogError> {
        let mut failures = Failures::default();
        for catalog in &self.catalogs {
            match catalog.lookup(code).await {
                Ok(product) => {
                    info!(catalog = catalog.name(), barcode = code, "product found");
                    return Ok(product);
                }
                Err(e) => failures.record(catalog.as_ref(), e),
            }
        }
        Err(failures.into_error())
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<CatalogProduct>, CatalogError> {
        let mut failures = Failures::default();
        for catalog in &self.catalogs {
            match catalog.search(query, limit).await {
                Ok(results) if !results.is_empty() => return Ok(results),
                Ok(_) => failures.not_found = true,
                Err(e) => failures.record(catalog.as_ref(), e),
            }
        }
        match failures.into_error() {
            CatalogError::NotFound => Ok(Vec::new()),
            other => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Stub {
        name: &'static str,
        lookup: Result<CatalogProduct, CatalogError>,
        calls: AtomicUsize,
    }

    impl Stub {
        fn new(name: &'static str, lookup: Result<CatalogProduct, CatalogError>) -> Arc<Self> {
            Arc::new(Self {
                name,
                lookup,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ProductCatalog for Stub {
        fn name(&self) -> &str {
            self.name
        }

        async fn lookup(&self, _code: &str) -> Result<CatalogProduct, CatalogError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.lookup.clone()
        }

        async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<CatalogProduct>, CatalogError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.lookup.clone().map(|p| vec![p])
        }
    }

    fn chain(stubs: &[Arc<Stub>]) -> FallbackCatalog {
        FallbackCatalog::new(
            stubs
                .iter()
                .map(|s| Arc::clone(s) as Arc<dyn ProductCatalog>)
                .collect(),
        )
    }

    fn product(name: &str) -> CatalogProduct {
        CatalogProduct {
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_first_hit_wins() {
        let first = Stub::new("first", Ok(product("Oat Drink")));
        let second = Stub::new("second", Ok(product("Other")));
        let fallback = chain(&[first.clone(), second.clone()]);

        let found = fallback.lookup("12345678").await.unwrap();
        assert_eq!(found.name.as_deref(), Some("Oat Drink"));
        assert_eq!(second.calls.load(Ordering::SeqCst), 0);
        assert_eq!(fallback.name(), "first → second");
    }

    #[tokio::test]
    async fn test_not_found_passes_to_next() {
        let first = Stub::new("first", Err(CatalogError::NotFound));
        let second = Stub::new("second", Ok(product("Cola")));
        let fallback = chain(&[first.clone(), second]);

        let found = fallback.lookup("12345678").await.unwrap();
        assert_eq!(found.name.as_deref(), Some("Cola"));
        assert_eq!(first.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_combined_errors() {
        let fallback = chain(&[
            Stub::new("a", Err(CatalogError::NotFound)),
            Stub::new("b", Err(CatalogError::Fatal("HTTP 403".into()))),
        ]);
        assert_eq!(fallback.lookup("1").await.unwrap_err(), CatalogError::NotFound);

        let fallback = chain(&[
            Stub::new("a", Err(CatalogError::NotFound)),
            Stub::new("b", Err(CatalogError::Transient("HTTP 503".into()))),
        ]);
        assert!(matches!(
            fallback.lookup("1").await.unwrap_err(),
            CatalogError::Transient(reason) if reason.starts_with("b:")
        ));

        let fallback = chain(&[Stub::new("a", Err(CatalogError::Fatal("HTTP 401".into())))]);
        assert!(matches!(fallback.lookup("1").await.unwrap_err(), CatalogError::Fatal(_)));
    }

    #[tokio::test]
    async fn test_search_all_empty_is_empty() {
        let fallback = chain(&[
            Stub::new("a", Err(CatalogError::NotFound)),
            Stub::new("b", Err(CatalogError::NotFound)),
        ]);
        assert!(fallback.search("cola", 5).await.unwrap().is_empty());
    }

    #[test]
    fn test_category_path() {
        assert_eq!(
            category_path("Food, Beverages & Tobacco > Beverages > Soft Drinks"),
            vec!["Food, Beverages & Tobacco", "Beverages", "Soft Drinks"]
        );
        assert!(category_path("").is_empty());
    }

    #[test]
    fn test_disabled_provider_ignores_fallbacks() {
        let config = CatalogConfig {
            provider: "disabled".into(),
            fallbacks: vec!["upcitemdb".into()],
            ..Default::default()
        };
        let catalog = create_catalog(&config).unwrap();
        assert_eq!(catalog.name(), "disabled catalog");
    }

    #[test]
    fn test_chain_name_from_config() {
        let config = CatalogConfig {
            fallbacks: vec!["upcitemdb".into()],
            ..Default::default()
        };
        let catalog = create_catalog(&config).unwrap();
        assert_eq!(catalog.name(), "OpenFoodFacts → UPCitemdb");
    }
}
