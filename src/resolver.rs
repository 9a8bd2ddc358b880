//! Source resolution: one [`RawInput`] in, one canonical [`ProductRecord`] out.
//!
//! | Input | Collaborator | Confidence | Identity |
//! |-------|--------------|------------|----------|
//! | `Barcode` | catalog lookup | high | the barcode |
//! | `LabelImage` | preprocessor + label reader | medium, or low when degraded | `label:<sha256 of text>`, or `label:img-<sha256 of image>` when unreadable |
//! | `SearchText` | catalog search + fuzzy match | low | matched barcode, else `search:<sha256 of name>` |
//!
//! Catalog calls are retried on transient failures with exponential backoff
//! starting at `catalog.backoff_base_ms`. Bad nutrition data in an otherwise
//! usable source degrades the record (nutrition absent, with a note) instead
//! of failing the request.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{CandidateSummary, PipelineError};
use crate::label::{parse_label_text, split_ingredients};
use crate::models::{Category, NutritionFacts, ProductRecord, RawInput, SourceConfidence};
use crate::normalize::normalize;
use crate::traits::{
    CatalogError, CatalogProduct, ImagePreprocessor, LabelReader, ModelError, ProductCatalog,
};

/// Valid GTIN lengths: EAN-8, UPC-A, EAN-13, GTIN-14.
const BARCODE_LENGTHS: [usize; 4] = [8, 12, 13, 14];

#[derive(Debug, Clone)]
pub struct ResolverSettings {
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub search_page_size: usize,
    pub match_high_confidence: f64,
    pub match_plausible: f64,
    pub ocr_min_confidence: f64,
    pub preprocess: bool,
}

impl ResolverSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_retries: config.catalog.max_retries,
            backoff_base_ms: config.catalog.backoff_base_ms,
            search_page_size: config.catalog.search_page_size,
            match_high_confidence: config.catalog.match_high_confidence,
            match_plausible: config.catalog.match_plausible,
            ocr_min_confidence: config.ocr.min_confidence,
            preprocess: config.ocr.preprocess,
        }
    }
}

pub struct SourceResolver {
    catalog: Arc<dyn ProductCatalog>,
    reader: Arc<dyn LabelReader>,
    preprocessor: Arc<dyn ImagePreprocessor>,
    settings: ResolverSettings,
}

impl SourceResolver {
    pub fn new(
        catalog: Arc<dyn ProductCatalog>,
        reader: Arc<dyn LabelReader>,
        preprocessor: Arc<dyn ImagePreprocessor>,
        settings: ResolverSettings,
    ) -> Self {
        Self {
            catalog,
            reader,
            preprocessor,
            settings,
        }
    }

    pub async fn resolve(&self, input: &RawInput) -> Result<ProductRecord, PipelineError> {
        match input {
            RawInput::Barcode(code) => self.resolve_barcode(code).await,
            RawInput::LabelImage { bytes, mime } => self.resolve_label(bytes, mime).await,
            RawInput::SearchText(query) => self.resolve_search(query).await,
        }
    }

    async fn resolve_barcode(&self, raw: &str) -> Result<ProductRecord, PipelineError> {
        let code = validate_barcode(raw)?;
        info!(barcode = %code, catalog = self.catalog.name(), "looking up barcode");

        let product = self
            .with_retry(|| self.catalog.lookup(&code))
            .await
            .map_err(|e| match e {
                RetryError::NotFound => PipelineError::ProductNotFound {
                    what: format!("barcode {}", code),
                },
                RetryError::Unavailable { attempts, reason } => PipelineError::SourceUnavailable {
                    source_name: self.catalog.name().to_string(),
                    attempts,
                    reason,
                },
            })?;

        Ok(record_from_catalog(
            product,
            code.clone(),
            SourceConfidence::High,
            Vec::new(),
        ))
    }

    async fn resolve_search(&self, query: &str) -> Result<ProductRecord, PipelineError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(PipelineError::InvalidInput(
                "search text is empty".to_string(),
            ));
        }
        info!(query, catalog = self.catalog.name(), "searching catalog");

        let results = self
            .with_retry(|| self.catalog.search(query, self.settings.search_page_size))
            .await
            .map_err(|e| match e {
                RetryError::NotFound => PipelineError::ProductNotFound {
                    what: format!("no product matching '{}'", query),
                },
                RetryError::Unavailable { attempts, reason } => PipelineError::SourceUnavailable {
                    source_name: self.catalog.name().to_string(),
                    attempts,
                    reason,
                },
            })?;

        let scored = rank_candidates(query, results);
        debug!(candidates = scored.len(), "search candidates ranked");

        let high: Vec<&(f64, CatalogProduct)> = scored
            .iter()
            .filter(|(c, _)| *c >= self.settings.match_high_confidence)
            .collect();
        let plausible: Vec<&(f64, CatalogProduct)> = scored
            .iter()
            .filter(|(c, _)| *c >= self.settings.match_plausible)
            .collect();

        let chosen = match (high.len(), plausible.len()) {
            (1, _) => high[0],
            (0, 1) => plausible[0],
            (0, 0) => {
                return Err(PipelineError::ProductNotFound {
                    what: format!("no product matching '{}'", query),
                })
            }
            (0, _) => return Err(ambiguous(query, &plausible)),
            _ => return Err(ambiguous(query, &high)),
        };

        let (confidence, product) = chosen.clone();
        let name = product.name.clone().unwrap_or_default();
        let identity = match product.code.as_deref().map(validate_barcode) {
            Some(Ok(code)) => code,
            _ => format!("search:{}", short_hash(&name.to_lowercase())),
        };
        let note = format!(
            "Matched '{}' to '{}' by text search (similarity {:.2}); verify the product",
            query, name, confidence
        );
        Ok(record_from_catalog(
            product,
            identity,
            SourceConfidence::Low,
            vec![note],
        ))
    }

    async fn resolve_label(&self, bytes: &[u8], mime: &str) -> Result<ProductRecord, PipelineError> {
        if bytes.is_empty() {
            return Err(PipelineError::InvalidInput("label image is empty".to_string()));
        }

        let (image, mime) = if self.settings.preprocess {
            let preprocessor = Arc::clone(&self.preprocessor);
            let owned = bytes.to_vec();
            let mime_owned = mime.to_string();
            tokio::task::spawn_blocking(move || preprocessor.preprocess(&owned, &mime_owned))
                .await
                .map_err(|e| PipelineError::InvalidInput(format!("image preprocessing failed: {}", e)))?
                .map_err(|e| {
                    PipelineError::InvalidInput(format!("could not read label image: {:#}", e))
                })?
        } else {
            (bytes.to_vec(), mime.to_string())
        };

        info!(bytes = image.len(), reader = self.reader.name(), "reading label");
        let label = self.reader.read(&image, &mime).await.map_err(|e| {
            let reason = match &e {
                ModelError::Disabled => "label reading is not configured ([ocr] provider)".to_string(),
                other => other.to_string(),
            };
            PipelineError::SourceUnavailable {
                source_name: "label reader".to_string(),
                attempts: 1,
                reason,
            }
        })?;

        let text = label.text.trim();
        let readable = !text.is_empty() && label.confidence >= self.settings.ocr_min_confidence;
        let parsed = parse_label_text(text);
        // Unreadable transcriptions collide; key those photos by their bytes.
        let identity = if readable {
            format!("label:{}", short_hash(text))
        } else {
            format!("label:img-{}", short_hash(bytes))
        };
        let name = parsed
            .name
            .clone()
            .unwrap_or_else(|| "Unlabelled product".to_string());
        let category = Category::infer(
            std::iter::once(name.as_str()).chain(parsed.ingredients.iter().map(String::as_str)),
        );

        let mut notes = Vec::new();
        let mut confidence = SourceConfidence::Medium;
        let nutrition = if !readable {
            warn!(confidence = label.confidence, "label text unreadable, nutrition dropped");
            notes.push(format!(
                "Label text was unreadable (confidence {:.2}); nutrition could not be extracted",
                label.confidence
            ));
            confidence = SourceConfidence::Low;
            None
        } else {
            match nutrition_or_note(&parsed.nutrition, "label", &mut notes) {
                Some(facts) => Some(facts),
                None => {
                    confidence = SourceConfidence::Low;
                    None
                }
            }
        };

        Ok(ProductRecord {
            identity,
            name,
            brand: None,
            category,
            ingredients: parsed.ingredients,
            nutrition,
            source_confidence: confidence,
            notes,
        })
    }

    /// Run a catalog call with bounded retries on transient failures.
    async fn with_retry<T, F, Fut>(&self, mut call: F) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CatalogError>>,
    {
        let mut last_err = None;

        for attempt in 0..=self.settings.max_retries {
            if attempt > 0 {
                // Exponential backoff: base, 2×base, 4×base, ...
                let delay =
                    Duration::from_millis(self.settings.backoff_base_ms << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            match call().await {
                Ok(v) => return Ok(v),
                Err(CatalogError::NotFound) => return Err(RetryError::NotFound),
                Err(CatalogError::Fatal(reason)) => {
                    return Err(RetryError::Unavailable {
                        attempts: attempt + 1,
                        reason,
                    })
                }
                Err(CatalogError::Transient(reason)) => {
                    warn!(attempt, %reason, catalog = self.catalog.name(), "catalog call failed, retrying");
                    last_err = Some(reason);
                }
            }
        }

        Err(RetryError::Unavailable {
            attempts: self.settings.max_retries + 1,
            reason: last_err.unwrap_or_else(|| "catalog call failed after retries".to_string()),
        })
    }
}

enum RetryError {
    NotFound,
    Unavailable { attempts: u32, reason: String },
}

/// Strip spaces and dashes and check digits and length.
pub fn validate_barcode(raw: &str) -> Result<String, PipelineError> {
    let code: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect();
    if code.is_empty() || !code.chars().all(|c| c.is_ascii_digit()) {
        return Err(PipelineError::InvalidInput(format!(
            "'{}' is not a barcode: digits only",
            raw.trim()
        )));
    }
    if !BARCODE_LENGTHS.contains(&code.len()) {
        return Err(PipelineError::InvalidInput(format!(
            "'{}' has {} digits; barcodes have 8, 12, 13 or 14",
            code,
            code.len()
        )));
    }
    Ok(code)
}

/// Similarity of `query` to a candidate: the better of name and "brand name".
pub fn match_confidence(query: &str, product: &CatalogProduct) -> f64 {
    let q = query.trim().to_lowercase();
    let Some(name) = product.name.as_deref() else {
        return 0.0;
    };
    let name = name.to_lowercase();
    let by_name = strsim::jaro_winkler(&q, &name);
    let by_brand = product
        .brand
        .as_deref()
        .map(|b| strsim::jaro_winkler(&q, &format!("{} {}", b.to_lowercase(), name)))
        .unwrap_or(0.0);
    by_name.max(by_brand)
}

/// Score candidates, drop duplicates by barcode, best first.
fn rank_candidates(query: &str, results: Vec<CatalogProduct>) -> Vec<(f64, CatalogProduct)> {
    let mut scored: Vec<(f64, CatalogProduct)> = Vec::new();
    for product in results {
        if product.name.is_none() {
            continue;
        }
        let duplicate = product.code.is_some()
            && scored.iter().any(|(_, p)| p.code == product.code);
        if duplicate {
            continue;
        }
        scored.push((match_confidence(query, &product), product));
    }
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    scored
}

fn ambiguous(query: &str, candidates: &[&(f64, CatalogProduct)]) -> PipelineError {
    PipelineError::AmbiguousMatch {
        query: query.to_string(),
        candidates: candidates
            .iter()
            .map(|(confidence, p)| CandidateSummary {
                code: p.code.clone(),
                name: p.name.clone().unwrap_or_default(),
                brand: p.brand.clone(),
                confidence: (confidence * 1000.0).round() / 1000.0,
            })
            .collect(),
    }
}

fn record_from_catalog(
    product: CatalogProduct,
    identity: String,
    confidence: SourceConfidence,
    mut notes: Vec<String>,
) -> ProductRecord {
    let name = product
        .name
        .clone()
        .unwrap_or_else(|| format!("Unknown product {}", identity));
    let ingredients = product
        .ingredients_text
        .as_deref()
        .map(split_ingredients)
        .unwrap_or_default();
    let category = Category::infer(
        product
            .categories
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(name.as_str())),
    );

    let nutrition = if product.nutriments.is_empty() {
        notes.push("The catalog has no nutrition facts for this product".to_string());
        None
    } else {
        nutrition_or_note(&product.nutriments, "catalog", &mut notes)
    };
    if ingredients.is_empty() {
        notes.push("No ingredient list available".to_string());
    }

    ProductRecord {
        identity,
        name,
        brand: product.brand,
        category,
        ingredients,
        nutrition,
        source_confidence: confidence,
        notes,
    }
}

/// Normalize, degrading to `None` plus a note on failure or emptiness.
fn nutrition_or_note(
    raw: &Map<String, Value>,
    origin: &str,
    notes: &mut Vec<String>,
) -> Option<NutritionFacts> {
    match normalize(raw) {
        Ok(facts) if facts.is_empty() => {
            notes.push(format!("No usable nutrition facts found in the {} data", origin));
            None
        }
        Ok(facts) => Some(facts),
        Err(e) => {
            warn!(error = %e, origin, "discarding malformed nutrition data");
            notes.push(format!("Nutrition facts from the {} were discarded: {}", origin, e));
            None
        }
    }
}

/// First 16 hex characters of the SHA-256 of `data`.
pub fn short_hash(data: impl AsRef<[u8]>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_ref());
    let hash = format!("{:x}", hasher.finalize());
    hash[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_barcode() {
        assert_eq!(validate_barcode(" 5449-0000 00996 ").unwrap(), "5449000000996");
        assert_eq!(validate_barcode("12345678").unwrap(), "12345678");
        assert!(validate_barcode("12345").is_err());
        assert!(validate_barcode("54490000009x6").is_err());
        assert!(validate_barcode("").is_err());
    }

    #[test]
    fn test_match_confidence_uses_brand() {
        let p = CatalogProduct {
            name: Some("Classic".into()),
            brand: Some("Coca-Cola".into()),
            ..Default::default()
        };
        assert!(match_confidence("coca-cola classic", &p) > 0.95);
        assert_eq!(
            match_confidence("x", &CatalogProduct::default()),
            0.0
        );
    }

    #[test]
    fn test_short_hash_is_stable() {
        assert_eq!(short_hash("abc"), "ba7816bf8f01cfea");
        assert_eq!(short_hash("abc").len(), 16);
    }

    #[test]
    fn test_rank_candidates_dedups_by_code() {
        let p = |code: &str, name: &str| CatalogProduct {
            code: Some(code.into()),
            name: Some(name.into()),
            ..Default::default()
        };
        let ranked = rank_candidates(
            "oat milk",
            vec![p("1", "Oat Drink"), p("2", "Oat Milk"), p("2", "Oat Milk")],
        );
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].1.code.as_deref(), Some("2"));
        assert_eq!(ranked[0].0, 1.0);
    }
}
