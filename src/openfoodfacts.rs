//! OpenFoodFacts catalog client.
//!
//! Two endpoints are used:
//!
//! - `GET /api/v2/product/{code}.json` for barcode lookup. OpenFoodFacts
//!   answers unknown codes with either HTTP 404 or `{"status": 0}`.
//! - `GET /cgi/search.pl?search_terms=...&json=1` for text search.
//!
//! Each call is a single attempt classified by [`crate::catalog::get_json`];
//! the resolver owns retries. A `{"status": 0}` body or a missing `product`
//! also counts as `NotFound`.

use async_trait::async_trait;
use serde_json::Value;

use crate::catalog::{get_json, http_client, text_field};
use crate::config::CatalogConfig;
use crate::traits::{CatalogError, CatalogProduct, ProductCatalog};

const PRODUCT_FIELDS: &str =
    "code,product_name,product_name_en,generic_name,brands,categories_tags,ingredients_text,ingredients_text_en,nutriments";

pub struct OpenFoodFactsClient {
    client: reqwest::Client,
    base_url: String,
}

impl OpenFoodFactsClient {
    pub fn new(config: &CatalogConfig) -> anyhow::Result<Self> {
        Ok(Self {
            client: http_client(config)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ProductCatalog for OpenFoodFactsClient {
    fn name(&self) -> &str {
        "OpenFoodFacts"
    }

    async fn lookup(&self, code: &str) -> Result<CatalogProduct, CatalogError> {
        let url = format!("{}/api/v2/product/{}.json", self.base_url, code);
        let json = get_json(self.client.get(&url).query(&[("fields", PRODUCT_FIELDS)])).await?;

        if json.get("status").and_then(Value::as_i64) == Some(0) {
            return Err(CatalogError::NotFound);
        }
        let product = json.get("product").ok_or(CatalogError::NotFound)?;
        let mut parsed = parse_product(product);
        if parsed.code.is_none() {
            parsed.code = Some(code.to_string());
        }
        Ok(parsed)
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<CatalogProduct>, CatalogError> {
        let url = format!("{}/cgi/search.pl", self.base_url);
        let page_size = limit.to_string();
        let json = get_json(self.client.get(&url).query(&[
            ("search_terms", query),
            ("search_simple", "1"),
            ("action", "process"),
            ("json", "1"),
            ("page_size", page_size.as_str()),
            ("fields", PRODUCT_FIELDS),
        ]))
        .await?;

        let products = json
            .get("products")
            .and_then(Value::as_array)
            .map(|items| items.iter().take(limit).map(parse_product).collect())
            .unwrap_or_default();
        Ok(products)
    }
}

/// Extract the fields the pipeline needs from an OpenFoodFacts product object.
pub fn parse_product(product: &Value) -> CatalogProduct {
    let text = |keys: &[&str]| text_field(product, keys);

    let code = match product.get("code") {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };

    let brand = text(&["brands"]).and_then(|b| {
        b.split(',')
            .map(str::trim)
            .find(|s| !s.is_empty())
            .map(str::to_string)
    });

    let categories = product
        .get("categories_tags")
        .and_then(Value::as_array)
        .map(|tags| {
            tags.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let nutriments = product
        .get("nutriments")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    CatalogProduct {
        code,
        name: text(&["product_name", "product_name_en", "generic_name"]),
        brand,
        categories,
        ingredients_text: text(&["ingredients_text", "ingredients_text_en"]),
        nutriments,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_product() {
        let p = parse_product(&json!({
            "code": "3017620422003",
            "product_name": "  ",
            "product_name_en": "Hazelnut Spread",
            "brands": "Ferrero, Nutella",
            "categories_tags": ["en:spreads", "en:sweet-spreads"],
            "ingredients_text": "Sugar, palm oil, hazelnuts 13%",
            "nutriments": { "sugars_100g": 56.3, "salt_100g": 0.107 }
        }));
        assert_eq!(p.code.as_deref(), Some("3017620422003"));
        assert_eq!(p.name.as_deref(), Some("Hazelnut Spread"));
        assert_eq!(p.brand.as_deref(), Some("Ferrero"));
        assert_eq!(p.categories.len(), 2);
        assert_eq!(p.nutriments["sugars_100g"], 56.3);
    }

    #[test]
    fn test_parse_product_tolerates_missing_fields() {
        let p = parse_product(&json!({ "code": 12345678 }));
        assert_eq!(p.code.as_deref(), Some("12345678"));
        assert!(p.name.is_none());
        assert!(p.nutriments.is_empty());
        assert!(p.categories.is_empty());
    }
}
