//! Barcode Lookup catalog client (`api.barcodelookup.com`, API key required).
//!
//! - `GET /v3/products?barcode=<code>&key=<key>`
//! - `GET /v3/products?search=<query>&key=<key>`
//!
//! Products carry names, brands, category paths and ingredient lists.
//! Their `nutrition_facts` are per serving with no serving size, so they are
//! not passed on: the per-100 g score would be wrong.

use async_trait::async_trait;
use serde_json::Value;

use crate::catalog::{category_path, get_json, http_client, text_field};
use crate::config::CatalogConfig;
use crate::traits::{CatalogError, CatalogProduct, ProductCatalog};

pub struct BarcodeLookupClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl BarcodeLookupClient {
    /// Fails when the key variable named by `catalog.barcodelookup_api_key_env` is unset.
    pub fn new(config: &CatalogConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var(&config.barcodelookup_api_key_env).map_err(|_| {
            anyhow::anyhow!(
                "{} environment variable not set (needed for the barcodelookup catalog)",
                config.barcodelookup_api_key_env
            )
        })?;
        Ok(Self {
            client: http_client(config)?,
            base_url: config.barcodelookup_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    async fn products(&self, param: &str, value: &str) -> Result<Vec<Value>, CatalogError> {
        let url = format!("{}/v3/products", self.base_url);
        let json = get_json(self.client.get(&url).query(&[
            (param, value),
            ("formatted", "y"),
            ("key", self.api_key.as_str()),
        ]))
        .await?;
        Ok(json
            .get("products")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl ProductCatalog for BarcodeLookupClient {
    fn name(&self) -> &str {
        "Barcode Lookup"
    }

    async fn lookup(&self, code: &str) -> Result<CatalogProduct, CatalogError> {
        let products = self.products("barcode", code).await?;
        let product = products.first().ok_or(CatalogError::NotFound)?;
        let mut parsed = parse_product(product);
        if parsed.code.is_none() {
            parsed.code = Some(code.to_string());
        }
        Ok(parsed)
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<CatalogProduct>, CatalogError> {
        let products = self.products("search", query).await?;
        Ok(products.iter().take(limit).map(parse_product).collect())
    }
}

/// Map one Barcode Lookup product onto a [`CatalogProduct`].
pub fn parse_product(product: &Value) -> CatalogProduct {
    CatalogProduct {
        code: text_field(product, &["barcode_number"]),
        name: text_field(product, &["title", "product_name"]),
        brand: text_field(product, &["brand", "manufacturer"]),
        categories: text_field(product, &["category"])
            .map(|c| category_path(&c))
            .unwrap_or_default(),
        ingredients_text: text_field(product, &["ingredients"]),
        nutriments: Default::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_product_drops_serving_nutrition() {
        let p = parse_product(&json!({
            "barcode_number": "0049000028911",
            "title": "",
            "product_name": "Diet Cola",
            "brand": "Coca-Cola",
            "category": "Food, Beverages & Tobacco > Beverages > Soda",
            "ingredients": "Carbonated water, caramel color, aspartame, phosphoric acid",
            "nutrition_facts": "Energy 1 kcal, Sodium 40 mg"
        }));
        assert_eq!(p.code.as_deref(), Some("0049000028911"));
        assert_eq!(p.name.as_deref(), Some("Diet Cola"));
        assert_eq!(p.brand.as_deref(), Some("Coca-Cola"));
        assert!(p.ingredients_text.unwrap().contains("aspartame"));
        assert!(p.nutriments.is_empty());
        assert_eq!(p.categories.len(), 3);
    }

    #[test]
    fn test_missing_key_is_reported() {
        let config = CatalogConfig {
            barcodelookup_api_key_env: "HL_TEST_BARCODE_LOOKUP_KEY_UNSET".into(),
            ..Default::default()
        };
        let err = BarcodeLookupClient::new(&config).err().unwrap();
        assert!(err.to_string().contains("HL_TEST_BARCODE_LOOKUP_KEY_UNSET"));
    }
}
