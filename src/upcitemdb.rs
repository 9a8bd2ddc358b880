//! UPCitemdb catalog client (free trial tier, no key).
//!
//! Knows many non-food and regional products that OpenFoodFacts lacks, but
//! carries no nutrition facts or ingredient lists: a hit gives the resolver a
//! name, brand and category path, and the record is marked as missing
//! nutrition.
//!
//! - `GET /prod/trial/lookup?upc=<code>`
//! - `GET /prod/trial/search?s=<query>&type=product`
//!
//! Unknown codes come back as `200` with an empty `items` array.

use async_trait::async_trait;
use serde_json::Value;

use crate::catalog::{category_path, get_json, http_client, text_field};
use crate::config::CatalogConfig;
use crate::traits::{CatalogError, CatalogProduct, ProductCatalog};

pub struct UpcItemDbClient {
    client: reqwest::Client,
    base_url: String,
}

impl UpcItemDbClient {
    pub fn new(config: &CatalogConfig) -> anyhow::Result<Self> {
        Ok(Self {
            client: http_client(config)?,
            base_url: config.upcitemdb_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ProductCatalog for UpcItemDbClient {
    fn name(&self) -> &str {
        "UPCitemdb"
    }

    async fn lookup(&self, code: &str) -> Result<CatalogProduct, CatalogError> {
        let url = format!("{}/prod/trial/lookup", self.base_url);
        let json = get_json(self.client.get(&url).query(&[("upc", code)])).await?;

        let item = items(&json).first().ok_or(CatalogError::NotFound)?;
        let mut parsed = parse_item(item);
        if parsed.code.is_none() {
            parsed.code = Some(code.to_string());
        }
        Ok(parsed)
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<CatalogProduct>, CatalogError> {
        let url = format!("{}/prod/trial/search", self.base_url);
        let json = get_json(
            self.client
                .get(&url)
                .query(&[("s", query), ("type", "product")]),
        )
        .await?;

        Ok(items(&json).iter().take(limit).map(parse_item).collect())
    }
}

fn items(json: &Value) -> &[Value] {
    json.get("items")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

/// Map one UPCitemdb item onto a [`CatalogProduct`].
pub fn parse_item(item: &Value) -> CatalogProduct {
    CatalogProduct {
        code: text_field(item, &["ean", "upc", "gtin"]),
        name: text_field(item, &["title"]),
        brand: text_field(item, &["brand"]),
        categories: text_field(item, &["category"])
            .map(|c| category_path(&c))
            .unwrap_or_default(),
        ingredients_text: None,
        nutriments: Default::default(),
    }
}
