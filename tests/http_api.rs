//! The HTTP API over a pipeline with fake collaborators.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use healthlens::analyst::AnalystAgent;
use healthlens::config::ScoringConfig;
use healthlens::history::InMemoryHistoryStore;
use healthlens::pipeline::Pipeline;
use healthlens::reconcile::VerdictReconciler;
use healthlens::resolver::{ResolverSettings, SourceResolver};
use healthlens::server;
use healthlens::traits::{
    CatalogError, CatalogProduct, DisabledLabelReader, NoopPreprocessor, ProductCatalog,
};
use healthlens::llm::DisabledModel;

const OATS: &str = "8710400000011";

struct OneProduct;

#[async_trait]
impl ProductCatalog for OneProduct {
    fn name(&self) -> &str {
        "one product"
    }

    async fn lookup(&self, code: &str) -> Result<CatalogProduct, CatalogError> {
        if code != OATS {
            return Err(CatalogError::NotFound);
        }
        let nutriments = json!({
            "energy-kcal_100g": 372,
            "sugars_100g": 1.1,
            "saturated-fat_100g": 1.3,
            "sodium_100g": 0.006,
            "fiber_100g": 10.1,
            "proteins_100g": 13.5,
            "fat_100g": 7
        });
        Ok(CatalogProduct {
            code: Some(OATS.into()),
            name: Some("Rolled Oats".into()),
            brand: None,
            categories: vec!["en:cereals-and-potatoes".into(), "en:breakfast-cereals".into()],
            ingredients_text: Some("Whole grain oat flakes".into()),
            nutriments: nutriments.as_object().cloned().unwrap_or_default(),
        })
    }

    async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<CatalogProduct>, CatalogError> {
        Ok(vec![])
    }
}

async fn spawn_api() -> String {
    let resolver = SourceResolver::new(
        Arc::new(OneProduct),
        Arc::new(DisabledLabelReader),
        Arc::new(NoopPreprocessor),
        ResolverSettings {
            max_retries: 0,
            backoff_base_ms: 1,
            search_page_size: 5,
            match_high_confidence: 0.92,
            match_plausible: 0.80,
            ocr_min_confidence: 0.5,
            preprocess: false,
        },
    );
    let pipeline = Pipeline::new(
        resolver,
        AnalystAgent::new(Arc::new(DisabledModel)),
        VerdictReconciler::new(ScoringConfig::default()),
        Arc::new(InMemoryHistoryStore::new(300)),
        Duration::from_secs(10),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, server::router(Arc::new(pipeline)))
            .await
            .unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_health() {
    let base = spawn_api().await;
    let body: Value = reqwest::get(format!("{}/health", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_analyze_then_history() {
    let base = spawn_api().await;
    let http = reqwest::Client::new();

    let resp = http
        .post(format!("{}/analyze", base))
        .json(&json!({"barcode": OATS}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let verdict: Value = resp.json().await.unwrap();
    assert_eq!(verdict["product_identity"], OATS);
    assert_eq!(verdict["band"], "Good");
    assert_eq!(verdict["ai_assessed"], false);

    let listed: Value = http
        .get(format!("{}/history", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed["entries"].as_array().unwrap().len(), 1);

    let shown = http
        .get(format!("{}/history/{}", base, OATS))
        .send()
        .await
        .unwrap();
    assert_eq!(shown.status(), 200);

    let stats: Value = http
        .get(format!("{}/history/stats", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["total"], 1);
    assert_eq!(stats["by_band"]["Good"], 1);

    let filtered: Value = http
        .get(format!("{}/history?band=Poor", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(filtered["entries"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_error_contract() {
    let base = spawn_api().await;
    let http = reqwest::Client::new();

    let resp = http
        .post(format!("{}/analyze", base))
        .json(&json!({"barcode": "4006381333931"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "product_not_found");
    assert!(body["error"]["hint"].as_str().unwrap().contains("label photo"));

    let resp = http
        .post(format!("{}/analyze", base))
        .json(&json!({"barcode": "12ab"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "invalid_input");

    let resp = http
        .post(format!("{}/analyze", base))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = http
        .get(format!("{}/history/unknown", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}
