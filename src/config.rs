//! TOML configuration.
//!
//! Loaded once at startup by [`load_config`] and passed explicitly into every
//! component. Nothing in the pipeline reads configuration or environment
//! variables mid-request.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::catalog::CATALOG_NAMES;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CatalogConfig {
    #[serde(default = "default_catalog_provider")]
    pub provider: String,
    #[serde(default = "default_catalog_url")]
    pub base_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_catalog_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_catalog_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_page_size")]
    pub search_page_size: usize,
    #[serde(default = "default_match_high")]
    pub match_high_confidence: f64,
    #[serde(default = "default_match_plausible")]
    pub match_plausible: f64,
    /// Catalogs tried in order when `provider` does not know a barcode.
    #[serde(default = "default_fallbacks")]
    pub fallbacks: Vec<String>,
    #[serde(default = "default_upcitemdb_url")]
    pub upcitemdb_url: String,
    #[serde(default = "default_barcodelookup_url")]
    pub barcodelookup_url: String,
    #[serde(default = "default_barcodelookup_key_env")]
    pub barcodelookup_api_key_env: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            provider: default_catalog_provider(),
            base_url: default_catalog_url(),
            user_agent: default_user_agent(),
            timeout_secs: default_catalog_timeout(),
            max_retries: default_catalog_retries(),
            backoff_base_ms: default_backoff_ms(),
            search_page_size: default_page_size(),
            match_high_confidence: default_match_high(),
            match_plausible: default_match_plausible(),
            fallbacks: default_fallbacks(),
            upcitemdb_url: default_upcitemdb_url(),
            barcodelookup_url: default_barcodelookup_url(),
            barcodelookup_api_key_env: default_barcodelookup_key_env(),
        }
    }
}

fn default_catalog_provider() -> String {
    "openfoodfacts".to_string()
}
fn default_catalog_url() -> String {
    "https://world.openfoodfacts.org".to_string()
}
fn default_user_agent() -> String {
    format!("HealthLens/{}", env!("CARGO_PKG_VERSION"))
}
fn default_catalog_timeout() -> u64 {
    10
}
fn default_catalog_retries() -> u32 {
    3
}
fn default_backoff_ms() -> u64 {
    500
}
fn default_page_size() -> usize {
    5
}
fn default_match_high() -> f64 {
    0.92
}
fn default_match_plausible() -> f64 {
    0.80
}
fn default_fallbacks() -> Vec<String> {
    vec!["upcitemdb".to_string()]
}
fn default_upcitemdb_url() -> String {
    "https://api.upcitemdb.com".to_string()
}
fn default_barcodelookup_url() -> String {
    "https://api.barcodelookup.com".to_string()
}
fn default_barcodelookup_key_env() -> String {
    "BARCODE_LOOKUP_API_KEY".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct OcrConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_ocr_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    #[serde(default = "default_true")]
    pub preprocess: bool,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            url: None,
            api_key_env: default_api_key_env(),
            timeout_secs: default_ocr_timeout(),
            min_confidence: default_min_confidence(),
            preprocess: true,
        }
    }
}

fn default_ocr_timeout() -> u64 {
    45
}
fn default_min_confidence() -> f64 {
    0.5
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_llm_retries")]
    pub max_retries: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            url: None,
            api_key_env: default_api_key_env(),
            timeout_secs: default_llm_timeout(),
            max_retries: default_llm_retries(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_disabled() -> String {
    "disabled".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_llm_timeout() -> u64 {
    60
}
fn default_llm_retries() -> u32 {
    2
}
fn default_temperature() -> f64 {
    0.1
}
fn default_max_tokens() -> u32 {
    1200
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScoringConfig {
    #[serde(default = "default_rule_weight")]
    pub rule_weight: f64,
    #[serde(default = "default_model_weight")]
    pub model_weight: f64,
    #[serde(default = "default_good_min")]
    pub good_min: u8,
    #[serde(default = "default_medium_min")]
    pub medium_min: u8,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            rule_weight: default_rule_weight(),
            model_weight: default_model_weight(),
            good_min: default_good_min(),
            medium_min: default_medium_min(),
        }
    }
}

fn default_rule_weight() -> f64 {
    0.4
}
fn default_model_weight() -> f64 {
    0.6
}
fn default_good_min() -> u8 {
    60
}
fn default_medium_min() -> u8 {
    40
}

#[derive(Debug, Deserialize, Clone)]
pub struct HistoryConfig {
    #[serde(default = "default_dedup_window")]
    pub dedup_window_secs: i64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            dedup_window_secs: default_dedup_window(),
        }
    }
}

fn default_dedup_window() -> i64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    90
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

impl Config {
    /// Configuration with every section defaulted and the database at `db_path`.
    pub fn with_db_path(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
            },
            catalog: CatalogConfig::default(),
            ocr: OcrConfig::default(),
            llm: LlmConfig::default(),
            scoring: ScoringConfig::default(),
            history: HistoryConfig::default(),
            pipeline: PipelineConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Scoring
    let s = &config.scoring;
    if s.rule_weight < 0.0 || s.model_weight < 0.0 {
        anyhow::bail!("scoring weights must be >= 0");
    }
    if ((s.rule_weight + s.model_weight) - 1.0).abs() > 1e-6 {
        anyhow::bail!(
            "scoring.rule_weight + scoring.model_weight must equal 1.0 (got {} + {})",
            s.rule_weight,
            s.model_weight
        );
    }
    if s.medium_min == 0 || s.medium_min >= s.good_min || s.good_min > 100 {
        anyhow::bail!("scoring thresholds must satisfy 0 < medium_min < good_min <= 100");
    }

    // Catalog
    let c = &config.catalog;
    if !(0.0..=1.0).contains(&c.match_plausible) || !(0.0..=1.0).contains(&c.match_high_confidence)
    {
        anyhow::bail!("catalog match thresholds must be in [0.0, 1.0]");
    }
    if c.match_plausible > c.match_high_confidence {
        anyhow::bail!("catalog.match_plausible must be <= catalog.match_high_confidence");
    }
    if c.search_page_size == 0 {
        anyhow::bail!("catalog.search_page_size must be > 0");
    }
    if c.provider != "disabled" && !CATALOG_NAMES.contains(&c.provider.as_str()) {
        anyhow::bail!(
            "Unknown catalog provider: '{}'. Must be one of {} or disabled.",
            c.provider,
            CATALOG_NAMES.join(", ")
        );
    }
    for (i, name) in c.fallbacks.iter().enumerate() {
        if !CATALOG_NAMES.contains(&name.as_str()) {
            anyhow::bail!(
                "Unknown catalog in catalog.fallbacks: '{}'. Must be one of {}.",
                name,
                CATALOG_NAMES.join(", ")
            );
        }
        if *name == c.provider || c.fallbacks[..i].contains(name) {
            anyhow::bail!("catalog '{}' appears more than once in the catalog chain", name);
        }
    }

    // Models
    for (section, provider, model) in [
        ("llm", &config.llm.provider, &config.llm.model),
        ("ocr", &config.ocr.provider, &config.ocr.model),
    ] {
        match provider.as_str() {
            "disabled" => {}
            "openai" | "ollama" => {
                if model.is_none() {
                    anyhow::bail!(
                        "{}.model must be specified when provider is '{}'",
                        section,
                        provider
                    );
                }
            }
            other => anyhow::bail!(
                "Unknown {} provider: '{}'. Must be disabled, openai, or ollama.",
                section,
                other
            ),
        }
    }
    if !(0.0..=1.0).contains(&config.ocr.min_confidence) {
        anyhow::bail!("ocr.min_confidence must be in [0.0, 1.0]");
    }

    if config.history.dedup_window_secs < 0 {
        anyhow::bail!("history.dedup_window_secs must be >= 0");
    }
    if config.pipeline.request_timeout_secs == 0 {
        anyhow::bail!("pipeline.request_timeout_secs must be > 0");
    }

    Ok(())
}
