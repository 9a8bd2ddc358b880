//! Collaborator traits.
//!
//! The pipeline talks to the outside world only through these seams. Each
//! has a production implementation and is replaced by a fake in tests.
//!
//! ```text
//!              ┌────────────────┐
//!  Barcode ───▶│ ProductCatalog │  openfoodfacts::OpenFoodFactsClient
//!  Search  ───▶│                │
//!              └────────────────┘
//!              ┌────────────────┐   ┌─────────────┐
//!  Image ─────▶│ImagePreprocessor├──▶│ LabelReader │  ocr::VisionLabelReader
//!              └────────────────┘   └─────────────┘
//!              ┌────────────────┐
//!  Prompt ────▶│ LanguageModel  │  llm::ChatModel
//!              └────────────────┘
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

// ═══════════════════════════════════════════════════════════════════════
// Product catalog
// ═══════════════════════════════════════════════════════════════════════

/// A product as the catalog returned it, before normalization.
///
/// Every field may be missing; the resolver decides what is usable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogProduct {
    pub code: Option<String>,
    pub name: Option<String>,
    pub brand: Option<String>,
    /// Category tags such as `en:beverages`.
    pub categories: Vec<String>,
    pub ingredients_text: Option<String>,
    /// Raw nutrition mapping, handed to [`crate::normalize::normalize`].
    pub nutriments: Map<String, Value>,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum CatalogError {
    #[error("not found")]
    NotFound,
    /// Network failure, rate limit or server error. Worth retrying.
    #[error("transient failure: {0}")]
    Transient(String),
    /// Anything else. Retrying will not help.
    #[error("{0}")]
    Fatal(String),
}

#[async_trait]
pub trait ProductCatalog: Send + Sync {
    /// Short name used in logs and error messages.
    fn name(&self) -> &str;

    /// Look up one product by barcode. A single attempt.
    async fn lookup(&self, code: &str) -> Result<CatalogProduct, CatalogError>;

    /// Free-text search. Returns at most `limit` candidates.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<CatalogProduct>, CatalogError>;
}

// ═══════════════════════════════════════════════════════════════════════
// Language models
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ModelError {
    #[error("model provider is disabled")]
    Disabled,
    #[error("model request failed: {0}")]
    Request(String),
    #[error("model returned an unusable response: {0}")]
    BadResponse(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A chat-completion model. One call, text out.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ModelError>;
}

// ═══════════════════════════════════════════════════════════════════════
// Label images
// ═══════════════════════════════════════════════════════════════════════

/// Text transcribed from a label photo.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelText {
    pub text: String,
    /// Reader's own estimate in `[0, 1]`.
    pub confidence: f64,
}

#[async_trait]
pub trait LabelReader: Send + Sync {
    fn name(&self) -> &str;

    async fn read(&self, image: &[u8], mime: &str) -> Result<LabelText, ModelError>;
}

/// Image cleanup before OCR. CPU-bound and synchronous.
pub trait ImagePreprocessor: Send + Sync {
    /// Returns the processed image bytes and their MIME type.
    fn preprocess(&self, image: &[u8], mime: &str) -> anyhow::Result<(Vec<u8>, String)>;
}

/// Passes images through untouched.
pub struct NoopPreprocessor;

impl ImagePreprocessor for NoopPreprocessor {
    fn preprocess(&self, image: &[u8], mime: &str) -> anyhow::Result<(Vec<u8>, String)> {
        Ok((image.to_vec(), mime.to_string()))
    }
}

/// Label reader used when OCR is not configured.
pub struct DisabledLabelReader;

#[async_trait]
impl LabelReader for DisabledLabelReader {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn read(&self, _image: &[u8], _mime: &str) -> Result<LabelText, ModelError> {
        Err(ModelError::Disabled)
    }
}

/// Catalog used when `catalog.provider = "disabled"`. Only label photos work.
pub struct DisabledCatalog;

#[async_trait]
impl ProductCatalog for DisabledCatalog {
    fn name(&self) -> &str {
        "disabled catalog"
    }

    async fn lookup(&self, _code: &str) -> Result<CatalogProduct, CatalogError> {
        Err(CatalogError::Fatal("catalog provider is disabled".to_string()))
    }

    async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<CatalogProduct>, CatalogError> {
        Err(CatalogError::Fatal("catalog provider is disabled".to_string()))
    }
}
