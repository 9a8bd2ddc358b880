//! # HealthLens
//!
//! Turns a barcode, a photo of a nutrition label, or a product name into a
//! 0–100 health verdict with the drivers and guideline evidence behind it.
//!
//! A deterministic Nutri-Score style rule engine and a language-model
//! analyst each judge the product; a reconciler blends the two and falls
//! back to the rule score whenever the model is unavailable or breaks its
//! JSON contract.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌────────────┐   ┌────────────┐
//! │   RawInput   │──▶│   Resolver   │──▶│ NutriScore │──▶│  Analyst   │
//! │ code/img/txt │   │ catalogs·OCR │   │   rules    │   │    LLM     │
//! └──────────────┘   └──────────────┘   └─────┬──────┘   └─────┬──────┘
//!                                             └───────┬────────┘
//!                                                     ▼
//!                                              ┌────────────┐   ┌──────────┐
//!                                              │ Reconciler │──▶│ History  │
//!                                              └─────┬──────┘   │ (SQLite) │
//!                                                    ▼          └──────────┘
//!                                           ┌─────────────────┐
//!                                           │ CLI (hl) · HTTP │
//!                                           └─────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! hl init
//! hl analyze --barcode 3017620422003
//! hl analyze --image ./label.jpg
//! hl analyze --search "greek yogurt"
//! hl history list
//! hl serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Core data types |
//! | [`error`] | Pipeline error taxonomy |
//! | [`traits`] | Catalog, model, and label reader seams |
//! | [`normalize`] | Raw nutrition payloads to canonical per-100 g facts |
//! | [`nutriscore`] | Deterministic rule score |
//! | [`guidelines`] | WHO / ICMR-NIN thresholds, additive flags, explanations |
//! | [`catalog`] | Catalog fallback chain and shared HTTP classification |
//! | [`openfoodfacts`] | OpenFoodFacts catalog client |
//! | [`upcitemdb`] | UPCitemdb catalog client |
//! | [`barcodelookup`] | Barcode Lookup catalog client |
//! | [`llm`] | OpenAI-compatible and Ollama chat clients |
//! | [`ocr`] | Vision-model label transcription |
//! | [`label`] | Label text parsing and image preprocessing |
//! | [`resolver`] | Input to [`models::ProductRecord`] |
//! | [`analyst`] | Schema-validated model assessment |
//! | [`reconcile`] | Rule and model blend into a [`models::Verdict`] |
//! | [`history`] | Deduplicating verdict history |
//! | [`pipeline`] | End-to-end orchestration with a deadline |
//! | [`server`] | JSON HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`export`] | History JSON export |
//! | [`stats`] | History statistics and terminal output |

pub mod analyst;
pub mod barcodelookup;
pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod guidelines;
pub mod history;
pub mod label;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod normalize;
pub mod nutriscore;
pub mod ocr;
pub mod openfoodfacts;
pub mod pipeline;
pub mod reconcile;
pub mod resolver;
pub mod server;
pub mod stats;
pub mod traits;
pub mod upcitemdb;
