//! Analysis history.
//!
//! An append-only, deduplicating log of verdicts keyed by product identity.
//! Re-scanning the same product within the recency window updates the
//! existing entry in place instead of adding a row, so rapid repeat scans do
//! not flood the history. There is no deletion API; retention is an
//! external policy.
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`append`](HistoryStore::append) | Insert, or update the identity's recent entry |
//! | [`list`](HistoryStore::list) | Page through entries, most recent first |
//! | [`find_by_identity`](HistoryStore::find_by_identity) | Most recent entry for a product |
//! | [`search`](HistoryStore::search) | Filter by name, minimum score, band |
//! | [`stats`](HistoryStore::stats) | Totals, average score, band distribution |
//!
//! Writes for one identity are serialized; unrelated identities write
//! concurrently.

mod memory;
mod sqlite;

pub use memory::InMemoryHistoryStore;
pub use sqlite::SqliteHistoryStore;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::models::{Band, HistoryEntry};

/// What [`HistoryStore::append`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    Inserted { id: String },
    /// An entry for the same identity inside the window was overwritten.
    Updated { id: String },
}

impl AppendOutcome {
    pub fn id(&self) -> &str {
        match self {
            AppendOutcome::Inserted { id } | AppendOutcome::Updated { id } => id,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct HistoryQuery {
    /// Case-insensitive substring of the product name.
    pub name_contains: Option<String>,
    pub min_score: Option<u8>,
    pub band: Option<Band>,
    pub limit: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryStats {
    pub total: i64,
    pub average_score: Option<f64>,
    /// Entries recorded in the last seven days.
    pub this_week: i64,
    pub by_band: BTreeMap<String, i64>,
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn append(&self, entry: HistoryEntry) -> Result<AppendOutcome>;

    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<HistoryEntry>>;

    async fn find_by_identity(&self, identity: &str) -> Result<Option<HistoryEntry>>;

    async fn search(&self, query: &HistoryQuery) -> Result<Vec<HistoryEntry>>;

    async fn stats(&self) -> Result<HistoryStats>;
}

const WEEK_MS: i64 = 7 * 24 * 60 * 60 * 1000;

/// Empty band histogram, so every band shows up in stats output.
fn empty_band_counts() -> BTreeMap<String, i64> {
    [Band::Good, Band::Medium, Band::Poor]
        .iter()
        .map(|b| (b.as_str().to_string(), 0))
        .collect()
}
