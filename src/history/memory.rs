//! In-memory history, used by `hl analyze --no-history` and by tests.
//!
//! Appends take one write lock over the whole store.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::{empty_band_counts, AppendOutcome, HistoryQuery, HistoryStats, HistoryStore, WEEK_MS};
use crate::models::HistoryEntry;

pub struct InMemoryHistoryStore {
    /// Insertion order.
    entries: RwLock<Vec<HistoryEntry>>,
    dedup_window_ms: i64,
}

impl InMemoryHistoryStore {
    pub fn new(dedup_window_secs: i64) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            dedup_window_ms: dedup_window_secs * 1000,
        }
    }

    async fn sorted(&self) -> Vec<HistoryEntry> {
        let mut all = self.entries.read().await.clone();
        all.sort_by(|a, b| b.verdict.timestamp.cmp(&a.verdict.timestamp));
        all
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn append(&self, mut entry: HistoryEntry) -> Result<AppendOutcome> {
        // One write lock covers the read-modify-write.
        let mut entries = self.entries.write().await;
        let ts = entry.verdict.timestamp.timestamp_millis();

        let recent = entries
            .iter_mut()
            .filter(|e| e.product_identity == entry.product_identity)
            .filter(|e| e.verdict.timestamp.timestamp_millis() >= ts - self.dedup_window_ms)
            .max_by_key(|e| e.verdict.timestamp);

        if let Some(existing) = recent {
            entry.id = existing.id.clone();
            *existing = entry;
            return Ok(AppendOutcome::Updated {
                id: existing.id.clone(),
            });
        }

        let id = entry.id.clone();
        entries.push(entry);
        Ok(AppendOutcome::Inserted { id })
    }

    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<HistoryEntry>> {
        Ok(self
            .sorted()
            .await
            .into_iter()
            .skip(offset)
            .take(limit)
            .collect())
    }

    async fn find_by_identity(&self, identity: &str) -> Result<Option<HistoryEntry>> {
        Ok(self
            .sorted()
            .await
            .into_iter()
            .find(|e| e.product_identity == identity))
    }

    async fn search(&self, query: &HistoryQuery) -> Result<Vec<HistoryEntry>> {
        let needle = query.name_contains.as_deref().map(str::to_lowercase);
        Ok(self
            .sorted()
            .await
            .into_iter()
            .filter(|e| {
                needle
                    .as_deref()
                    .map_or(true, |n| e.verdict.product_name.to_lowercase().contains(n))
            })
            .filter(|e| query.min_score.map_or(true, |m| e.verdict.final_score >= m))
            .filter(|e| query.band.map_or(true, |b| e.verdict.band == b))
            .take(query.limit)
            .collect())
    }

    async fn stats(&self) -> Result<HistoryStats> {
        let entries = self.entries.read().await;
        let week_ago = Utc::now().timestamp_millis() - WEEK_MS;

        let mut by_band = empty_band_counts();
        for e in entries.iter() {
            *by_band.entry(e.verdict.band.as_str().to_string()).or_insert(0) += 1;
        }

        let total = entries.len() as i64;
        let average_score = (total > 0).then(|| {
            entries
                .iter()
                .map(|e| e.verdict.final_score as f64)
                .sum::<f64>()
                / total as f64
        });

        Ok(HistoryStats {
            total,
            average_score,
            this_week: entries
                .iter()
                .filter(|e| e.verdict.timestamp.timestamp_millis() >= week_ago)
                .count() as i64,
            by_band,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::tests::entry_at;
    use crate::models::Band;
    use chrono::Duration;

    #[tokio::test]
    async fn test_dedup_window() {
        let store = InMemoryHistoryStore::new(300);
        let now = Utc::now();

        let first = store
            .append(entry_at("x", "Biscuits", 20, Band::Poor, now))
            .await
            .unwrap();
        let second = store
            .append(entry_at("x", "Biscuits", 25, Band::Poor, now + Duration::seconds(5)))
            .await
            .unwrap();
        assert_eq!(first.id(), second.id());
        assert!(matches!(second, AppendOutcome::Updated { .. }));

        let third = store
            .append(entry_at("x", "Biscuits", 30, Band::Poor, now + Duration::minutes(20)))
            .await
            .unwrap();
        assert!(matches!(third, AppendOutcome::Inserted { .. }));

        let all = store.list(10, 0).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].verdict.final_score, 30);
        assert_eq!(all[1].verdict.final_score, 25);
    }

    #[tokio::test]
    async fn test_search_filters() {
        let store = InMemoryHistoryStore::new(0);
        let now = Utc::now();
        store
            .append(entry_at("a", "Tomato Soup", 70, Band::Good, now))
            .await
            .unwrap();
        store
            .append(entry_at("b", "Tomato Ketchup", 35, Band::Poor, now))
            .await
            .unwrap();

        let hits = store
            .search(&HistoryQuery {
                name_contains: Some("tomato".into()),
                min_score: Some(50),
                limit: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].product_identity, "a");

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.by_band["Medium"], 0);
    }
}
