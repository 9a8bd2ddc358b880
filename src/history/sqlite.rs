//! SQLite-backed history.
//!
//! One row per entry in the `history` table (see [`crate::migrate`]). The
//! full verdict is kept as JSON in `verdict_json`; the scalar columns exist
//! for filtering and ordering.
//!
//! Appends for the same identity take a per-identity async lock and run in a
//! transaction whose first statement is the `UPDATE`, so the transaction is
//! a writer from the start and never has to upgrade a read snapshot.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tracing::debug;

use super::{empty_band_counts, AppendOutcome, HistoryQuery, HistoryStats, HistoryStore, WEEK_MS};
use crate::models::{HistoryEntry, InputKind};

type IdentityLock = Arc<tokio::sync::Mutex<()>>;

pub struct SqliteHistoryStore {
    pool: SqlitePool,
    dedup_window_ms: i64,
    locks: Mutex<HashMap<String, IdentityLock>>,
}

impl SqliteHistoryStore {
    /// Wrap an already-migrated pool.
    pub fn new(pool: SqlitePool, dedup_window_secs: i64) -> Self {
        Self {
            pool,
            dedup_window_ms: dedup_window_secs * 1000,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn acquire_slot(&self, identity: &str) -> IdentityLock {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(identity.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Drop the map entry once no other append is holding or waiting on it.
    fn release_slot(&self, identity: &str, slot: IdentityLock) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if Arc::strong_count(&slot) == 2 {
            locks.remove(identity);
        }
    }

    async fn write_entry(&self, entry: &HistoryEntry) -> Result<AppendOutcome> {
        let verdict_json = serde_json::to_string(&entry.verdict)?;
        let recorded_at = entry.verdict.timestamp.timestamp_millis();
        let window_start = recorded_at - self.dedup_window_ms;

        let mut tx = self.pool.begin().await?;

        let updated: Option<String> = sqlx::query_scalar(
            r#"
            UPDATE history
            SET product_name = ?, input_kind = ?, final_score = ?, band = ?,
                recorded_at = ?, verdict_json = ?
            WHERE id = (
                SELECT id FROM history
                WHERE product_identity = ? AND recorded_at >= ?
                ORDER BY recorded_at DESC
                LIMIT 1
            )
            RETURNING id
            "#,
        )
        .bind(&entry.verdict.product_name)
        .bind(entry.input_kind.as_str())
        .bind(entry.verdict.final_score as i64)
        .bind(entry.verdict.band.as_str())
        .bind(recorded_at)
        .bind(&verdict_json)
        .bind(&entry.product_identity)
        .bind(window_start)
        .fetch_optional(&mut *tx)
        .await?;

        let outcome = match updated {
            Some(id) => AppendOutcome::Updated { id },
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO history
                        (id, product_identity, product_name, input_kind,
                         final_score, band, recorded_at, verdict_json)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&entry.id)
                .bind(&entry.product_identity)
                .bind(&entry.verdict.product_name)
                .bind(entry.input_kind.as_str())
                .bind(entry.verdict.final_score as i64)
                .bind(entry.verdict.band.as_str())
                .bind(recorded_at)
                .bind(&verdict_json)
                .execute(&mut *tx)
                .await?;
                AppendOutcome::Inserted {
                    id: entry.id.clone(),
                }
            }
        };

        tx.commit().await?;
        Ok(outcome)
    }
}

fn row_to_entry(row: &SqliteRow) -> Result<HistoryEntry> {
    let kind: String = row.get("input_kind");
    let Some(input_kind) = InputKind::parse(&kind) else {
        bail!("Unknown input kind in history: '{}'", kind);
    };
    let verdict_json: String = row.get("verdict_json");
    Ok(HistoryEntry {
        id: row.get("id"),
        product_identity: row.get("product_identity"),
        input_kind,
        verdict: serde_json::from_str(&verdict_json)?,
    })
}

#[async_trait]
impl HistoryStore for SqliteHistoryStore {
    async fn append(&self, entry: HistoryEntry) -> Result<AppendOutcome> {
        let slot = self.acquire_slot(&entry.product_identity);
        let outcome = {
            let _guard = slot.lock().await;
            self.write_entry(&entry).await
        };
        self.release_slot(&entry.product_identity, slot);

        if let Ok(o) = &outcome {
            debug!(identity = %entry.product_identity, outcome = ?o, "history append");
        }
        outcome
    }

    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<HistoryEntry>> {
        let rows = sqlx::query(
            "SELECT id, product_identity, input_kind, verdict_json FROM history \
             ORDER BY recorded_at DESC LIMIT ? OFFSET ?",
        )
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_entry).collect()
    }

    async fn find_by_identity(&self, identity: &str) -> Result<Option<HistoryEntry>> {
        let row = sqlx::query(
            "SELECT id, product_identity, input_kind, verdict_json FROM history \
             WHERE product_identity = ? ORDER BY recorded_at DESC LIMIT 1",
        )
        .bind(identity)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_entry).transpose()
    }

    async fn search(&self, query: &HistoryQuery) -> Result<Vec<HistoryEntry>> {
        let needle = query.name_contains.as_deref().map(str::to_lowercase);
        let rows = sqlx::query(
            r#"
            SELECT id, product_identity, input_kind, verdict_json FROM history
            WHERE (?1 IS NULL OR instr(lower(product_name), ?1) > 0)
              AND (?2 IS NULL OR final_score >= ?2)
              AND (?3 IS NULL OR band = ?3)
            ORDER BY recorded_at DESC
            LIMIT ?4
            "#,
        )
        .bind(needle)
        .bind(query.min_score.map(|s| s as i64))
        .bind(query.band.map(|b| b.as_str()))
        .bind(query.limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_entry).collect()
    }

    async fn stats(&self) -> Result<HistoryStats> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM history")
            .fetch_one(&self.pool)
            .await?;

        let average_score: Option<f64> =
            sqlx::query_scalar("SELECT AVG(CAST(final_score AS REAL)) FROM history")
                .fetch_one(&self.pool)
                .await?;

        let week_ago = Utc::now().timestamp_millis() - WEEK_MS;
        let this_week: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM history WHERE recorded_at >= ?")
                .bind(week_ago)
                .fetch_one(&self.pool)
                .await?;

        let rows = sqlx::query("SELECT band, COUNT(*) as cnt FROM history GROUP BY band")
            .fetch_all(&self.pool)
            .await?;

        let mut by_band: BTreeMap<String, i64> = empty_band_counts();
        for row in &rows {
            let band: String = row.get("band");
            let cnt: i64 = row.get("cnt");
            by_band.insert(band, cnt);
        }

        Ok(HistoryStats {
            total,
            average_score,
            this_week,
            by_band,
        })
    }
}
