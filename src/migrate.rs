use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create the schema on an open pool. Idempotent.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS history (
            id TEXT PRIMARY KEY,
            product_identity TEXT NOT NULL,
            product_name TEXT NOT NULL,
            input_kind TEXT NOT NULL,
            final_score INTEGER NOT NULL,
            band TEXT NOT NULL,
            recorded_at INTEGER NOT NULL,
            verdict_json TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_history_identity ON history(product_identity, recorded_at DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_history_recorded_at ON history(recorded_at DESC)")
        .execute(pool)
        .await?;

    Ok(())
}
