use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create the schema on an open pool. Idempotent.
pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    // One row per person per calendar day
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS daily_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            person TEXT NOT NULL,
            day TEXT NOT NULL,
            steps INTEGER NOT NULL,
            source_image TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE(person, day)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_daily_records_day ON daily_records(day DESC)")
        .execute(pool)
        .await?;

    Ok(())
}
