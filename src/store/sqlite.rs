//! SQLite-backed [`RecordStore`] implementation.
//!
//! Days and timestamps are stored as text (`%Y-%m-%d` and
//! `%Y-%m-%d %H:%M:%S`) so the database stays readable with the sqlite3
//! shell. The `UNIQUE(person, day)` constraint from the schema backs the
//! one-record-per-day invariant at the storage level.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::models::{DailyRecord, LeaderboardEntry, NewRecord, DAY_FORMAT, TIMESTAMP_FORMAT};

use super::{Page, RecordStore};

/// SQLite implementation of the [`RecordStore`] trait.
pub struct SqliteRecordStore {
    pool: SqlitePool,
}

impl SqliteRecordStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn row_to_record(row: &SqliteRow) -> Result<DailyRecord> {
    let day: String = row.get("day");
    let created_at: String = row.get("created_at");
    let steps: i64 = row.get("steps");
    Ok(DailyRecord {
        id: row.get("id"),
        person: row.get("person"),
        day: NaiveDate::parse_from_str(&day, DAY_FORMAT)
            .with_context(|| format!("invalid day in daily_records: {}", day))?,
        steps: u32::try_from(steps)
            .map_err(|_| anyhow!("step count out of range in daily_records: {}", steps))?,
        source_image: row.get("source_image"),
        created_at: NaiveDateTime::parse_from_str(&created_at, TIMESTAMP_FORMAT)
            .with_context(|| format!("invalid created_at in daily_records: {}", created_at))?,
    })
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn find(&self, person: &str, day: NaiveDate) -> Result<Option<DailyRecord>> {
        let row = sqlx::query(
            "SELECT id, person, day, steps, source_image, created_at FROM daily_records WHERE person = ? AND day = ?",
        )
        .bind(person)
        .bind(day.format(DAY_FORMAT).to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn insert(&self, record: &NewRecord) -> Result<Option<i64>> {
        let result = sqlx::query(
            r#"
            INSERT INTO daily_records (person, day, steps, source_image, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(person, day) DO NOTHING
            "#,
        )
        .bind(&record.person)
        .bind(record.day.format(DAY_FORMAT).to_string())
        .bind(i64::from(record.steps))
        .bind(&record.source_image)
        .bind(record.created_at.format(TIMESTAMP_FORMAT).to_string())
        .execute(&self.pool)
        .await
        .with_context(|| {
            format!(
                "failed to insert daily record for {} on {}",
                record.person, record.day
            )
        })?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        Ok(Some(result.last_insert_rowid()))
    }

    async fn raise(
        &self,
        id: i64,
        steps: u32,
        source_image: &str,
        created_at: NaiveDateTime,
    ) -> Result<bool> {
        // The comparison lives in the statement so writers in other
        // processes cannot lower the count between our read and write.
        let result = sqlx::query(
            "UPDATE daily_records SET steps = ?, source_image = ?, created_at = ? WHERE id = ? AND steps < ?",
        )
        .bind(i64::from(steps))
        .bind(source_image)
        .bind(created_at.format(TIMESTAMP_FORMAT).to_string())
        .bind(id)
        .bind(i64::from(steps))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn leaderboard(&self) -> Result<Vec<LeaderboardEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT person, SUM(steps) AS total_steps, COUNT(*) AS days
            FROM daily_records
            GROUP BY person
            ORDER BY total_steps DESC, person ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| LeaderboardEntry {
                person: row.get("person"),
                total_steps: row.get("total_steps"),
                days: row.get("days"),
            })
            .collect())
    }

    async fn people(&self) -> Result<Vec<String>> {
        let names: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT person FROM daily_records ORDER BY person ASC")
                .fetch_all(&self.pool)
                .await?;
        Ok(names)
    }

    async fn history(&self, person: &str, page: Page) -> Result<Vec<DailyRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, person, day, steps, source_image, created_at
            FROM daily_records
            WHERE person = ?
            ORDER BY day DESC, id DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(person)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_record).collect()
    }
}
