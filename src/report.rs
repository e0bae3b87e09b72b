//! Leaderboard, people list, and per-person history.
//!
//! The CLI commands print plain tables to stdout; the HTTP server serves the
//! same data as JSON straight from the [`RecordStore`]. Reports migrate
//! before reading, so a database nobody has written to yet reads as empty.

use anyhow::Result;

use crate::config::Config;
use crate::db;
use crate::migrate;
use crate::models::{DailyRecord, LeaderboardEntry, DAY_FORMAT, TIMESTAMP_FORMAT};
use crate::store::sqlite::SqliteRecordStore;
use crate::store::{Page, RecordStore};

async fn open_store(config: &Config) -> Result<SqliteRecordStore> {
    let pool = db::connect(config).await?;
    migrate::migrate_pool(&pool).await?;
    Ok(SqliteRecordStore::new(pool))
}

pub async fn run_leaderboard(config: &Config) -> Result<()> {
    let store = open_store(config).await?;
    let entries = store.leaderboard().await?;
    print!("{}", format_leaderboard(&entries));
    store.pool().close().await;
    Ok(())
}

pub async fn run_people(config: &Config) -> Result<()> {
    let store = open_store(config).await?;
    for name in store.people().await? {
        println!("{}", name);
    }
    store.pool().close().await;
    Ok(())
}

pub async fn run_history(config: &Config, person: &str, page: Page) -> Result<()> {
    let store = open_store(config).await?;
    let records = store.history(person, page).await?;
    if records.is_empty() {
        println!("no records for {} (page {})", person, page.page);
    } else {
        print!("{}", format_history(&records));
    }
    store.pool().close().await;
    Ok(())
}

fn format_leaderboard(entries: &[LeaderboardEntry]) -> String {
    let mut out = format!("{:<5} {:<24} {:>12} {:>6}\n", "RANK", "NAME", "STEPS", "DAYS");
    for (i, e) in entries.iter().enumerate() {
        out.push_str(&format!(
            "{:<5} {:<24} {:>12} {:>6}\n",
            i + 1,
            e.person,
            e.total_steps,
            e.days
        ));
    }
    out
}

fn format_history(records: &[DailyRecord]) -> String {
    let mut out = format!(
        "{:<10}  {:>8}  {:<19}  {}\n",
        "DAY", "STEPS", "RECORDED", "IMAGE"
    );
    for r in records {
        out.push_str(&format!(
            "{:<10}  {:>8}  {:<19}  {}\n",
            r.day.format(DAY_FORMAT),
            r.steps,
            r.created_at.format(TIMESTAMP_FORMAT),
            r.source_image
        ));
    }
    out
}
