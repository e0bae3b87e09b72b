//! Storage abstraction for daily records.
//!
//! The [`RecordStore`] trait is the only thing the reconciler and the
//! reporting commands know about persistence. Two backends ship:
//!
//! - [`sqlite::SqliteRecordStore`]: the production backend.
//! - [`memory::InMemoryRecordStore`]: for tests and embedding.
//!
//! Implementations must be `Send + Sync` to work with async runtimes, and
//! must reject a second record for the same `(person, day)`.

pub mod memory;
pub mod sqlite;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};

use crate::models::{DailyRecord, LeaderboardEntry, NewRecord};

/// Largest page size accepted by [`Page::new`].
pub const MAX_PER_PAGE: u32 = 100;

/// A 1-based page of history results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: u32,
    pub per_page: u32,
}

impl Page {
    pub fn new(page: u32, per_page: u32) -> Result<Self> {
        if page == 0 {
            bail!("page must be >= 1");
        }
        if per_page == 0 || per_page > MAX_PER_PAGE {
            bail!("per_page must be between 1 and {}", MAX_PER_PAGE);
        }
        Ok(Self { page, per_page })
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page - 1) * i64::from(self.per_page)
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.per_page)
    }
}

impl Default for Page {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: 20,
        }
    }
}

/// Abstract storage backend keyed by `(person, calendar day)`.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`find`](RecordStore::find) | Look up the record for a person and day |
/// | [`insert`](RecordStore::insert) | Create a record unless the day already has one |
/// | [`raise`](RecordStore::raise) | Replace steps, image and timestamp if the new count is higher |
/// | [`leaderboard`](RecordStore::leaderboard) | Per-person totals, highest first |
/// | [`people`](RecordStore::people) | Distinct person names |
/// | [`history`](RecordStore::history) | One person's records, newest day first |
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn find(&self, person: &str, day: NaiveDate) -> Result<Option<DailyRecord>>;

    /// Returns the new id, or `None` when the person already has a record
    /// for that day.
    async fn insert(&self, record: &NewRecord) -> Result<Option<i64>>;

    /// Conditional write: only applies when `steps` exceeds the stored
    /// value, checked in the same statement as the write. Returns whether
    /// the record changed (`false` also for an unknown id).
    async fn raise(
        &self,
        id: i64,
        steps: u32,
        source_image: &str,
        created_at: NaiveDateTime,
    ) -> Result<bool>;

    async fn leaderboard(&self) -> Result<Vec<LeaderboardEntry>>;

    async fn people(&self) -> Result<Vec<String>>;

    async fn history(&self, person: &str, page: Page) -> Result<Vec<DailyRecord>>;
}
