//! In-memory [`RecordStore`] implementation for tests and embedding.
//!
//! Records live in a `Vec` behind a `std::sync::RwLock`. Lookups are linear,
//! which is fine for the handful of people a test or a demo touches.

use std::collections::BTreeMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};

use crate::models::{DailyRecord, LeaderboardEntry, NewRecord};

use super::{Page, RecordStore};

struct Inner {
    records: Vec<DailyRecord>,
    next_id: i64,
}

/// In-memory store for tests.
pub struct InMemoryRecordStore {
    inner: RwLock<Inner>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                records: Vec::new(),
                next_id: 1,
            }),
        }
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.inner.read().map(|g| g.records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> anyhow::Error {
    anyhow!("in-memory record store lock poisoned")
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn find(&self, person: &str, day: NaiveDate) -> Result<Option<DailyRecord>> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        Ok(inner
            .records
            .iter()
            .find(|r| r.person == person && r.day == day)
            .cloned())
    }

    async fn insert(&self, record: &NewRecord) -> Result<Option<i64>> {
        let mut inner = self.inner.write().map_err(|_| poisoned())?;
        if inner
            .records
            .iter()
            .any(|r| r.person == record.person && r.day == record.day)
        {
            return Ok(None);
        }
        let id = inner.next_id;
        inner.next_id += 1;
        inner.records.push(DailyRecord {
            id,
            person: record.person.clone(),
            day: record.day,
            steps: record.steps,
            source_image: record.source_image.clone(),
            created_at: record.created_at,
        });
        Ok(Some(id))
    }

    async fn raise(
        &self,
        id: i64,
        steps: u32,
        source_image: &str,
        created_at: NaiveDateTime,
    ) -> Result<bool> {
        let mut inner = self.inner.write().map_err(|_| poisoned())?;
        match inner.records.iter_mut().find(|r| r.id == id) {
            Some(record) if steps > record.steps => {
                record.steps = steps;
                record.source_image = source_image.to_string();
                record.created_at = created_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn leaderboard(&self) -> Result<Vec<LeaderboardEntry>> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        let mut totals: BTreeMap<&str, (i64, i64)> = BTreeMap::new();
        for r in &inner.records {
            let e = totals.entry(r.person.as_str()).or_default();
            e.0 += i64::from(r.steps);
            e.1 += 1;
        }
        let mut entries: Vec<LeaderboardEntry> = totals
            .into_iter()
            .map(|(person, (total_steps, days))| LeaderboardEntry {
                person: person.to_string(),
                total_steps,
                days,
            })
            .collect();
        // BTreeMap order already sorts names; a stable sort keeps it for ties.
        entries.sort_by(|a, b| b.total_steps.cmp(&a.total_steps));
        Ok(entries)
    }

    async fn people(&self) -> Result<Vec<String>> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        let mut names: Vec<String> = inner.records.iter().map(|r| r.person.clone()).collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    async fn history(&self, person: &str, page: Page) -> Result<Vec<DailyRecord>> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        let mut rows: Vec<DailyRecord> = inner
            .records
            .iter()
            .filter(|r| r.person == person)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.day.cmp(&a.day).then(b.id.cmp(&a.id)));
        Ok(rows
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit() as usize)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 5, d).unwrap()
    }

    fn new_record(person: &str, d: u32, steps: u32) -> NewRecord {
        NewRecord {
            person: person.into(),
            day: day(d),
            steps,
            source_image: format!("{}-{}.png", person, d),
            created_at: day(d).and_hms_opt(12, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_insert_find_raise() {
        let store = InMemoryRecordStore::new();
        let id = store
            .insert(&new_record("alice", 1, 1000))
            .await
            .unwrap()
            .unwrap();
        let found = store.find("alice", day(1)).await.unwrap().unwrap();
        assert_eq!(found.id, id);
        assert_eq!(found.steps, 1000);

        let later = day(1).and_hms_opt(20, 0, 0).unwrap();
        assert!(store.raise(id, 2000, "b.png", later).await.unwrap());
        let found = store.find("alice", day(1)).await.unwrap().unwrap();
        assert_eq!(found.steps, 2000);
        assert_eq!(found.source_image, "b.png");
        assert_eq!(found.created_at, later);

        // lower and equal counts leave the record alone
        assert!(!store.raise(id, 1500, "c.png", later).await.unwrap());
        assert!(!store.raise(id, 2000, "c.png", later).await.unwrap());
        let found = store.find("alice", day(1)).await.unwrap().unwrap();
        assert_eq!(found.steps, 2000);
        assert_eq!(found.source_image, "b.png");

        assert!(store.find("alice", day(2)).await.unwrap().is_none());
        assert!(store.find("bob", day(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_day_rejected() {
        let store = InMemoryRecordStore::new();
        store.insert(&new_record("alice", 1, 1000)).await.unwrap();
        assert_eq!(store.insert(&new_record("alice", 1, 3000)).await.unwrap(), None);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_raise_missing_id() {
        let store = InMemoryRecordStore::new();
        let now = day(1).and_hms_opt(0, 0, 0).unwrap();
        assert!(!store.raise(42, 1, "x", now).await.unwrap());
    }

    #[tokio::test]
    async fn test_leaderboard_people_history() {
        let store = InMemoryRecordStore::new();
        store.insert(&new_record("bob", 1, 5000)).await.unwrap();
        store.insert(&new_record("alice", 1, 4000)).await.unwrap();
        store.insert(&new_record("alice", 2, 3000)).await.unwrap();
        store.insert(&new_record("carol", 2, 7000)).await.unwrap();

        let board = store.leaderboard().await.unwrap();
        let names: Vec<&str> = board.iter().map(|e| e.person.as_str()).collect();
        assert_eq!(names, vec!["alice", "carol", "bob"]);
        assert_eq!(board[0].total_steps, 7000);
        assert_eq!(board[0].days, 2);

        assert_eq!(store.people().await.unwrap(), vec!["alice", "bob", "carol"]);

        let hist = store.history("alice", Page::default()).await.unwrap();
        assert_eq!(hist.len(), 2);
        assert_eq!(hist[0].day, day(2));

        let second = store.history("alice", Page::new(2, 1).unwrap()).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].day, day(1));
    }
}
