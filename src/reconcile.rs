//! Daily-record reconciliation.
//!
//! A person may upload several screenshots on the same day. Partial
//! screenshots under-read far more often than they over-read, so the record
//! for a day keeps the highest reading seen:
//!
//! | Existing record | New reading | Result |
//! |-----------------|-------------|--------|
//! | none | any | insert |
//! | `steps = s` | `> s` | overwrite steps, image and `created_at` |
//! | `steps = s` | `<= s` | nothing changes |
//!
//! Within one process the lookup and the write for a `(person, day)` run
//! under a per-key async mutex. Across processes sharing a database the
//! store's writes are conditional ([`RecordStore::raise`] only raises,
//! [`RecordStore::insert`] never replaces), and a lost write is retried from
//! a fresh lookup.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Result};
use chrono::NaiveDate;
use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard};
use tracing::debug;

use crate::models::{NewRecord, Reading};
use crate::store::RecordStore;

/// Acceptance policy applied before reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilePolicy {
    /// Persist readings whose extracted step count is 0.
    pub persist_zero: bool,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self { persist_zero: true }
    }
}

/// What the reconciler did with a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Inserted { id: i64 },
    Updated { id: i64, previous_steps: u32 },
    /// The existing record was at least as high; the reading was dropped.
    Ignored { id: i64, kept_steps: u32 },
    /// Zero-step reading refused by [`ReconcilePolicy::persist_zero`].
    Rejected,
}

impl Decision {
    pub fn label(&self) -> &'static str {
        match self {
            Decision::Inserted { .. } => "inserted",
            Decision::Updated { .. } => "updated",
            Decision::Ignored { .. } => "ignored",
            Decision::Rejected => "rejected",
        }
    }
}

/// Find-then-write rounds before giving up on a contended record.
const MAX_ATTEMPTS: usize = 8;

type DayKey = (String, NaiveDate);

/// Per-`(person, day)` async mutexes. Entries are dropped once no task
/// holds or waits on them.
#[derive(Default)]
struct DayLocks {
    inner: Mutex<HashMap<DayKey, Arc<AsyncMutex<()>>>>,
}

impl DayLocks {
    fn enter(&self, key: &DayKey) -> Result<DayLockEntry<'_>> {
        let mut map = self
            .inner
            .lock()
            .map_err(|_| anyhow!("day lock table poisoned"))?;
        let handle = map.entry(key.clone()).or_default().clone();
        Ok(DayLockEntry {
            locks: self,
            key: key.clone(),
            handle: Some(handle),
        })
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().map(|m| m.len()).unwrap_or(0)
    }
}

/// A task's claim on one day's mutex. Dropping it, including when the
/// owning future is cancelled, removes the table entry if nobody else
/// holds it.
struct DayLockEntry<'a> {
    locks: &'a DayLocks,
    key: DayKey,
    handle: Option<Arc<AsyncMutex<()>>>,
}

impl DayLockEntry<'_> {
    async fn lock(&self) -> Result<MutexGuard<'_, ()>> {
        match &self.handle {
            Some(mutex) => Ok(mutex.lock().await),
            None => Err(anyhow!("day lock already released")),
        }
    }
}

impl Drop for DayLockEntry<'_> {
    fn drop(&mut self) {
        if let Ok(mut map) = self.locks.inner.lock() {
            // Handles are only cloned and dropped under the table lock.
            drop(self.handle.take());
            if map.get(&self.key).is_some_and(|h| Arc::strong_count(h) == 1) {
                map.remove(&self.key);
            }
        }
    }
}

/// Applies the keep-the-maximum policy against a [`RecordStore`].
pub struct Reconciler {
    store: Arc<dyn RecordStore>,
    policy: ReconcilePolicy,
    locks: DayLocks,
}

impl Reconciler {
    pub fn new(store: Arc<dyn RecordStore>, policy: ReconcilePolicy) -> Self {
        Self {
            store,
            policy,
            locks: DayLocks::default(),
        }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Reconcile one reading against the record for its person and day.
    pub async fn reconcile(&self, reading: &Reading) -> Result<Decision> {
        if reading.steps == 0 && !self.policy.persist_zero {
            return Ok(Decision::Rejected);
        }

        let key: DayKey = (reading.person.clone(), reading.day());
        let entry = self.locks.enter(&key)?;
        let _guard = entry.lock().await?;
        self.apply(reading).await
    }

    /// Find, then write conditionally. A write that loses to another
    /// process (the day's record appeared, or was raised past the reading)
    /// goes back to the find. Stored counts only grow, so this settles.
    async fn apply(&self, reading: &Reading) -> Result<Decision> {
        let day = reading.day();
        for _ in 0..MAX_ATTEMPTS {
            match self.store.find(&reading.person, day).await? {
                None => {
                    if let Some(id) = self.store.insert(&NewRecord::from(reading)).await? {
                        return Ok(Decision::Inserted { id });
                    }
                }
                Some(existing) if reading.steps > existing.steps => {
                    let raised = self
                        .store
                        .raise(
                            existing.id,
                            reading.steps,
                            &reading.source_image,
                            reading.observed_at,
                        )
                        .await?;
                    if raised {
                        return Ok(Decision::Updated {
                            id: existing.id,
                            previous_steps: existing.steps,
                        });
                    }
                }
                Some(existing) => {
                    return Ok(Decision::Ignored {
                        id: existing.id,
                        kept_steps: existing.steps,
                    })
                }
            }
            debug!(person = %reading.person, %day, "record changed under us; retrying");
        }
        bail!(
            "record for {} on {} kept changing; gave up after {} attempts",
            reading.person,
            day,
            MAX_ATTEMPTS
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::migrate::migrate_pool;
    use crate::models::{DailyRecord, LeaderboardEntry};
    use crate::store::memory::InMemoryRecordStore;
    use crate::store::sqlite::SqliteRecordStore;
    use crate::store::Page;
    use async_trait::async_trait;
    use chrono::NaiveDateTime;
    use std::time::Duration;
    use tempfile::TempDir;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 16)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn reading(person: &str, steps: u32, image: &str, observed_at: NaiveDateTime) -> Reading {
        Reading {
            person: person.into(),
            steps,
            source_image: image.into(),
            observed_at,
        }
    }

    async fn seeded() -> (Arc<InMemoryRecordStore>, Reconciler) {
        let store = Arc::new(InMemoryRecordStore::new());
        let reconciler = Reconciler::new(store.clone(), ReconcilePolicy::default());
        let d = reconciler
            .reconcile(&reading("alice", 9000, "first.png", at(9, 0)))
            .await
            .unwrap();
        assert!(matches!(d, Decision::Inserted { .. }));
        (store, reconciler)
    }

    #[tokio::test]
    async fn test_lower_reading_is_ignored() {
        let (store, reconciler) = seeded().await;
        let d = reconciler
            .reconcile(&reading("alice", 8000, "second.png", at(12, 0)))
            .await
            .unwrap();
        assert_eq!(d.label(), "ignored");

        let rec = store.find("alice", at(0, 0).date()).await.unwrap().unwrap();
        assert_eq!(rec.steps, 9000);
        assert_eq!(rec.source_image, "first.png");
        assert_eq!(rec.created_at, at(9, 0));
    }

    #[tokio::test]
    async fn test_higher_reading_updates() {
        let (store, reconciler) = seeded().await;
        let d = reconciler
            .reconcile(&reading("alice", 9500, "second.png", at(18, 30)))
            .await
            .unwrap();
        match d {
            Decision::Updated { previous_steps, .. } => assert_eq!(previous_steps, 9000),
            other => panic!("expected update, got {:?}", other),
        }

        let rec = store.find("alice", at(0, 0).date()).await.unwrap().unwrap();
        assert_eq!(rec.steps, 9500);
        assert_eq!(rec.source_image, "second.png");
        assert_eq!(rec.created_at, at(18, 30));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_tie_is_ignored() {
        let (store, reconciler) = seeded().await;
        let d = reconciler
            .reconcile(&reading("alice", 9000, "again.png", at(20, 0)))
            .await
            .unwrap();
        assert_eq!(
            d,
            Decision::Ignored {
                id: 1,
                kept_steps: 9000
            }
        );
        let rec = store.find("alice", at(0, 0).date()).await.unwrap().unwrap();
        assert_eq!(rec.created_at, at(9, 0));
    }

    #[tokio::test]
    async fn test_new_person_creates_one_record() {
        let (store, reconciler) = seeded().await;
        let d = reconciler
            .reconcile(&reading("bob", 4321, "bob.png", at(10, 0)))
            .await
            .unwrap();
        assert!(matches!(d, Decision::Inserted { .. }));
        assert_eq!(store.len(), 2);
        let rec = store.find("bob", at(0, 0).date()).await.unwrap().unwrap();
        assert_eq!(rec.steps, 4321);
    }

    #[tokio::test]
    async fn test_next_day_is_a_new_record() {
        let (store, reconciler) = seeded().await;
        let tomorrow = at(8, 0) + chrono::Duration::days(1);
        let d = reconciler
            .reconcile(&reading("alice", 100, "t.png", tomorrow))
            .await
            .unwrap();
        assert!(matches!(d, Decision::Inserted { .. }));
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_zero_policy() {
        let store = Arc::new(InMemoryRecordStore::new());
        let strict = Reconciler::new(
            store.clone(),
            ReconcilePolicy {
                persist_zero: false,
            },
        );
        let d = strict
            .reconcile(&reading("carol", 0, "blank.png", at(7, 0)))
            .await
            .unwrap();
        assert_eq!(d, Decision::Rejected);
        assert!(store.is_empty());

        let lenient = Reconciler::new(store.clone(), ReconcilePolicy::default());
        let d = lenient
            .reconcile(&reading("carol", 0, "blank.png", at(7, 0)))
            .await
            .unwrap();
        assert!(matches!(d, Decision::Inserted { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_readings_keep_maximum() {
        let store = Arc::new(InMemoryRecordStore::new());
        let reconciler = Arc::new(Reconciler::new(store.clone(), ReconcilePolicy::default()));

        let mut tasks = Vec::new();
        for i in 0..32u32 {
            let reconciler = reconciler.clone();
            tasks.push(tokio::spawn(async move {
                let steps = 1000 + (i * 7919) % 5000;
                reconciler
                    .reconcile(&reading("dave", steps, &format!("{}.png", i), at(11, i % 60)))
                    .await
            }));
        }
        for t in tasks {
            t.await.unwrap().unwrap();
        }

        let expected = (0..32u32).map(|i| 1000 + (i * 7919) % 5000).max().unwrap();
        let rec = store.find("dave", at(0, 0).date()).await.unwrap().unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(rec.steps, expected);
        assert_eq!(reconciler.locks.len(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_reconcile_releases_day_lock() {
        let (store, reconciler) = seeded().await;
        let key: DayKey = ("alice".to_string(), at(0, 0).date());
        let held = reconciler.locks.enter(&key).unwrap();
        let guard = held.lock().await.unwrap();

        // Blocks on the held lock; the timeout drops it mid-wait.
        let late = reading("alice", 9999, "late.png", at(21, 0));
        let waited =
            tokio::time::timeout(Duration::from_millis(20), reconciler.reconcile(&late)).await;
        assert!(waited.is_err());
        assert_eq!(reconciler.locks.len(), 1);

        drop(guard);
        drop(held);
        assert_eq!(reconciler.locks.len(), 0);
        let rec = store.find("alice", at(0, 0).date()).await.unwrap().unwrap();
        assert_eq!(rec.steps, 9000);
    }

    async fn open_sqlite() -> (TempDir, Arc<SqliteRecordStore>) {
        let tmp = TempDir::new().unwrap();
        let pool = db::connect_path(&tmp.path().join("steps.sqlite"))
            .await
            .unwrap();
        migrate_pool(&pool).await.unwrap();
        (tmp, Arc::new(SqliteRecordStore::new(pool)))
    }

    /// Answers the first `find` with an outdated snapshot, as if another
    /// process wrote between this reconciler's read and its write.
    struct OutdatedFirstRead {
        inner: Arc<SqliteRecordStore>,
        snapshot: Mutex<Option<Option<DailyRecord>>>,
    }

    impl OutdatedFirstRead {
        fn new(inner: Arc<SqliteRecordStore>, snapshot: Option<DailyRecord>) -> Self {
            Self {
                inner,
                snapshot: Mutex::new(Some(snapshot)),
            }
        }
    }

    #[async_trait]
    impl RecordStore for OutdatedFirstRead {
        async fn find(&self, person: &str, day: NaiveDate) -> Result<Option<DailyRecord>> {
            let outdated = self.snapshot.lock().unwrap().take();
            match outdated {
                Some(snapshot) => Ok(snapshot),
                None => self.inner.find(person, day).await,
            }
        }

        async fn insert(&self, record: &NewRecord) -> Result<Option<i64>> {
            self.inner.insert(record).await
        }

        async fn raise(
            &self,
            id: i64,
            steps: u32,
            source_image: &str,
            created_at: NaiveDateTime,
        ) -> Result<bool> {
            self.inner.raise(id, steps, source_image, created_at).await
        }

        async fn leaderboard(&self) -> Result<Vec<LeaderboardEntry>> {
            self.inner.leaderboard().await
        }

        async fn people(&self) -> Result<Vec<String>> {
            self.inner.people().await
        }

        async fn history(&self, person: &str, page: Page) -> Result<Vec<DailyRecord>> {
            self.inner.history(person, page).await
        }
    }

    #[tokio::test]
    async fn test_outdated_read_cannot_lower_record() {
        let (_tmp, store) = open_sqlite().await;
        let first = Reconciler::new(store.clone(), ReconcilePolicy::default());
        first
            .reconcile(&reading("alice", 9000, "a.png", at(9, 0)))
            .await
            .unwrap();
        let seen_at_9000 = store.find("alice", at(0, 0).date()).await.unwrap();

        // first process raises to 9500 after the second one read 9000
        first
            .reconcile(&reading("alice", 9500, "b.png", at(10, 0)))
            .await
            .unwrap();
        let second = Reconciler::new(
            Arc::new(OutdatedFirstRead::new(store.clone(), seen_at_9000)),
            ReconcilePolicy::default(),
        );
        let d = second
            .reconcile(&reading("alice", 9200, "c.png", at(10, 5)))
            .await
            .unwrap();

        assert_eq!(
            d,
            Decision::Ignored {
                id: 1,
                kept_steps: 9500
            }
        );
        let rec = store.find("alice", at(0, 0).date()).await.unwrap().unwrap();
        assert_eq!(rec.steps, 9500);
        assert_eq!(rec.source_image, "b.png");
    }

    #[tokio::test]
    async fn test_outdated_miss_reconciles_instead_of_failing() {
        let (_tmp, store) = open_sqlite().await;
        let first = Reconciler::new(store.clone(), ReconcilePolicy::default());
        // second process saw no record yet
        let second = Reconciler::new(
            Arc::new(OutdatedFirstRead::new(store.clone(), None)),
            ReconcilePolicy::default(),
        );
        first
            .reconcile(&reading("bob", 9000, "a.png", at(9, 0)))
            .await
            .unwrap();

        let d = second
            .reconcile(&reading("bob", 9400, "b.png", at(9, 1)))
            .await
            .unwrap();
        assert_eq!(
            d,
            Decision::Updated {
                id: 1,
                previous_steps: 9000
            }
        );
        assert_eq!(store.leaderboard().await.unwrap()[0].days, 1);
        let rec = store.find("bob", at(0, 0).date()).await.unwrap().unwrap();
        assert_eq!(rec.steps, 9400);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_two_reconcilers_on_one_database_keep_maximum() {
        let (_tmp, store) = open_sqlite().await;
        // separate lock tables, as with `ingest` running next to `serve`
        let reconcilers = [
            Arc::new(Reconciler::new(store.clone(), ReconcilePolicy::default())),
            Arc::new(Reconciler::new(store.clone(), ReconcilePolicy::default())),
        ];

        let mut tasks = Vec::new();
        for i in 0..24u32 {
            let reconciler = reconcilers[(i % 2) as usize].clone();
            tasks.push(tokio::spawn(async move {
                let steps = 2000 + (i * 7919) % 6000;
                reconciler
                    .reconcile(&reading("erin", steps, &format!("{}.png", i), at(12, i)))
                    .await
            }));
        }
        for t in tasks {
            t.await.unwrap().unwrap();
        }

        let expected = (0..24u32).map(|i| 2000 + (i * 7919) % 6000).max().unwrap();
        let rec = store.find("erin", at(0, 0).date()).await.unwrap().unwrap();
        assert_eq!(rec.steps, expected);
        assert_eq!(store.leaderboard().await.unwrap()[0].days, 1);
    }
}
