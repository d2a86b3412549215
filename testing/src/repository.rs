//! In-memory report repository with transient-fault injection.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use user_reporting_core::report::{RepoError, ReportRecord, ReportRepository, Upserted};
use uuid::Uuid;

/// `HashMap`-backed read model for tests.
///
/// Mirrors the Postgres repository's contract: upsert keyed by
/// `user_id` that silently absorbs duplicates, and a boundary-inclusive
/// time-window query ordered by `registered_at` ascending with ties
/// broken by `user_id`.
///
/// [`InMemoryReportRepository::fail_next_upserts`] makes the next N
/// upserts return [`RepoError`], which is how tests exercise the
/// transient-failure → release → redelivery path of the consumer loop.
#[derive(Clone, Default)]
pub struct InMemoryReportRepository {
    records: Arc<RwLock<HashMap<Uuid, ReportRecord>>>,
    failures_remaining: Arc<AtomicUsize>,
    query_failures_remaining: Arc<AtomicUsize>,
}

impl InMemoryReportRepository {
    /// Create an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` upserts fail with a transient storage error.
    pub fn fail_next_upserts(&self, n: usize) {
        self.failures_remaining.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` window queries fail with a storage error.
    pub fn fail_next_queries(&self, n: usize) {
        self.query_failures_remaining.store(n, Ordering::SeqCst);
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().unwrap().len()
    }

    /// Whether the repository holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().unwrap().is_empty()
    }

    /// Fetch a record by user id.
    #[must_use]
    pub fn get(&self, user_id: Uuid) -> Option<ReportRecord> {
        self.records.read().unwrap().get(&user_id).cloned()
    }
}

impl ReportRepository for InMemoryReportRepository {
    fn upsert(
        &self,
        record: &ReportRecord,
    ) -> Pin<Box<dyn Future<Output = Result<Upserted, RepoError>> + Send + '_>> {
        let record = record.clone();
        Box::pin(async move {
            let remaining = self.failures_remaining.load(Ordering::SeqCst);
            if remaining > 0
                && self
                    .failures_remaining
                    .compare_exchange(remaining, remaining - 1, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
            {
                return Err(RepoError("injected storage failure".to_string()));
            }

            let mut records = self.records.write().unwrap();
            if records.contains_key(&record.user_id) {
                Ok(Upserted::AlreadyPresent)
            } else {
                records.insert(record.user_id, record);
                Ok(Upserted::Inserted)
            }
        })
    }

    fn query_by_window(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ReportRecord>, RepoError>> + Send + '_>> {
        Box::pin(async move {
            let remaining = self.query_failures_remaining.load(Ordering::SeqCst);
            if remaining > 0
                && self
                    .query_failures_remaining
                    .compare_exchange(remaining, remaining - 1, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
            {
                return Err(RepoError("injected query failure".to_string()));
            }

            let records = self.records.read().unwrap();
            let mut rows: Vec<ReportRecord> = records
                .values()
                .filter(|r| r.registered_at >= from && r.registered_at <= to)
                .cloned()
                .collect();
            rows.sort_by(|a, b| {
                a.registered_at
                    .cmp(&b.registered_at)
                    .then(a.user_id.cmp(&b.user_id))
            });
            Ok(rows)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(username: &str, registered_at: DateTime<Utc>) -> ReportRecord {
        ReportRecord {
            user_id: Uuid::new_v4(),
            username: username.to_string(),
            email: format!("{username}@x.com"),
            registered_at,
        }
    }

    #[tokio::test]
    async fn upsert_absorbs_duplicates() {
        let repo = InMemoryReportRepository::new();
        let rec = record("alice", Utc::now());

        assert_eq!(repo.upsert(&rec).await.unwrap(), Upserted::Inserted);
        assert_eq!(repo.upsert(&rec).await.unwrap(), Upserted::AlreadyPresent);
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test]
    async fn window_query_is_boundary_inclusive_and_ordered() {
        let repo = InMemoryReportRepository::new();
        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2025, 1, 1, 23, 59, 59).unwrap();
        let outside = Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap();

        repo.upsert(&record("mid", t1)).await.unwrap();
        repo.upsert(&record("late", t2)).await.unwrap();
        repo.upsert(&record("early", t0)).await.unwrap();
        repo.upsert(&record("next-day", outside)).await.unwrap();

        let rows = repo.query_by_window(t0, t2).await.unwrap();
        let names: Vec<&str> = rows.iter().map(|r| r.username.as_str()).collect();
        assert_eq!(names, vec!["early", "mid", "late"]);
    }

    #[tokio::test]
    async fn tied_timestamps_order_by_user_id() {
        let repo = InMemoryReportRepository::new();
        let at = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap();

        let mut ids: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            repo.upsert(&ReportRecord {
                user_id: *id,
                username: format!("user-{id}"),
                email: format!("{id}@x.com"),
                registered_at: at,
            })
            .await
            .unwrap();
        }
        ids.sort();

        let rows = repo.query_by_window(at, at).await.unwrap();
        let got: Vec<Uuid> = rows.iter().map(|r| r.user_id).collect();
        assert_eq!(got, ids);
    }

    #[tokio::test]
    async fn injected_failures_are_transient() {
        let repo = InMemoryReportRepository::new();
        repo.fail_next_upserts(1);
        let rec = record("alice", Utc::now());

        assert!(repo.upsert(&rec).await.is_err());
        assert_eq!(repo.upsert(&rec).await.unwrap(), Upserted::Inserted);
    }
}
