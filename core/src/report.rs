//! The downstream read model and its repository seam.
//!
//! [`ReportRecord`] mirrors the registration fact, keyed by `user_id`.
//! It is created the first time a fact for that id is handled and never
//! updated or deleted by this pipeline. The repository's upsert is the
//! idempotency backstop: even if a duplicate slips past the handler,
//! the second write is a no-op.

use crate::fact::UserRegisteredFact;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use uuid::Uuid;

/// Error from the repository backing store.
#[derive(Error, Debug)]
#[error("Repository error: {0}")]
pub struct RepoError(pub String);

/// Outcome of an upsert, distinguishing first write from duplicate.
///
/// Duplicate deliveries are absorbed silently at the data level; the
/// distinction exists so callers can log and count them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upserted {
    /// A new record was created.
    Inserted,
    /// A record with this `user_id` already existed; nothing changed.
    AlreadyPresent,
}

/// One row of the reporting read model.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReportRecord {
    /// Unique user identifier (primary key).
    pub user_id: Uuid,
    /// Username at registration. Uniqueness is advisory at this layer.
    pub username: String,
    /// Email at registration.
    pub email: String,
    /// Registration timestamp (UTC).
    pub registered_at: DateTime<Utc>,
}

impl From<&UserRegisteredFact> for ReportRecord {
    fn from(fact: &UserRegisteredFact) -> Self {
        Self {
            user_id: fact.user_id,
            username: fact.username.clone(),
            email: fact.email.clone(),
            registered_at: fact.registered_at,
        }
    }
}

/// Persists and queries the reporting read model.
///
/// The consumer loop is the only writer; the export job is read-only.
///
/// # Dyn Compatibility
///
/// Uses explicit `Pin<Box<dyn Future>>` returns so the repository can
/// be shared as `Arc<dyn ReportRepository>` between the handler and the
/// export job.
pub trait ReportRepository: Send + Sync {
    /// Insert the record if no record with its `user_id` exists.
    ///
    /// Duplicate `user_id` writes are no-ops reported as
    /// [`Upserted::AlreadyPresent`], never errors. Username collisions
    /// are not rejected here.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError`] if the backing store is unavailable.
    fn upsert(
        &self,
        record: &ReportRecord,
    ) -> Pin<Box<dyn Future<Output = Result<Upserted, RepoError>> + Send + '_>>;

    /// Records with `from <= registered_at <= to`, ordered by
    /// `registered_at` ascending with ties broken by `user_id`, so the
    /// same window always yields the same row order. Boundary-inclusive
    /// on both ends.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError`] if the query fails.
    fn query_by_window(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ReportRecord>, RepoError>> + Send + '_>>;
}
