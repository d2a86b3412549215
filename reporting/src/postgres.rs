//! Postgres-backed report repository.

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::future::Future;
use std::pin::Pin;
use user_reporting_core::report::{RepoError, ReportRecord, ReportRepository, Upserted};
use uuid::Uuid;

/// `PostgreSQL` implementation of [`ReportRepository`].
///
/// # Schema
///
/// ```sql
/// CREATE TABLE IF NOT EXISTS user_registrations (
///     user_id UUID PRIMARY KEY,
///     username TEXT NOT NULL,
///     email TEXT NOT NULL,
///     registered_at TIMESTAMPTZ NOT NULL
/// );
/// CREATE INDEX IF NOT EXISTS idx_user_registrations_registered_at
///     ON user_registrations (registered_at);
/// ```
///
/// The primary key on `user_id` is the idempotency backstop: the upsert
/// is `ON CONFLICT DO NOTHING`, so a duplicate delivery that slips past
/// the handler still cannot create a second row. There is no uniqueness
/// constraint on `username`; the identity service owns that invariant.
#[derive(Clone)]
pub struct PostgresReportRepository {
    pool: PgPool,
}

impl PostgresReportRepository {
    /// Wrap an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to the reporting database.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError`] if the connection cannot be established.
    pub async fn connect(database_url: &str) -> Result<Self, RepoError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| RepoError(format!("Failed to connect: {e}")))?;
        Ok(Self::new(pool))
    }

    /// Create the read-model table if it does not exist.
    ///
    /// Schema migration tooling is outside this pipeline; this only
    /// covers the single table the pipeline owns.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError`] if the DDL fails.
    pub async fn ensure_schema(&self) -> Result<(), RepoError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS user_registrations (
                 user_id UUID PRIMARY KEY,
                 username TEXT NOT NULL,
                 email TEXT NOT NULL,
                 registered_at TIMESTAMPTZ NOT NULL
             )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| RepoError(format!("Failed to create table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_user_registrations_registered_at
                 ON user_registrations (registered_at)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| RepoError(format!("Failed to create index: {e}")))?;

        Ok(())
    }

    /// The underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl ReportRepository for PostgresReportRepository {
    fn upsert(
        &self,
        record: &ReportRecord,
    ) -> Pin<Box<dyn Future<Output = Result<Upserted, RepoError>> + Send + '_>> {
        let record = record.clone();
        Box::pin(async move {
            let result = sqlx::query(
                "INSERT INTO user_registrations (user_id, username, email, registered_at)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (user_id) DO NOTHING",
            )
            .bind(record.user_id)
            .bind(&record.username)
            .bind(&record.email)
            .bind(record.registered_at)
            .execute(&self.pool)
            .await
            .map_err(|e| RepoError(format!("Failed to upsert: {e}")))?;

            if result.rows_affected() == 0 {
                Ok(Upserted::AlreadyPresent)
            } else {
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
            let rows: Vec<(Uuid, String, String, DateTime<Utc>)> = sqlx::query_as(
                "SELECT user_id, username, email, registered_at
                 FROM user_registrations
                 WHERE registered_at >= $1 AND registered_at <= $2
                 ORDER BY registered_at ASC, user_id ASC",
            )
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RepoError(format!("Failed to query window: {e}")))?;

            Ok(rows
                .into_iter()
                .map(|(user_id, username, email, registered_at)| ReportRecord {
                    user_id,
                    username,
                    email,
                    registered_at,
                })
                .collect())
        })
    }
}
