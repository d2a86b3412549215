//! The export job: query a day window, render, write one file.

use crate::renderer::render_rows;
use chrono::{DateTime, Duration, NaiveTime, Utc};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use user_reporting_core::report::{RepoError, ReportRepository};

/// Why an export run failed.
///
/// Any of these fails the current scheduled run only; the scheduler
/// records the outcome and fires again next time.
#[derive(Error, Debug)]
pub enum ExportError {
    /// The window query against the read model failed.
    #[error("Export query failed: {0}")]
    Repository(#[from] RepoError),

    /// Creating the output directory or writing the artifact failed.
    #[error("Export write failed for '{path}': {source}")]
    Io {
        /// The path being written.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Something a scheduler can run on a cron tick.
pub trait Job: Send + Sync {
    /// Error type reported into the scheduler's failure tracking.
    type Error: std::fmt::Display + Send;

    /// Execute one run, started at `now`.
    fn run(&self, now: DateTime<Utc>) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Materializes one UTC calendar day of report records into a CSV
/// artifact.
///
/// The window is `[start_of_day, start_of_day + 1 day)` for the day
/// containing `now`, queried inclusively up to the last representable
/// microsecond of the day. The artifact is rendered fully in memory
/// before the file is created, so a failed run leaves no partial file.
///
/// Filenames are `users_<yyyyMMddHHmmss>.csv` derived from the run's
/// start time; timestamp granularity is the collision-avoidance
/// mechanism, matching the scheduler's guarantee that runs never
/// overlap.
pub struct ExportJob {
    repository: Arc<dyn ReportRepository>,
    output_dir: PathBuf,
}

impl ExportJob {
    /// Create a job reading from `repository` and writing under
    /// `output_dir` (created on first run if missing).
    #[must_use]
    pub fn new(repository: Arc<dyn ReportRepository>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            repository,
            output_dir: output_dir.into(),
        }
    }

    /// The configured output directory.
    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Run one export and return the path of the written artifact.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError`] if the query or the filesystem write
    /// fails. No partial file is left behind in either case.
    pub async fn export(&self, now: DateTime<Utc>) -> Result<PathBuf, ExportError> {
        let start_of_day = now.date_naive().and_time(NaiveTime::MIN).and_utc();
        let end_of_day = start_of_day + Duration::days(1) - Duration::microseconds(1);

        let records = self
            .repository
            .query_by_window(start_of_day, end_of_day)
            .await
            .inspect_err(|e| {
                tracing::error!(
                    from = %start_of_day,
                    to = %end_of_day,
                    error = %e,
                    "Export query failed"
                );
            })?;

        let body = render_rows(&records);

        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|source| ExportError::Io {
                path: self.output_dir.clone(),
                source,
            })?;

        let file_name = format!("users_{}.csv", now.format("%Y%m%d%H%M%S"));
        let path = self.output_dir.join(file_name);

        tokio::fs::write(&path, body.as_bytes())
            .await
            .map_err(|source| {
                tracing::error!(
                    path = %path.display(),
                    error = %source,
                    "Export write failed"
                );
                ExportError::Io {
                    path: path.clone(),
                    source,
                }
            })?;

        tracing::info!(
            path = %path.display(),
            rows = records.len(),
            from = %start_of_day,
            to = %end_of_day,
            "Export artifact written"
        );

        Ok(path)
    }
}

impl Job for ExportJob {
    type Error = ExportError;

    async fn run(&self, now: DateTime<Utc>) -> Result<(), ExportError> {
        self.export(now).await.map(|_| ())
    }
}
