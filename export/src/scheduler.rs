//! Cron-driven scheduler for the export job.

use crate::job::Job;
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::watch;

/// The cron expression could not be parsed.
#[derive(Error, Debug)]
#[error("Invalid cron expression '{expression}': {reason}")]
pub struct ScheduleError {
    /// The rejected expression.
    pub expression: String,
    /// Parser diagnostic.
    pub reason: String,
}

/// Counters and last-run outcomes, shared with the running scheduler.
#[derive(Clone, Default)]
pub struct SchedulerStats {
    inner: Arc<Mutex<StatsInner>>,
}

#[derive(Default)]
struct StatsInner {
    runs: u64,
    failures: u64,
    last_error: Option<String>,
    last_success_at: Option<DateTime<Utc>>,
}

/// Point-in-time copy of [`SchedulerStats`].
#[derive(Clone, Debug)]
pub struct SchedulerStatsSnapshot {
    /// Total runs started.
    pub runs: u64,
    /// Runs that ended in an error.
    pub failures: u64,
    /// Message of the most recent failure, if any.
    pub last_error: Option<String>,
    /// When the most recent successful run finished.
    pub last_success_at: Option<DateTime<Utc>>,
}

impl SchedulerStats {
    fn record_success(&self, finished_at: DateTime<Utc>) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.runs += 1;
        inner.last_success_at = Some(finished_at);
    }

    fn record_failure(&self, error: String) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.runs += 1;
        inner.failures += 1;
        inner.last_error = Some(error);
    }

    /// Current counters.
    #[must_use]
    pub fn snapshot(&self) -> SchedulerStatsSnapshot {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        SchedulerStatsSnapshot {
            runs: inner.runs,
            failures: inner.failures,
            last_error: inner.last_error.clone(),
            last_success_at: inner.last_success_at,
        }
    }
}

/// Fires a [`Job`] on a cron schedule, one run at a time.
///
/// The loop sleeps until the next fire time, runs the job to
/// completion, then computes the following fire time from the clock
/// after the run. A run that overshoots its successor's slot delays
/// that slot rather than running concurrently with it.
///
/// A failed run is logged and counted, and the schedule continues
/// unchanged.
pub struct ExportScheduler<J: Job> {
    job: J,
    schedule: Schedule,
    shutdown: watch::Receiver<bool>,
    stats: SchedulerStats,
}

impl<J: Job> ExportScheduler<J> {
    /// Create a scheduler from a cron expression (seconds-resolution,
    /// e.g. `0 0 0 * * *` for midnight UTC daily).
    ///
    /// Returns the scheduler and the sender half of its shutdown
    /// signal; send `true` to stop the loop after the current run.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError`] if `cron_expr` is not a valid cron
    /// expression.
    pub fn new(job: J, cron_expr: &str) -> Result<(Self, watch::Sender<bool>), ScheduleError> {
        let schedule = Schedule::from_str(cron_expr).map_err(|e| ScheduleError {
            expression: cron_expr.to_string(),
            reason: e.to_string(),
        })?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Ok((
            Self {
                job,
                schedule,
                shutdown: shutdown_rx,
                stats: SchedulerStats::default(),
            },
            shutdown_tx,
        ))
    }

    /// Shared handle to the scheduler's run counters.
    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        self.stats.clone()
    }

    /// Run the schedule until shutdown is signalled.
    pub async fn run(mut self) {
        tracing::info!(schedule = %self.schedule, "Export scheduler started");

        loop {
            let Some(next) = self.schedule.upcoming(Utc).next() else {
                tracing::warn!("Schedule has no upcoming fire times, stopping");
                return;
            };

            let wait = (next - Utc::now())
                .to_std()
                .unwrap_or(std::time::Duration::ZERO);

            tokio::select! {
                () = tokio::time::sleep(wait) => {}
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        tracing::info!("Export scheduler stopped");
                        return;
                    }
                    continue;
                }
            }

            let started_at = Utc::now();
            tracing::debug!(fired_at = %next, "Export run starting");

            match self.job.run(started_at).await {
                Ok(()) => self.stats.record_success(Utc::now()),
                Err(e) => {
                    tracing::error!(error = %e, "Export run failed");
                    self.stats.record_failure(e.to_string());
                }
            }

            if *self.shutdown.borrow() {
                tracing::info!("Export scheduler stopped");
                return;
            }
        }
    }
}
