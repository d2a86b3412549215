//! # User Reporting — Scheduled Export
//!
//! Periodically materializes the reporting read model into a
//! distributable spreadsheet artifact:
//!
//! - [`render_rows`]: renders records into CSV with the fixed header
//!   schema `UserId,Username,Email,RegisteredAt`
//! - [`ExportJob`]: queries one UTC calendar day of records, renders
//!   fully in memory, and writes a single `users_<timestamp>.csv` file
//! - [`ExportScheduler`]: fires the job on a cron expression, one run
//!   at a time, tracking per-run outcomes
//!
//! A failed run is logged with full context and recorded in the
//! scheduler's stats; it never disables future runs, and it leaves no
//! partial file because the artifact is written only after rendering
//! completes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod job;
mod renderer;
mod scheduler;

pub use job::{ExportError, ExportJob, Job};
pub use renderer::{EXPORT_HEADERS, render_rows};
pub use scheduler::{ExportScheduler, ScheduleError, SchedulerStats, SchedulerStatsSnapshot};
