//! # User Reporting Testing
//!
//! In-memory fakes for fast, deterministic pipeline tests:
//!
//! - [`InMemoryMessageBus`]: a wire-faithful broker fake with
//!   at-least-once semantics, settlement-gated delivery, release
//!   redelivery, and poison-message injection
//! - [`InMemoryReportRepository`]: a `HashMap`-backed read model with
//!   transient-fault injection
//!
//! Both implement the same `user-reporting-core` traits as the
//! production Kafka and Postgres implementations, so the consumer loop
//! and the export job run unmodified against them.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap on poisoned locks for simplicity

mod bus;
mod repository;

pub use bus::InMemoryMessageBus;
pub use repository::InMemoryReportRepository;
