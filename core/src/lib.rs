//! # User Reporting Core
//!
//! Core types and seams for the user-reporting pipeline.
//!
//! This crate defines the contracts shared by every component of the
//! pipeline:
//!
//! - **Facts**: immutable records of things that happened upstream
//!   ([`fact::UserRegisteredFact`])
//! - **Envelopes**: a fact plus the routing metadata the broker needs
//!   ([`envelope::Envelope`])
//! - **Message bus**: publish/subscribe over an at-least-once,
//!   partitioned transport ([`bus::MessageBus`])
//! - **Handlers**: idempotent business logic invoked per delivered
//!   envelope ([`handler::FactHandler`], [`handler::HandlerRegistry`])
//! - **Read model**: the downstream projection of registration facts
//!   ([`report::ReportRecord`], [`report::ReportRepository`])
//!
//! # Delivery Semantics
//!
//! The transport guarantees at-least-once delivery. Every consumer of
//! this crate's traits must assume duplicates and preserve the single
//! system invariant: for a given `user_id`, at most one [`report::ReportRecord`]
//! exists, no matter how many times its fact is delivered.
//!
//! Ordering is guaranteed per routing key only. The routing key is the
//! `user_id`, so all facts for one user traverse the broker in publish
//! order.

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use uuid::Uuid;

pub mod bus;
pub mod envelope;
pub mod fact;
pub mod handler;
pub mod publisher;
pub mod report;
