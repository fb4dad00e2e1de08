//! Database layer for postpulse
//!
//! This module provides the storage layer using SQLite with:
//! - Schema migrations
//! - The append-only engagement log, readable as an [`EventSource`](crate::source::EventSource)
//! - Persisted snapshot generations for warm restarts

pub mod repo;
pub mod schema;
mod snapshots;

pub use repo::{Database, SeedRun, TableCounts};
