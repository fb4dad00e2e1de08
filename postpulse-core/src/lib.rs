//! # postpulse-core
//!
//! Core library for postpulse - engagement analytics over an append-only
//! event log.
//!
//! This library provides:
//! - Domain types for authors, items, engagement events, and windows
//! - SQLite storage for the event log and persisted snapshots
//! - The aggregation cache: versioned, atomically published generations
//! - Analytics: benchmarks, opportunity scoring, temporal patterns, rankings
//! - Configuration, logging, and a deterministic sample-data seeder
//!
//! ## Architecture
//!
//! Data flows through three layers:
//! - **Layer 1 (Canonical):** authors, items, and engagement events (append-only)
//! - **Layer 2 (Derived):** snapshot generations built by full re-aggregation
//! - **Layer 3 (Queries):** pure functions over one bound generation
//!
//! ## Example
//!
//! ```rust,no_run
//! use postpulse_core::{AggregationCache, Config, Database, EngagementService};
//! use std::sync::Arc;
//!
//! let config = Config::load().expect("failed to load config");
//! let db = Arc::new(Database::open(&Config::database_path()).expect("failed to open database"));
//! db.migrate().expect("failed to run migrations");
//!
//! let cache = Arc::new(AggregationCache::new(db.clone()).with_store(db, config.cache.retained_generations));
//! cache.init().expect("failed to restore snapshot");
//! cache.refresh().expect("refresh failed");
//!
//! let service = EngagementService::new(cache, config.analytics.clone());
//! let summary = service.get_summary();
//! ```

// Re-export commonly used items at the crate root
pub use cache::{
    AggregationCache, CancelToken, Generation, GenerationId, RefreshOutcome, RefreshStatus,
    SnapshotEntry, SnapshotStore,
};
pub use config::Config;
pub use db::Database;
pub use error::{ConsistencyError, Error, IngestionIssue, QueryError, RefreshError, Result};
pub use service::EngagementService;
pub use source::{Catalogue, EventSource, MemorySource};
pub use types::*;

// Public modules
pub mod analytics;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod format;
pub mod logging;
pub mod seed;
pub mod service;
pub mod source;
pub mod types;
