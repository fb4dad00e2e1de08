//! Error types for postpulse-core
//!
//! Four families mirror how failures are handled:
//! - [`IngestionIssue`]: a single malformed event, skipped and counted (never returned as an error)
//! - [`RefreshError`]: the in-progress refresh is abandoned, the published generation stays
//! - [`QueryError`]: invalid query input, rejected before any computation
//! - [`ConsistencyError`]: a snapshot invariant was violated, the cache goes degraded

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ItemId;

/// Main error type for the postpulse-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Refresh failed; the previously published generation is still served
    #[error(transparent)]
    Refresh(#[from] RefreshError),

    /// Query rejected before computation
    #[error(transparent)]
    Query(#[from] QueryError),

    /// Snapshot invariant violation
    #[error(transparent)]
    Consistency(#[from] ConsistencyError),

    /// Sample data was already loaded into this database
    #[error("database already seeded at {0}")]
    AlreadySeeded(DateTime<Utc>),
}

/// Reasons a refresh did not publish a new generation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    /// Another refresh is building a generation right now
    #[error("refresh already in progress")]
    InProgress,

    /// The caller cancelled the refresh; the partial generation was dropped
    #[error("refresh cancelled")]
    Cancelled,

    /// The cache was shut down
    #[error("cache is shut down")]
    ShuttingDown,

    /// The event source could not be read
    #[error("event source unavailable: {0}")]
    Source(String),

    /// The freshly built generation failed its invariant check
    #[error("built generation is inconsistent: {0}")]
    Inconsistent(ConsistencyError),
}

impl RefreshError {
    /// Whether retrying the same refresh later can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RefreshError::Source(_) | RefreshError::InProgress)
    }
}

/// Invalid query input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// Window ends before it starts
    #[error("invalid window: end {end} is before start {start}")]
    InvalidWindow {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    /// Result limit outside the accepted bound
    #[error("invalid limit {limit}: must be between {min} and {max}")]
    InvalidLimit { limit: usize, min: usize, max: usize },

    /// Category name not in the fixed set
    #[error("unknown category: {0}")]
    UnknownCategory(String),

    /// Ranking metric name not recognised
    #[error("unknown ranking metric: {0}")]
    UnknownMetric(String),
}

/// A violated snapshot invariant.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ConsistencyError {
    /// `total` disagrees with the sum of per-kind counts
    #[error("item {item_id}: total {total} != per-kind sum {sum}")]
    TotalMismatch { item_id: ItemId, total: u64, sum: u64 },

    /// Entry for an item that is not in the catalogue
    #[error("item {item_id}: snapshot entry has no matching item")]
    OrphanEntry { item_id: ItemId },

    /// Catalogue item without a snapshot entry
    #[error("item {item_id}: no snapshot entry")]
    MissingEntry { item_id: ItemId },

    /// Entry stamped with a different generation than the one holding it
    #[error("item {item_id}: entry generation {found} != {expected}")]
    GenerationMismatch {
        item_id: ItemId,
        expected: u64,
        found: u64,
    },

    /// Restored generation does not hash to its recorded fingerprint
    #[error("generation {generation}: fingerprint mismatch")]
    FingerprintMismatch { generation: u64 },
}

/// A single event skipped during a refresh scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IngestionIssue {
    /// Event kind is not one of view/like/comment/share
    UnknownKind { event_id: i64, kind: String },
    /// Event references an item missing from the item set
    UnknownItem { event_id: i64, item_id: ItemId },
}

impl std::fmt::Display for IngestionIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IngestionIssue::UnknownKind { event_id, kind } => {
                write!(f, "event {}: unknown kind '{}'", event_id, kind)
            }
            IngestionIssue::UnknownItem { event_id, item_id } => {
                write!(f, "event {}: unknown item {}", event_id, item_id)
            }
        }
    }
}

/// Result type alias for postpulse-core
pub type Result<T> = std::result::Result<T, Error>;
