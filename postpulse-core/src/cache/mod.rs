//! Aggregation cache
//!
//! Keeps per-item engagement roll-ups fresh without re-scanning the event
//! log on every query.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  refresh()   ┌───────────────────┐  store()  ┌──────────────────────┐
//! │ EventSource  │ ───────────► │ build_generation  │ ────────► │ ArcSwapOption<Gen>   │
//! │ (append-only)│  full scan   │ (isolated, new id)│  atomic   │ (published pointer)  │
//! └──────────────┘              └───────────────────┘           └──────────┬───────────┘
//!                                                                          │ current()
//!                                                                          ▼
//!                                                          queries bind one Arc<Generation>
//! ```
//!
//! - Readers never block and never see a half-built generation.
//! - At most one refresh builds at a time; a second request is rejected with
//!   [`RefreshError::InProgress`].
//! - A build that fails or is cancelled before its commit point is never
//!   persisted and leaves the published generation untouched.
//! - The cache does not deduplicate events. Uniqueness is the event source's
//!   contract (the SQLite source enforces it with a unique event key).

mod builder;
mod generation;
pub mod scheduler;

pub use generation::{Generation, GenerationId, SkipCounts, SnapshotEntry, TimelineCount};
pub use scheduler::spawn_refresh_loop;

use crate::error::{ConsistencyError, IngestionIssue, RefreshError, Result};
use crate::source::EventSource;
use crate::types::{Author, Item, ItemId};
use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

// ============================================
// Cancellation
// ============================================

/// Cooperative cancellation flag for a refresh.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ============================================
// Persistence seam
// ============================================

/// A generation as read back from storage.
#[derive(Debug, Clone)]
pub struct PersistedGeneration {
    pub id: GenerationId,
    pub refreshed_at: DateTime<Utc>,
    pub event_count: u64,
    pub skipped: SkipCounts,
    pub issue_samples: Vec<IngestionIssue>,
    pub fingerprint: String,
    pub entries: Vec<SnapshotEntry>,
    pub timeline: Vec<TimelineCount>,
}

/// Durable storage for published generations.
pub trait SnapshotStore: Send + Sync {
    /// Save a published generation and prune all but the newest `retain`.
    fn save_generation(&self, generation: &Generation, retain: usize) -> Result<()>;

    /// Newest saved generation, if any.
    fn load_latest_generation(&self) -> Result<Option<PersistedGeneration>>;

    /// Highest generation id ever saved, if any.
    fn max_generation_id(&self) -> Result<Option<GenerationId>>;
}

// ============================================
// Outcomes and status
// ============================================

/// Metadata of a successful refresh.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshOutcome {
    pub generation_id: GenerationId,
    pub refreshed_at: DateTime<Utc>,
    pub item_count: usize,
    pub event_count: u64,
    pub skipped: SkipCounts,
    pub fingerprint: String,
    pub elapsed_ms: u64,
}

/// Point-in-time view of the cache lifecycle.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshStatus {
    pub current_generation_id: Option<GenerationId>,
    pub last_refreshed_at: Option<DateTime<Utc>>,
    pub in_progress: bool,
    /// Set after a consistency violation; data served is stale until the next good refresh
    pub degraded: bool,
    pub stale_reason: Option<String>,
    pub last_error: Option<String>,
    pub skipped_events: u64,
    pub fingerprint: Option<String>,
}

#[derive(Debug, Default)]
struct CacheHealth {
    degraded: bool,
    stale_reason: Option<String>,
    last_error: Option<String>,
}

/// Resets the in-flight flag however the refresh ends.
struct RefreshGuard<'a>(&'a AtomicBool);

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

// ============================================
// Cache
// ============================================

/// Owner of the published generation and its refresh lifecycle.
pub struct AggregationCache {
    source: Arc<dyn EventSource>,
    store: Option<Arc<dyn SnapshotStore>>,
    retained_generations: usize,
    published: ArcSwapOption<Generation>,
    refreshing: AtomicBool,
    shut_down: AtomicBool,
    next_id: AtomicU64,
    active_cancel: Mutex<Option<CancelToken>>,
    health: Mutex<CacheHealth>,
}

impl AggregationCache {
    /// Create an empty, never-refreshed cache over `source`.
    pub fn new(source: Arc<dyn EventSource>) -> Self {
        Self {
            source,
            store: None,
            retained_generations: 2,
            published: ArcSwapOption::empty(),
            refreshing: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            active_cancel: Mutex::new(None),
            health: Mutex::new(CacheHealth::default()),
        }
    }

    /// Persist every published generation to `store`, keeping `retain` of them.
    pub fn with_store(mut self, store: Arc<dyn SnapshotStore>, retain: usize) -> Self {
        self.store = Some(store);
        self.retained_generations = retain.max(2);
        self
    }

    /// Restore the newest persisted generation, if one exists and is consistent.
    ///
    /// Returns the id of the restored generation. An inconsistent stored
    /// generation is not published; the cache is flagged degraded instead.
    pub fn init(&self) -> Result<Option<GenerationId>> {
        let Some(store) = self.store.as_ref() else {
            return Ok(None);
        };

        if let Some(max_id) = store.max_generation_id()? {
            self.next_id.fetch_max(max_id.0 + 1, Ordering::SeqCst);
        }

        let Some(persisted) = store.load_latest_generation()? else {
            tracing::info!("No persisted generation to restore");
            return Ok(None);
        };

        let generation = self.restore(persisted)?;
        let violations = generation.check();
        if !violations.is_empty() {
            self.mark_degraded(&violations, "persisted generation failed consistency check");
            return Ok(None);
        }

        let id = generation.id();
        tracing::info!(
            generation = %id,
            items = generation.entry_count(),
            refreshed_at = %generation.refreshed_at(),
            "Restored persisted generation"
        );
        self.published.store(Some(Arc::new(generation)));
        Ok(Some(id))
    }

    /// The catalogue of a restored generation is the current catalogue
    /// narrowed to the items it has entries for.
    fn restore(&self, persisted: PersistedGeneration) -> Result<Generation> {
        let entry_ids: HashSet<ItemId> = persisted.entries.iter().map(|e| e.item_id).collect();
        let items: Vec<Item> = self
            .source
            .items()?
            .into_iter()
            .filter(|i| entry_ids.contains(&i.id))
            .collect();
        let authors: Vec<Author> = self.source.authors()?;

        Ok(Generation::restore(persisted, items, authors))
    }

    /// Bind the current generation. Hold the returned `Arc` for the whole query.
    pub fn current(&self) -> Option<Arc<Generation>> {
        self.published.load_full()
    }

    /// Snapshot entry for one item in the current generation.
    pub fn get(&self, item_id: ItemId) -> Option<SnapshotEntry> {
        self.current()
            .and_then(|generation| generation.entry(item_id).cloned())
    }

    /// All entries of the current generation (empty before the first refresh).
    pub fn all(&self) -> Vec<SnapshotEntry> {
        self.current()
            .map(|generation| generation.entries().cloned().collect())
            .unwrap_or_default()
    }

    /// Rebuild from a full scan and publish the result.
    pub fn refresh(&self) -> std::result::Result<RefreshOutcome, RefreshError> {
        self.refresh_with_cancel(&CancelToken::new())
    }

    /// Like [`refresh`](Self::refresh), abandoning the build once `cancel` fires.
    pub fn refresh_with_cancel(
        &self,
        cancel: &CancelToken,
    ) -> std::result::Result<RefreshOutcome, RefreshError> {
        if self.is_shut_down() {
            return Err(RefreshError::ShuttingDown);
        }
        if self
            .refreshing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::info!("Refresh already in progress, rejecting request");
            return Err(RefreshError::InProgress);
        }
        let _guard = RefreshGuard(&self.refreshing);
        *self.lock_cancel() = Some(cancel.clone());

        let result = self.build_and_publish(cancel);

        *self.lock_cancel() = None;
        if let Err(e) = &result {
            tracing::warn!(error = %e, retryable = e.is_retryable(), "Refresh failed, keeping current generation");
            self.lock_health().last_error = Some(e.to_string());
        }
        result
    }

    fn build_and_publish(
        &self,
        cancel: &CancelToken,
    ) -> std::result::Result<RefreshOutcome, RefreshError> {
        let start = Instant::now();
        let id = GenerationId(self.next_id.fetch_add(1, Ordering::SeqCst));
        tracing::info!(generation = %id, "Refresh started");

        let generation = builder::build_generation(self.source.as_ref(), id, cancel)?;

        let violations = generation.check();
        if let Some(first) = violations.first().cloned() {
            self.mark_degraded(&violations, "built generation failed consistency check");
            return Err(RefreshError::Inconsistent(first));
        }

        if cancel.is_cancelled() || self.is_shut_down() {
            return Err(RefreshError::Cancelled);
        }

        // Commit point: from here the generation is persisted and published
        // even if a cancel arrives.
        if let Some(store) = &self.store {
            if let Err(e) = store.save_generation(&generation, self.retained_generations) {
                tracing::warn!(generation = %id, error = %e, "Failed to persist generation");
            }
        }

        let outcome = RefreshOutcome {
            generation_id: id,
            refreshed_at: generation.refreshed_at(),
            item_count: generation.entry_count(),
            event_count: generation.event_count(),
            skipped: generation.skipped(),
            fingerprint: generation.fingerprint().to_string(),
            elapsed_ms: start.elapsed().as_millis() as u64,
        };

        self.published.store(Some(Arc::new(generation)));
        *self.lock_health() = CacheHealth::default();

        tracing::info!(
            generation = %id,
            items = outcome.item_count,
            events = outcome.event_count,
            skipped = outcome.skipped.total(),
            elapsed_ms = outcome.elapsed_ms,
            "Generation published"
        );
        Ok(outcome)
    }

    /// Cancel the refresh currently building, if any.
    pub fn cancel_refresh(&self) {
        if let Some(token) = self.lock_cancel().as_ref() {
            tracing::info!("Cancelling in-flight refresh");
            token.cancel();
        }
    }

    /// Consistency-check hook over the published generation.
    ///
    /// Any violation flips the cache into degraded state; the generation
    /// keeps being served and [`status`](Self::status) reports it as stale.
    pub fn check_consistency(&self) -> Vec<ConsistencyError> {
        let Some(generation) = self.current() else {
            return Vec::new();
        };
        let violations = generation.check();
        if !violations.is_empty() {
            self.mark_degraded(&violations, "published generation failed consistency check");
        }
        violations
    }

    fn mark_degraded(&self, violations: &[ConsistencyError], reason: &str) {
        for violation in violations {
            tracing::error!(violation = %violation, "Snapshot consistency violation");
        }
        let mut health = self.lock_health();
        health.degraded = true;
        health.stale_reason = Some(format!("{} ({} violations)", reason, violations.len()));
    }

    pub fn status(&self) -> RefreshStatus {
        let generation = self.current();
        let health = self.lock_health();
        RefreshStatus {
            current_generation_id: generation.as_ref().map(|g| g.id()),
            last_refreshed_at: generation.as_ref().map(|g| g.refreshed_at()),
            in_progress: self.refreshing.load(Ordering::SeqCst),
            degraded: health.degraded,
            stale_reason: health.stale_reason.clone(),
            last_error: health.last_error.clone(),
            skipped_events: generation.as_ref().map_or(0, |g| g.skipped().total()),
            fingerprint: generation.as_ref().map(|g| g.fingerprint().to_string()),
        }
    }

    /// Stop accepting refreshes and cancel the one in flight.
    ///
    /// The published generation stays readable.
    pub fn shutdown(&self) {
        tracing::info!("Aggregation cache shutting down");
        self.shut_down.store(true, Ordering::SeqCst);
        self.cancel_refresh();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    fn lock_cancel(&self) -> std::sync::MutexGuard<'_, Option<CancelToken>> {
        self.active_cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_health(&self) -> std::sync::MutexGuard<'_, CacheHealth> {
        self.health.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
