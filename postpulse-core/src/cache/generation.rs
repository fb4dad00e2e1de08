//! Immutable snapshot generations.

use super::PersistedGeneration;
use crate::error::{ConsistencyError, IngestionIssue};
use crate::types::{Author, AuthorId, EventKind, Item, ItemId, KindCounts, Window};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Monotonic generation identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GenerationId(pub u64);

impl std::fmt::Display for GenerationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-item roll-up belonging to one generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub item_id: ItemId,
    pub generation: GenerationId,
    pub counts: KindCounts,
    /// Always equal to `counts.sum()` in a consistent generation
    pub total: u64,
}

impl SnapshotEntry {
    pub fn new(item_id: ItemId, generation: GenerationId, counts: KindCounts) -> Self {
        Self {
            item_id,
            generation,
            counts,
            total: counts.sum(),
        }
    }

    /// Interactions per hundred views.
    pub fn engagement_rate(&self) -> f64 {
        self.counts.engagement_rate()
    }
}

/// Event count for one (timestamp, item, kind) point of the event timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimelineCount {
    pub occurred_at: DateTime<Utc>,
    pub item_id: ItemId,
    pub kind: EventKind,
    pub count: u64,
}

/// Events skipped while building a generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipCounts {
    pub unknown_kind: u64,
    pub unknown_item: u64,
}

impl SkipCounts {
    pub fn total(&self) -> u64 {
        self.unknown_kind + self.unknown_item
    }

    pub(crate) fn record(&mut self, issue: &IngestionIssue) {
        match issue {
            IngestionIssue::UnknownKind { .. } => self.unknown_kind += 1,
            IngestionIssue::UnknownItem { .. } => self.unknown_item += 1,
        }
    }
}

/// One complete, immutable version of the aggregation cache.
///
/// Besides the per-item entries it carries the item/author catalogue seen
/// at refresh time and a timeline of event counts keyed by exact event
/// timestamp, so every analytic query can be answered from a single
/// generation without touching the event log.
#[derive(Debug, Clone)]
pub struct Generation {
    id: GenerationId,
    refreshed_at: DateTime<Utc>,
    entries: BTreeMap<ItemId, SnapshotEntry>,
    items: BTreeMap<ItemId, Item>,
    authors: BTreeMap<AuthorId, Author>,
    timeline: Vec<TimelineCount>,
    event_count: u64,
    skipped: SkipCounts,
    issue_samples: Vec<IngestionIssue>,
    fingerprint: String,
}

/// Raw material for a generation, before entries are stamped.
pub(crate) struct GenerationParts {
    pub items: Vec<Item>,
    pub authors: Vec<Author>,
    pub counts: BTreeMap<ItemId, KindCounts>,
    pub timeline: BTreeMap<(DateTime<Utc>, ItemId, EventKind), u64>,
    pub event_count: u64,
    pub skipped: SkipCounts,
    pub issue_samples: Vec<IngestionIssue>,
}

impl Generation {
    /// Build a generation with one entry per catalogue item (all-zero when unseen).
    pub(crate) fn assemble(
        id: GenerationId,
        refreshed_at: DateTime<Utc>,
        parts: GenerationParts,
    ) -> Self {
        let GenerationParts {
            items,
            authors,
            counts,
            timeline,
            event_count,
            skipped,
            issue_samples,
        } = parts;

        let entries: BTreeMap<ItemId, SnapshotEntry> = items
            .iter()
            .map(|item| {
                let item_counts = counts.get(&item.id).copied().unwrap_or_default();
                (item.id, SnapshotEntry::new(item.id, id, item_counts))
            })
            .collect();

        let timeline: Vec<TimelineCount> = timeline
            .into_iter()
            .map(|((occurred_at, item_id, kind), count)| TimelineCount {
                occurred_at,
                item_id,
                kind,
                count,
            })
            .collect();

        let fingerprint = compute_fingerprint(&entries, &timeline);

        Self {
            id,
            refreshed_at,
            entries,
            items: items.into_iter().map(|i| (i.id, i)).collect(),
            authors: authors.into_iter().map(|a| (a.id, a)).collect(),
            timeline,
            event_count,
            skipped,
            issue_samples,
            fingerprint,
        }
    }

    /// Rebuild a generation from persisted parts without recomputing totals,
    /// so stored inconsistencies stay visible to [`check`](Self::check).
    pub(crate) fn restore(
        persisted: PersistedGeneration,
        items: Vec<Item>,
        authors: Vec<Author>,
    ) -> Self {
        let PersistedGeneration {
            id,
            refreshed_at,
            event_count,
            skipped,
            issue_samples,
            fingerprint,
            entries,
            mut timeline,
        } = persisted;

        timeline.sort();
        Self {
            id,
            refreshed_at,
            entries: entries.into_iter().map(|e| (e.item_id, e)).collect(),
            items: items.into_iter().map(|i| (i.id, i)).collect(),
            authors: authors.into_iter().map(|a| (a.id, a)).collect(),
            timeline,
            event_count,
            skipped,
            issue_samples,
            fingerprint,
        }
    }

    pub fn id(&self) -> GenerationId {
        self.id
    }

    pub fn refreshed_at(&self) -> DateTime<Utc> {
        self.refreshed_at
    }

    pub fn entry(&self, item_id: ItemId) -> Option<&SnapshotEntry> {
        self.entries.get(&item_id)
    }

    /// Entries in ascending item id order.
    pub fn entries(&self) -> impl Iterator<Item = &SnapshotEntry> {
        self.entries.values()
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn item(&self, item_id: ItemId) -> Option<&Item> {
        self.items.get(&item_id)
    }

    pub fn items(&self) -> impl Iterator<Item = &Item> {
        self.items.values()
    }

    pub fn author(&self, author_id: AuthorId) -> Option<&Author> {
        self.authors.get(&author_id)
    }

    pub fn authors(&self) -> impl Iterator<Item = &Author> {
        self.authors.values()
    }

    /// Event counts sorted by (timestamp, item, kind).
    pub fn timeline(&self) -> &[TimelineCount] {
        &self.timeline
    }

    /// Timeline points with `start <= occurred_at < end`, via binary search.
    pub fn timeline_in(&self, window: &Window) -> &[TimelineCount] {
        let lo = match window.start {
            Some(start) => self.timeline.partition_point(|c| c.occurred_at < start),
            None => 0,
        };
        let hi = match window.end {
            Some(end) => self.timeline.partition_point(|c| c.occurred_at < end),
            None => self.timeline.len(),
        };
        &self.timeline[lo..hi.max(lo)]
    }

    /// Events aggregated into this generation (skipped events excluded).
    pub fn event_count(&self) -> u64 {
        self.event_count
    }

    pub fn skipped(&self) -> SkipCounts {
        self.skipped
    }

    /// First few skipped events, for diagnostics.
    pub fn issue_samples(&self) -> &[IngestionIssue] {
        &self.issue_samples
    }

    /// SHA-256 over entry values and the timeline (generation id and refresh time excluded).
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Total engagement for an item, 0 if unknown.
    pub fn total_for(&self, item_id: ItemId) -> u64 {
        self.entries.get(&item_id).map_or(0, |e| e.total)
    }

    /// Verify the generation's invariants, returning every violation found.
    pub fn check(&self) -> Vec<ConsistencyError> {
        let mut violations = Vec::new();

        for entry in self.entries.values() {
            let sum = entry.counts.sum();
            if entry.total != sum {
                violations.push(ConsistencyError::TotalMismatch {
                    item_id: entry.item_id,
                    total: entry.total,
                    sum,
                });
            }
            if entry.generation != self.id {
                violations.push(ConsistencyError::GenerationMismatch {
                    item_id: entry.item_id,
                    expected: self.id.0,
                    found: entry.generation.0,
                });
            }
            if !self.items.contains_key(&entry.item_id) {
                violations.push(ConsistencyError::OrphanEntry {
                    item_id: entry.item_id,
                });
            }
        }

        for item_id in self.items.keys() {
            if !self.entries.contains_key(item_id) {
                violations.push(ConsistencyError::MissingEntry { item_id: *item_id });
            }
        }

        if compute_fingerprint(&self.entries, &self.timeline) != self.fingerprint {
            violations.push(ConsistencyError::FingerprintMismatch {
                generation: self.id.0,
            });
        }

        violations
    }
}

fn compute_fingerprint(entries: &BTreeMap<ItemId, SnapshotEntry>, timeline: &[TimelineCount]) -> String {
    let mut hasher = Sha256::new();
    for entry in entries.values() {
        let c = &entry.counts;
        hasher.update(
            format!(
                "e:{}:{}:{}:{}:{}:{}\n",
                entry.item_id, c.views, c.likes, c.comments, c.shares, entry.total
            )
            .as_bytes(),
        );
    }
    for cell in timeline {
        hasher.update(
            format!(
                "t:{}:{}:{}:{}\n",
                cell.occurred_at.timestamp_micros(),
                cell.item_id,
                cell.kind,
                cell.count
            )
            .as_bytes(),
        );
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Category;
    use chrono::TimeZone;

    fn item(id: ItemId) -> Item {
        Item {
            id,
            author_id: 1,
            category: Category::Tech,
            published_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            title: format!("Post {}", id),
            content_length: 500,
            has_media: true,
        }
    }

    fn parts(counts: BTreeMap<ItemId, KindCounts>) -> GenerationParts {
        GenerationParts {
            items: vec![item(1), item(2)],
            authors: vec![],
            counts,
            timeline: BTreeMap::new(),
            event_count: 0,
            skipped: SkipCounts::default(),
            issue_samples: vec![],
        }
    }

    #[test]
    fn test_assemble_fills_missing_items() {
        let mut counts = BTreeMap::new();
        counts.insert(
            1,
            KindCounts {
                views: 3,
                likes: 1,
                ..Default::default()
            },
        );
        let generation = Generation::assemble(GenerationId(7), Utc::now(), parts(counts));

        assert_eq!(generation.entry_count(), 2);
        assert_eq!(generation.entry(1).unwrap().total, 4);
        assert_eq!(generation.entry(2).unwrap().total, 0);
        assert_eq!(generation.entry(2).unwrap().generation, GenerationId(7));
        assert!(generation.entry(3).is_none());
        assert!(generation.check().is_empty());
    }

    #[test]
    fn test_fingerprint_ignores_generation_id() {
        let a = Generation::assemble(GenerationId(1), Utc::now(), parts(BTreeMap::new()));
        let b = Generation::assemble(GenerationId(2), Utc::now(), parts(BTreeMap::new()));
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_check_detects_violations() {
        let entries = vec![
            SnapshotEntry {
                item_id: 1,
                generation: GenerationId(3),
                counts: KindCounts {
                    views: 2,
                    ..Default::default()
                },
                total: 5,
            },
            SnapshotEntry::new(9, GenerationId(3), KindCounts::default()),
        ];
        let persisted = PersistedGeneration {
            id: GenerationId(3),
            refreshed_at: Utc::now(),
            event_count: 0,
            skipped: SkipCounts::default(),
            issue_samples: vec![],
            fingerprint: String::new(),
            entries,
            timeline: vec![],
        };
        let generation = Generation::restore(persisted, vec![item(1), item(2)], vec![]);

        let violations = generation.check();
        assert!(violations.contains(&ConsistencyError::TotalMismatch {
            item_id: 1,
            total: 5,
            sum: 2
        }));
        assert!(violations.contains(&ConsistencyError::OrphanEntry { item_id: 9 }));
        assert!(violations.contains(&ConsistencyError::MissingEntry { item_id: 2 }));
        assert!(violations.contains(&ConsistencyError::FingerprintMismatch { generation: 3 }));
    }
}
