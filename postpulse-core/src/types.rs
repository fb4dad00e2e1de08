//! Core domain types for postpulse
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Author** | Someone who publishes items; belongs to one [`Category`] |
//! | **Item** | A published post; its category may differ from its author's |
//! | **Engagement event** | One view, like, comment, or share of an item |
//! | **Window** | A half-open `[start, end)` UTC time range scoping a query |
//! | **Qualifying** | An item (or its author) whose publish time falls inside the window |
//!
//! Authors, items, and events are append-only: this crate never mutates or
//! deletes them once ingested.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::QueryError;

pub type AuthorId = i64;
pub type ItemId = i64;

// ============================================
// Category
// ============================================

/// The fixed set of content categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Tech,
    Lifestyle,
    Business,
    Health,
    Finance,
    Entertainment,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Tech,
        Category::Lifestyle,
        Category::Business,
        Category::Health,
        Category::Finance,
        Category::Entertainment,
    ];

    /// Returns the identifier used in database storage
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Tech => "tech",
            Category::Lifestyle => "lifestyle",
            Category::Business => "business",
            Category::Health => "health",
            Category::Finance => "finance",
            Category::Entertainment => "entertainment",
        }
    }

    /// Returns the display name for this category
    pub fn display_name(&self) -> &'static str {
        match self {
            Category::Tech => "Tech",
            Category::Lifestyle => "Lifestyle",
            Category::Business => "Business",
            Category::Health => "Health",
            Category::Finance => "Finance",
            Category::Entertainment => "Entertainment",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Category {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        Category::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == lowered)
            .ok_or_else(|| QueryError::UnknownCategory(s.to_string()))
    }
}

// ============================================
// Event kinds and counts
// ============================================

/// Kind of engagement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    View,
    Like,
    Comment,
    Share,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::View,
        EventKind::Like,
        EventKind::Comment,
        EventKind::Share,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::View => "view",
            EventKind::Like => "like",
            EventKind::Comment => "comment",
            EventKind::Share => "share",
        }
    }

    /// Parse a stored kind. Returns `None` for anything outside the fixed set.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "view" => Some(EventKind::View),
            "like" => Some(EventKind::Like),
            "comment" => Some(EventKind::Comment),
            "share" => Some(EventKind::Share),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Engagement counts broken down by kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KindCounts {
    pub views: u64,
    pub likes: u64,
    pub comments: u64,
    pub shares: u64,
}

impl KindCounts {
    pub fn get(&self, kind: EventKind) -> u64 {
        match kind {
            EventKind::View => self.views,
            EventKind::Like => self.likes,
            EventKind::Comment => self.comments,
            EventKind::Share => self.shares,
        }
    }

    pub fn add(&mut self, kind: EventKind, n: u64) {
        match kind {
            EventKind::View => self.views += n,
            EventKind::Like => self.likes += n,
            EventKind::Comment => self.comments += n,
            EventKind::Share => self.shares += n,
        }
    }

    pub fn merge(&mut self, other: &KindCounts) {
        self.views += other.views;
        self.likes += other.likes;
        self.comments += other.comments;
        self.shares += other.shares;
    }

    /// Sum over all kinds.
    pub fn sum(&self) -> u64 {
        self.views + self.likes + self.comments + self.shares
    }

    /// Likes + comments + shares.
    pub fn interactions(&self) -> u64 {
        self.likes + self.comments + self.shares
    }

    /// Interactions per hundred views, rounded to two decimals (0 with no views).
    pub fn engagement_rate(&self) -> f64 {
        if self.views == 0 {
            return 0.0;
        }
        round2(100.0 * self.interactions() as f64 / self.views as f64)
    }
}

// ============================================
// Catalogue entities
// ============================================

/// A content author.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub id: AuthorId,
    pub name: String,
    pub joined_at: DateTime<Utc>,
    pub category: Category,
}

/// A published item (post).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub author_id: AuthorId,
    pub category: Category,
    pub published_at: DateTime<Utc>,
    pub title: String,
    /// Content length in characters
    pub content_length: u32,
    pub has_media: bool,
}

/// An engagement event as handed to ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngagementEvent {
    /// Uniqueness key; re-ingesting the same key is a no-op
    pub key: String,
    pub item_id: ItemId,
    pub kind: EventKind,
    pub actor_id: Option<i64>,
    pub occurred_at: DateTime<Utc>,
}

/// An event as read back from the event source, before validation.
///
/// The kind is kept as stored text so malformed rows can be reported
/// instead of failing the whole scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub id: i64,
    pub item_id: ItemId,
    pub kind: String,
    pub actor_id: Option<i64>,
    pub occurred_at: DateTime<Utc>,
}

// ============================================
// Window
// ============================================

/// Half-open `[start, end)` time range. A missing bound is unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl Window {
    /// Unbounded window.
    pub fn all_time() -> Self {
        Self::default()
    }

    /// The `days` days leading up to (and excluding) `anchor`.
    pub fn trailing_days(days: u32, anchor: DateTime<Utc>) -> Self {
        Self {
            start: Some(anchor - Duration::days(i64::from(days))),
            end: Some(anchor),
        }
    }

    /// Explicit range; rejects `end < start`.
    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, QueryError> {
        let window = Self {
            start: Some(start),
            end: Some(end),
        };
        window.validate()?;
        Ok(window)
    }

    pub fn validate(&self) -> Result<(), QueryError> {
        match (self.start, self.end) {
            (Some(start), Some(end)) if end < start => Err(QueryError::InvalidWindow { start, end }),
            _ => Ok(()),
        }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start.map_or(true, |s| ts >= s) && self.end.map_or(true, |e| ts < e)
    }

    /// Short human-readable descriptor, e.g. `2025-01-01..2025-04-01`.
    pub fn describe(&self) -> String {
        let fmt = |ts: Option<DateTime<Utc>>| {
            ts.map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_default()
        };
        if self.start.is_none() && self.end.is_none() {
            "all time".to_string()
        } else {
            format!("{}..{}", fmt(self.start), fmt(self.end))
        }
    }
}

/// Round to two decimal places.
pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
