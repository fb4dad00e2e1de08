//! Item, author, category, and summary reports.

use super::safe_avg;
use crate::cache::Generation;
use crate::error::QueryError;
use crate::types::{round2, AuthorId, Category, ItemId, KindCounts, Window};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

// ============================================
// Item engagement
// ============================================

/// Engagement of one item within a window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemEngagement {
    pub item_id: ItemId,
    pub title: String,
    pub author_id: AuthorId,
    pub category: Category,
    pub published_at: DateTime<Utc>,
    pub window: Window,
    pub counts: KindCounts,
    pub total: u64,
    /// Interactions per hundred views
    pub engagement_rate: f64,
}

/// Per-kind counts for one item over events inside `window`.
///
/// `None` when the item is not in the generation.
pub fn item_engagement(generation: &Generation, item_id: ItemId, window: &Window) -> Option<ItemEngagement> {
    let item = generation.item(item_id)?;

    let mut counts = KindCounts::default();
    for cell in generation
        .timeline_in(window)
        .iter()
        .filter(|c| c.item_id == item_id)
    {
        counts.add(cell.kind, cell.count);
    }

    Some(ItemEngagement {
        item_id,
        title: item.title.clone(),
        author_id: item.author_id,
        category: item.category,
        published_at: item.published_at,
        window: *window,
        counts,
        total: counts.sum(),
        engagement_rate: counts.engagement_rate(),
    })
}

// ============================================
// Author trends
// ============================================

/// Lifetime and recent engagement of one author.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthorTrends {
    pub author_id: AuthorId,
    pub author_name: String,
    pub category: Category,
    pub total_items: u64,
    pub total_engagement: u64,
    pub avg_engagement_per_item: f64,
    /// Average per item over items published in the last 7 days (0 if none)
    pub trend_7d: f64,
    /// Average per item over items published in the last 30 days (0 if none)
    pub trend_30d: f64,
}

/// Trends for `author_id` relative to `anchor`.
///
/// `None` for an unknown author or one without items.
pub fn author_trends(
    generation: &Generation,
    author_id: AuthorId,
    anchor: DateTime<Utc>,
) -> Option<AuthorTrends> {
    let author = generation.author(author_id)?;
    let since_7d = anchor - Duration::days(7);
    let since_30d = anchor - Duration::days(30);

    let mut all = (0u64, 0u64);
    let mut last_7d = (0u64, 0u64);
    let mut last_30d = (0u64, 0u64);

    for item in generation.items().filter(|i| i.author_id == author_id) {
        let total = generation.total_for(item.id);
        all.0 += 1;
        all.1 += total;
        if item.published_at >= since_30d {
            last_30d.0 += 1;
            last_30d.1 += total;
        }
        if item.published_at >= since_7d {
            last_7d.0 += 1;
            last_7d.1 += total;
        }
    }
    if all.0 == 0 {
        return None;
    }

    Some(AuthorTrends {
        author_id,
        author_name: author.name.clone(),
        category: author.category,
        total_items: all.0,
        total_engagement: all.1,
        avg_engagement_per_item: round2(safe_avg(all.1, all.0)),
        trend_7d: round2(safe_avg(last_7d.1, last_7d.0)),
        trend_30d: round2(safe_avg(last_30d.1, last_30d.0)),
    })
}

// ============================================
// Category rankings and performance
// ============================================

/// Ordering metric for category rankings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RankingMetric {
    Engagement,
    Items,
}

impl std::str::FromStr for RankingMetric {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "engagement" => Ok(RankingMetric::Engagement),
            "items" | "posts" => Ok(RankingMetric::Items),
            _ => Err(QueryError::UnknownMetric(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct CategoryRollup {
    items: u64,
    counts: KindCounts,
    by_author: BTreeMap<AuthorId, u64>,
}

impl CategoryRollup {
    fn total(&self) -> u64 {
        self.counts.sum()
    }

    /// Highest-engagement author; the lower id wins a tie.
    fn top_author(&self) -> Option<AuthorId> {
        self.by_author
            .iter()
            .fold(None, |best: Option<(AuthorId, u64)>, (&id, &total)| match best {
                Some((_, best_total)) if best_total >= total => best,
                _ => Some((id, total)),
            })
            .map(|(id, _)| id)
    }
}

fn rollup_by_category(generation: &Generation) -> BTreeMap<Category, CategoryRollup> {
    let mut rollups: BTreeMap<Category, CategoryRollup> = BTreeMap::new();
    for item in generation.items() {
        let Some(entry) = generation.entry(item.id) else {
            continue;
        };
        let rollup = rollups.entry(item.category).or_default();
        rollup.items += 1;
        rollup.counts.merge(&entry.counts);
        *rollup.by_author.entry(item.author_id).or_default() += entry.total;
    }
    rollups
}

/// Ranked category by engagement or item count.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryRanking {
    /// Row number in the ranking (no shared ranks)
    pub rank: usize,
    pub category: Category,
    pub total_items: u64,
    pub total_engagement: u64,
    pub avg_engagement_per_item: f64,
    pub top_author_id: Option<AuthorId>,
    pub top_author_name: Option<String>,
}

/// Top `limit` categories by `metric`; ties go to the category name.
pub fn top_categories(generation: &Generation, metric: RankingMetric, limit: usize) -> Vec<CategoryRanking> {
    let mut rows: Vec<(Category, CategoryRollup)> = rollup_by_category(generation).into_iter().collect();

    rows.sort_by(|(a_cat, a), (b_cat, b)| {
        let primary = match metric {
            RankingMetric::Engagement => b.total().cmp(&a.total()),
            RankingMetric::Items => b.items.cmp(&a.items),
        };
        primary.then(a_cat.as_str().cmp(b_cat.as_str()))
    });

    rows.into_iter()
        .take(limit)
        .enumerate()
        .map(|(idx, (category, rollup))| {
            let top_author_id = rollup.top_author();
            CategoryRanking {
                rank: idx + 1,
                category,
                total_items: rollup.items,
                total_engagement: rollup.total(),
                avg_engagement_per_item: round2(safe_avg(rollup.total(), rollup.items)),
                top_author_id,
                top_author_name: top_author_id
                    .and_then(|id| generation.author(id))
                    .map(|a| a.name.clone()),
            }
        })
        .collect()
}

/// Engagement profile of one item category.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryPerformance {
    pub category: Category,
    pub total_items: u64,
    pub total_engagement: u64,
    pub avg_engagement: f64,
    pub avg_views: f64,
    /// Interactions per hundred views across the category
    pub engagement_rate: f64,
}

/// Every category with at least one item, by total engagement descending.
pub fn category_performance(generation: &Generation) -> Vec<CategoryPerformance> {
    let mut rows: Vec<CategoryPerformance> = rollup_by_category(generation)
        .into_iter()
        .map(|(category, rollup)| CategoryPerformance {
            category,
            total_items: rollup.items,
            total_engagement: rollup.total(),
            avg_engagement: round2(safe_avg(rollup.total(), rollup.items)),
            avg_views: round2(safe_avg(rollup.counts.views, rollup.items)),
            engagement_rate: rollup.counts.engagement_rate(),
        })
        .collect();

    rows.sort_by(|a, b| {
        b.total_engagement
            .cmp(&a.total_engagement)
            .then(a.category.as_str().cmp(b.category.as_str()))
    });
    rows
}

// ============================================
// Summary
// ============================================

/// Whole-dataset overview.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub generation_id: u64,
    pub refreshed_at: DateTime<Utc>,
    pub total_items: u64,
    pub total_events: u64,
    pub total_authors: u64,
    pub avg_engagement_per_item: f64,
    pub skipped_events: u64,
    pub first_published_at: Option<DateTime<Utc>>,
    pub last_published_at: Option<DateTime<Utc>>,
}

pub fn summary(generation: &Generation) -> Summary {
    let total_items = generation.entry_count() as u64;
    let total_engagement: u64 = generation.entries().map(|e| e.total).sum();

    Summary {
        generation_id: generation.id().0,
        refreshed_at: generation.refreshed_at(),
        total_items,
        total_events: generation.event_count(),
        total_authors: generation.authors().count() as u64,
        avg_engagement_per_item: round2(safe_avg(total_engagement, total_items)),
        skipped_events: generation.skipped().total(),
        first_published_at: generation.items().map(|i| i.published_at).min(),
        last_published_at: generation.items().map(|i| i.published_at).max(),
    }
}
