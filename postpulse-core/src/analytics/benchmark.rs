//! Category benchmarks
//!
//! For every author with at least one item published inside the window,
//! `avg = total engagement of those items / their count`. A category's
//! benchmark is the 25th/50th/75th continuous percentile over the averages
//! of the authors that belong to it.

use super::{qualifying_items, safe_avg};
use crate::cache::Generation;
use crate::types::{AuthorId, Category, Window};
use serde::Serialize;
use std::collections::BTreeMap;

/// Percentile summary of author average engagement within one category.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryBenchmark {
    pub category: Category,
    pub window: Window,
    /// Authors with at least one qualifying item
    pub author_count: usize,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
}

/// One author's qualifying-item statistics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AuthorAverage {
    pub author_id: AuthorId,
    pub item_count: u64,
    pub total_engagement: u64,
    pub avg_engagement: f64,
}

/// Continuous percentile with linear interpolation between order statistics.
///
/// `sorted` must be ascending; `p` is in `[0, 1]`. Returns `None` for an
/// empty slice.
pub fn percentile_cont(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let pos = p.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let fraction = pos - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * fraction)
}

/// Averages for authors of `category` with qualifying items, keyed by author id.
///
/// Membership follows the author's category; all of the author's qualifying
/// items count, whatever their own category.
pub fn author_averages(
    generation: &Generation,
    category: Category,
    window: &Window,
) -> BTreeMap<AuthorId, AuthorAverage> {
    let mut totals: BTreeMap<AuthorId, (u64, u64)> = BTreeMap::new();

    for (item, entry) in qualifying_items(generation, window) {
        let belongs = generation
            .author(item.author_id)
            .is_some_and(|author| author.category == category);
        if !belongs {
            continue;
        }
        let slot = totals.entry(item.author_id).or_default();
        slot.0 += 1;
        slot.1 += entry.total;
    }

    totals
        .into_iter()
        .map(|(author_id, (item_count, total_engagement))| {
            (
                author_id,
                AuthorAverage {
                    author_id,
                    item_count,
                    total_engagement,
                    avg_engagement: safe_avg(total_engagement, item_count),
                },
            )
        })
        .collect()
}

/// Benchmark for one category, or `None` when no author qualifies.
pub fn compute_benchmark(
    generation: &Generation,
    category: Category,
    window: &Window,
) -> Option<CategoryBenchmark> {
    let averages = author_averages(generation, category, window);
    benchmark_from_averages(category, window, &averages)
}

pub(crate) fn benchmark_from_averages(
    category: Category,
    window: &Window,
    averages: &BTreeMap<AuthorId, AuthorAverage>,
) -> Option<CategoryBenchmark> {
    let mut values: Vec<f64> = averages.values().map(|a| a.avg_engagement).collect();
    values.sort_by(f64::total_cmp);

    Some(CategoryBenchmark {
        category,
        window: *window,
        author_count: values.len(),
        p25: percentile_cont(&values, 0.25)?,
        p50: percentile_cont(&values, 0.50)?,
        p75: percentile_cont(&values, 0.75)?,
    })
}
