//! Analytics module for postpulse
//!
//! Every analytic is a pure function over one bound [`Generation`]:
//! - [`benchmark`]: per-category percentiles of author average engagement
//! - [`opportunity`]: segment classification and coaching priority
//! - [`temporal`]: hour × weekday × kind distribution of events
//! - [`ranking`]: top authors with overall and per-category rank
//! - [`report`]: item, author, category, and summary reports
//!
//! Callers obtain the generation once (see
//! [`AggregationCache::current`](crate::cache::AggregationCache::current))
//! and pass the same reference to every function used by a query.

pub mod benchmark;
pub mod opportunity;
pub mod ranking;
pub mod report;
pub mod temporal;

pub use benchmark::{author_averages, compute_benchmark, percentile_cont, AuthorAverage, CategoryBenchmark};
pub use opportunity::{classify, score_opportunities, OpportunityRecord, Segment, SEGMENT_RULES};
pub use ranking::{competition_ranks, top_authors, validate_limit, RankedAuthorRecord};
pub use report::{
    author_trends, category_performance, item_engagement, summary, top_categories,
    AuthorTrends, CategoryPerformance, CategoryRanking, ItemEngagement, RankingMetric, Summary,
};
pub use temporal::{aggregate_temporal, TemporalBucket, TemporalPattern, WEEKDAY_NAMES};

use crate::cache::{Generation, SnapshotEntry};
use crate::types::{Item, Window};

/// Items published inside `window`, paired with their snapshot entry.
pub(crate) fn qualifying_items<'g>(
    generation: &'g Generation,
    window: &'g Window,
) -> impl Iterator<Item = (&'g Item, &'g SnapshotEntry)> + 'g {
    generation
        .items()
        .filter(move |item| window.contains(item.published_at))
        .filter_map(move |item| generation.entry(item.id).map(|entry| (item, entry)))
}

/// `numerator / denominator`, or 0 for an empty denominator.
pub(crate) fn safe_avg(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}
