//! Opportunity scoring
//!
//! Authors are placed on two axes against their category benchmark:
//!
//! | Axis       | Low                  | High                  |
//! |------------|----------------------|-----------------------|
//! | Volume     | `< 5` items          | `>= 10` items         |
//! | Engagement | avg `<` median (p50) | avg `>=` p75          |
//!
//! [`SEGMENT_RULES`] maps band pairs to a [`Segment`]; the first matching
//! rule wins and anything unmatched is [`Segment::Average`].

use super::benchmark::{author_averages, benchmark_from_averages};
use crate::cache::Generation;
use crate::types::{round2, AuthorId, Category, Window};
use serde::Serialize;

/// Qualifying items at or above which an author is high volume.
pub const HIGH_VOLUME_ITEMS: u64 = 10;

/// Qualifying items below which an author is low volume.
pub const LOW_VOLUME_ITEMS: u64 = 5;

/// Author segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Segment {
    /// Publishes a lot, engages below the category median
    CoachingOpportunity,
    /// Publishes a lot, engages in the category's top quartile
    Exemplar,
    /// Publishes little but engages in the top quartile
    PromotionCandidate,
    Average,
}

impl Segment {
    pub fn label(&self) -> &'static str {
        match self {
            Segment::CoachingOpportunity => "coaching opportunity",
            Segment::Exemplar => "exemplar",
            Segment::PromotionCandidate => "promotion candidate",
            Segment::Average => "average",
        }
    }
}

impl std::fmt::Display for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeBand {
    Low,
    Mid,
    High,
}

impl VolumeBand {
    pub fn of(item_count: u64) -> Self {
        if item_count >= HIGH_VOLUME_ITEMS {
            VolumeBand::High
        } else if item_count < LOW_VOLUME_ITEMS {
            VolumeBand::Low
        } else {
            VolumeBand::Mid
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngagementBand {
    Low,
    Mid,
    High,
}

impl EngagementBand {
    pub fn of(avg: f64, median: f64, p75: f64) -> Self {
        if avg < median {
            EngagementBand::Low
        } else if avg >= p75 {
            EngagementBand::High
        } else {
            EngagementBand::Mid
        }
    }
}

/// One row of the segment table.
#[derive(Debug, Clone, Copy)]
pub struct SegmentRule {
    pub volume: VolumeBand,
    pub engagement: EngagementBand,
    pub segment: Segment,
}

/// Ordered segment table; first match wins.
pub const SEGMENT_RULES: &[SegmentRule] = &[
    SegmentRule {
        volume: VolumeBand::High,
        engagement: EngagementBand::Low,
        segment: Segment::CoachingOpportunity,
    },
    SegmentRule {
        volume: VolumeBand::High,
        engagement: EngagementBand::High,
        segment: Segment::Exemplar,
    },
    SegmentRule {
        volume: VolumeBand::Low,
        engagement: EngagementBand::High,
        segment: Segment::PromotionCandidate,
    },
];

/// Segment for an author's item count and average against the benchmark.
pub fn classify(item_count: u64, avg: f64, median: f64, p75: f64) -> Segment {
    let volume = VolumeBand::of(item_count);
    let engagement = EngagementBand::of(avg, median, p75);
    SEGMENT_RULES
        .iter()
        .find(|rule| rule.volume == volume && rule.engagement == engagement)
        .map_or(Segment::Average, |rule| rule.segment)
}

/// Engagement gained if the author reached the median, rounded half away
/// from zero. Zero for every segment but coaching opportunity.
pub fn opportunity_score(segment: Segment, item_count: u64, avg: f64, median: f64) -> i64 {
    match segment {
        Segment::CoachingOpportunity => ((median - avg) * item_count as f64).round() as i64,
        _ => 0,
    }
}

/// Scored author, derived per query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpportunityRecord {
    pub author_id: AuthorId,
    pub author_name: String,
    pub category: Category,
    pub item_count: u64,
    pub avg_engagement: f64,
    pub category_median: f64,
    pub segment: Segment,
    pub opportunity_score: i64,
}

/// Score every qualifying author of `category`, highest priority first.
///
/// Order: score descending, then item count descending, then author id
/// ascending. Empty when the category has no benchmark.
pub fn score_opportunities(
    generation: &Generation,
    category: Category,
    window: &Window,
) -> Vec<OpportunityRecord> {
    let averages = author_averages(generation, category, window);
    let Some(benchmark) = benchmark_from_averages(category, window, &averages) else {
        return Vec::new();
    };

    let mut records: Vec<OpportunityRecord> = averages
        .values()
        .map(|a| {
            let segment = classify(a.item_count, a.avg_engagement, benchmark.p50, benchmark.p75);
            OpportunityRecord {
                author_id: a.author_id,
                author_name: generation
                    .author(a.author_id)
                    .map(|author| author.name.clone())
                    .unwrap_or_default(),
                category,
                item_count: a.item_count,
                avg_engagement: round2(a.avg_engagement),
                category_median: round2(benchmark.p50),
                segment,
                opportunity_score: opportunity_score(
                    segment,
                    a.item_count,
                    a.avg_engagement,
                    benchmark.p50,
                ),
            }
        })
        .collect();

    records.sort_by(|a, b| {
        b.opportunity_score
            .cmp(&a.opportunity_score)
            .then(b.item_count.cmp(&a.item_count))
            .then(a.author_id.cmp(&b.author_id))
    });
    records
}
