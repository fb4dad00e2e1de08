//! Temporal engagement patterns
//!
//! Buckets events into the 7 × 24 grid of (weekday, UTC hour) cells, kept
//! per kind. Reads the generation's timeline, so each event inside the
//! window is counted in exactly one cell by its own timestamp.

use crate::cache::Generation;
use crate::types::{round2, ItemId, KindCounts, Window};
use chrono::{Datelike, Timelike};
use serde::Serialize;
use std::collections::HashSet;

/// Weekday names, 0 = Sunday.
pub const WEEKDAY_NAMES: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

const CELLS: usize = 7 * 24;

/// One (weekday, hour) cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemporalBucket {
    /// 0 = Sunday
    pub weekday: u8,
    /// 0-23, UTC
    pub hour: u8,
    pub counts: KindCounts,
    pub total: u64,
    /// Distinct items with at least one event in the cell
    pub distinct_items: u64,
    pub avg_engagement_per_item: f64,
    /// Share of the window's events, unrounded
    pub percent_of_total: f64,
}

impl TemporalBucket {
    pub fn weekday_name(&self) -> &'static str {
        WEEKDAY_NAMES[self.weekday as usize % 7]
    }
}

/// The full grid for a window, ordered by weekday then hour.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemporalPattern {
    pub window: Window,
    pub grand_total: u64,
    pub buckets: Vec<TemporalBucket>,
}

impl TemporalPattern {
    /// Busiest cell; the earliest wins a tie. `None` when the window is empty.
    pub fn peak(&self) -> Option<&TemporalBucket> {
        self.buckets
            .iter()
            .filter(|b| b.total > 0)
            .fold(None, |best: Option<&TemporalBucket>, b| match best {
                Some(current) if current.total >= b.total => Some(current),
                _ => Some(b),
            })
    }

    /// Event totals per hour of day across all weekdays.
    pub fn hourly_totals(&self) -> [u64; 24] {
        let mut totals = [0; 24];
        for bucket in &self.buckets {
            totals[bucket.hour as usize] += bucket.total;
        }
        totals
    }

    /// Event totals per weekday (0 = Sunday).
    pub fn weekday_totals(&self) -> [u64; 7] {
        let mut totals = [0; 7];
        for bucket in &self.buckets {
            totals[bucket.weekday as usize] += bucket.total;
        }
        totals
    }
}

/// Aggregate the generation's events inside `window` into 168 buckets.
pub fn aggregate_temporal(generation: &Generation, window: &Window) -> TemporalPattern {
    let mut counts = [KindCounts::default(); CELLS];
    let mut seen: HashSet<(usize, ItemId)> = HashSet::new();

    for cell in generation.timeline_in(window) {
        let weekday = cell.occurred_at.weekday().num_days_from_sunday() as usize;
        let idx = weekday * 24 + cell.occurred_at.hour() as usize;
        counts[idx].add(cell.kind, cell.count);
        seen.insert((idx, cell.item_id));
    }

    let mut distinct = [0u64; CELLS];
    for (idx, _) in &seen {
        distinct[*idx] += 1;
    }

    let grand_total: u64 = counts.iter().map(KindCounts::sum).sum();

    let buckets = (0..CELLS)
        .map(|idx| {
            let total = counts[idx].sum();
            let avg = if distinct[idx] == 0 {
                0.0
            } else {
                total as f64 / distinct[idx] as f64
            };
            TemporalBucket {
                weekday: (idx / 24) as u8,
                hour: (idx % 24) as u8,
                counts: counts[idx],
                total,
                distinct_items: distinct[idx],
                avg_engagement_per_item: round2(avg),
                percent_of_total: if grand_total == 0 {
                    0.0
                } else {
                    100.0 * total as f64 / grand_total as f64
                },
            }
        })
        .collect();

    TemporalPattern {
        window: *window,
        grand_total,
        buckets,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::fixtures::Fixture;
    use crate::types::Category;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_grid_shape_and_order() {
        let pattern = aggregate_temporal(&Fixture::new().build(), &Window::all_time());
        assert_eq!(pattern.buckets.len(), 168);
        assert_eq!((pattern.buckets[0].weekday, pattern.buckets[0].hour), (0, 0));
        assert_eq!((pattern.buckets[25].weekday, pattern.buckets[25].hour), (1, 1));
        assert_eq!(pattern.grand_total, 0);
        assert!(pattern.buckets.iter().all(|b| b.percent_of_total == 0.0));
        assert!(pattern.peak().is_none());
    }

    #[test]
    fn test_bucketing() {
        // 2025-06-01 is a Sunday
        let sunday_9 = Utc.with_ymd_and_hms(2025, 6, 1, 9, 30, 0).unwrap();
        let monday_14 = Utc.with_ymd_and_hms(2025, 6, 2, 14, 5, 0).unwrap();
        let fixture = Fixture::new()
            .author(1, Category::Tech)
            .items(1, Category::Tech, sunday_9, 2, 3);
        fixture.source().push_events(1, "like", monday_14, 2);
        let pattern = aggregate_temporal(&fixture.build(), &Window::all_time());

        let sunday = &pattern.buckets[9];
        assert_eq!(sunday.weekday_name(), "Sunday");
        assert_eq!(sunday.counts.views, 6);
        assert_eq!(sunday.distinct_items, 2);
        assert_eq!(sunday.avg_engagement_per_item, 3.0);
        assert_eq!(sunday.percent_of_total, 75.0);

        let monday = &pattern.buckets[24 + 14];
        assert_eq!(monday.counts.likes, 2);
        assert_eq!(monday.distinct_items, 1);
        assert_eq!(pattern.peak().map(|b| (b.weekday, b.hour)), Some((0, 9)));
        assert_eq!(pattern.weekday_totals()[1], 2);
        assert_eq!(pattern.hourly_totals()[9], 6);
    }

    #[test]
    fn test_percentages_sum_to_100() {
        let mut fixture = Fixture::new().author(1, Category::Business);
        for (day, hour, views) in [(1, 0, 3), (2, 5, 7), (3, 23, 1), (5, 12, 11), (7, 7, 2)] {
            let ts = Utc.with_ymd_and_hms(2025, 6, day, hour, 0, 0).unwrap();
            fixture = fixture.items(1, Category::Business, ts, 1, views);
        }
        let pattern = aggregate_temporal(&fixture.build(), &Window::all_time());

        let sum: f64 = pattern.buckets.iter().map(|b| b.percent_of_total).sum();
        assert!((sum - 100.0).abs() <= 0.01);
    }

    fn at(hour: u32, min: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 3, hour, min, 0).unwrap()
    }

    #[test]
    fn test_window_edges_are_exact() {
        let generation = Fixture::new()
            .author(1, Category::Health)
            .items(1, Category::Health, at(10, 45), 1, 4)
            .build();
        let total = |start, end| {
            let window = Window::between(start, end).unwrap();
            aggregate_temporal(&generation, &window).grand_total
        };

        // Start falls mid-hour before the event
        assert_eq!(total(at(10, 30), at(12, 0)), 4);
        // End falls mid-hour before the event
        assert_eq!(total(at(9, 0), at(10, 30)), 0);
        // Start is inclusive, end is exclusive
        assert_eq!(total(at(10, 45), at(10, 46)), 4);
        assert_eq!(total(at(10, 0), at(10, 45)), 0);
        assert_eq!(total(at(10, 46), at(11, 0)), 0);
    }

    #[test]
    fn test_trailing_window_off_the_hour() {
        let fixture = Fixture::new()
            .author(1, Category::Health)
            .items(1, Category::Health, at(8, 10), 1, 3)
            .items(1, Category::Health, at(8, 50), 1, 5);
        let generation = fixture.build();

        let window = Window::trailing_days(1, at(8, 30) + chrono::Duration::days(1));
        let pattern = aggregate_temporal(&generation, &window);
        assert_eq!(pattern.grand_total, 5);
        assert_eq!(pattern.buckets[2 * 24 + 8].distinct_items, 1);
    }
}
