//! Integration tests for the event log, aggregation cache, and analytics
//!
//! Each test builds a small on-disk database, refreshes an
//! [`AggregationCache`] over it, and checks query results end to end.

use chrono::{DateTime, Duration, TimeZone, Utc};
use postpulse_core::analytics::{RankingMetric, Segment};
use postpulse_core::config::AnalyticsConfig;
use postpulse_core::seed::{seed_database, SeedOptions};
use postpulse_core::{
    AggregationCache, Author, Category, Database, EngagementEvent, EngagementService, EventKind,
    Item, Window,
};
use std::sync::Arc;
use tempfile::TempDir;

fn ts(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, day, hour, 15, 0).unwrap()
}

fn open_db(dir: &TempDir) -> Arc<Database> {
    let db = Database::open(&dir.path().join("data.db")).expect("failed to open db");
    db.migrate().expect("failed to migrate db");
    Arc::new(db)
}

/// Tech authors 1..=3 average 10, 20, and 30 per item over 10, 5, and 2
/// items; finance author 4 has a single item with 100 views. Every event
/// lands on Monday 2025-06-02 at 09:15 UTC.
fn load_scenario(db: &Database) {
    let authors: Vec<Author> = [
        (1, Category::Tech),
        (2, Category::Tech),
        (3, Category::Tech),
        (4, Category::Finance),
    ]
    .into_iter()
    .map(|(id, category)| Author {
        id,
        name: format!("Author_{}", id),
        joined_at: ts(1, 0) - Duration::days(400),
        category,
    })
    .collect();
    db.insert_authors(&authors).unwrap();

    let plan: [(i64, Category, usize, usize); 4] = [
        (1, Category::Tech, 10, 10),
        (2, Category::Tech, 5, 20),
        (3, Category::Tech, 2, 30),
        (4, Category::Finance, 1, 100),
    ];

    let mut items = Vec::new();
    let mut events = Vec::new();
    let mut next_item = 1;
    for (author_id, category, count, views) in plan {
        for _ in 0..count {
            items.push(Item {
                id: next_item,
                author_id,
                category,
                published_at: ts(1, 8),
                title: format!("Post {}", next_item),
                content_length: 800,
                has_media: false,
            });
            for n in 0..views {
                events.push(EngagementEvent {
                    key: format!("scenario-{}-{}", next_item, n),
                    item_id: next_item,
                    kind: EventKind::View,
                    actor_id: None,
                    occurred_at: ts(2, 9),
                });
            }
            next_item += 1;
        }
    }
    db.insert_items(&items).unwrap();
    assert_eq!(db.insert_events(&events).unwrap(), 360);

    db.insert_raw_event("bad-kind", 1, "bookmark", ts(2, 9)).unwrap();
    db.insert_raw_event("bad-item", 999, "view", ts(2, 9)).unwrap();
}

fn service_over(db: Arc<Database>) -> EngagementService {
    let cache = Arc::new(AggregationCache::new(db.clone()).with_store(db, 2));
    cache.init().unwrap();
    EngagementService::new(cache, AnalyticsConfig::default())
}

// ============================================
// Refresh and snapshot
// ============================================

#[test]
fn test_refresh_counts_and_skips() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    load_scenario(&db);

    let service = service_over(db);
    let outcome = service.refresh().expect("refresh should succeed");

    assert_eq!(outcome.generation_id.0, 1);
    assert_eq!(outcome.item_count, 18);
    assert_eq!(outcome.event_count, 360);
    assert_eq!(outcome.skipped.unknown_kind, 1);
    assert_eq!(outcome.skipped.unknown_item, 1);

    let entry = service.get_snapshot(1).unwrap();
    assert_eq!(entry.counts.views, 10);
    assert_eq!(entry.total, 10);
    assert!(service.get_snapshot(999).is_none());
    assert!(service.cache().check_consistency().is_empty());

    let status = service.refresh_status();
    assert_eq!(status.skipped_events, 2);
    assert!(!status.degraded);
}

#[test]
fn test_persisted_generation_survives_restart() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    load_scenario(&db);

    let first = service_over(db.clone());
    let outcome = first.refresh().unwrap();
    drop(first);

    let reopened = open_db(&dir);
    let service = service_over(reopened);
    let status = service.refresh_status();
    assert_eq!(status.current_generation_id, Some(outcome.generation_id));
    assert_eq!(status.fingerprint.as_deref(), Some(outcome.fingerprint.as_str()));
    assert_eq!(service.get_snapshot(18).map(|e| e.total), Some(100));

    let next = service.refresh().unwrap();
    assert_eq!(next.generation_id.0, outcome.generation_id.0 + 1);
    assert_eq!(next.fingerprint, outcome.fingerprint);
}

#[test]
fn test_new_events_visible_after_refresh_only() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    load_scenario(&db);

    let service = service_over(db.clone());
    service.refresh().unwrap();
    let before = service.cache().current().unwrap();

    db.insert_raw_event("late-like", 1, "like", ts(3, 12)).unwrap();
    assert_eq!(service.get_snapshot(1).unwrap().total, 10);

    service.refresh().unwrap();
    let entry = service.get_snapshot(1).unwrap();
    assert_eq!(entry.counts.likes, 1);
    assert_eq!(entry.total, 11);

    // A reader holding the earlier generation is unaffected
    assert_eq!(before.total_for(1), 10);
}

// ============================================
// Analytics
// ============================================

#[test]
fn test_benchmark_and_opportunities() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    load_scenario(&db);

    let service = service_over(db);
    service.refresh().unwrap();
    let window = Window::all_time();

    let benchmark = service.get_benchmark(Category::Tech, &window).unwrap().unwrap();
    assert_eq!(benchmark.author_count, 3);
    assert_eq!(benchmark.p25, 15.0);
    assert_eq!(benchmark.p50, 20.0);
    assert_eq!(benchmark.p75, 25.0);

    assert!(service.get_benchmark(Category::Health, &window).unwrap().is_none());

    let records = service.get_opportunity_scores(Category::Tech, &window).unwrap();
    let summary: Vec<(i64, Segment, i64)> = records
        .iter()
        .map(|r| (r.author_id, r.segment, r.opportunity_score))
        .collect();
    assert_eq!(
        summary,
        vec![
            (1, Segment::CoachingOpportunity, 100),
            (2, Segment::Average, 0),
            (3, Segment::PromotionCandidate, 0),
        ]
    );
    assert_eq!(records[0].category_median, 20.0);

    let finance = service.get_opportunity_scores(Category::Finance, &window).unwrap();
    assert_eq!(finance.len(), 1);
    assert_eq!(finance[0].segment, Segment::PromotionCandidate);
}

#[test]
fn test_temporal_pattern() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    load_scenario(&db);

    let service = service_over(db);
    service.refresh().unwrap();

    let pattern = service
        .get_temporal_pattern(&Window::all_time())
        .unwrap()
        .unwrap();
    assert_eq!(pattern.buckets.len(), 168);
    assert_eq!(pattern.grand_total, 360);

    let peak = pattern.peak().unwrap();
    assert_eq!((peak.weekday, peak.hour), (1, 9));
    assert_eq!(peak.weekday_name(), "Monday");
    assert_eq!(peak.distinct_items, 18);
    assert_eq!(peak.avg_engagement_per_item, 20.0);
    assert_eq!(peak.percent_of_total, 100.0);

    let percent_sum: f64 = pattern.buckets.iter().map(|b| b.percent_of_total).sum();
    assert!((percent_sum - 100.0).abs() < 1e-9);

    let outside = Window::between(ts(10, 0), ts(20, 0)).unwrap();
    let empty = service.get_temporal_pattern(&outside).unwrap().unwrap();
    assert_eq!(empty.grand_total, 0);
    assert!(empty.peak().is_none());
}

#[test]
fn test_top_authors_rank_ties() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    load_scenario(&db);

    let service = service_over(db);
    service.refresh().unwrap();
    let window = Window::all_time();

    let all = service.get_top_authors(&window, 10).unwrap();
    let ranked: Vec<(i64, usize, usize)> = all
        .iter()
        .map(|r| (r.author_id, r.overall_rank, r.category_rank))
        .collect();
    assert_eq!(ranked, vec![(1, 1, 1), (2, 1, 1), (4, 1, 1), (3, 4, 3)]);

    let top_two = service.get_top_authors(&window, 2).unwrap();
    assert_eq!(top_two.len(), 2);
    assert_eq!(top_two[1].overall_rank, 1);

    assert!(service.get_top_authors(&window, 0).is_err());
    assert!(service.get_top_authors(&window, 51).is_err());
}

#[test]
fn test_category_reports() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    load_scenario(&db);

    let service = service_over(db);
    service.refresh().unwrap();

    let by_items = service.get_top_categories(RankingMetric::Items, 5).unwrap();
    assert_eq!(by_items[0].category, Category::Tech);
    assert_eq!(by_items[0].total_items, 17);
    assert_eq!(by_items[0].total_engagement, 260);
    assert_eq!(by_items[0].top_author_id, Some(1));

    let performance = service.get_category_performance();
    assert_eq!(performance.len(), 2);
    assert_eq!(performance[0].category, Category::Tech);
    assert_eq!(performance[1].avg_views, 100.0);

    let trends = service.get_author_trends(3, ts(5, 0)).unwrap();
    assert_eq!(trends.total_items, 2);
    assert_eq!(trends.avg_engagement_per_item, 30.0);
    assert_eq!(trends.trend_7d, 30.0);
    assert!(service.get_author_trends(42, ts(5, 0)).is_none());

    let summary = service.get_summary().unwrap();
    assert_eq!(summary.total_items, 18);
    assert_eq!(summary.total_events, 360);
    assert_eq!(summary.total_authors, 4);
    assert_eq!(summary.skipped_events, 2);
}

// ============================================
// Sample data
// ============================================

#[test]
fn test_seeded_database_refreshes_consistently() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    let options = SeedOptions {
        authors: 8,
        items: 60,
        events: 1500,
        rng_seed: 11,
        anchor: Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
    };

    let report = seed_database(&db, &options, false, |_| {}).unwrap();
    assert_eq!(report.events_inserted, report.events_generated);
    assert!(report.events_generated <= 1500);

    let service = service_over(db.clone());
    let outcome = service.refresh().unwrap();
    assert_eq!(outcome.event_count as usize, report.events_inserted);
    assert_eq!(outcome.skipped.total(), 0);
    assert!(service.cache().check_consistency().is_empty());

    let total: u64 = service.cache().all().iter().map(|e| e.total).sum();
    assert_eq!(total, db.count_events().unwrap());

    let window = Window::trailing_days(400, options.anchor);
    for category in Category::ALL {
        for record in service.get_opportunity_scores(category, &window).unwrap() {
            assert_eq!(record.category, category);
            assert!(record.opportunity_score >= 0);
        }
    }
}
