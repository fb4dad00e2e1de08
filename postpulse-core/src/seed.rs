//! Sample data generation
//!
//! Produces a deterministic dataset for a given RNG seed: authors spread over
//! the six categories, items published over the year before an anchor time,
//! and engagement funnels (view → like → comment → share) shaped by
//! hour-of-day and weekday weights.
//!
//! Loading is guarded twice: a `seed_runs` marker refuses a second load
//! unless forced, and event keys are derived from the seed, so a forced
//! reload of the same seed inserts nothing new.

use crate::config::SeedConfig;
use crate::db::{Database, SeedRun};
use crate::error::{Error, Result};
use crate::types::{Author, Category, EngagementEvent, EventKind, Item};
use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use rand::distributions::WeightedIndex;
use rand::prelude::*;
use rand::rngs::StdRng;
use rand::seq::index;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Relative engagement likelihood per UTC hour.
const HOUR_WEIGHTS: [f64; 24] = [
    0.2, 0.1, 0.1, 0.1, 0.1, 0.2, 0.3, 0.5, 0.8, 1.0, 1.0, 1.0, //
    0.9, 1.0, 1.0, 0.9, 0.8, 0.7, 0.6, 0.5, 0.4, 0.4, 0.3, 0.2,
];

/// Chance an event stays on its weekday (Monday first).
const WEEKDAY_KEEP: [f64; 7] = [1.0, 1.0, 1.0, 1.0, 0.9, 0.6, 0.5];

/// Weights for days after publishing, 0..30.
const DAY_OFFSET_WEIGHTS: [u32; 30] = [
    10, 8, 6, 4, 3, 2, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
];

const VIEW_TO_LIKE: f64 = 0.15;
const LIKE_TO_COMMENT: f64 = 0.10;
const COMMENT_TO_SHARE: f64 = 0.05;
const VIRAL_RATE: f64 = 0.05;
const MEDIA_RATE: f64 = 0.6;
const ACTORS: i64 = 5000;
const BATCH_SIZE: usize = 5000;

/// Generation parameters.
#[derive(Debug, Clone)]
pub struct SeedOptions {
    pub authors: usize,
    pub items: usize,
    /// Cap on generated events
    pub events: usize,
    pub rng_seed: u64,
    /// Nothing is generated at or after this instant
    pub anchor: DateTime<Utc>,
}

impl SeedOptions {
    pub fn from_config(config: &SeedConfig, anchor: DateTime<Utc>) -> Self {
        Self {
            authors: config.authors,
            items: config.items,
            events: config.events,
            rng_seed: config.rng_seed,
            anchor,
        }
    }
}

/// A generated dataset, ready to insert.
#[derive(Debug, Clone)]
pub struct SeedPlan {
    pub authors: Vec<Author>,
    pub items: Vec<Item>,
    pub events: Vec<EngagementEvent>,
}

/// What a load actually wrote.
#[derive(Debug, Clone, Serialize)]
pub struct SeedReport {
    pub authors_inserted: usize,
    pub items_inserted: usize,
    pub events_generated: usize,
    pub events_inserted: usize,
    pub seeded_at: DateTime<Utc>,
}

struct Samplers {
    hour: WeightedIndex<f64>,
    day_offset: WeightedIndex<u32>,
}

impl Samplers {
    fn new() -> Result<Self> {
        Ok(Self {
            hour: WeightedIndex::new(HOUR_WEIGHTS)
                .map_err(|e| Error::Config(format!("invalid hour weights: {}", e)))?,
            day_offset: WeightedIndex::new(DAY_OFFSET_WEIGHTS)
                .map_err(|e| Error::Config(format!("invalid day weights: {}", e)))?,
        })
    }
}

/// Generate a dataset. The same options always yield the same plan.
pub fn generate(options: &SeedOptions) -> Result<SeedPlan> {
    let mut rng = StdRng::seed_from_u64(options.rng_seed);
    let samplers = Samplers::new()?;
    let anchor = options.anchor;

    let authors: Vec<Author> = (1..=options.authors as i64)
        .map(|id| Author {
            id,
            name: format!("Author_{}", id),
            joined_at: anchor - Duration::days(rng.gen_range(365..=2900)),
            category: *Category::ALL.choose(&mut rng).unwrap_or(&Category::Tech),
        })
        .collect();

    let items: Vec<Item> = if authors.is_empty() {
        Vec::new()
    } else {
        (1..=options.items as i64)
            .map(|id| {
                let category = *Category::ALL.choose(&mut rng).unwrap_or(&Category::Tech);
                let day = (anchor - Duration::days(rng.gen_range(1..=365)))
                    .date_naive()
                    .and_hms_opt(rng.gen_range(6..=22), rng.gen_range(0..60), 0)
                    .map(|naive| naive.and_utc())
                    .unwrap_or(anchor);
                Item {
                    id,
                    author_id: rng.gen_range(1..=options.authors as i64),
                    category,
                    published_at: day.min(anchor - Duration::minutes(1)),
                    title: format!("Post about {} topic {}", category.display_name(), rng.gen_range(1000..=9999)),
                    content_length: rng.gen_range(200..=3000),
                    has_media: rng.gen_bool(MEDIA_RATE),
                }
            })
            .collect()
    };

    // Funnel sizes first, so the cap can pick events without materialising all of them
    let funnels: Vec<[usize; 4]> = items.iter().map(|_| funnel(&mut rng)).collect();
    let candidates: usize = funnels.iter().flatten().sum();
    let mut picked = index::sample(&mut rng, candidates, options.events.min(candidates)).into_vec();
    picked.sort_unstable();
    let mut picked = picked.into_iter().peekable();
    let mut position = 0usize;

    let mut events = Vec::with_capacity(options.events.min(candidates));
    for (item, funnel) in items.iter().zip(&funnels) {
        for (kind, &n) in EventKind::ALL.iter().zip(funnel.iter()) {
            for seq in 0..n {
                let keep = picked.next_if_eq(&position).is_some();
                position += 1;
                if !keep {
                    continue;
                }
                let occurred_at = engagement_time(&mut rng, &samplers, item.published_at, anchor);
                events.push(EngagementEvent {
                    key: event_key(options.rng_seed, item.id, *kind, seq),
                    item_id: item.id,
                    kind: *kind,
                    actor_id: Some(rng.gen_range(1..=ACTORS)),
                    occurred_at,
                });
            }
        }
    }

    tracing::debug!(
        authors = authors.len(),
        items = items.len(),
        candidates,
        events = events.len(),
        "Generated sample data"
    );

    Ok(SeedPlan {
        authors,
        items,
        events,
    })
}

/// Event counts per kind for one item: [views, likes, comments, shares].
fn funnel(rng: &mut StdRng) -> [usize; 4] {
    let mut views = rng.gen_range(50..=500usize);
    if rng.gen_bool(VIRAL_RATE) {
        views *= rng.gen_range(5..=20usize);
    }
    let likes = (views as f64 * VIEW_TO_LIKE * rng.gen_range(0.5..1.5)) as usize;
    let comments = (likes as f64 * LIKE_TO_COMMENT * rng.gen_range(0.5..1.5)) as usize;
    let shares = (comments as f64 * COMMENT_TO_SHARE * rng.gen_range(0.5..1.5)) as usize;
    [views, likes, comments, shares]
}

/// A time within 30 days of publishing, biased to early days, working hours
/// and weekdays. Never before `published_at` and always before `anchor`.
fn engagement_time(
    rng: &mut StdRng,
    samplers: &Samplers,
    published_at: DateTime<Utc>,
    anchor: DateTime<Utc>,
) -> DateTime<Utc> {
    let day = published_at + Duration::days(samplers.day_offset.sample(rng) as i64);
    let hour = samplers.hour.sample(rng) as i64;
    let mut ts = day - Duration::hours(day.hour() as i64)
        + Duration::hours(hour)
        + Duration::minutes(rng.gen_range(0..60) - day.minute() as i64);

    let keep = WEEKDAY_KEEP[ts.weekday().num_days_from_monday() as usize];
    if rng.gen::<f64>() > keep {
        ts += Duration::days(rng.gen_range(1..=3));
    }

    if ts >= anchor {
        ts = anchor - Duration::minutes(rng.gen_range(1..=60));
    }
    ts.max(published_at)
}

/// Stable key for the `seq`-th event of `kind` on an item.
pub fn event_key(rng_seed: u64, item_id: i64, kind: EventKind, seq: usize) -> String {
    let digest = Sha256::digest(format!("{}:{}:{}:{}", rng_seed, item_id, kind, seq).as_bytes());
    format!("seed-{}", hex::encode(&digest[..16]))
}

/// Generate and load a dataset into `db`.
///
/// Refuses with [`Error::AlreadySeeded`] if the database was seeded before,
/// unless `force` is set. `on_events` receives the number of events
/// processed after each batch.
pub fn seed_database(
    db: &Database,
    options: &SeedOptions,
    force: bool,
    mut on_events: impl FnMut(usize),
) -> Result<SeedReport> {
    if let Some(previous) = db.last_seed_run()? {
        if !force {
            tracing::warn!(seeded_at = %previous.seeded_at, "Database already seeded, refusing to seed again");
            return Err(Error::AlreadySeeded(previous.seeded_at));
        }
        tracing::info!(seeded_at = %previous.seeded_at, "Forcing reseed; duplicate events will be ignored");
    }

    let plan = generate(options)?;

    let authors_inserted = db.insert_authors(&plan.authors)?;
    let items_inserted = db.insert_items(&plan.items)?;

    let mut events_inserted = 0;
    for batch in plan.events.chunks(BATCH_SIZE) {
        events_inserted += db.insert_events(batch)?;
        on_events(batch.len());
    }

    let seeded_at = Utc::now();
    db.record_seed_run(&SeedRun {
        rng_seed: options.rng_seed,
        authors: authors_inserted as u64,
        items: items_inserted as u64,
        events: events_inserted as u64,
        seeded_at,
    })?;

    tracing::info!(
        authors = authors_inserted,
        items = items_inserted,
        events = events_inserted,
        "Seeded sample data"
    );

    Ok(SeedReport {
        authors_inserted,
        items_inserted,
        events_generated: plan.events.len(),
        events_inserted,
        seeded_at,
    })
}
