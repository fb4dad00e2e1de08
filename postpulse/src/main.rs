//! postpulse - content engagement analytics
//!
//! Answers analytics queries from the aggregation cache. The cache is
//! restored from the last persisted snapshot; when none exists (or with
//! `--refresh`) a fresh generation is built from the event log first.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Database: $XDG_DATA_HOME/postpulse/data.db (~/.local/share/postpulse/data.db)
//! - Logs: $XDG_STATE_HOME/postpulse/postpulse.log (~/.local/state/postpulse/postpulse.log)
//! - Config: $XDG_CONFIG_HOME/postpulse/config.toml (~/.config/postpulse/config.toml)

mod process_lock;

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use postpulse_core::analytics::{
    AuthorTrends, CategoryBenchmark, CategoryPerformance, CategoryRanking, ItemEngagement,
    OpportunityRecord, RankedAuthorRecord, RankingMetric, Summary, TemporalPattern,
};
use postpulse_core::format::{bar, format_count, format_percent, format_relative_time_opt};
use postpulse_core::{
    AggregationCache, Category, Config, Database, EngagementService, RefreshStatus, SnapshotEntry,
    Window,
};
use serde::Serialize;

use crate::process_lock::{check_refresh_guard, QueryRunMode};

#[derive(Parser)]
#[command(name = "postpulse")]
#[command(about = "Content engagement analytics")]
#[command(version)]
struct Args {
    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    format: OutputFormat,

    /// Rebuild the snapshot from the event log before answering
    #[arg(long, global = true)]
    refresh: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

/// Time window flags shared by windowed queries.
///
/// With no flags the configured trailing window ending now is used.
#[derive(clap::Args, Debug, Clone)]
struct WindowArgs {
    /// Trailing window length in days
    #[arg(long, conflicts_with_all = ["since", "until", "all_time"])]
    days: Option<u32>,

    /// Window start date (YYYY-MM-DD, inclusive)
    #[arg(long, value_parser = parse_date)]
    since: Option<DateTime<Utc>>,

    /// Window end date (YYYY-MM-DD, exclusive)
    #[arg(long, value_parser = parse_date)]
    until: Option<DateTime<Utc>>,

    /// Use the whole event history
    #[arg(long, conflicts_with_all = ["since", "until"])]
    all_time: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Show cache refresh status and health
    Status,
    /// Dataset overview
    Summary,
    /// Cached per-kind counts for one item
    Snapshot {
        item_id: i64,
    },
    /// Engagement of one item within a window
    Item {
        item_id: i64,
        #[command(flatten)]
        window: WindowArgs,
    },
    /// Percentiles of author average engagement in a category
    Benchmark {
        category: Category,
        #[command(flatten)]
        window: WindowArgs,
    },
    /// Author segments and coaching priority in a category
    Opportunities {
        category: Category,
        #[command(flatten)]
        window: WindowArgs,
    },
    /// Engagement by weekday and hour
    Patterns {
        #[command(flatten)]
        window: WindowArgs,
    },
    /// Authors ranked by total engagement
    TopAuthors {
        /// Number of authors to show
        #[arg(short, long)]
        limit: Option<usize>,
        #[command(flatten)]
        window: WindowArgs,
    },
    /// Categories ranked by engagement or item count
    TopCategories {
        /// Ranking metric: engagement or items
        #[arg(short, long, default_value = "engagement")]
        metric: RankingMetric,
        /// Number of categories to show
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Engagement profile of every category
    Categories,
    /// Totals and recent trends for one author
    Author {
        author_id: i64,
    },
    /// Verify the current snapshot against its invariants
    Check,
}

fn parse_date(s: &str) -> std::result::Result<DateTime<Utc>, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| format!("expected YYYY-MM-DD: {}", e))?
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
        .ok_or_else(|| format!("invalid date: {}", s))
}

impl WindowArgs {
    fn resolve(&self, service: &EngagementService, now: DateTime<Utc>) -> Result<Window> {
        if self.all_time {
            return Ok(Window::all_time());
        }
        if let Some(days) = self.days {
            return Ok(Window::trailing_days(days, now));
        }
        if self.since.is_none() && self.until.is_none() {
            return Ok(service.default_window(now));
        }
        let window = Window {
            start: self.since,
            end: self.until,
        };
        window.validate()?;
        Ok(window)
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    Config::ensure_xdg_env();

    let config = Config::load().context("failed to load configuration")?;

    let _log_guard =
        postpulse_core::logging::init(&config.logging).context("failed to initialize logging")?;

    let db_path = Config::database_path();
    let (mode, _refresh_guard) =
        check_refresh_guard(&db_path).context("failed to check refresh lock")?;
    if mode == QueryRunMode::ReadOnly {
        tracing::info!("postpulse-refresh is running; serving persisted snapshot only");
    }

    tracing::info!(path = %db_path.display(), "Opening database");
    let db = Arc::new(Database::open(&db_path).context("failed to open database")?);
    db.migrate().context("failed to run database migrations")?;

    let mut cache = AggregationCache::new(db.clone());
    if config.cache.persist {
        cache = cache.with_store(db, config.cache.retained_generations);
    }
    let cache = Arc::new(cache);
    let restored = cache.init().context("failed to restore snapshot")?;

    let needs_refresh = args.refresh || restored.is_none();
    if needs_refresh {
        if mode == QueryRunMode::ReadOnly {
            if restored.is_none() {
                anyhow::bail!(
                    "No snapshot available yet; postpulse-refresh is running, try again shortly"
                );
            }
            eprintln!("postpulse-refresh is running; --refresh ignored");
        } else {
            let outcome = cache.refresh().context("failed to refresh snapshot")?;
            tracing::info!(
                generation = %outcome.generation_id,
                items = outcome.item_count,
                events = outcome.event_count,
                "Built snapshot for query"
            );
        }
    }

    let service = EngagementService::new(cache, config.analytics.clone());
    run_command(&args, &service, config.analytics.top_limit)
}

fn run_command(args: &Args, service: &EngagementService, default_limit: usize) -> Result<()> {
    let now = Utc::now();
    let format = args.format;

    match &args.command {
        Command::Status => emit(format, &service.refresh_status(), print_status),
        Command::Summary => {
            let summary = service
                .get_summary()
                .context("no snapshot has been built yet")?;
            emit(format, &summary, print_summary)
        }
        Command::Snapshot { item_id } => {
            let entry = service
                .get_snapshot(*item_id)
                .with_context(|| format!("No item found with id {}", item_id))?;
            emit(format, &entry, print_snapshot)
        }
        Command::Item { item_id, window } => {
            let window = window.resolve(service, now)?;
            let engagement = service
                .get_item_engagement(*item_id, &window)?
                .with_context(|| format!("No item found with id {}", item_id))?;
            emit(format, &engagement, print_item)
        }
        Command::Benchmark { category, window } => {
            let window = window.resolve(service, now)?;
            let benchmark = service.get_benchmark(*category, &window)?;
            match benchmark {
                Some(benchmark) => emit(format, &benchmark, print_benchmark),
                None if format == OutputFormat::Json => print_json(&serde_json::Value::Null),
                None => {
                    println!(
                        "No {} authors published in {}.",
                        category.display_name(),
                        window.describe()
                    );
                    Ok(())
                }
            }
        }
        Command::Opportunities { category, window } => {
            let window = window.resolve(service, now)?;
            let records = service.get_opportunity_scores(*category, &window)?;
            emit(format, records.as_slice(), |r| {
                print_opportunities(*category, r)
            })
        }
        Command::Patterns { window } => {
            let window = window.resolve(service, now)?;
            let pattern = service
                .get_temporal_pattern(&window)?
                .context("no snapshot has been built yet")?;
            emit(format, &pattern, print_patterns)
        }
        Command::TopAuthors { limit, window } => {
            let window = window.resolve(service, now)?;
            let records = service.get_top_authors(&window, limit.unwrap_or(default_limit))?;
            emit(format, records.as_slice(), print_top_authors)
        }
        Command::TopCategories { metric, limit } => {
            let rows = service.get_top_categories(*metric, limit.unwrap_or(default_limit))?;
            emit(format, rows.as_slice(), print_top_categories)
        }
        Command::Categories => {
            let rows = service.get_category_performance();
            emit(format, rows.as_slice(), print_categories)
        }
        Command::Author { author_id } => {
            let trends = service
                .get_author_trends(*author_id, now)
                .with_context(|| format!("No author found with id {}", author_id))?;
            emit(format, &trends, print_author)
        }
        Command::Check => {
            let issues = service.cache().check_consistency();
            if format == OutputFormat::Json {
                let messages: Vec<String> = issues.iter().map(|i| i.to_string()).collect();
                print_json(&serde_json::json!({
                    "consistent": issues.is_empty(),
                    "issues": messages,
                }))?;
            } else if issues.is_empty() {
                println!("Snapshot is consistent.");
            } else {
                for issue in &issues {
                    println!("  - {}", issue);
                }
            }
            if !issues.is_empty() {
                anyhow::bail!("{} consistency issue(s) found", issues.len());
            }
            Ok(())
        }
    }
}

fn emit<T: Serialize + ?Sized>(
    format: OutputFormat,
    value: &T,
    text: impl FnOnce(&T),
) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(value),
        OutputFormat::Text => {
            text(value);
            Ok(())
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to serialize output")?
    );
    Ok(())
}

// ============================================
// Text output
// ============================================

fn print_status(status: &RefreshStatus) {
    println!(
        "Generation:    {}",
        status
            .current_generation_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "none".to_string())
    );
    println!(
        "Refreshed:     {}",
        format_relative_time_opt(status.last_refreshed_at)
    );
    println!(
        "Health:        {}",
        if status.degraded { "degraded" } else { "ok" }
    );
    if let Some(reason) = &status.stale_reason {
        println!("Stale reason:  {}", reason);
    }
    if let Some(error) = &status.last_error {
        println!("Last error:    {}", error);
    }
    println!("Skipped:       {}", format_count(status.skipped_events));
    if let Some(fingerprint) = &status.fingerprint {
        println!("Fingerprint:   {}", fingerprint);
    }
}

fn print_summary(summary: &Summary) {
    println!(
        "Generation {} ({})",
        summary.generation_id,
        summary.refreshed_at.format("%Y-%m-%d %H:%M UTC")
    );
    println!("  Authors:   {}", format_count(summary.total_authors));
    println!("  Items:     {}", format_count(summary.total_items));
    println!("  Events:    {}", format_count(summary.total_events));
    println!("  Avg/item:  {:.2}", summary.avg_engagement_per_item);
    if summary.skipped_events > 0 {
        println!("  Skipped:   {}", format_count(summary.skipped_events));
    }
    if let (Some(first), Some(last)) = (summary.first_published_at, summary.last_published_at) {
        println!(
            "  Published: {} .. {}",
            first.format("%Y-%m-%d"),
            last.format("%Y-%m-%d")
        );
    }
}

fn print_snapshot(entry: &SnapshotEntry) {
    println!("Item {} (generation {})", entry.item_id, entry.generation);
    println!("  views:    {}", format_count(entry.counts.views));
    println!("  likes:    {}", format_count(entry.counts.likes));
    println!("  comments: {}", format_count(entry.counts.comments));
    println!("  shares:   {}", format_count(entry.counts.shares));
    println!("  total:    {}", format_count(entry.total));
}

fn print_item(item: &ItemEngagement) {
    println!("{} [{}]", item.title, item.category.display_name());
    println!(
        "  author {} | published {} | {}",
        item.author_id,
        item.published_at.format("%Y-%m-%d"),
        item.window.describe()
    );
    println!(
        "  views {}  likes {}  comments {}  shares {}",
        format_count(item.counts.views),
        format_count(item.counts.likes),
        format_count(item.counts.comments),
        format_count(item.counts.shares)
    );
    println!(
        "  total {}  engagement rate {}",
        format_count(item.total),
        format_percent(item.engagement_rate)
    );
}

fn print_benchmark(benchmark: &CategoryBenchmark) {
    println!(
        "{} benchmark over {} ({} authors)",
        benchmark.category.display_name(),
        benchmark.window.describe(),
        benchmark.author_count
    );
    println!("  p25: {:.2}", benchmark.p25);
    println!("  p50: {:.2}", benchmark.p50);
    println!("  p75: {:.2}", benchmark.p75);
}

fn print_opportunities(category: Category, records: &[OpportunityRecord]) {
    if records.is_empty() {
        println!("No {} authors in window.", category.display_name());
        return;
    }
    println!(
        "{:>6}  {:<24} {:>6} {:>10} {:>10}  {:<22} {:>6}",
        "ID", "AUTHOR", "ITEMS", "AVG", "MEDIAN", "SEGMENT", "SCORE"
    );
    for r in records {
        println!(
            "{:>6}  {:<24} {:>6} {:>10.2} {:>10.2}  {:<22} {:>6}",
            r.author_id,
            truncate(&r.author_name, 24),
            r.item_count,
            r.avg_engagement,
            r.category_median,
            r.segment.label(),
            r.opportunity_score
        );
    }
}

fn print_patterns(pattern: &TemporalPattern) {
    println!(
        "Engagement by hour over {} ({} events)",
        pattern.window.describe(),
        format_count(pattern.grand_total)
    );
    if pattern.grand_total == 0 {
        return;
    }

    let hourly = pattern.hourly_totals();
    let max_hour = hourly.iter().copied().max().unwrap_or(0);
    for (hour, total) in hourly.iter().enumerate() {
        println!("  {:02}:00 {:<30} {}", hour, bar(*total, max_hour, 30), format_count(*total));
    }

    println!();
    let daily = pattern.weekday_totals();
    let max_day = daily.iter().copied().max().unwrap_or(0);
    for (day, total) in daily.iter().enumerate() {
        println!(
            "  {:<9} {:<30} {}",
            postpulse_core::analytics::WEEKDAY_NAMES[day],
            bar(*total, max_day, 30),
            format_count(*total)
        );
    }

    if let Some(peak) = pattern.peak() {
        println!(
            "\nPeak: {} {:02}:00 ({} of events, {:.2} per item)",
            peak.weekday_name(),
            peak.hour,
            format_percent(peak.percent_of_total),
            peak.avg_engagement_per_item
        );
    }
}

fn print_top_authors(records: &[RankedAuthorRecord]) {
    if records.is_empty() {
        println!("No authors with items in window.");
        return;
    }
    println!(
        "{:>4}  {:<24} {:<14} {:>4} {:>6} {:>10} {:>10}",
        "RANK", "AUTHOR", "CATEGORY", "CAT#", "ITEMS", "TOTAL", "AVG"
    );
    for r in records {
        println!(
            "{:>4}  {:<24} {:<14} {:>4} {:>6} {:>10} {:>10.2}",
            r.overall_rank,
            truncate(&r.author_name, 24),
            r.category.display_name(),
            r.category_rank,
            r.item_count,
            format_count(r.total_engagement),
            r.avg_engagement
        );
    }
}

fn print_top_categories(rows: &[CategoryRanking]) {
    for row in rows {
        println!(
            "{:>2}. {:<14} items {:>6}  engagement {:>10}  avg {:>8.2}  top {}",
            row.rank,
            row.category.display_name(),
            format_count(row.total_items),
            format_count(row.total_engagement),
            row.avg_engagement_per_item,
            row.top_author_name.as_deref().unwrap_or("-")
        );
    }
}

fn print_categories(rows: &[CategoryPerformance]) {
    println!(
        "{:<14} {:>6} {:>10} {:>10} {:>10} {:>8}",
        "CATEGORY", "ITEMS", "TOTAL", "AVG", "AVG VIEWS", "RATE"
    );
    for row in rows {
        println!(
            "{:<14} {:>6} {:>10} {:>10.2} {:>10.2} {:>8}",
            row.category.display_name(),
            format_count(row.total_items),
            format_count(row.total_engagement),
            row.avg_engagement,
            row.avg_views,
            format_percent(row.engagement_rate)
        );
    }
}

fn print_author(trends: &AuthorTrends) {
    println!(
        "{} (#{}, {})",
        trends.author_name,
        trends.author_id,
        trends.category.display_name()
    );
    println!("  Items:       {}", format_count(trends.total_items));
    println!("  Engagement:  {}", format_count(trends.total_engagement));
    println!("  Avg/item:    {:.2}", trends.avg_engagement_per_item);
    println!("  Last 7 days: {:.2}", trends.trend_7d);
    println!("  Last 30 days: {:.2}", trends.trend_30d);
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}
