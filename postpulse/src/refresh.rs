//! postpulse-refresh - rebuild the engagement snapshot from the event log
//!
//! One-shot by default. With `--watch` the snapshot is rebuilt on a fixed
//! interval until Ctrl+C.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Database: $XDG_DATA_HOME/postpulse/data.db (~/.local/share/postpulse/data.db)
//! - Logs: $XDG_STATE_HOME/postpulse/postpulse.log (~/.local/state/postpulse/postpulse.log)
//! - Config: $XDG_CONFIG_HOME/postpulse/config.toml (~/.config/postpulse/config.toml)

mod process_lock;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use indicatif::{ProgressBar, ProgressStyle};
use postpulse_core::cache::spawn_refresh_loop;
use postpulse_core::format::format_count;
use postpulse_core::{AggregationCache, Config, Database, GenerationId, RefreshOutcome};
use process_lock::acquire_refresh_guard;

#[derive(Parser)]
#[command(name = "postpulse-refresh")]
#[command(about = "Rebuild the engagement snapshot from the event log")]
#[command(version)]
struct Args {
    /// Verbose output (-v lists skipped-event samples)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Watch mode - refresh on an interval instead of one-shot
    #[arg(short, long)]
    watch: bool,

    /// Seconds between refreshes (only with --watch; defaults to config)
    #[arg(long)]
    interval: Option<u64>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    Config::ensure_xdg_env();

    let config = Config::load().context("failed to load configuration")?;

    let _log_guard =
        postpulse_core::logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::info!("postpulse-refresh starting");

    let db_path = Config::database_path();
    let _refresh_guard = acquire_refresh_guard(&db_path).context("failed to acquire process lock")?;

    tracing::info!(path = %db_path.display(), "Opening database");
    let db = Arc::new(Database::open(&db_path).context("failed to open database")?);
    db.migrate().context("failed to run database migrations")?;

    println!("Database: {}", db_path.display());

    let mut cache = AggregationCache::new(db.clone());
    if config.cache.persist {
        cache = cache.with_store(db, config.cache.retained_generations);
    }
    let cache = Arc::new(cache);

    if let Some(id) = cache.init().context("failed to restore snapshot")? {
        println!("Restored generation {}", id);
    }

    if args.watch {
        let secs = args.interval.unwrap_or(config.cache.refresh_interval_secs);
        if secs == 0 {
            anyhow::bail!("--interval must be greater than 0");
        }
        run_watch_mode(cache, Duration::from_secs(secs))
    } else {
        run_single_refresh(&cache, args.verbose)
    }
}

/// Build one generation with a spinner and print the outcome.
fn run_single_refresh(cache: &AggregationCache, verbose: u8) -> Result<()> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg} [{elapsed}]")
            .context("invalid progress template")?,
    );
    pb.set_message("Aggregating engagement events...");
    pb.enable_steady_tick(Duration::from_millis(100));

    let result = cache.refresh();
    pb.finish_and_clear();

    let outcome = result.context("refresh failed")?;
    print_outcome(&outcome);

    if verbose >= 1 {
        if let Some(generation) = cache.current() {
            for issue in generation.issue_samples() {
                println!("  Skipped: {}", issue);
            }
        }
    }

    tracing::info!(
        generation = %outcome.generation_id,
        items = outcome.item_count,
        events = outcome.event_count,
        elapsed_ms = outcome.elapsed_ms,
        "postpulse-refresh complete"
    );

    Ok(())
}

/// Refresh on an interval until Ctrl+C, reporting each new generation.
fn run_watch_mode(cache: Arc<AggregationCache>, interval: Duration) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    println!(
        "Watch mode active (refresh every {}s). Press Ctrl+C to stop.",
        interval.as_secs()
    );
    println!();

    runtime.block_on(async move {
        let handle = spawn_refresh_loop(Arc::clone(&cache), interval);
        let mut last_seen: Option<GenerationId> = cache.status().current_generation_id;
        let mut report = tokio::time::interval(Duration::from_millis(500));

        loop {
            tokio::select! {
                signal = tokio::signal::ctrl_c() => {
                    signal.context("failed to listen for Ctrl+C")?;
                    eprintln!("\nShutting down...");
                    break;
                }
                _ = report.tick() => {
                    let status = cache.status();
                    if status.current_generation_id != last_seen {
                        last_seen = status.current_generation_id;
                        if let Some(id) = last_seen {
                            let timestamp = chrono::Local::now().format("%H:%M:%S");
                            println!(
                                "[{}] Published generation {} ({} items)",
                                timestamp,
                                id,
                                format_count(cache.all().len() as u64)
                            );
                        }
                    }
                    if status.degraded {
                        if let Some(reason) = status.stale_reason {
                            tracing::debug!(reason = %reason, "Serving stale generation");
                        }
                    }
                }
            }
        }

        cache.shutdown();
        cache.cancel_refresh();
        if tokio::time::timeout(Duration::from_secs(30), handle)
            .await
            .is_err()
        {
            tracing::warn!("Refresh loop did not stop within 30s");
        }
        Ok::<(), anyhow::Error>(())
    })?;

    println!("Watch mode stopped.");
    tracing::info!("postpulse-refresh watch mode stopped");

    Ok(())
}

fn print_outcome(outcome: &RefreshOutcome) {
    println!("\nRefresh complete:");
    println!("  Generation:     {}", outcome.generation_id);
    println!("  Items:          {}", format_count(outcome.item_count as u64));
    println!("  Events:         {}", format_count(outcome.event_count));
    println!(
        "  Skipped events: {} ({} unknown kind, {} unknown item)",
        format_count(outcome.skipped.total()),
        outcome.skipped.unknown_kind,
        outcome.skipped.unknown_item
    );
    println!("  Fingerprint:    {}", outcome.fingerprint);
    println!("  Took:           {}ms", outcome.elapsed_ms);
}
