//! postpulse-seed - load a deterministic sample dataset
//!
//! Generates authors, items and engagement events from a fixed RNG seed and
//! inserts them into the database. A database is only seeded once unless
//! `--force` is given.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use postpulse_core::format::format_count;
use postpulse_core::seed::{seed_database, SeedOptions};
use postpulse_core::{Config, Database, Error};

#[derive(Parser)]
#[command(name = "postpulse-seed")]
#[command(about = "Load a deterministic sample dataset")]
#[command(version)]
struct Args {
    /// Seed even if the database was seeded before
    #[arg(long)]
    force: bool,

    /// Number of authors (defaults to config)
    #[arg(long)]
    authors: Option<usize>,

    /// Number of items (defaults to config)
    #[arg(long)]
    items: Option<usize>,

    /// Cap on generated events (defaults to config)
    #[arg(long)]
    events: Option<usize>,

    /// RNG seed (defaults to config)
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    Config::ensure_xdg_env();

    let config = Config::load().context("failed to load configuration")?;

    let _log_guard =
        postpulse_core::logging::init(&config.logging).context("failed to initialize logging")?;

    let mut options = SeedOptions::from_config(&config.seed, Utc::now());
    if let Some(authors) = args.authors {
        options.authors = authors;
    }
    if let Some(items) = args.items {
        options.items = items;
    }
    if let Some(events) = args.events {
        options.events = events;
    }
    if let Some(seed) = args.seed {
        options.rng_seed = seed;
    }
    if options.authors == 0 {
        anyhow::bail!("--authors must be greater than 0");
    }

    let db_path = Config::database_path();
    tracing::info!(path = %db_path.display(), "Opening database");

    let db = Database::open(&db_path).context("failed to open database")?;
    db.migrate().context("failed to run database migrations")?;

    println!("Database: {}", db_path.display());
    println!(
        "Seeding {} authors, {} items, up to {} events (seed {})",
        format_count(options.authors as u64),
        format_count(options.items as u64),
        format_count(options.events as u64),
        options.rng_seed
    );

    let pb = ProgressBar::new(options.events as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .context("invalid progress template")?
            .progress_chars("#>-"),
    );
    pb.set_message("events");

    let result = seed_database(&db, &options, args.force, |n| pb.inc(n as u64));
    pb.finish_and_clear();

    let report = match result {
        Ok(report) => report,
        Err(Error::AlreadySeeded(at)) => {
            anyhow::bail!(
                "database already seeded at {}; rerun with --force to seed again",
                at.format("%Y-%m-%d %H:%M:%S UTC")
            );
        }
        Err(e) => return Err(e).context("seeding failed"),
    };

    println!("\nSeed complete:");
    println!("  Authors inserted: {}", format_count(report.authors_inserted as u64));
    println!("  Items inserted:   {}", format_count(report.items_inserted as u64));
    println!("  Events generated: {}", format_count(report.events_generated as u64));
    println!("  Events inserted:  {}", format_count(report.events_inserted as u64));
    println!("\nRun 'postpulse-refresh' to build the snapshot.");

    Ok(())
}
