//! Database repository layer
//!
//! Insert and query operations for the canonical engagement log. Rows are
//! only ever appended; re-inserting an existing id or event key is a no-op.

use crate::error::{Error, Result};
use crate::source::{Catalogue, EventSource};
use crate::types::*;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde::Serialize;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// One completed sample-data load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeedRun {
    pub rng_seed: u64,
    pub authors: u64,
    pub items: u64,
    pub events: u64,
    pub seeded_at: DateTime<Utc>,
}

/// Row counts of the canonical tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TableCounts {
    pub authors: u64,
    pub items: u64,
    pub events: u64,
}

/// Database handle (single connection behind a mutex)
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // WAL lets the refresh scan run alongside writers
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;  -- 64MB cache
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.connection();
        super::schema::run_migrations(&conn)
    }

    /// Get the underlying connection (for advanced use)
    pub fn connection(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ============================================
    // Catalogue operations
    // ============================================

    /// Insert authors in a transaction; returns how many were new
    pub fn insert_authors(&self, authors: &[Author]) -> Result<usize> {
        let mut conn = self.connection();
        let tx = conn.transaction()?;
        let mut inserted = 0;

        for author in authors {
            inserted += tx.execute(
                r#"
                INSERT OR IGNORE INTO authors (id, name, joined_at, category)
                VALUES (?1, ?2, ?3, ?4)
                "#,
                params![
                    author.id,
                    author.name,
                    format_ts(&author.joined_at),
                    author.category.as_str(),
                ],
            )?;
        }

        tx.commit()?;
        Ok(inserted)
    }

    /// Insert items in a transaction; returns how many were new
    pub fn insert_items(&self, items: &[Item]) -> Result<usize> {
        let mut conn = self.connection();
        let tx = conn.transaction()?;
        let mut inserted = 0;

        for item in items {
            inserted += tx.execute(
                r#"
                INSERT OR IGNORE INTO items (id, author_id, category, published_at, title,
                                             content_length, has_media)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
                params![
                    item.id,
                    item.author_id,
                    item.category.as_str(),
                    format_ts(&item.published_at),
                    item.title,
                    item.content_length,
                    item.has_media,
                ],
            )?;
        }

        tx.commit()?;
        Ok(inserted)
    }

    pub fn list_authors(&self) -> Result<Vec<Author>> {
        Self::query_authors(&self.connection())
    }

    pub fn list_items(&self) -> Result<Vec<Item>> {
        Self::query_items(&self.connection())
    }

    fn query_authors(conn: &Connection) -> Result<Vec<Author>> {
        let mut stmt = conn.prepare("SELECT * FROM authors ORDER BY id")?;
        let authors = stmt
            .query_map([], Self::row_to_author)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(authors)
    }

    fn query_items(conn: &Connection) -> Result<Vec<Item>> {
        let mut stmt = conn.prepare("SELECT * FROM items ORDER BY id")?;
        let items = stmt
            .query_map([], Self::row_to_item)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(items)
    }

    fn row_to_author(row: &Row) -> rusqlite::Result<Author> {
        Ok(Author {
            id: row.get("id")?,
            name: row.get("name")?,
            joined_at: parse_ts(row, "joined_at")?,
            category: parse_category(row, "category")?,
        })
    }

    fn row_to_item(row: &Row) -> rusqlite::Result<Item> {
        Ok(Item {
            id: row.get("id")?,
            author_id: row.get("author_id")?,
            category: parse_category(row, "category")?,
            published_at: parse_ts(row, "published_at")?,
            title: row.get("title")?,
            content_length: row.get("content_length")?,
            has_media: row.get("has_media")?,
        })
    }

    // ============================================
    // Engagement operations
    // ============================================

    /// Insert events in a transaction; duplicates by key are ignored.
    ///
    /// Returns how many events were new.
    pub fn insert_events(&self, events: &[EngagementEvent]) -> Result<usize> {
        let mut conn = self.connection();
        let tx = conn.transaction()?;
        let mut inserted = 0;

        {
            let mut stmt = tx.prepare(
                r#"
                INSERT OR IGNORE INTO engagements (event_key, item_id, kind, actor_id, occurred_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            )?;
            for event in events {
                inserted += stmt.execute(params![
                    event.key,
                    event.item_id,
                    event.kind.as_str(),
                    event.actor_id,
                    format_ts(&event.occurred_at),
                ])?;
            }
        }

        tx.commit()?;
        tracing::debug!(
            offered = events.len(),
            inserted,
            "Inserted engagement events"
        );
        Ok(inserted)
    }

    /// Insert a single event with an unvalidated kind.
    ///
    /// Returns `false` when the key already exists.
    pub fn insert_raw_event(
        &self,
        key: &str,
        item_id: ItemId,
        kind: &str,
        occurred_at: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.connection();
        let inserted = conn.execute(
            r#"
            INSERT OR IGNORE INTO engagements (event_key, item_id, kind, occurred_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![key, item_id, kind, format_ts(&occurred_at)],
        )?;
        Ok(inserted == 1)
    }

    pub fn count_events(&self) -> Result<u64> {
        let conn = self.connection();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM engagements", [], |r| r.get(0))?;
        Ok(count as u64)
    }

    /// Row counts for authors, items, and events
    pub fn table_counts(&self) -> Result<TableCounts> {
        let conn = self.connection();
        let (authors, items, events): (i64, i64, i64) = conn.query_row(
            r#"
            SELECT (SELECT COUNT(*) FROM authors),
                   (SELECT COUNT(*) FROM items),
                   (SELECT COUNT(*) FROM engagements)
            "#,
            [],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )?;
        Ok(TableCounts {
            authors: authors as u64,
            items: items as u64,
            events: events as u64,
        })
    }

    // ============================================
    // Seed run operations
    // ============================================

    pub fn record_seed_run(&self, run: &SeedRun) -> Result<()> {
        let conn = self.connection();
        conn.execute(
            r#"
            INSERT INTO seed_runs (rng_seed, authors, items, events, seeded_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                run.rng_seed as i64,
                run.authors as i64,
                run.items as i64,
                run.events as i64,
                format_ts(&run.seeded_at),
            ],
        )?;
        Ok(())
    }

    /// Most recent seed run, if the database was ever seeded
    pub fn last_seed_run(&self) -> Result<Option<SeedRun>> {
        let conn = self.connection();
        conn.query_row(
            "SELECT * FROM seed_runs ORDER BY id DESC LIMIT 1",
            [],
            |row| {
                Ok(SeedRun {
                    rng_seed: row.get::<_, i64>("rng_seed")? as u64,
                    authors: row.get::<_, i64>("authors")? as u64,
                    items: row.get::<_, i64>("items")? as u64,
                    events: row.get::<_, i64>("events")? as u64,
                    seeded_at: parse_ts(row, "seeded_at")?,
                })
            },
        )
        .optional()
        .map_err(Error::from)
    }
}

impl EventSource for Database {
    fn authors(&self) -> Result<Vec<Author>> {
        self.list_authors()
    }

    fn items(&self) -> Result<Vec<Item>> {
        self.list_items()
    }

    fn scan(
        &self,
        range: Option<&Window>,
        visit: &mut dyn FnMut(RawEvent) -> Result<()>,
    ) -> Result<()> {
        scan_events(&self.connection(), range, visit)
    }

    /// All three reads share one deferred transaction, so under WAL they see
    /// the same committed state even while another process is writing.
    fn read_full(
        &self,
        visit: &mut dyn FnMut(&Catalogue, RawEvent) -> Result<()>,
    ) -> Result<Catalogue> {
        let mut conn = self.connection();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;

        let catalogue = Catalogue::new(Self::query_items(&tx)?, Self::query_authors(&tx)?);
        scan_events(&tx, None, &mut |event| visit(&catalogue, event))?;

        tx.commit()?;
        Ok(catalogue)
    }
}

fn scan_events(
    conn: &Connection,
    range: Option<&Window>,
    visit: &mut dyn FnMut(RawEvent) -> Result<()>,
) -> Result<()> {
    let start = range.and_then(|w| w.start).map(|t| format_ts(&t));
    let end = range.and_then(|w| w.end).map(|t| format_ts(&t));

    let mut stmt = conn.prepare(
        r#"
        SELECT id, item_id, kind, actor_id, occurred_at
        FROM engagements
        WHERE (?1 IS NULL OR occurred_at >= ?1)
          AND (?2 IS NULL OR occurred_at < ?2)
        ORDER BY occurred_at, id
        "#,
    )?;
    let rows = stmt.query_map(params![start, end], |row| {
        Ok(RawEvent {
            id: row.get("id")?,
            item_id: row.get("item_id")?,
            kind: row.get("kind")?,
            actor_id: row.get("actor_id")?,
            occurred_at: parse_ts(row, "occurred_at")?,
        })
    })?;

    for event in rows {
        visit(event?)?;
    }
    Ok(())
}

/// Fixed-width UTC timestamp, so text order matches time order.
pub(crate) fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(row: &Row, column: &str) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(column)?;
    let idx = row.as_ref().column_index(column)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_category(row: &Row, column: &str) -> rusqlite::Result<Category> {
    let raw: String = row.get(column)?;
    let idx = row.as_ref().column_index(column)?;
    raw.parse::<Category>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
