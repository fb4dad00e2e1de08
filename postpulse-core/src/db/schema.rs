//! Database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 3;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: canonical, append-only event log
    r#"
    -- ============================================
    -- LAYER 1: Canonical (append-only)
    -- ============================================

    CREATE TABLE IF NOT EXISTS authors (
        id               INTEGER PRIMARY KEY,
        name             TEXT NOT NULL,
        joined_at        DATETIME NOT NULL,
        category         TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS items (
        id               INTEGER PRIMARY KEY,
        author_id        INTEGER NOT NULL REFERENCES authors(id),
        category         TEXT NOT NULL,
        published_at     DATETIME NOT NULL,
        title            TEXT NOT NULL,
        content_length   INTEGER NOT NULL,
        has_media        INTEGER NOT NULL
    );

    -- No foreign key on item_id: rows referencing unknown items are
    -- reported and skipped at refresh time instead of rejected here.
    CREATE TABLE IF NOT EXISTS engagements (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        event_key        TEXT NOT NULL UNIQUE,
        item_id          INTEGER NOT NULL,
        kind             TEXT NOT NULL,
        actor_id         INTEGER,
        occurred_at      DATETIME NOT NULL
    );

    -- One row per completed sample-data load
    CREATE TABLE IF NOT EXISTS seed_runs (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        rng_seed         INTEGER NOT NULL,
        authors          INTEGER NOT NULL,
        items            INTEGER NOT NULL,
        events           INTEGER NOT NULL,
        seeded_at        DATETIME NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_items_author ON items(author_id);
    CREATE INDEX IF NOT EXISTS idx_items_published ON items(published_at);
    CREATE INDEX IF NOT EXISTS idx_engagements_occurred ON engagements(occurred_at, id);
    CREATE INDEX IF NOT EXISTS idx_engagements_item ON engagements(item_id);
    "#,
    // Version 2: persisted snapshot generations
    r#"
    -- ============================================
    -- LAYER 2: Derived (regenerable)
    -- ============================================

    CREATE TABLE IF NOT EXISTS snapshot_generations (
        id               INTEGER PRIMARY KEY,
        refreshed_at     DATETIME NOT NULL,
        item_count       INTEGER NOT NULL,
        event_count      INTEGER NOT NULL,
        skipped_unknown_kind INTEGER NOT NULL,
        skipped_unknown_item INTEGER NOT NULL,
        issue_samples    TEXT NOT NULL DEFAULT '[]',  -- JSON array of skipped events
        fingerprint      TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS snapshot_entries (
        generation_id    INTEGER NOT NULL REFERENCES snapshot_generations(id) ON DELETE CASCADE,
        item_id          INTEGER NOT NULL,
        views            INTEGER NOT NULL,
        likes            INTEGER NOT NULL,
        comments         INTEGER NOT NULL,
        shares           INTEGER NOT NULL,
        total            INTEGER NOT NULL,

        PRIMARY KEY (generation_id, item_id)
    );

    CREATE TABLE IF NOT EXISTS snapshot_hourly (
        generation_id    INTEGER NOT NULL REFERENCES snapshot_generations(id) ON DELETE CASCADE,
        hour_start       DATETIME NOT NULL,
        item_id          INTEGER NOT NULL,
        kind             TEXT NOT NULL,
        count            INTEGER NOT NULL,

        PRIMARY KEY (generation_id, hour_start, item_id, kind)
    );
    "#,
    // Version 3: exact-timestamp timeline replaces the hourly index.
    // Generations saved without a timeline cannot answer windowed queries.
    r#"
    DROP TABLE IF EXISTS snapshot_hourly;
    DELETE FROM snapshot_entries;
    DELETE FROM snapshot_generations;

    CREATE TABLE IF NOT EXISTS snapshot_timeline (
        generation_id    INTEGER NOT NULL REFERENCES snapshot_generations(id) ON DELETE CASCADE,
        occurred_at      DATETIME NOT NULL,
        item_id          INTEGER NOT NULL,
        kind             TEXT NOT NULL,
        count            INTEGER NOT NULL,

        PRIMARY KEY (generation_id, occurred_at, item_id, kind)
    );
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    tracing::info!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking database migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)?;
            conn.execute(&format!("PRAGMA user_version = {}", version), [])?;
        }
    }

    if current_version < SCHEMA_VERSION {
        tracing::info!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Migrations complete"
        );
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}
