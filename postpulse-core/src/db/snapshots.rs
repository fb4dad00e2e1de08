//! Persisted snapshot generations
//!
//! Generations are written whole inside one transaction, so a crash mid-save
//! leaves the previous generation as the newest complete one.

use super::repo::{format_ts, parse_ts, Database};
use crate::cache::{
    Generation, GenerationId, PersistedGeneration, SkipCounts, SnapshotEntry, SnapshotStore,
    TimelineCount,
};
use crate::error::{IngestionIssue, Result};
use crate::types::{EventKind, KindCounts};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension};

impl SnapshotStore for Database {
    fn save_generation(&self, generation: &Generation, retain: usize) -> Result<()> {
        let mut conn = self.connection();
        let tx = conn.transaction()?;
        let id = generation.id().0 as i64;
        let skipped = generation.skipped();
        let issue_samples = serde_json::to_string(generation.issue_samples())?;

        tx.execute(
            r#"
            INSERT OR REPLACE INTO snapshot_generations
                (id, refreshed_at, item_count, event_count, skipped_unknown_kind,
                 skipped_unknown_item, issue_samples, fingerprint)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                id,
                format_ts(&generation.refreshed_at()),
                generation.entry_count() as i64,
                generation.event_count() as i64,
                skipped.unknown_kind as i64,
                skipped.unknown_item as i64,
                issue_samples,
                generation.fingerprint(),
            ],
        )?;

        {
            let mut stmt = tx.prepare(
                r#"
                INSERT OR REPLACE INTO snapshot_entries
                    (generation_id, item_id, views, likes, comments, shares, total)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )?;
            for entry in generation.entries() {
                let c = &entry.counts;
                stmt.execute(params![
                    entry.generation.0 as i64,
                    entry.item_id,
                    c.views as i64,
                    c.likes as i64,
                    c.comments as i64,
                    c.shares as i64,
                    entry.total as i64,
                ])?;
            }

            let mut stmt = tx.prepare(
                r#"
                INSERT OR REPLACE INTO snapshot_timeline
                    (generation_id, occurred_at, item_id, kind, count)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            )?;
            for cell in generation.timeline() {
                stmt.execute(params![
                    id,
                    format_ts(&cell.occurred_at),
                    cell.item_id,
                    cell.kind.as_str(),
                    cell.count as i64,
                ])?;
            }
        }

        // Keep the newest `retain` generations
        let keep = retain.max(1) as i64;
        let cutoff: Option<i64> = tx
            .query_row(
                "SELECT id FROM snapshot_generations ORDER BY id DESC LIMIT 1 OFFSET ?1",
                [keep - 1],
                |r| r.get(0),
            )
            .optional()?;
        if let Some(cutoff) = cutoff {
            tx.execute("DELETE FROM snapshot_timeline WHERE generation_id < ?1", [cutoff])?;
            tx.execute("DELETE FROM snapshot_entries WHERE generation_id < ?1", [cutoff])?;
            let pruned = tx.execute("DELETE FROM snapshot_generations WHERE id < ?1", [cutoff])?;
            if pruned > 0 {
                tracing::debug!(pruned, keep, "Pruned old snapshot generations");
            }
        }

        tx.commit()?;
        tracing::debug!(generation = id, "Persisted snapshot generation");
        Ok(())
    }

    fn load_latest_generation(&self) -> Result<Option<PersistedGeneration>> {
        let conn = self.connection();

        let header = conn
            .query_row(
                "SELECT * FROM snapshot_generations ORDER BY id DESC LIMIT 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, i64>("id")?,
                        parse_ts(row, "refreshed_at")?,
                        row.get::<_, i64>("event_count")?,
                        SkipCounts {
                            unknown_kind: row.get::<_, i64>("skipped_unknown_kind")? as u64,
                            unknown_item: row.get::<_, i64>("skipped_unknown_item")? as u64,
                        },
                        row.get::<_, String>("issue_samples")?,
                        row.get::<_, String>("fingerprint")?,
                    ))
                },
            )
            .optional()?;

        let Some((id, refreshed_at, event_count, skipped, issue_samples, fingerprint)) = header
        else {
            return Ok(None);
        };
        let issue_samples: Vec<IngestionIssue> = serde_json::from_str(&issue_samples)?;

        let mut stmt = conn.prepare(
            r#"
            SELECT item_id, views, likes, comments, shares, total
            FROM snapshot_entries
            WHERE generation_id = ?1
            ORDER BY item_id
            "#,
        )?;
        let entries = stmt
            .query_map([id], |row| {
                Ok(SnapshotEntry {
                    item_id: row.get("item_id")?,
                    generation: GenerationId(id as u64),
                    counts: KindCounts {
                        views: row.get::<_, i64>("views")? as u64,
                        likes: row.get::<_, i64>("likes")? as u64,
                        comments: row.get::<_, i64>("comments")? as u64,
                        shares: row.get::<_, i64>("shares")? as u64,
                    },
                    total: row.get::<_, i64>("total")? as u64,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut stmt = conn.prepare(
            r#"
            SELECT occurred_at, item_id, kind, count
            FROM snapshot_timeline
            WHERE generation_id = ?1
            "#,
        )?;
        let timeline = stmt
            .query_map([id], |row| {
                let kind: String = row.get("kind")?;
                let kind = EventKind::parse(&kind).ok_or_else(|| {
                    rusqlite::Error::FromSqlConversionFailure(
                        2,
                        Type::Text,
                        format!("unknown event kind '{}'", kind).into(),
                    )
                })?;
                Ok(TimelineCount {
                    occurred_at: parse_ts(row, "occurred_at")?,
                    item_id: row.get("item_id")?,
                    kind,
                    count: row.get::<_, i64>("count")? as u64,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Some(PersistedGeneration {
            id: GenerationId(id as u64),
            refreshed_at,
            event_count: event_count as u64,
            skipped,
            issue_samples,
            fingerprint,
            entries,
            timeline,
        }))
    }

    fn max_generation_id(&self) -> Result<Option<GenerationId>> {
        let conn = self.connection();
        let max: Option<i64> =
            conn.query_row("SELECT MAX(id) FROM snapshot_generations", [], |r| r.get(0))?;
        Ok(max.map(|id| GenerationId(id as u64)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::AggregationCache;
    use crate::source::MemorySource;
    use crate::types::Category;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    fn source() -> Arc<MemorySource> {
        let source = Arc::new(MemorySource::new());
        let t = Utc.with_ymd_and_hms(2025, 4, 2, 18, 5, 0).unwrap();
        source.add_author(1, Category::Lifestyle, t);
        source.add_item(1, 1, Category::Lifestyle, t);
        source.add_item(2, 1, Category::Lifestyle, t);
        source.push_events(1, "view", t, 4);
        source.push_events(2, "comment", t, 2);
        source
    }

    fn test_db() -> Arc<Database> {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        Arc::new(db)
    }

    #[test]
    fn test_save_and_load_latest() {
        let db = test_db();
        let cache = AggregationCache::new(source()).with_store(db.clone(), 2);
        let outcome = cache.refresh().unwrap();

        let loaded = db.load_latest_generation().unwrap().unwrap();
        assert_eq!(loaded.id, outcome.generation_id);
        assert_eq!(loaded.fingerprint, outcome.fingerprint);
        assert_eq!(loaded.entries.len(), 2);
        assert_eq!(loaded.timeline.len(), 2);
        assert_eq!(loaded.entries[0].total, 4);
    }

    #[test]
    fn test_issue_samples_survive_restore() {
        let db = test_db();
        let src = source();
        src.push_event(1, "bookmark", Utc::now());
        AggregationCache::new(src.clone())
            .with_store(db.clone(), 2)
            .refresh()
            .unwrap();

        let cache = AggregationCache::new(src).with_store(db.clone(), 2);
        cache.init().unwrap();
        let generation = cache.current().unwrap();
        assert_eq!(generation.skipped().unknown_kind, 1);
        assert!(matches!(
            generation.issue_samples(),
            [IngestionIssue::UnknownKind { kind, .. }] if kind == "bookmark"
        ));
    }

    #[test]
    fn test_prunes_to_retained() {
        let db = test_db();
        let cache = AggregationCache::new(source()).with_store(db.clone(), 2);
        for _ in 0..4 {
            cache.refresh().unwrap();
        }

        let conn = db.connection();
        let ids: Vec<i64> = conn
            .prepare("SELECT id FROM snapshot_generations ORDER BY id")
            .unwrap()
            .query_map([], |r| r.get(0))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert_eq!(ids, vec![3, 4]);
        let stale: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM snapshot_entries WHERE generation_id < 3",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(stale, 0);
    }

    #[test]
    fn test_restore_continues_ids() {
        let db = test_db();
        let src = source();
        let first = AggregationCache::new(src.clone()).with_store(db.clone(), 2);
        first.refresh().unwrap();
        first.refresh().unwrap();

        let second = AggregationCache::new(src).with_store(db.clone(), 2);
        assert_eq!(second.init().unwrap(), Some(GenerationId(2)));
        assert_eq!(second.get(1).unwrap().total, 4);
        assert_eq!(second.refresh().unwrap().generation_id, GenerationId(3));
    }

    #[test]
    fn test_tampered_generation_is_not_restored() {
        let db = test_db();
        let src = source();
        AggregationCache::new(src.clone())
            .with_store(db.clone(), 2)
            .refresh()
            .unwrap();
        db.connection()
            .execute("UPDATE snapshot_entries SET total = 99 WHERE item_id = 1", [])
            .unwrap();

        let cache = AggregationCache::new(src).with_store(db.clone(), 2);
        assert_eq!(cache.init().unwrap(), None);
        let status = cache.status();
        assert!(status.degraded);
        assert!(status.current_generation_id.is_none());
        assert!(cache.refresh().is_ok());
        assert!(!cache.status().degraded);
    }
}
