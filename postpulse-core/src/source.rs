//! Event source abstraction
//!
//! The aggregation cache only ever *reads* the engagement log. Anything that
//! can list the catalogue and stream events in order can back it: the SQLite
//! [`Database`](crate::db::Database) in production, [`MemorySource`] in tests.

use crate::error::{Error, RefreshError, Result};
use crate::types::{Author, AuthorId, Category, Item, ItemId, RawEvent, Window};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{PoisonError, RwLock};

/// Read access to the append-only engagement log and its catalogue.
///
/// Implementations must yield events from [`scan`](EventSource::scan) in
/// ascending `(occurred_at, id)` order. Returning an error from the visitor
/// stops the scan and the error is propagated unchanged.
pub trait EventSource: Send + Sync {
    /// All known authors.
    fn authors(&self) -> Result<Vec<Author>>;

    /// All known items.
    fn items(&self) -> Result<Vec<Item>>;

    /// Stream events, optionally restricted to `range`.
    fn scan(&self, range: Option<&Window>, visit: &mut dyn FnMut(RawEvent) -> Result<()>)
        -> Result<()>;

    /// Read the catalogue, then stream every event, both as of one point in
    /// time. Events are visited with the catalogue they were read against.
    ///
    /// The provided method reads each part in turn. Sources that can pin a
    /// read snapshot across all three reads override it.
    fn read_full(
        &self,
        visit: &mut dyn FnMut(&Catalogue, RawEvent) -> Result<()>,
    ) -> Result<Catalogue> {
        let catalogue = Catalogue::new(self.items()?, self.authors()?);
        self.scan(None, &mut |event| visit(&catalogue, event))?;
        Ok(catalogue)
    }
}

/// Authors and items as read together by [`EventSource::read_full`].
#[derive(Debug, Clone, Default)]
pub struct Catalogue {
    items: Vec<Item>,
    authors: Vec<Author>,
}

impl Catalogue {
    pub fn new(mut items: Vec<Item>, mut authors: Vec<Author>) -> Self {
        items.sort_by_key(|i| i.id);
        authors.sort_by_key(|a| a.id);
        Self { items, authors }
    }

    pub fn contains_item(&self, item_id: ItemId) -> bool {
        self.items.binary_search_by_key(&item_id, |i| i.id).is_ok()
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn authors(&self) -> &[Author] {
        &self.authors
    }

    pub fn into_parts(self) -> (Vec<Item>, Vec<Author>) {
        (self.items, self.authors)
    }
}

/// In-memory event source.
///
/// Kinds are stored as text, so malformed events can be injected. A failure
/// switch makes every read return a source error.
#[derive(Default)]
pub struct MemorySource {
    authors: RwLock<Vec<Author>>,
    items: RwLock<Vec<Item>>,
    events: RwLock<Vec<RawEvent>>,
    next_event_id: AtomicI64,
    failing: AtomicBool,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an author with a generated name.
    pub fn add_author(&self, id: AuthorId, category: Category, joined_at: DateTime<Utc>) {
        self.authors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Author {
                id,
                name: format!("Author_{}", id),
                joined_at,
                category,
            });
    }

    /// Add an item with default content attributes.
    pub fn add_item(
        &self,
        id: ItemId,
        author_id: AuthorId,
        category: Category,
        published_at: DateTime<Utc>,
    ) {
        self.items
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Item {
                id,
                author_id,
                category,
                published_at,
                title: format!("Post {}", id),
                content_length: 1000,
                has_media: false,
            });
    }

    /// Append an event; returns its id.
    pub fn push_event(&self, item_id: ItemId, kind: &str, occurred_at: DateTime<Utc>) -> i64 {
        let id = self.next_event_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.events
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RawEvent {
                id,
                item_id,
                kind: kind.to_string(),
                actor_id: None,
                occurred_at,
            });
        id
    }

    /// Append `n` identical events.
    pub fn push_events(&self, item_id: ItemId, kind: &str, occurred_at: DateTime<Utc>, n: usize) {
        for _ in 0..n {
            self.push_event(item_id, kind, occurred_at);
        }
    }

    /// Make every subsequent read fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Refresh(RefreshError::Source(
                "memory source switched off".to_string(),
            )));
        }
        Ok(())
    }
}

impl EventSource for MemorySource {
    fn authors(&self) -> Result<Vec<Author>> {
        self.check_available()?;
        Ok(self
            .authors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn items(&self) -> Result<Vec<Item>> {
        self.check_available()?;
        Ok(self
            .items
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn scan(
        &self,
        range: Option<&Window>,
        visit: &mut dyn FnMut(RawEvent) -> Result<()>,
    ) -> Result<()> {
        self.check_available()?;
        let mut events: Vec<RawEvent> = self
            .events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| range.map_or(true, |w| w.contains(e.occurred_at)))
            .cloned()
            .collect();
        events.sort_by_key(|e| (e.occurred_at, e.id));

        for event in events {
            visit(event)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_scan_orders_and_filters() {
        let source = MemorySource::new();
        let t1 = Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap();
        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        source.push_event(1, "like", t1);
        source.push_event(1, "view", t0);

        let mut seen = Vec::new();
        source
            .scan(None, &mut |e| {
                seen.push(e.kind);
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, vec!["view", "like"]);

        let window = Window::between(t1, t1 + chrono::Duration::hours(1)).unwrap();
        let mut count = 0;
        source
            .scan(Some(&window), &mut |_| {
                count += 1;
                Ok(())
            })
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_read_full_pairs_catalogue_with_events() {
        let source = MemorySource::new();
        let t = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        source.add_author(1, Category::Tech, t);
        source.add_item(3, 1, Category::Tech, t);
        source.add_item(2, 1, Category::Tech, t);
        source.push_event(2, "view", t);
        source.push_event(7, "view", t);

        let mut known = Vec::new();
        let catalogue = source
            .read_full(&mut |catalogue, event| {
                known.push(catalogue.contains_item(event.item_id));
                Ok(())
            })
            .unwrap();
        assert_eq!(known, vec![true, false]);
        assert_eq!(
            catalogue.items().iter().map(|i| i.id).collect::<Vec<_>>(),
            vec![2, 3]
        );
        assert_eq!(catalogue.authors().len(), 1);
    }

    #[test]
    fn test_failing_source() {
        let source = MemorySource::new();
        source.set_failing(true);
        assert!(source.items().is_err());
        source.set_failing(false);
        assert!(source.items().is_ok());
    }
}
