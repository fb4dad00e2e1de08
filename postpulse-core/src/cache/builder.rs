//! Full re-aggregation of the event source into a new generation.

use super::generation::{Generation, GenerationId, GenerationParts, SkipCounts};
use super::CancelToken;
use crate::error::{Error, IngestionIssue, RefreshError};
use crate::source::EventSource;
use crate::types::{EventKind, ItemId, KindCounts};
use chrono::Utc;
use std::collections::BTreeMap;
use std::time::Instant;

/// Skipped events kept verbatim on the generation.
const MAX_ISSUE_SAMPLES: usize = 50;

/// Build a complete generation in isolation.
///
/// Malformed events are skipped, logged, and counted. Any source failure or
/// cancellation discards everything built so far.
pub(crate) fn build_generation(
    source: &dyn EventSource,
    id: GenerationId,
    cancel: &CancelToken,
) -> Result<Generation, RefreshError> {
    let start = Instant::now();

    let mut counts: BTreeMap<ItemId, KindCounts> = BTreeMap::new();
    let mut timeline: BTreeMap<_, u64> = BTreeMap::new();
    let mut event_count = 0u64;
    let mut skipped = SkipCounts::default();
    let mut issue_samples = Vec::new();

    let catalogue = source
        .read_full(&mut |catalogue, event| {
            if cancel.is_cancelled() {
                return Err(Error::Refresh(RefreshError::Cancelled));
            }

            let issue = match EventKind::parse(&event.kind) {
                None => Some(IngestionIssue::UnknownKind {
                    event_id: event.id,
                    kind: event.kind.clone(),
                }),
                Some(_) if !catalogue.contains_item(event.item_id) => {
                    Some(IngestionIssue::UnknownItem {
                        event_id: event.id,
                        item_id: event.item_id,
                    })
                }
                Some(kind) => {
                    counts.entry(event.item_id).or_default().add(kind, 1);
                    *timeline
                        .entry((event.occurred_at, event.item_id, kind))
                        .or_default() += 1;
                    event_count += 1;
                    None
                }
            };

            if let Some(issue) = issue {
                tracing::warn!(generation = %id, issue = %issue, "Skipping malformed event");
                skipped.record(&issue);
                if issue_samples.len() < MAX_ISSUE_SAMPLES {
                    issue_samples.push(issue);
                }
            }
            Ok(())
        })
        .map_err(into_refresh_error)?;

    if cancel.is_cancelled() {
        return Err(RefreshError::Cancelled);
    }

    let (items, authors) = catalogue.into_parts();
    let generation = Generation::assemble(
        id,
        Utc::now(),
        GenerationParts {
            items,
            authors,
            counts,
            timeline,
            event_count,
            skipped,
            issue_samples,
        },
    );

    tracing::info!(
        generation = %id,
        items = generation.entry_count(),
        events = event_count,
        skipped = skipped.total(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Generation built"
    );

    Ok(generation)
}

fn into_refresh_error(err: Error) -> RefreshError {
    match err {
        Error::Refresh(e) => e,
        other => RefreshError::Source(other.to_string()),
    }
}
