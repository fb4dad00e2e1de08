//! Author rankings
//!
//! Records are per (author, item category) pair over items published in the
//! window. Ranks use competition semantics: equal totals share a rank and
//! the next distinct total takes its 1-based position (1, 1, 3).

use super::{qualifying_items, safe_avg};
use crate::cache::Generation;
use crate::error::QueryError;
use crate::types::{round2, AuthorId, Category, KindCounts, Window};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Ranked (author, category) record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedAuthorRecord {
    pub author_id: AuthorId,
    pub author_name: String,
    /// Category of the items aggregated in this record
    pub category: Category,
    pub item_count: u64,
    pub counts: KindCounts,
    pub total_engagement: u64,
    pub avg_engagement: f64,
    pub category_rank: usize,
    pub overall_rank: usize,
}

/// Reject limits outside `1..=max`.
pub fn validate_limit(limit: usize, max: usize) -> Result<usize, QueryError> {
    if (1..=max).contains(&limit) {
        Ok(limit)
    } else {
        Err(QueryError::InvalidLimit { limit, min: 1, max })
    }
}

/// Competition ranks for values already sorted descending.
pub fn competition_ranks(sorted_desc: &[u64]) -> Vec<usize> {
    let mut ranks = Vec::with_capacity(sorted_desc.len());
    for (i, value) in sorted_desc.iter().enumerate() {
        let rank = match i {
            0 => 1,
            _ if sorted_desc[i - 1] == *value => ranks[i - 1],
            _ => i + 1,
        };
        ranks.push(rank);
    }
    ranks
}

/// Top `limit` records by total engagement.
///
/// Sorted by total descending, then item count descending, then author id
/// and category ascending. Both ranks are computed over every record before
/// truncation. `limit` is expected to be validated already.
pub fn top_authors(generation: &Generation, window: &Window, limit: usize) -> Vec<RankedAuthorRecord> {
    let mut groups: BTreeMap<(AuthorId, Category), (u64, KindCounts)> = BTreeMap::new();
    for (item, entry) in qualifying_items(generation, window) {
        let group = groups.entry((item.author_id, item.category)).or_default();
        group.0 += 1;
        group.1.merge(&entry.counts);
    }

    let mut records: Vec<RankedAuthorRecord> = groups
        .into_iter()
        .map(|((author_id, category), (item_count, counts))| {
            let total = counts.sum();
            RankedAuthorRecord {
                author_id,
                author_name: generation
                    .author(author_id)
                    .map(|a| a.name.clone())
                    .unwrap_or_default(),
                category,
                item_count,
                counts,
                total_engagement: total,
                avg_engagement: round2(safe_avg(total, item_count)),
                category_rank: 0,
                overall_rank: 0,
            }
        })
        .collect();

    records.sort_by(|a, b| {
        b.total_engagement
            .cmp(&a.total_engagement)
            .then(b.item_count.cmp(&a.item_count))
            .then(a.author_id.cmp(&b.author_id))
            .then(a.category.cmp(&b.category))
    });

    let totals: Vec<u64> = records.iter().map(|r| r.total_engagement).collect();
    for (record, rank) in records.iter_mut().zip(competition_ranks(&totals)) {
        record.overall_rank = rank;
    }

    let mut by_category: HashMap<Category, Vec<usize>> = HashMap::new();
    for (idx, record) in records.iter().enumerate() {
        by_category.entry(record.category).or_default().push(idx);
    }
    for indices in by_category.values() {
        let totals: Vec<u64> = indices.iter().map(|&i| records[i].total_engagement).collect();
        for (&i, rank) in indices.iter().zip(competition_ranks(&totals)) {
            records[i].category_rank = rank;
        }
    }

    records.truncate(limit);
    records
}
