//! Query facade for transport layers.
//!
//! Every call validates its input first, then binds the current generation
//! once and answers entirely from it. Before the first refresh, analytic
//! queries return empty results rather than errors.

use crate::analytics::{
    self, AuthorTrends, CategoryBenchmark, CategoryPerformance, CategoryRanking, ItemEngagement,
    OpportunityRecord, RankedAuthorRecord, RankingMetric, Summary, TemporalPattern,
};
use crate::cache::{AggregationCache, RefreshOutcome, RefreshStatus, SnapshotEntry};
use crate::config::AnalyticsConfig;
use crate::error::{RefreshError, Result};
use crate::types::{AuthorId, Category, ItemId, Window};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Read-mostly service over an [`AggregationCache`].
pub struct EngagementService {
    cache: Arc<AggregationCache>,
    config: AnalyticsConfig,
}

impl EngagementService {
    pub fn new(cache: Arc<AggregationCache>, config: AnalyticsConfig) -> Self {
        Self { cache, config }
    }

    pub fn cache(&self) -> &Arc<AggregationCache> {
        &self.cache
    }

    /// Trailing default window ending at `anchor`.
    pub fn default_window(&self, anchor: DateTime<Utc>) -> Window {
        Window::trailing_days(self.config.window_days, anchor)
    }

    /// Snapshot entry for an item; `None` means the item is unknown.
    pub fn get_snapshot(&self, item_id: ItemId) -> Option<SnapshotEntry> {
        self.cache.get(item_id)
    }

    pub fn get_item_engagement(&self, item_id: ItemId, window: &Window) -> Result<Option<ItemEngagement>> {
        window.validate()?;
        Ok(self
            .cache
            .current()
            .and_then(|g| analytics::item_engagement(&g, item_id, window)))
    }

    /// `None` when the category has no qualifying author.
    pub fn get_benchmark(&self, category: Category, window: &Window) -> Result<Option<CategoryBenchmark>> {
        window.validate()?;
        Ok(self
            .cache
            .current()
            .and_then(|g| analytics::compute_benchmark(&g, category, window)))
    }

    pub fn get_opportunity_scores(&self, category: Category, window: &Window) -> Result<Vec<OpportunityRecord>> {
        window.validate()?;
        Ok(self
            .cache
            .current()
            .map(|g| analytics::score_opportunities(&g, category, window))
            .unwrap_or_default())
    }

    /// `None` before the first refresh.
    pub fn get_temporal_pattern(&self, window: &Window) -> Result<Option<TemporalPattern>> {
        window.validate()?;
        Ok(self
            .cache
            .current()
            .map(|g| analytics::aggregate_temporal(&g, window)))
    }

    pub fn get_top_authors(&self, window: &Window, limit: usize) -> Result<Vec<RankedAuthorRecord>> {
        window.validate()?;
        let limit = analytics::validate_limit(limit, self.config.max_top_limit)?;
        Ok(self
            .cache
            .current()
            .map(|g| analytics::top_authors(&g, window, limit))
            .unwrap_or_default())
    }

    pub fn get_top_categories(&self, metric: RankingMetric, limit: usize) -> Result<Vec<CategoryRanking>> {
        let limit = analytics::validate_limit(limit, self.config.max_top_limit)?;
        Ok(self
            .cache
            .current()
            .map(|g| analytics::top_categories(&g, metric, limit))
            .unwrap_or_default())
    }

    pub fn get_category_performance(&self) -> Vec<CategoryPerformance> {
        self.cache
            .current()
            .map(|g| analytics::category_performance(&g))
            .unwrap_or_default()
    }

    /// `None` for an unknown author (or before the first refresh).
    pub fn get_author_trends(&self, author_id: AuthorId, anchor: DateTime<Utc>) -> Option<AuthorTrends> {
        self.cache
            .current()
            .and_then(|g| analytics::author_trends(&g, author_id, anchor))
    }

    pub fn get_summary(&self) -> Option<Summary> {
        self.cache.current().map(|g| analytics::summary(&g))
    }

    pub fn refresh(&self) -> std::result::Result<RefreshOutcome, RefreshError> {
        self.cache.refresh()
    }

    pub fn refresh_status(&self) -> RefreshStatus {
        self.cache.status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, QueryError};
    use crate::source::MemorySource;
    use chrono::TimeZone;

    fn service() -> (Arc<MemorySource>, EngagementService) {
        let source = Arc::new(MemorySource::new());
        let cache = Arc::new(AggregationCache::new(source.clone()));
        (source, EngagementService::new(cache, AnalyticsConfig::default()))
    }

    #[test]
    fn test_never_refreshed_returns_empty() {
        let (_, service) = service();
        let window = Window::all_time();

        assert!(service.get_snapshot(1).is_none());
        assert!(service.get_benchmark(Category::Tech, &window).unwrap().is_none());
        assert!(service.get_opportunity_scores(Category::Tech, &window).unwrap().is_empty());
        assert!(service.get_temporal_pattern(&window).unwrap().is_none());
        assert!(service.get_top_authors(&window, 10).unwrap().is_empty());
        assert!(service.get_category_performance().is_empty());
        assert!(service.get_summary().is_none());
        assert!(service.refresh_status().current_generation_id.is_none());
    }

    #[test]
    fn test_invalid_inputs_rejected() {
        let (_, service) = service();
        let start = Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let backwards = Window {
            start: Some(start),
            end: Some(end),
        };

        assert!(matches!(
            service.get_temporal_pattern(&backwards),
            Err(Error::Query(QueryError::InvalidWindow { .. }))
        ));
        assert!(matches!(
            service.get_top_authors(&Window::all_time(), 0),
            Err(Error::Query(QueryError::InvalidLimit { .. }))
        ));
        assert!(matches!(
            service.get_top_categories(RankingMetric::Engagement, 51),
            Err(Error::Query(QueryError::InvalidLimit { .. }))
        ));
    }

    #[test]
    fn test_unknown_vs_zero_item() {
        let (source, service) = service();
        let t = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        source.add_author(1, Category::Tech, t);
        source.add_item(1, 1, Category::Tech, t);
        service.refresh().unwrap();

        assert_eq!(service.get_snapshot(1).map(|e| e.total), Some(0));
        assert!(service.get_snapshot(2).is_none());
    }

    #[test]
    fn test_default_window() {
        let (_, service) = service();
        let anchor = Utc.with_ymd_and_hms(2025, 4, 1, 0, 0, 0).unwrap();
        let window = service.default_window(anchor);
        assert_eq!(window.end, Some(anchor));
        assert_eq!(window.start, Some(anchor - chrono::Duration::days(90)));
    }
}
