use crate::app::ports::{EventSearchPort, RecordStore};
use crate::common::types::{Collection, Filter};
use crate::observability::metrics;
use crate::pipeline::sink::RemoteSink;
use crate::queue::{Completion, Job, JobControl, JobHandler};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    pub events_removed: usize,
    pub categories_published: usize,
    pub categories_removed: usize,
    pub errors: usize,
}

/// Purges expired records and refreshes the taxonomy. Every step is best effort.
pub struct ExpirySweeper {
    store: Arc<dyn RecordStore>,
    search: Arc<dyn EventSearchPort>,
    sink: RemoteSink,
}

impl ExpirySweeper {
    pub fn new(store: Arc<dyn RecordStore>, search: Arc<dyn EventSearchPort>) -> Self {
        let sink = RemoteSink::new(store.clone());
        Self { store, search, sink }
    }

    #[instrument(skip(self))]
    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepSummary {
        let mut summary = SweepSummary::default();

        summary.events_removed = self.remove_expired(Collection::Events, now, &mut summary.errors).await;

        match self.search.list_categories().await {
            Ok(categories) => {
                for category in &categories {
                    match self.sink.publish_category(category).await {
                        Ok(()) => summary.categories_published += 1,
                        Err(e) => {
                            summary.errors += 1;
                            warn!("Failed to publish category '{}': {}", category.name, e);
                        }
                    }
                }
            }
            Err(e) => {
                summary.errors += 1;
                warn!("Failed to fetch categories, skipping taxonomy refresh: {}", e);
            }
        }

        summary.categories_removed =
            self.remove_expired(Collection::Categories, now, &mut summary.errors).await;

        metrics::sweep::events_removed(summary.events_removed);
        metrics::sweep::categories_removed(summary.categories_removed);
        metrics::sweep::errors(summary.errors);
        summary
    }

    async fn remove_expired(&self, collection: Collection, now: DateTime<Utc>, errors: &mut usize) -> usize {
        let expired = match self.store.find(collection, Filter::ExpiresBefore(now)).await {
            Ok(records) => records,
            Err(e) => {
                *errors += 1;
                warn!("Failed to list expired {}: {}", collection, e);
                return 0;
            }
        };

        let mut removed = 0;
        for record in &expired {
            match self.store.remove(collection, &record.id).await {
                Ok(()) => removed += 1,
                Err(e) => {
                    *errors += 1;
                    warn!("Failed to remove {}/{}: {}", collection, record.id, e);
                }
            }
        }
        removed
    }
}

/// `refresh` handler. Always completes; problems are logged by the sweep.
pub struct RefreshHandler {
    sweeper: ExpirySweeper,
}

impl RefreshHandler {
    pub fn new(sweeper: ExpirySweeper) -> Self {
        Self { sweeper }
    }
}

#[async_trait]
impl JobHandler for RefreshHandler {
    async fn handle(&self, job: &Job, control: JobControl) -> anyhow::Result<Completion> {
        let summary = self.sweeper.sweep(Utc::now()).await;
        info!(
            job_id = %job.id,
            events_removed = summary.events_removed,
            categories_published = summary.categories_published,
            categories_removed = summary.categories_removed,
            errors = summary.errors,
            "Refresh finished"
        );
        Ok(control.done())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::ports::SearchQuery;
    use crate::common::error::{HarvesterError, Result};
    use crate::common::types::{Category, SearchPage, StoredRecord};
    use crate::pipeline::storage::InMemoryRecordStore;
    use chrono::Duration;
    use serde_json::Map;

    struct Taxonomy(Option<Vec<Category>>);

    #[async_trait]
    impl EventSearchPort for Taxonomy {
        async fn search_events(&self, _query: &SearchQuery) -> Result<SearchPage> {
            Ok(SearchPage::default())
        }

        async fn list_categories(&self) -> Result<Vec<Category>> {
            self.0
                .clone()
                .ok_or(HarvesterError::UpstreamStatus { status: 503, body: "down".into() })
        }
    }

    fn record(id: &str, expires: DateTime<Utc>) -> StoredRecord {
        StoredRecord { id: id.into(), expires: Some(expires), body: Map::new() }
    }

    fn category(id: &str) -> Category {
        Category { id: Some(id.into()), name: id.to_uppercase(), ..Default::default() }
    }

    #[tokio::test]
    async fn removes_expired_and_keeps_live_records() {
        let now = Utc::now();
        let store = Arc::new(InMemoryRecordStore::new());
        store.insert(Collection::Events, record("past", now - Duration::seconds(1)));
        store.insert(Collection::Events, record("future", now + Duration::seconds(1)));
        store.insert(Collection::Categories, record("stale", now - Duration::days(1)));

        let sweeper = ExpirySweeper::new(store.clone(), Arc::new(Taxonomy(Some(vec![category("music")]))));
        let summary = sweeper.sweep(now).await;

        assert!(!store.contains(Collection::Events, "past"));
        assert!(store.contains(Collection::Events, "future"));
        assert!(!store.contains(Collection::Categories, "stale"));
        assert!(store.contains(Collection::Categories, "music"));
        assert_eq!(
            summary,
            SweepSummary { events_removed: 1, categories_published: 1, categories_removed: 1, errors: 0 }
        );
    }

    #[tokio::test]
    async fn failed_removal_does_not_stop_the_sweep() {
        let now = Utc::now();
        let store = Arc::new(InMemoryRecordStore::new());
        store.insert(Collection::Events, record("a", now - Duration::hours(2)));
        store.insert(Collection::Events, record("b", now - Duration::hours(1)));
        store.fail_removal_of("a");

        let sweeper = ExpirySweeper::new(store.clone(), Arc::new(Taxonomy(Some(Vec::new()))));
        let summary = sweeper.sweep(now).await;

        assert!(store.contains(Collection::Events, "a"));
        assert!(!store.contains(Collection::Events, "b"));
        assert_eq!(summary.events_removed, 1);
        assert_eq!(summary.errors, 1);
    }

    #[tokio::test]
    async fn taxonomy_outage_skips_publishing_but_still_purges_categories() {
        let now = Utc::now();
        let store = Arc::new(InMemoryRecordStore::new());
        store.insert(Collection::Categories, record("stale", now - Duration::minutes(5)));

        let sweeper = ExpirySweeper::new(store.clone(), Arc::new(Taxonomy(None)));
        let summary = sweeper.sweep(now).await;

        assert!(store.published_categories().is_empty());
        assert_eq!(summary.categories_removed, 1);
        assert_eq!(summary.errors, 1);
    }
}
