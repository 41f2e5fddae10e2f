use crate::app::ports::RecordStore;
use crate::common::error::Result;
use crate::common::types::{Category, Collection, NormalizedEvent};
use crate::observability::metrics;
use std::sync::Arc;
use tracing::debug;

/// Forwards normalized records to the shared store.
#[derive(Clone)]
pub struct RemoteSink {
    store: Arc<dyn RecordStore>,
}

impl RemoteSink {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Look up the stored copy (if any) and hand it to the store alongside
    /// the new version. The publish is issued whether or not one exists;
    /// merging is the store's business.
    pub async fn publish(&self, event: &NormalizedEvent, city: &str) -> Result<()> {
        let existing = match &event.external_id {
            Some(id) => self.store.find_one(Collection::Events, id).await,
            None => Ok(None),
        };
        let result = match existing {
            Ok(existing) => self.store.add_event(event, existing.as_ref(), city).await,
            Err(e) => Err(e),
        };
        match &result {
            Ok(()) => {
                metrics::sink::event_published();
                debug!(
                    id = event.external_id.as_deref().unwrap_or("-"),
                    city,
                    "Published event"
                );
            }
            Err(_) => metrics::sink::error(),
        }
        result
    }

    pub async fn publish_category(&self, category: &Category) -> Result<()> {
        let result = self.store.add_category(category).await;
        match &result {
            Ok(()) => metrics::sink::category_published(),
            Err(_) => metrics::sink::error(),
        }
        result
    }
}
