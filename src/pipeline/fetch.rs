use crate::app::ports::{EventSearchPort, SearchQuery};
use crate::observability::metrics;
use crate::pipeline::pagination::next_page_job;
use crate::pipeline::processing::normalize::EventNormalizer;
use crate::pipeline::sink::RemoteSink;
use crate::queue::{Completion, Enqueuer, Job, JobControl, JobHandler, JobPayload};
use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// `fetchCity` handler: one search page per job, then the continuation.
pub struct FetchCityHandler {
    search: Arc<dyn EventSearchPort>,
    sink: RemoteSink,
    normalizer: EventNormalizer,
    enqueuer: Enqueuer,
    max_pages: u32,
}

impl FetchCityHandler {
    pub fn new(
        search: Arc<dyn EventSearchPort>,
        sink: RemoteSink,
        enqueuer: Enqueuer,
        max_pages: u32,
    ) -> Self {
        Self {
            search,
            sink,
            normalizer: EventNormalizer::new(),
            enqueuer,
            max_pages,
        }
    }
}

#[async_trait]
impl JobHandler for FetchCityHandler {
    #[instrument(skip_all, fields(job_id = %job.id))]
    async fn handle(&self, job: &Job, control: JobControl) -> anyhow::Result<Completion> {
        let JobPayload::FetchCity(payload) = &job.payload else {
            return Ok(control.fail("not a fetchCity payload"));
        };
        let city = match payload.city.as_deref().map(str::trim) {
            Some(city) if !city.is_empty() => city.to_string(),
            _ => {
                debug!("Job has no city, nothing to fetch");
                return Ok(control.done());
            }
        };

        let query = SearchQuery::new(city.as_str(), payload.page, Utc::now().date_naive());
        let page = match self.search.search_events(&query).await {
            Ok(page) => page,
            Err(e) => {
                warn!(city = %city, page = payload.page, "Search failed: {}", e);
                return Ok(control.fail(e));
            }
        };

        let mut accepted = 0;
        for raw in &page.events {
            let Some(event) = self.normalizer.normalize(raw) else {
                continue;
            };
            self.sink.publish(&event, &city).await.with_context(|| {
                let id = event.external_id.as_deref().unwrap_or("event");
                format!("publishing {} for {}", id, city)
            })?;
            accepted += 1;
        }
        let rejected = page.events.len() - accepted + page.malformed;
        metrics::sink::accepted(accepted);
        metrics::sink::rejected(rejected);

        // Only after the whole page is in the store
        if let Some(next) = next_page_job(&city, payload.page, page.page_count, self.max_pages) {
            self.enqueuer
                .enqueue(next)
                .await
                .context("enqueueing next page")?;
            debug!(city = %city, next_page = payload.page + 1, "Continuation enqueued");
        }

        info!(
            city = %city,
            page = payload.page,
            page_count = page.page_count,
            accepted,
            rejected,
            "Fetched page"
        );
        Ok(control.done())
    }
}
