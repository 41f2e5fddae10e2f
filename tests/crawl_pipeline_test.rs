use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use event_harvester::app::{EventSearchPort, SearchQuery};
use event_harvester::common::types::{Category, Collection, SearchPage, StoredRecord};
use event_harvester::pipeline::storage::InMemoryRecordStore;
use event_harvester::pipeline::{ExpirySweeper, FetchCityHandler, RefreshHandler, RemoteSink};
use event_harvester::queue::{
    FetchCityPayload, InMemoryJobStore, JobPayload, JobQueue, JobState, JobStore, JobType, NewJob,
    Outcome, RetryPolicy, SqliteJobStore,
};
use event_harvester::HarvesterError;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::tempdir;

/// Search API stand-in serving canned pages keyed by page number.
#[derive(Default)]
struct CannedSearch {
    pages: HashMap<u32, Value>,
    failing: bool,
    queries: Mutex<Vec<SearchQuery>>,
}

impl CannedSearch {
    fn with_page(mut self, page: u32, body: Value) -> Self {
        self.pages.insert(page, body);
        self
    }

    fn failing() -> Self {
        Self { failing: true, ..Default::default() }
    }

    fn queries(&self) -> Vec<SearchQuery> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventSearchPort for CannedSearch {
    async fn search_events(&self, query: &SearchQuery) -> event_harvester::Result<SearchPage> {
        self.queries.lock().unwrap().push(query.clone());
        if self.failing {
            return Err(HarvesterError::UpstreamStatus { status: 500, body: "boom".into() });
        }
        let body = self.pages.get(&query.page).cloned().unwrap_or(json!({"page_count": 0}));
        Ok(serde_json::from_value(body)?)
    }

    async fn list_categories(&self) -> event_harvester::Result<Vec<Category>> {
        Ok(vec![Category {
            id: Some("music".into()),
            name: "Concerts &amp; Tour Dates".into(),
            ..Default::default()
        }])
    }
}

fn english_event(id: &str, description: &str) -> Value {
    json!({
        "id": id,
        "title": "Live at the Mohawk",
        "url": "http://eventful.com/austin/events/live",
        "language": "English",
        "start_time": "2024-03-20 20:00:00",
        "stop_time": null,
        "description": description,
        "venue_name": "Mohawk",
        "categories": {"category": {"id": "music", "name": "Concerts"}}
    })
}

struct Harness {
    queue: JobQueue,
    jobs: Arc<dyn JobStore>,
    records: Arc<InMemoryRecordStore>,
    search: Arc<CannedSearch>,
}

fn harness(jobs: Arc<dyn JobStore>, search: CannedSearch, max_pages: u32) -> Result<Harness> {
    let records = Arc::new(InMemoryRecordStore::new());
    let search = Arc::new(search);
    let mut queue = JobQueue::new(jobs.clone());
    let fetch = FetchCityHandler::new(
        search.clone(),
        RemoteSink::new(records.clone()),
        queue.enqueuer(),
        max_pages,
    );
    queue.register_handler(JobType::FetchCity, Arc::new(fetch))?;
    let sweeper = ExpirySweeper::new(records.clone(), search.clone());
    queue.register_handler(JobType::Refresh, Arc::new(RefreshHandler::new(sweeper)))?;
    Ok(Harness { queue, jobs, records, search })
}

fn no_wait(max_retries: u32) -> RetryPolicy {
    RetryPolicy { max_retries, wait: Duration::ZERO }
}

#[tokio::test]
async fn austin_single_page_is_published_once() -> Result<()> {
    let long_description = format!("<p>{}</p>", "a".repeat(1200));
    let search = CannedSearch::default().with_page(
        0,
        json!({"page_count": 1, "events": {"event": [english_event("E0-001-1", &long_description)]}}),
    );
    let h = harness(Arc::new(InMemoryJobStore::new()), search, 50)?;

    let job = h.queue.enqueue(NewJob::fetch_city("Austin", 0)).await?;
    assert_eq!(h.queue.run_once(JobType::FetchCity).await?, Some(Outcome::Done));

    let published = h.records.published_events();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].city, "Austin");
    let description = published[0].event.description.clone().unwrap();
    assert!(description.chars().count() <= 1000);
    assert!(description.ends_with("..."));
    assert_eq!(published[0].event.metadata["venue_name"], "Mohawk");

    assert_eq!(h.jobs.get(&job.id).await?.unwrap().state, JobState::Completed);
    assert!(h.jobs.list(Some(JobState::Pending)).await?.is_empty());
    assert_eq!(h.search.queries()[0].city, "Austin");
    Ok(())
}

#[tokio::test]
async fn ineligible_records_are_dropped_silently() -> Result<()> {
    let mut french = english_event("E0-002", "Bonjour");
    french["language"] = json!("French");
    let mut undated = english_event("E0-003", "No date");
    undated["start_time"] = Value::Null;
    let search = CannedSearch::default().with_page(
        0,
        json!({"page_count": "1", "events": {"event": [french, undated, english_event("E0-004", "ok")]}}),
    );
    let h = harness(Arc::new(InMemoryJobStore::new()), search, 50)?;

    h.queue.enqueue(NewJob::fetch_city("Austin", 0)).await?;
    assert_eq!(h.queue.run_once(JobType::FetchCity).await?, Some(Outcome::Done));

    let published = h.records.published_events();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].event.external_id.as_deref(), Some("E0-004"));
    Ok(())
}

#[tokio::test]
async fn wrongly_typed_record_does_not_fail_the_page() -> Result<()> {
    let mut bad = english_event("E0-bad", "x");
    bad["title"] = json!(123);
    let search = CannedSearch::default().with_page(
        0,
        json!({"page_count": 2, "events": {"event": [english_event("E0-good", "ok"), bad]}}),
    );
    let h = harness(Arc::new(InMemoryJobStore::new()), search, 50)?;

    let job = h.queue.enqueue(NewJob::fetch_city("Austin", 0)).await?;
    assert_eq!(h.queue.run_once(JobType::FetchCity).await?, Some(Outcome::Done));

    let published = h.records.published_events();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].event.external_id.as_deref(), Some("E0-good"));
    assert_eq!(h.jobs.get(&job.id).await?.unwrap().state, JobState::Completed);

    // The chain carries on past the bad record
    let pending = h.jobs.list(Some(JobState::Pending)).await?;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].payload, JobPayload::FetchCity(FetchCityPayload::new("Austin", 1)));
    Ok(())
}

#[tokio::test]
async fn pagination_stops_at_the_page_cap() -> Result<()> {
    let page = |id: &str| json!({"page_count": 3, "events": {"event": [english_event(id, "x")]}});
    let search = CannedSearch::default()
        .with_page(0, page("E0-100"))
        .with_page(1, page("E0-101"))
        .with_page(2, page("E0-102"));
    let h = harness(Arc::new(InMemoryJobStore::new()), search, 2)?;

    h.queue.enqueue(NewJob::fetch_city("Denver", 0)).await?;
    assert_eq!(h.queue.run_once(JobType::FetchCity).await?, Some(Outcome::Done));

    let pending = h.jobs.list(Some(JobState::Pending)).await?;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].payload, JobPayload::FetchCity(FetchCityPayload::new("Denver", 1)));
    assert_eq!(pending[0].retry, RetryPolicy::default());

    assert_eq!(h.queue.run_once(JobType::FetchCity).await?, Some(Outcome::Done));
    assert_eq!(h.queue.run_once(JobType::FetchCity).await?, None);

    let pages: Vec<u32> = h.search.queries().iter().map(|q| q.page).collect();
    assert_eq!(pages, vec![0, 1]);
    assert_eq!(h.records.published_events().len(), 2);
    Ok(())
}

#[tokio::test]
async fn empty_page_completes_without_continuation() -> Result<()> {
    let search = CannedSearch::default().with_page(0, json!({"page_count": 0, "events": null}));
    let h = harness(Arc::new(InMemoryJobStore::new()), search, 50)?;

    h.queue.enqueue(NewJob::fetch_city("Austin", 0)).await?;
    assert_eq!(h.queue.run_once(JobType::FetchCity).await?, Some(Outcome::Done));
    assert!(h.records.published_events().is_empty());
    assert!(h.jobs.list(Some(JobState::Pending)).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn job_without_city_completes_without_searching() -> Result<()> {
    let h = harness(Arc::new(InMemoryJobStore::new()), CannedSearch::default(), 50)?;
    let payload = JobPayload::FetchCity(FetchCityPayload { city: None, page: 0 });
    let job = h.queue.enqueue(NewJob::new(payload)).await?;

    assert_eq!(h.queue.run_once(JobType::FetchCity).await?, Some(Outcome::Done));
    assert_eq!(h.jobs.get(&job.id).await?.unwrap().state, JobState::Completed);
    assert!(h.search.queries().is_empty());
    Ok(())
}

#[tokio::test]
async fn store_outage_fails_the_page_and_spawns_no_successor() -> Result<()> {
    let search = CannedSearch::default().with_page(
        0,
        json!({"page_count": 5, "events": {"event": [english_event("E0-200", "x")]}}),
    );
    let h = harness(Arc::new(InMemoryJobStore::new()), search, 50)?;
    h.records.set_fail_publishes(true);

    let job = h.queue.enqueue(NewJob::fetch_city("Austin", 0).retry(no_wait(5))).await?;
    let outcome = h.queue.run_once(JobType::FetchCity).await?;
    assert!(matches!(outcome, Some(Outcome::Failed(reason)) if reason.contains("store unavailable")));

    // The failed job itself is the only pending one
    let pending = h.jobs.list(Some(JobState::Pending)).await?;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, job.id);
    assert_eq!(pending[0].failures, 1);

    h.records.set_fail_publishes(false);
    assert_eq!(h.queue.run_once(JobType::FetchCity).await?, Some(Outcome::Done));
    let pending = h.jobs.list(Some(JobState::Pending)).await?;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].payload, JobPayload::FetchCity(FetchCityPayload::new("Austin", 1)));
    Ok(())
}

#[tokio::test]
async fn upstream_errors_exhaust_retries_in_the_durable_store() -> Result<()> {
    let dir = tempdir()?;
    let db_path = dir.path().join("jobs.db");
    let h = harness(Arc::new(SqliteJobStore::open(&db_path)?), CannedSearch::failing(), 50)?;

    let job = h.queue.enqueue(NewJob::fetch_city("Austin", 0).retry(no_wait(5))).await?;
    for attempt in 1..=5 {
        assert!(matches!(h.queue.run_once(JobType::FetchCity).await?, Some(Outcome::Failed(_))));
        let stored = h.jobs.get(&job.id).await?.unwrap();
        assert_eq!(stored.state, JobState::Pending, "after failure {}", attempt);
    }
    assert!(matches!(h.queue.run_once(JobType::FetchCity).await?, Some(Outcome::Failed(_))));
    drop(h);

    let reopened = SqliteJobStore::open(&db_path)?;
    let stored = reopened.get(&job.id).await?.unwrap();
    assert_eq!(stored.state, JobState::FailedTerminal);
    assert_eq!(stored.failures, 6);
    assert_eq!(stored.failure_log.len(), 6);
    assert!(reopened.list(Some(JobState::Pending)).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn refresh_job_purges_expired_events_and_republishes_taxonomy() -> Result<()> {
    let h = harness(Arc::new(InMemoryJobStore::new()), CannedSearch::default(), 50)?;
    let now = Utc::now();
    let record = |id: &str, expires| StoredRecord { id: id.into(), expires: Some(expires), body: Map::new() };
    h.records.insert(Collection::Events, record("gone", now - chrono::Duration::seconds(1)));
    h.records.insert(Collection::Events, record("kept", now + chrono::Duration::hours(1)));

    h.queue.enqueue(NewJob::refresh()).await?;
    assert_eq!(h.queue.run_once(JobType::Refresh).await?, Some(Outcome::Done));

    assert!(!h.records.contains(Collection::Events, "gone"));
    assert!(h.records.contains(Collection::Events, "kept"));
    let categories = h.records.published_categories();
    assert_eq!(categories.len(), 1);
    assert_eq!(categories[0].id.as_deref(), Some("music"));
    Ok(())
}
