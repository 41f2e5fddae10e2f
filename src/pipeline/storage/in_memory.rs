use crate::app::ports::RecordStore;
use crate::common::error::{HarvesterError, Result};
use crate::common::types::{Category, Collection, Filter, NormalizedEvent, StoredRecord};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// One `add_event` call as the store received it.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedEvent {
    pub event: NormalizedEvent,
    pub existing: Option<StoredRecord>,
    pub city: String,
}

/// In-memory record store for development/testing
pub struct InMemoryRecordStore {
    events: Mutex<HashMap<String, StoredRecord>>,
    categories: Mutex<HashMap<String, StoredRecord>>,
    published_events: Mutex<Vec<PublishedEvent>>,
    published_categories: Mutex<Vec<Category>>,
    failing_removals: Mutex<HashSet<String>>,
    fail_publishes: Mutex<bool>,
}

impl Default for InMemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(HashMap::new()),
            categories: Mutex::new(HashMap::new()),
            published_events: Mutex::new(Vec::new()),
            published_categories: Mutex::new(Vec::new()),
            failing_removals: Mutex::new(HashSet::new()),
            fail_publishes: Mutex::new(false),
        }
    }

    fn collection(&self, collection: Collection) -> &Mutex<HashMap<String, StoredRecord>> {
        match collection {
            Collection::Events => &self.events,
            Collection::Categories => &self.categories,
        }
    }

    pub fn insert(&self, collection: Collection, record: StoredRecord) {
        self.collection(collection)
            .lock()
            .unwrap()
            .insert(record.id.clone(), record);
    }

    pub fn contains(&self, collection: Collection, id: &str) -> bool {
        self.collection(collection).lock().unwrap().contains_key(id)
    }

    pub fn len(&self, collection: Collection) -> usize {
        self.collection(collection).lock().unwrap().len()
    }

    pub fn published_events(&self) -> Vec<PublishedEvent> {
        self.published_events.lock().unwrap().clone()
    }

    pub fn published_categories(&self) -> Vec<Category> {
        self.published_categories.lock().unwrap().clone()
    }

    /// Make every later `remove` of `id` fail.
    pub fn fail_removal_of(&self, id: &str) {
        self.failing_removals.lock().unwrap().insert(id.to_string());
    }

    /// Make `add_event` and `add_category` fail until switched back.
    pub fn set_fail_publishes(&self, fail: bool) {
        *self.fail_publishes.lock().unwrap() = fail;
    }

    fn check_publishes(&self) -> Result<()> {
        if *self.fail_publishes.lock().unwrap() {
            return Err(HarvesterError::store("store unavailable"));
        }
        Ok(())
    }
}

fn as_body(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn find(&self, collection: Collection, filter: Filter) -> Result<Vec<StoredRecord>> {
        let records = self.collection(collection).lock().unwrap();
        let mut found: Vec<StoredRecord> = records
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }

    async fn find_one(&self, collection: Collection, id: &str) -> Result<Option<StoredRecord>> {
        Ok(self.collection(collection).lock().unwrap().get(id).cloned())
    }

    async fn add_event(
        &self,
        event: &NormalizedEvent,
        existing: Option<&StoredRecord>,
        city: &str,
    ) -> Result<()> {
        self.check_publishes()?;
        let id = event
            .external_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let record = StoredRecord {
            id: id.clone(),
            expires: existing.and_then(|r| r.expires),
            body: as_body(serde_json::to_value(event)?),
        };
        self.insert(Collection::Events, record);
        self.published_events.lock().unwrap().push(PublishedEvent {
            event: event.clone(),
            existing: existing.cloned(),
            city: city.to_string(),
        });

        debug!("Published event {} for {}", id, city);
        Ok(())
    }

    async fn add_category(&self, category: &Category) -> Result<()> {
        self.check_publishes()?;
        if let Some(id) = &category.id {
            let record = StoredRecord {
                id: id.clone(),
                expires: category.expires,
                body: as_body(serde_json::to_value(category)?),
            };
            self.insert(Collection::Categories, record);
        }
        self.published_categories.lock().unwrap().push(category.clone());

        debug!("Published category: {}", category.name);
        Ok(())
    }

    async fn remove(&self, collection: Collection, id: &str) -> Result<()> {
        if self.failing_removals.lock().unwrap().contains(id) {
            return Err(HarvesterError::store(format!("refused to remove {}/{}", collection, id)));
        }
        self.collection(collection).lock().unwrap().remove(id);
        debug!("Removed {}/{}", collection, id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn record(id: &str, expires: Option<chrono::DateTime<Utc>>) -> StoredRecord {
        StoredRecord { id: id.into(), expires, body: Map::new() }
    }

    #[tokio::test]
    async fn find_applies_the_expiry_filter() {
        let store = InMemoryRecordStore::new();
        let now = Utc::now();
        store.insert(Collection::Events, record("old", Some(now - Duration::hours(1))));
        store.insert(Collection::Events, record("new", Some(now + Duration::hours(1))));
        store.insert(Collection::Events, record("forever", None));

        let expired = store
            .find(Collection::Events, Filter::ExpiresBefore(now))
            .await
            .unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, "old");
    }

    #[tokio::test]
    async fn failing_removal_leaves_the_record() {
        let store = InMemoryRecordStore::new();
        store.insert(Collection::Categories, record("music", None));
        store.fail_removal_of("music");

        assert!(store.remove(Collection::Categories, "music").await.is_err());
        assert!(store.contains(Collection::Categories, "music"));
    }

    #[tokio::test]
    async fn category_without_id_is_logged_but_not_stored() {
        let store = InMemoryRecordStore::new();
        let category = Category { name: "Misc".into(), ..Default::default() };
        store.add_category(&category).await.unwrap();

        assert_eq!(store.published_categories().len(), 1);
        assert_eq!(store.len(Collection::Categories), 0);
    }

    #[tokio::test]
    async fn one_shared_handle_sees_every_publish() {
        let store = std::sync::Arc::new(InMemoryRecordStore::new());
        let mut tasks = Vec::new();
        for i in 0..4 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                let category = Category {
                    id: Some(format!("c{}", i)),
                    name: format!("Category {}", i),
                    ..Default::default()
                };
                store.add_category(&category).await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(store.published_categories().len(), 4);
        assert_eq!(store.len(Collection::Categories), 4);
    }
}
