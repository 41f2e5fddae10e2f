use crate::app::ports::RecordStore;
use crate::common::constants::{ADD_CATEGORY_METHOD, ADD_EVENT_METHOD};
use crate::common::error::{HarvesterError, Result};
use crate::common::types::{Category, Collection, Filter, NormalizedEvent, StoredRecord};
use crate::infra::connection::ConnectionManager;
use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;

/// [`RecordStore`] over the shared store's HTTP JSON surface.
pub struct RemoteStore {
    connection: Arc<ConnectionManager>,
}

impl RemoteStore {
    pub fn new(connection: Arc<ConnectionManager>) -> Self {
        Self { connection }
    }

    async fn call_method(&self, method: &str, params: Value) -> Result<()> {
        let path = format!("/methods/{}", method);
        self.connection
            .request(Method::POST, &path, Some(&json!({ "params": params })))
            .await?
            .ok_or_else(|| HarvesterError::store(format!("store method '{}' not found", method)))?;
        Ok(())
    }
}

fn filter_query(filter: &Filter) -> String {
    match filter {
        Filter::ExpiresBefore(cutoff) => format!("expires_before={}", cutoff.timestamp_millis()),
    }
}

#[async_trait]
impl RecordStore for RemoteStore {
    async fn find(&self, collection: Collection, filter: Filter) -> Result<Vec<StoredRecord>> {
        let path = format!("/collections/{}?{}", collection, filter_query(&filter));
        match self.connection.request(Method::GET, &path, None).await? {
            Some(body) => Ok(serde_json::from_str(&body)?),
            None => Err(HarvesterError::store(format!("collection '{}' not found", collection))),
        }
    }

    async fn find_one(&self, collection: Collection, id: &str) -> Result<Option<StoredRecord>> {
        let path = format!("/collections/{}/{}", collection, id);
        match self.connection.request(Method::GET, &path, None).await? {
            Some(body) if body.trim().is_empty() || body.trim() == "null" => Ok(None),
            Some(body) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }

    async fn add_event(
        &self,
        event: &NormalizedEvent,
        existing: Option<&StoredRecord>,
        city: &str,
    ) -> Result<()> {
        self.call_method(ADD_EVENT_METHOD, json!([event, existing, city])).await
    }

    async fn add_category(&self, category: &Category) -> Result<()> {
        self.call_method(ADD_CATEGORY_METHOD, json!([category])).await
    }

    async fn remove(&self, collection: Collection, id: &str) -> Result<()> {
        let path = format!("/collections/{}/{}", collection, id);
        // Already gone counts as removed
        self.connection.request(Method::DELETE, &path, None).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn expiry_filter_is_sent_as_epoch_millis() {
        let cutoff = Utc.with_ymd_and_hms(2024, 3, 15, 0, 0, 0).unwrap();
        assert_eq!(
            filter_query(&Filter::ExpiresBefore(cutoff)),
            "expires_before=1710460800000"
        );
    }
}
