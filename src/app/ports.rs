use crate::common::constants::SEARCH_WINDOW_DAYS;
use crate::common::error::Result;
use crate::common::types::{Category, Collection, Filter, NormalizedEvent, SearchPage, StoredRecord};
use async_trait::async_trait;
use chrono::{Duration, NaiveDate};

/// Date range for one search, always whole days.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchWindow {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl SearchWindow {
    pub fn starting(from: NaiveDate, days: i64) -> Self {
        Self { from, to: from + Duration::days(days) }
    }

    /// The upstream's hour-suffixed range form, e.g. `2024031500-2024041400`.
    pub fn to_param(&self) -> String {
        format!("{}00-{}00", self.from.format("%Y%m%d"), self.to.format("%Y%m%d"))
    }
}

/// One page request against the event search API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub city: String,
    pub page: u32,
    pub window: SearchWindow,
}

impl SearchQuery {
    pub fn new(city: impl Into<String>, page: u32, today: NaiveDate) -> Self {
        Self {
            city: city.into(),
            page,
            window: SearchWindow::starting(today, SEARCH_WINDOW_DAYS),
        }
    }
}

// Upstream-side port
#[async_trait]
pub trait EventSearchPort: Send + Sync {
    async fn search_events(&self, query: &SearchQuery) -> Result<SearchPage>;
    async fn list_categories(&self) -> Result<Vec<Category>>;
}

// Store-side port
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn find(&self, collection: Collection, filter: Filter) -> Result<Vec<StoredRecord>>;
    async fn find_one(&self, collection: Collection, id: &str) -> Result<Option<StoredRecord>>;
    async fn add_event(
        &self,
        event: &NormalizedEvent,
        existing: Option<&StoredRecord>,
        city: &str,
    ) -> Result<()>;
    async fn add_category(&self, category: &Category) -> Result<()>;
    async fn remove(&self, collection: Collection, id: &str) -> Result<()>;
}

/// Session lifecycle against the shared store, driven by the startup sequence.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    async fn connect(&self) -> Result<()>;
    async fn authenticate(&self) -> Result<()>;
    async fn subscribe(&self, name: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_spans_thirty_days_in_hour_suffixed_form() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        let query = SearchQuery::new("Austin", 0, today);
        assert_eq!(query.window.to_param(), "2024031500-2024041400");
    }

    #[test]
    fn window_crosses_year_boundary() {
        let from = NaiveDate::from_ymd_opt(2023, 12, 20).unwrap();
        assert_eq!(SearchWindow::starting(from, 30).to_param(), "2023122000-2024011900");
    }
}
