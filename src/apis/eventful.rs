use crate::app::ports::{EventSearchPort, SearchQuery};
use crate::common::constants::{
    CATEGORY_LIST_PATH, EVENT_SEARCH_PATH, PAGE_SIZE, SEARCH_IMAGE_SIZES, SEARCH_INCLUDE,
    SEARCH_LANGUAGES, SEARCH_MATURE, SEARCH_RADIUS, SEARCH_SORT_ORDER, SEARCH_UNITS,
};
use crate::common::error::{HarvesterError, Result};
use crate::common::types::{Category, CategoryListing, SearchPage};
use crate::config::UpstreamConfig;
use crate::observability::metrics;
use async_trait::async_trait;
use std::time::Instant;
use tracing::{debug, instrument};

/// Client for the Eventful JSON API.
pub struct EventfulClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl EventfulClient {
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn search_params(&self, query: &SearchQuery) -> Vec<(&'static str, String)> {
        vec![
            ("app_key", self.api_key.clone()),
            ("where", query.city.clone()),
            ("within", SEARCH_RADIUS.to_string()),
            ("units", SEARCH_UNITS.to_string()),
            ("date", query.window.to_param()),
            ("page_size", PAGE_SIZE.to_string()),
            ("page_number", query.page.to_string()),
            ("sort_order", SEARCH_SORT_ORDER.to_string()),
            ("include", SEARCH_INCLUDE.to_string()),
            ("image_sizes", SEARCH_IMAGE_SIZES.to_string()),
            ("mature", SEARCH_MATURE.to_string()),
            ("languages", SEARCH_LANGUAGES.to_string()),
        ]
    }

    async fn get_json(
        &self,
        endpoint: &'static str,
        params: &[(&'static str, String)],
    ) -> Result<String> {
        let url = format!("{}{}", self.base_url, endpoint);
        let started = Instant::now();
        let result = self.send(&url, params).await;
        metrics::upstream::request_duration(endpoint, started.elapsed().as_secs_f64());
        match &result {
            Ok(_) => metrics::upstream::request_success(endpoint),
            Err(_) => metrics::upstream::request_error(endpoint),
        }
        result
    }

    async fn send(&self, url: &str, params: &[(&'static str, String)]) -> Result<String> {
        let response = self.client.get(url).query(params).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(HarvesterError::UpstreamStatus { status: status.as_u16(), body });
        }
        Ok(body)
    }
}

pub fn parse_search_page(body: &str) -> Result<SearchPage> {
    Ok(serde_json::from_str(body)?)
}

pub fn parse_category_listing(body: &str) -> Result<Vec<Category>> {
    let listing: CategoryListing = serde_json::from_str(body)?;
    Ok(listing.category)
}

#[async_trait]
impl EventSearchPort for EventfulClient {
    #[instrument(skip(self), fields(city = %query.city, page = query.page))]
    async fn search_events(&self, query: &SearchQuery) -> Result<SearchPage> {
        let body = self.get_json(EVENT_SEARCH_PATH, &self.search_params(query)).await?;
        let page = parse_search_page(&body)?;
        metrics::upstream::events_received(page.events.len() + page.malformed);
        debug!(
            "Received {} events, {} malformed (page_count {})",
            page.events.len(),
            page.malformed,
            page.page_count
        );
        Ok(page)
    }

    #[instrument(skip(self))]
    async fn list_categories(&self) -> Result<Vec<Category>> {
        let params = [
            ("app_key", self.api_key.clone()),
            ("subcategories", "1".to_string()),
        ];
        let body = self.get_json(CATEGORY_LIST_PATH, &params).await?;
        let categories = parse_category_listing(&body)?;
        debug!("Received {} categories", categories.len());
        Ok(categories)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn client() -> EventfulClient {
        let config = UpstreamConfig {
            base_url: "http://api.example.test/".into(),
            api_key: "secret".into(),
            timeout_secs: 30,
        };
        EventfulClient::new(&config).unwrap()
    }

    #[test]
    fn search_params_carry_the_fixed_query_shape() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        let params = client().search_params(&SearchQuery::new("Austin", 2, today));
        let get = |k: &str| {
            params
                .iter()
                .find(|(key, _)| *key == k)
                .map(|(_, v)| v.as_str())
                .unwrap()
        };

        assert_eq!(get("app_key"), "secret");
        assert_eq!(get("where"), "Austin");
        assert_eq!(get("within"), "20");
        assert_eq!(get("units"), "miles");
        assert_eq!(get("page_size"), "50");
        assert_eq!(get("page_number"), "2");
        assert_eq!(get("sort_order"), "popularity");
        assert_eq!(get("mature"), "normal");
        assert_eq!(get("date"), "2024031500-2024041400");
    }

    #[test]
    fn base_url_trailing_slash_is_dropped() {
        assert_eq!(client().base_url, "http://api.example.test");
    }

    #[test]
    fn parses_search_fixture() {
        let body = json!({
            "total_items": "2",
            "page_count": "1",
            "events": {"event": [
                {"id": "E0-001-1", "title": "Show", "language": "English",
                 "start_time": "2024-03-20 20:00:00", "venue_name": "Mohawk"},
                {"id": "E0-001-2", "title": "Other", "language": null,
                 "start_time": "2024-03-21 20:00:00"}
            ]}
        })
        .to_string();
        let page = parse_search_page(&body).unwrap();
        assert_eq!(page.page_count, 1);
        assert_eq!(page.events.len(), 2);
        assert_eq!(page.events[0].id.as_deref(), Some("E0-001-1"));
        assert!(page.events[1].language.is_none());
    }

    #[test]
    fn parses_category_fixture() {
        let body = json!({"category": [
            {"id": "music", "name": "Concerts &amp; Tour Dates"},
            {"id": "comedy", "name": "Comedy"}
        ]})
        .to_string();
        let categories = parse_category_listing(&body).unwrap();
        assert_eq!(categories.len(), 2);
        assert_eq!(categories[1].id.as_deref(), Some("comedy"));
    }

    #[test]
    fn malformed_body_is_a_json_error() {
        assert!(matches!(parse_search_page("<html>"), Err(HarvesterError::Json(_))));
    }
}
