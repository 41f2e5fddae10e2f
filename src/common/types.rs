use crate::common::constants::{CATEGORIES_COLLECTION, EVENTS_COLLECTION};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use tracing::debug;

/// Event record exactly as the search API returns it.
///
/// Only the fields the normalizer looks at are typed; everything else rides
/// along in `extra` and is forwarded to the store untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawUpstreamEvent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub stop_time: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub categories: Option<RawCategoryList>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `categories: {category: ...}` wrapper. A lone category arrives as an object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawCategoryList {
    #[serde(default, deserialize_with = "one_or_many")]
    pub category: Vec<Category>,
}

/// Taxonomy entry, both as attached to events and as listed by the taxonomy API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Category {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One page of search results.
///
/// Records are decoded one at a time; a record that does not fit
/// [`RawUpstreamEvent`] is dropped and counted in `malformed` instead of
/// failing the page.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(from = "SearchPageWire")]
pub struct SearchPage {
    pub page_count: u32,
    pub events: Vec<RawUpstreamEvent>,
    pub malformed: usize,
}

#[derive(Deserialize)]
struct SearchPageWire {
    #[serde(default, deserialize_with = "string_or_number")]
    page_count: u32,
    #[serde(default, deserialize_with = "event_list")]
    events: Vec<Value>,
}

impl From<SearchPageWire> for SearchPage {
    fn from(wire: SearchPageWire) -> Self {
        let mut events = Vec::with_capacity(wire.events.len());
        let mut malformed = 0;
        for record in wire.events {
            match serde_json::from_value::<RawUpstreamEvent>(record) {
                Ok(event) => events.push(event),
                Err(e) => {
                    malformed += 1;
                    debug!("Skipping malformed event record: {}", e);
                }
            }
        }
        Self { page_count: wire.page_count, events, malformed }
    }
}

/// Taxonomy listing response.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CategoryListing {
    #[serde(default, deserialize_with = "one_or_many")]
    pub category: Vec<Category>,
}

/// An event that passed the eligibility checks and is ready for the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedEvent {
    #[serde(rename = "id")]
    pub external_id: Option<String>,
    pub title: Option<String>,
    pub url: Option<String>,
    pub description: Option<String>,
    pub links: BTreeSet<String>,
    pub categories: Vec<Category>,
    pub start_time: NaiveDateTime,
    pub stop_time: Option<NaiveDateTime>,
    pub language: String,
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

/// Collections the core reads from and deletes in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Events,
    Categories,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Events => EVENTS_COLLECTION,
            Collection::Categories => CATEGORIES_COLLECTION,
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Query shapes the store must answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    ExpiresBefore(DateTime<Utc>),
}

impl Filter {
    pub fn matches(&self, record: &StoredRecord) -> bool {
        match self {
            Filter::ExpiresBefore(cutoff) => record.expires.map_or(false, |e| e < *cutoff),
        }
    }
}

/// A record owned by the external store, as far as the core can see it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub expires: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<Category>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        Many(Vec<Category>),
        One(Box<Category>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        Some(OneOrMany::Many(list)) => list,
        Some(OneOrMany::One(single)) => vec![*single],
        None => Vec::new(),
    })
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn string_or_number<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => Ok(n.as_u64().unwrap_or(0).min(u32::MAX as u64) as u32),
        Some(Value::String(s)) => s.trim().parse().map_err(serde::de::Error::custom),
        Some(Value::Null) | None => Ok(0),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected a number, got {}",
            other
        ))),
    }
}

fn event_list<'de, D>(deserializer: D) -> Result<Vec<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Wrapper {
        #[serde(default)]
        event: Option<Value>,
    }

    Ok(match Option::<Wrapper>::deserialize(deserializer)? {
        Some(Wrapper { event: Some(Value::Array(list)) }) => list,
        Some(Wrapper { event: Some(Value::Null) | None }) | None => Vec::new(),
        Some(Wrapper { event: Some(single) }) => vec![single],
    })
}
