pub mod sanitize;

use crate::common::constants::{CATEGORY_NAME_MAX_CHARS, DESCRIPTION_MAX_CHARS};
use crate::common::types::{Category, NormalizedEvent, RawUpstreamEvent};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use sanitize::{sanitize, Markup};
use std::collections::BTreeSet;

static URL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\b(?:https?://|www\.)[^\s<>"'()\[\]{}]+"#).expect("valid url pattern")
});

const ACCEPTED_LANGUAGES: [&str; 2] = ["english", "undetermined"];

const TIME_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

/// Turns raw search results into store-ready events.
///
/// Pure: the same input always yields the same output, and ineligible
/// records come back as `None` rather than an error.
#[derive(Debug, Clone)]
pub struct EventNormalizer {
    pub description_max_chars: usize,
    pub category_name_max_chars: usize,
}

impl Default for EventNormalizer {
    fn default() -> Self {
        Self {
            description_max_chars: DESCRIPTION_MAX_CHARS,
            category_name_max_chars: CATEGORY_NAME_MAX_CHARS,
        }
    }
}

impl EventNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn normalize(&self, raw: &RawUpstreamEvent) -> Option<NormalizedEvent> {
        let language = raw.language.as_deref()?;
        if !is_accepted_language(language) {
            return None;
        }
        // Unparseable counts as absent: no start time, no publication.
        let start_time = parse_time(raw.start_time.as_deref()?)?;

        let description = raw
            .description
            .as_deref()
            .and_then(|d| self.clean_description(d));

        let links = raw.description.as_deref().map(extract_links).unwrap_or_default();

        let categories = raw
            .categories
            .as_ref()
            .map(|list| {
                list.category
                    .iter()
                    .map(|c| self.clean_category(c))
                    .collect()
            })
            .unwrap_or_default();

        Some(NormalizedEvent {
            external_id: raw.id.clone(),
            title: raw.title.clone(),
            url: raw.url.clone(),
            description,
            links,
            categories,
            start_time,
            stop_time: raw.stop_time.as_deref().and_then(parse_time),
            language: language.to_string(),
            metadata: raw.extra.clone(),
        })
    }

    fn clean_description(&self, description: &str) -> Option<String> {
        let cleaned = sanitize(description, Markup::KeepInline, self.description_max_chars);
        if cleaned.is_empty() || cleaned == "null" {
            None
        } else {
            Some(cleaned)
        }
    }

    fn clean_category(&self, category: &Category) -> Category {
        Category {
            name: sanitize(&category.name, Markup::StripAll, self.category_name_max_chars),
            ..category.clone()
        }
    }
}

pub fn is_accepted_language(language: &str) -> bool {
    let lower = language.trim().to_lowercase();
    ACCEPTED_LANGUAGES.contains(&lower.as_str())
}

/// Parse an upstream timestamp. Upstream sends venue-local wall clock time,
/// so the result carries no zone.
pub fn parse_time(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    for format in TIME_FORMATS {
        if let Ok(t) = NaiveDateTime::parse_from_str(value, format) {
            return Some(t);
        }
    }
    if let Ok(t) = DateTime::parse_from_rfc3339(value) {
        return Some(t.naive_local());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Collect URL-like substrings from raw (unsanitized) text.
pub fn extract_links(text: &str) -> BTreeSet<String> {
    URL_PATTERN
        .find_iter(text)
        .filter_map(|m| {
            let raw = m
                .as_str()
                .trim_end_matches(|c: char| ".,;:!?".contains(c))
                .replace("&amp;", "&");
            if raw.is_empty() {
                return None;
            }
            if raw.to_ascii_lowercase().starts_with("www.") {
                Some(format!("http://{}", raw))
            } else {
                Some(raw)
            }
        })
        .collect()
}
