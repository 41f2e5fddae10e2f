//! Upstream search and crawl constants shared by the fetcher, sweeper and CLI.

use std::time::Duration;

// Job type names (as stored in the queue)
pub const FETCH_CITY_JOB: &str = "fetchCity";
pub const REFRESH_JOB: &str = "refresh";

// Upstream endpoints
pub const DEFAULT_EVENTFUL_BASE_URL: &str = "http://api.eventful.com";
pub const EVENT_SEARCH_PATH: &str = "/json/events/search";
pub const CATEGORY_LIST_PATH: &str = "/json/categories/list";

// Search shape
pub const PAGE_SIZE: u32 = 50;
pub const SEARCH_WINDOW_DAYS: i64 = 30;
pub const SEARCH_RADIUS: &str = "20";
pub const SEARCH_UNITS: &str = "miles";
pub const SEARCH_SORT_ORDER: &str = "popularity";
pub const SEARCH_INCLUDE: &str = "price,categories,tickets,popularity,subcategories,mature";
pub const SEARCH_IMAGE_SIZES: &str =
    "medium,block,large,edpborder250,dropshadow250,dropshadow170,block178,thumb,small";
pub const SEARCH_MATURE: &str = "normal";
pub const SEARCH_LANGUAGES: &str = "1";
pub const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

pub const DEFAULT_MAX_PAGES_PER_CITY: u32 = 50;

// Retry defaults applied on enqueue
pub const DEFAULT_MAX_RETRIES: u32 = 5;
pub const DEFAULT_RETRY_WAIT: Duration = Duration::from_secs(15 * 60);

// Normalizer limits
pub const DESCRIPTION_MAX_CHARS: usize = 1000;
pub const CATEGORY_NAME_MAX_CHARS: usize = 100;
pub const ELLIPSIS: &str = "...";

// Remote store collections and methods
pub const EVENTS_COLLECTION: &str = "events";
pub const CATEGORIES_COLLECTION: &str = "categories";
pub const JOBS_SUBSCRIPTION: &str = "allJobs";
pub const EVENTS_SUBSCRIPTION: &str = "allEvents";
pub const CATEGORIES_SUBSCRIPTION: &str = "categories";
pub const ADD_EVENT_METHOD: &str = "addEvent";
pub const ADD_CATEGORY_METHOD: &str = "addCategory";

/// Target used for terminal job failures so operators can route them separately.
pub const FAILURE_LOG_TARGET: &str = "harvester::failures";
