use crate::common::constants::{DEFAULT_MAX_RETRIES, DEFAULT_RETRY_WAIT};
use crate::queue::{NewJob, Priority, RetryPolicy};

/// Decide whether a city's crawl continues past `page`.
///
/// The upstream reports `page_count`; we never go beyond `max_pages`.
/// Pages are zero-based, so page `p` has a successor when `total > p + 1`.
pub fn next_page(page: u32, page_count: u32, max_pages: u32) -> Option<u32> {
    let total = page_count.min(max_pages);
    let next = page.checked_add(1)?;
    (total > next).then_some(next)
}

/// The continuation job for `city`, if one is due.
pub fn next_page_job(city: &str, page: u32, page_count: u32, max_pages: u32) -> Option<NewJob> {
    next_page(page, page_count, max_pages).map(|next| {
        NewJob::fetch_city(city, next)
            .priority(Priority::Normal)
            .retry(RetryPolicy { max_retries: DEFAULT_MAX_RETRIES, wait: DEFAULT_RETRY_WAIT })
    })
}
