// Crawl pipeline: page fetch, normalization, publish, and expiry sweep

pub mod fetch;
pub mod pagination;
pub mod processing;
pub mod sink;
pub mod storage;
pub mod sweep;

// Re-export key types from each stage
pub use fetch::FetchCityHandler;
pub use pagination::{next_page, next_page_job};
pub use sink::RemoteSink;
pub use sweep::{ExpirySweeper, RefreshHandler, SweepSummary};
