//! Durable typed job queue: job model, stores, and the per-type worker loop.

pub mod job;
pub mod sqlite;
pub mod store;
pub mod worker;

pub use job::{FetchCityPayload, Job, JobPayload, JobState, JobType, NewJob, Priority, RetryPolicy};
pub use sqlite::SqliteJobStore;
pub use store::{InMemoryJobStore, JobStore};
pub use worker::{Completion, Enqueuer, JobControl, JobHandler, JobQueue, Outcome};
