pub mod apis;
pub mod app;
pub mod common;
pub mod config;
pub mod infra;
pub mod observability;
pub mod pipeline;
pub mod queue;

pub use common::error::{HarvesterError, Result};
