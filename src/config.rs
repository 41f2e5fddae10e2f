use crate::common::constants::{
    DEFAULT_EVENTFUL_BASE_URL, DEFAULT_MAX_PAGES_PER_CITY, UPSTREAM_TIMEOUT,
};
use crate::common::error::{HarvesterError, Result};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub crawl: CrawlConfig,
    pub store: StoreConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CrawlConfig {
    #[serde(default)]
    pub cities: Vec<String>,
    #[serde(default = "default_max_pages")]
    pub max_pages_per_city: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub base_url: String,
    #[serde(default)]
    pub admin_email: String,
    #[serde(default)]
    pub admin_password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsConfig {
    pub listen: Option<SocketAddr>,
}

fn default_base_url() -> String {
    DEFAULT_EVENTFUL_BASE_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    UPSTREAM_TIMEOUT.as_secs()
}

fn default_max_pages() -> u32 {
    DEFAULT_MAX_PAGES_PER_CITY
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/jobs.db")
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self { cities: Vec::new(), max_pages_per_city: default_max_pages() }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { db_path: default_db_path(), poll_interval_ms: default_poll_interval_ms() }
    }
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl QueueConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Config {
    /// Read `path`, apply `.env` and process environment overrides, then validate.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            HarvesterError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;

        // A missing .env file is fine
        let _ = dotenv::dotenv();

        let mut config = Self::from_toml_str(&content)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Overlay values from `lookup` (normally the process environment).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("EVENTFUL_API_KEY") {
            self.upstream.api_key = key;
        }
        if let Some(url) = lookup("HARVESTER_STORE_URL") {
            self.store.base_url = url;
        }
        if let Some(email) = lookup("HARVESTER_ADMIN_EMAIL") {
            self.store.admin_email = email;
        }
        if let Some(password) = lookup("HARVESTER_ADMIN_PASSWORD") {
            self.store.admin_password = password;
        }
        if let Some(raw) = lookup("HARVESTER_MAX_PAGES_PER_CITY") {
            self.crawl.max_pages_per_city = raw.trim().parse().map_err(|_| {
                HarvesterError::Config(format!("HARVESTER_MAX_PAGES_PER_CITY is not a number: '{}'", raw))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.upstream.api_key.trim().is_empty() {
            return Err(HarvesterError::Config(
                "upstream.api_key is empty (set it in the config file or EVENTFUL_API_KEY)".into(),
            ));
        }
        if self.crawl.max_pages_per_city == 0 {
            return Err(HarvesterError::Config("crawl.max_pages_per_city must be at least 1".into()));
        }
        if self.store.base_url.trim().is_empty() {
            return Err(HarvesterError::Config("store.base_url is empty".into()));
        }
        Ok(())
    }
}
