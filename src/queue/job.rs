use crate::common::constants::{
    DEFAULT_MAX_RETRIES, DEFAULT_RETRY_WAIT, FETCH_CITY_JOB, REFRESH_JOB,
};
use crate::common::error::{HarvesterError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum JobType {
    #[serde(rename = "fetchCity")]
    FetchCity,
    #[serde(rename = "refresh")]
    Refresh,
}

impl JobType {
    pub const ALL: [JobType; 2] = [JobType::FetchCity, JobType::Refresh];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::FetchCity => FETCH_CITY_JOB,
            JobType::Refresh => REFRESH_JOB,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == value)
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Claim order is highest priority first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn rank(&self) -> i64 {
        match self {
            Priority::Low => 0,
            Priority::Normal => 1,
            Priority::Medium => 2,
            Priority::High => 3,
            Priority::Critical => 4,
        }
    }

    pub fn from_rank(rank: i64) -> Self {
        match rank {
            i64::MIN..=0 => Priority::Low,
            1 => Priority::Normal,
            2 => Priority::Medium,
            3 => Priority::High,
            _ => Priority::Critical,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    #[serde(with = "duration_millis")]
    pub wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            wait: DEFAULT_RETRY_WAIT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Completed,
    FailedTerminal,
}

impl JobState {
    pub const ALL: [JobState; 4] = [
        JobState::Pending,
        JobState::Running,
        JobState::Completed,
        JobState::FailedTerminal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::FailedTerminal => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == value)
    }

    /// Completed and terminally failed jobs are out of the active queue.
    pub fn is_final(&self) -> bool {
        matches!(self, JobState::Completed | JobState::FailedTerminal)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchCityPayload {
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub page: u32,
}

impl FetchCityPayload {
    pub fn new(city: impl Into<String>, page: u32) -> Self {
        Self { city: Some(city.into()), page }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobPayload {
    FetchCity(FetchCityPayload),
    Refresh,
}

impl JobPayload {
    pub fn job_type(&self) -> JobType {
        match self {
            JobPayload::FetchCity(_) => JobType::FetchCity,
            JobPayload::Refresh => JobType::Refresh,
        }
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(match self {
            JobPayload::FetchCity(payload) => serde_json::to_value(payload)?,
            JobPayload::Refresh => Value::Object(Default::default()),
        })
    }

    pub fn from_parts(job_type: JobType, data: Value) -> Result<Self> {
        Ok(match job_type {
            JobType::FetchCity => {
                let data = if data.is_null() { Value::Object(Default::default()) } else { data };
                JobPayload::FetchCity(serde_json::from_value(data)?)
            }
            JobType::Refresh => JobPayload::Refresh,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureEntry {
    pub at: DateTime<Utc>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: String,
    pub payload: JobPayload,
    pub priority: Priority,
    pub retry: RetryPolicy,
    pub state: JobState,
    pub failures: u32,
    /// Not claimable before this instant.
    pub run_after: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub failure_log: Vec<FailureEntry>,
}

impl Job {
    pub fn job_type(&self) -> JobType {
        self.payload.job_type()
    }

    pub fn is_eligible(&self, job_type: JobType, now: DateTime<Utc>) -> bool {
        self.state == JobState::Pending && self.job_type() == job_type && self.run_after <= now
    }

    pub fn mark_running(&mut self, now: DateTime<Utc>) {
        self.state = JobState::Running;
        self.updated_at = now;
    }

    pub fn mark_completed(&mut self, now: DateTime<Utc>) {
        self.state = JobState::Completed;
        self.updated_at = now;
    }

    /// Record one failed attempt and move the job to its next state.
    ///
    /// The job goes back to `Pending` (not claimable until `now + wait`) while
    /// the failure count stays within `max_retries`; the failure that exceeds
    /// it is terminal.
    pub fn record_failure(&mut self, reason: &str, now: DateTime<Utc>) -> JobState {
        self.failures += 1;
        self.failure_log.push(FailureEntry { at: now, reason: reason.to_string() });
        self.updated_at = now;
        if self.failures > self.retry.max_retries {
            self.state = JobState::FailedTerminal;
        } else {
            self.state = JobState::Pending;
            let wait = chrono::Duration::from_std(self.retry.wait)
                .unwrap_or_else(|_| chrono::Duration::days(365 * 100));
            self.run_after = now.checked_add_signed(wait).unwrap_or(DateTime::<Utc>::MAX_UTC);
        }
        self.state
    }
}

/// A job about to be enqueued. Defaults: normal priority, 5 retries, 15 minutes apart.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub payload: JobPayload,
    pub priority: Priority,
    pub retry: RetryPolicy,
}

impl NewJob {
    pub fn new(payload: JobPayload) -> Self {
        Self {
            payload,
            priority: Priority::default(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn fetch_city(city: impl Into<String>, page: u32) -> Self {
        Self::new(JobPayload::FetchCity(FetchCityPayload::new(city, page)))
    }

    pub fn refresh() -> Self {
        Self::new(JobPayload::Refresh)
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn into_job(self, now: DateTime<Utc>) -> Job {
        Job {
            id: Uuid::new_v4().to_string(),
            payload: self.payload,
            priority: self.priority,
            retry: self.retry,
            state: JobState::Pending,
            failures: 0,
            run_after: now,
            created_at: now,
            updated_at: now,
            failure_log: Vec::new(),
        }
    }
}

pub(crate) fn parse_job_type(value: &str) -> Result<JobType> {
    JobType::parse(value).ok_or_else(|| HarvesterError::queue(format!("unknown job type '{}'", value)))
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job_with_default_retry() -> Job {
        NewJob::fetch_city("Austin", 0).into_job(Utc::now())
    }

    #[test]
    fn defaults_are_normal_priority_five_retries_fifteen_minutes() {
        let job = NewJob::refresh();
        assert_eq!(job.priority, Priority::Normal);
        assert_eq!(job.retry.max_retries, 5);
        assert_eq!(job.retry.wait, Duration::from_secs(900));
    }

    #[test]
    fn five_failures_stay_retryable_and_the_sixth_is_terminal() {
        let mut job = job_with_default_retry();
        let start = job.created_at;
        for attempt in 1..=5 {
            let failed_at = start + chrono::Duration::minutes(attempt * 20);
            assert_eq!(job.record_failure("boom", failed_at), JobState::Pending);
            assert_eq!(job.run_after, failed_at + chrono::Duration::minutes(15));
        }
        let last = start + chrono::Duration::hours(3);
        assert_eq!(job.record_failure("boom", last), JobState::FailedTerminal);
        assert_eq!(job.failures, 6);
        assert_eq!(job.failure_log.len(), 6);
        assert!(job.state.is_final());
    }

    #[test]
    fn retry_is_not_eligible_until_the_wait_elapses() {
        let mut job = job_with_default_retry();
        let failed_at = job.created_at;
        job.record_failure("timeout", failed_at);
        assert!(!job.is_eligible(JobType::FetchCity, failed_at + chrono::Duration::minutes(14)));
        assert!(job.is_eligible(JobType::FetchCity, failed_at + chrono::Duration::minutes(15)));
    }

    #[test]
    fn payload_without_page_defaults_to_first_page() {
        let payload =
            JobPayload::from_parts(JobType::FetchCity, serde_json::json!({"city": "Austin"})).unwrap();
        assert_eq!(payload, JobPayload::FetchCity(FetchCityPayload::new("Austin", 0)));
    }

    #[test]
    fn priority_ranks_round_trip_in_order() {
        assert!(Priority::High > Priority::Normal);
        for p in [Priority::Low, Priority::Normal, Priority::Medium, Priority::High, Priority::Critical] {
            assert_eq!(Priority::from_rank(p.rank()), p);
        }
    }
}
