use super::job::{Job, JobState, JobType};
use crate::common::error::{HarvesterError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

/// Persistence behind the job queue.
///
/// Claiming must be atomic with respect to other claimers: a job handed out by
/// `claim_next` is `Running` before any other caller can see it.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, job: &Job) -> Result<()>;

    /// Take the next eligible pending job of `job_type`, highest priority
    /// first, oldest first within a priority.
    async fn claim_next(&self, job_type: JobType, now: DateTime<Utc>) -> Result<Option<Job>>;

    async fn complete(&self, id: &str, now: DateTime<Utc>) -> Result<()>;

    /// Record a failure and return the state the job moved to.
    async fn fail(&self, id: &str, reason: &str, now: DateTime<Utc>) -> Result<JobState>;

    async fn get(&self, id: &str) -> Result<Option<Job>>;

    async fn list(&self, state: Option<JobState>) -> Result<Vec<Job>>;

    /// Earliest `run_after` among pending jobs of `job_type`.
    async fn next_run_after(&self, job_type: JobType) -> Result<Option<DateTime<Utc>>>;

    /// Put jobs left `Running` by a previous process back to `Pending`.
    async fn requeue_running(&self, now: DateTime<Utc>) -> Result<usize>;

    async fn counts(&self) -> Result<HashMap<JobState, usize>> {
        let mut counts = HashMap::new();
        for job in self.list(None).await? {
            *counts.entry(job.state).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

/// In-memory job store for development/testing
#[derive(Default)]
pub struct InMemoryJobStore {
    // Insertion order doubles as the creation-order tiebreak.
    jobs: Mutex<Vec<Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_job<T>(&self, id: &str, f: impl FnOnce(&mut Job) -> T) -> Result<T> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or_else(|| HarvesterError::queue(format!("job {} not found", id)))?;
        Ok(f(job))
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: &Job) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        jobs.push(job.clone());
        debug!("Inserted {} job {}", job.job_type(), job.id);
        Ok(())
    }

    async fn claim_next(&self, job_type: JobType, now: DateTime<Utc>) -> Result<Option<Job>> {
        let mut jobs = self.jobs.lock().unwrap();
        let mut best: Option<usize> = None;
        for (idx, job) in jobs.iter().enumerate() {
            if !job.is_eligible(job_type, now) {
                continue;
            }
            best = match best {
                Some(b)
                    if (jobs[b].priority, std::cmp::Reverse(jobs[b].created_at))
                        >= (job.priority, std::cmp::Reverse(job.created_at)) =>
                {
                    Some(b)
                }
                _ => Some(idx),
            };
        }
        Ok(best.map(|idx| {
            let job = &mut jobs[idx];
            job.mark_running(now);
            job.clone()
        }))
    }

    async fn complete(&self, id: &str, now: DateTime<Utc>) -> Result<()> {
        self.with_job(id, |job| job.mark_completed(now))
    }

    async fn fail(&self, id: &str, reason: &str, now: DateTime<Utc>) -> Result<JobState> {
        self.with_job(id, |job| job.record_failure(reason, now))
    }

    async fn get(&self, id: &str) -> Result<Option<Job>> {
        let jobs = self.jobs.lock().unwrap();
        Ok(jobs.iter().find(|j| j.id == id).cloned())
    }

    async fn list(&self, state: Option<JobState>) -> Result<Vec<Job>> {
        let jobs = self.jobs.lock().unwrap();
        Ok(jobs
            .iter()
            .filter(|j| state.map_or(true, |s| j.state == s))
            .cloned()
            .collect())
    }

    async fn next_run_after(&self, job_type: JobType) -> Result<Option<DateTime<Utc>>> {
        let jobs = self.jobs.lock().unwrap();
        Ok(jobs
            .iter()
            .filter(|j| j.state == JobState::Pending && j.job_type() == job_type)
            .map(|j| j.run_after)
            .min())
    }

    async fn requeue_running(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut jobs = self.jobs.lock().unwrap();
        let mut requeued = 0;
        for job in jobs.iter_mut().filter(|j| j.state == JobState::Running) {
            job.state = JobState::Pending;
            job.updated_at = now;
            requeued += 1;
        }
        Ok(requeued)
    }
}
