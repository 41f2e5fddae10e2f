use super::job::{Job, JobState, JobType, NewJob};
use super::store::JobStore;
use crate::common::constants::FAILURE_LOG_TARGET;
use crate::common::error::{HarvesterError, Result};
use crate::observability::metrics;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tracing::{debug, error, info, instrument, warn};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
const STATE_WRITE_ATTEMPTS: u32 = 3;
const STATE_WRITE_BACKOFF: Duration = Duration::from_millis(100);

/// How a handler finished a job. Only obtainable through [`JobControl`].
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    outcome: Outcome,
}

impl Completion {
    pub fn outcome(&self) -> &Outcome {
        &self.outcome
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Done,
    Failed(String),
}

/// Handed to a handler with each job; consuming it is the only way to
/// report `done` or `fail`, so every job gets exactly one verdict.
#[derive(Debug)]
pub struct JobControl {
    job_id: String,
}

impl JobControl {
    pub(crate) fn new(job_id: &str) -> Self {
        Self { job_id: job_id.to_string() }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn done(self) -> Completion {
        Completion { outcome: Outcome::Done }
    }

    pub fn fail(self, reason: impl fmt::Display) -> Completion {
        Completion { outcome: Outcome::Failed(reason.to_string()) }
    }
}

/// Processing function bound to one job type.
///
/// Returning `Err` (or panicking) counts as `fail`.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job, control: JobControl) -> anyhow::Result<Completion>;
}

/// Cloneable handle for putting jobs on the queue, used by handlers that
/// schedule follow-up work.
#[derive(Clone)]
pub struct Enqueuer {
    store: Arc<dyn JobStore>,
    wakeups: Arc<HashMap<JobType, Arc<Notify>>>,
}

impl Enqueuer {
    pub async fn enqueue(&self, new_job: NewJob) -> Result<Job> {
        let job = new_job.into_job(Utc::now());
        self.store.insert(&job).await?;
        metrics::jobs::enqueued(job.job_type().as_str());
        if let Some(notify) = self.wakeups.get(&job.job_type()) {
            notify.notify_one();
        }
        debug!(job_id = %job.id, job_type = %job.job_type(), "Enqueued job");
        Ok(job)
    }
}

/// Typed job queue with one worker loop per registered job type.
pub struct JobQueue {
    store: Arc<dyn JobStore>,
    handlers: HashMap<JobType, Arc<dyn JobHandler>>,
    wakeups: Arc<HashMap<JobType, Arc<Notify>>>,
    poll_interval: Duration,
}

impl JobQueue {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        let wakeups = JobType::ALL
            .into_iter()
            .map(|t| (t, Arc::new(Notify::new())))
            .collect();
        Self {
            store,
            handlers: HashMap::new(),
            wakeups: Arc::new(wakeups),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn store(&self) -> Arc<dyn JobStore> {
        self.store.clone()
    }

    pub fn enqueuer(&self) -> Enqueuer {
        Enqueuer {
            store: self.store.clone(),
            wakeups: self.wakeups.clone(),
        }
    }

    pub async fn enqueue(&self, new_job: NewJob) -> Result<Job> {
        self.enqueuer().enqueue(new_job).await
    }

    /// Bind `handler` to `job_type`. A type can only have one handler.
    pub fn register_handler(&mut self, job_type: JobType, handler: Arc<dyn JobHandler>) -> Result<()> {
        if self.handlers.contains_key(&job_type) {
            return Err(HarvesterError::queue(format!(
                "a handler for '{}' is already registered",
                job_type
            )));
        }
        self.handlers.insert(job_type, handler);
        Ok(())
    }

    /// Claim and process at most one job of `job_type`.
    ///
    /// Returns the outcome, or `None` when nothing was eligible.
    #[instrument(skip(self))]
    pub async fn run_once(&self, job_type: JobType) -> Result<Option<Outcome>> {
        let handler = self
            .handlers
            .get(&job_type)
            .cloned()
            .ok_or_else(|| HarvesterError::queue(format!("no handler registered for '{}'", job_type)))?;

        let Some(job) = self.store.claim_next(job_type, Utc::now()).await? else {
            return Ok(None);
        };
        info!(job_id = %job.id, attempt = job.failures + 1, "Running job");

        let started = std::time::Instant::now();
        let outcome = dispatch(handler, job.clone()).await;
        metrics::jobs::duration(job_type.as_str(), started.elapsed().as_secs_f64());

        match &outcome {
            Outcome::Done => {
                persist("mark job completed", &job.id, || self.store.complete(&job.id, Utc::now()))
                    .await?;
                metrics::jobs::completed(job_type.as_str());
                info!(job_id = %job.id, "Job completed");
            }
            Outcome::Failed(reason) => {
                let state = persist("record job failure", &job.id, || {
                    self.store.fail(&job.id, reason, Utc::now())
                })
                .await?;
                if state == JobState::FailedTerminal {
                    metrics::jobs::failed_terminal(job_type.as_str());
                    error!(
                        target: FAILURE_LOG_TARGET,
                        job_id = %job.id,
                        job_type = %job_type,
                        failures = job.failures + 1,
                        reason = %reason,
                        "Job failed permanently after exhausting retries"
                    );
                } else {
                    metrics::jobs::retry_scheduled(job_type.as_str());
                    warn!(
                        job_id = %job.id,
                        reason = %reason,
                        retry_in_secs = job.retry.wait.as_secs(),
                        "Job failed, retry scheduled"
                    );
                }
            }
        }
        Ok(Some(outcome))
    }

    /// Run one worker loop per registered type until `shutdown` flips to true.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Result<()> {
        let requeued = self.store.requeue_running(Utc::now()).await?;
        if requeued > 0 {
            warn!("Returned {} interrupted jobs to pending", requeued);
        }

        let mut workers = Vec::new();
        for job_type in self.handlers.keys().copied() {
            let queue = self.clone();
            let shutdown = shutdown.clone();
            workers.push(tokio::spawn(async move { queue.worker_loop(job_type, shutdown).await }));
        }
        info!("Started {} job workers", workers.len());

        for worker in workers {
            if let Err(e) = worker.await {
                error!("Worker task ended abnormally: {}", e);
            }
        }
        info!("All job workers stopped");
        Ok(())
    }

    async fn worker_loop(&self, job_type: JobType, mut shutdown: watch::Receiver<bool>) {
        let notify = self.wakeups.get(&job_type).cloned().unwrap_or_default();
        info!(job_type = %job_type, "Worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.run_once(job_type).await {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(e) => error!(job_type = %job_type, "Queue error: {}", e),
            }

            let wait = self.idle_wait(job_type).await;
            tokio::select! {
                _ = notify.notified() => {}
                _ = tokio::time::sleep(wait) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!(job_type = %job_type, "Worker stopped");
    }

    // Sleep until the next delayed job becomes eligible, capped by the poll interval.
    async fn idle_wait(&self, job_type: JobType) -> Duration {
        match self.store.next_run_after(job_type).await {
            Ok(Some(at)) => (at - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO)
                .min(self.poll_interval),
            _ => self.poll_interval,
        }
    }
}

// A handler has already run, so a lost state write would strand the job in
// `Running` until the next restart. Retry a few times before giving up.
async fn persist<T, F, Fut>(what: &str, job_id: &str, mut write: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match write().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < STATE_WRITE_ATTEMPTS => {
                warn!(job_id, attempt, "Failed to {}: {}, retrying", what, e);
                tokio::time::sleep(STATE_WRITE_BACKOFF * attempt).await;
                attempt += 1;
            }
            Err(e) => {
                error!(job_id, "Failed to {} after {} attempts: {}", what, attempt, e);
                return Err(e);
            }
        }
    }
}

// Handlers run on their own task so a panic is contained and reported as a failure.
async fn dispatch(handler: Arc<dyn JobHandler>, job: Job) -> Outcome {
    let control = JobControl::new(&job.id);
    let result = tokio::spawn(async move { handler.handle(&job, control).await }).await;
    match result {
        Ok(Ok(completion)) => completion.outcome,
        Ok(Err(e)) => Outcome::Failed(format!("{:#}", e)),
        Err(join_error) => Outcome::Failed(format!("handler panicked: {}", join_error)),
    }
}
