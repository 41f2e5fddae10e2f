use super::job::{parse_job_type, FailureEntry, Job, JobPayload, JobState, JobType, Priority, RetryPolicy};
use super::store::JobStore;
use crate::common::error::{HarvesterError, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info};

const JOB_COLUMNS: &str = "id, job_type, payload, priority, max_retries, wait_ms, state, failures, \
                           run_after, created_at, updated_at, failure_log";

/// Durable job store backed by a local SQLite file.
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
}

impl SqliteJobStore {
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        info!("Opened job store at {}", db_path.display());
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                seq          INTEGER PRIMARY KEY AUTOINCREMENT,
                id           TEXT NOT NULL UNIQUE,
                job_type     TEXT NOT NULL,
                payload      TEXT NOT NULL,
                priority     INTEGER NOT NULL,
                max_retries  INTEGER NOT NULL,
                wait_ms      INTEGER NOT NULL,
                state        TEXT NOT NULL,
                failures     INTEGER NOT NULL DEFAULT 0,
                run_after    INTEGER NOT NULL,
                created_at   INTEGER NOT NULL,
                updated_at   INTEGER NOT NULL,
                failure_log  TEXT NOT NULL DEFAULT '[]'
            );
            CREATE INDEX IF NOT EXISTS jobs_claim_idx
                ON jobs (job_type, state, priority DESC, created_at, seq);
            "#,
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn load(conn: &Connection, id: &str) -> Result<Option<Job>> {
        let sql = format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS);
        let row = conn
            .query_row(&sql, params![id], JobRow::from_row)
            .optional()?;
        row.map(JobRow::into_job).transpose()
    }

    fn save(conn: &Connection, job: &Job) -> Result<()> {
        let failure_log = serde_json::to_string(&job.failure_log)?;
        let updated = conn.execute(
            "UPDATE jobs SET state = ?2, failures = ?3, run_after = ?4, updated_at = ?5, failure_log = ?6
             WHERE id = ?1",
            params![
                job.id,
                job.state.as_str(),
                job.failures as i64,
                millis(job.run_after),
                millis(job.updated_at),
                failure_log
            ],
        )?;
        if updated == 0 {
            return Err(HarvesterError::queue(format!("job {} not found", job.id)));
        }
        Ok(())
    }

    fn load_existing(conn: &Connection, id: &str) -> Result<Job> {
        Self::load(conn, id)?.ok_or_else(|| HarvesterError::queue(format!("job {} not found", id)))
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn insert(&self, job: &Job) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO jobs (id, job_type, payload, priority, max_retries, wait_ms, state, failures,
                               run_after, created_at, updated_at, failure_log)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                job.id,
                job.job_type().as_str(),
                serde_json::to_string(&job.payload.to_value()?)?,
                job.priority.rank(),
                job.retry.max_retries as i64,
                job.retry.wait.as_millis() as i64,
                job.state.as_str(),
                job.failures as i64,
                millis(job.run_after),
                millis(job.created_at),
                millis(job.updated_at),
                serde_json::to_string(&job.failure_log)?
            ],
        )?;
        debug!("Inserted {} job {}", job.job_type(), job.id);
        Ok(())
    }

    async fn claim_next(&self, job_type: JobType, now: DateTime<Utc>) -> Result<Option<Job>> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let sql = format!(
            "SELECT {} FROM jobs WHERE job_type = ?1 AND state = ?2 AND run_after <= ?3
             ORDER BY priority DESC, created_at ASC, seq ASC LIMIT 1",
            JOB_COLUMNS
        );
        let row = tx
            .query_row(
                &sql,
                params![job_type.as_str(), JobState::Pending.as_str(), millis(now)],
                JobRow::from_row,
            )
            .optional()?;
        let Some(row) = row else {
            return Ok(None);
        };
        let mut job = row.into_job()?;
        job.mark_running(now);
        Self::save(&tx, &job)?;
        tx.commit()?;
        Ok(Some(job))
    }

    async fn complete(&self, id: &str, now: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let mut job = Self::load_existing(&conn, id)?;
        job.mark_completed(now);
        Self::save(&conn, &job)
    }

    async fn fail(&self, id: &str, reason: &str, now: DateTime<Utc>) -> Result<JobState> {
        let conn = self.conn.lock().unwrap();
        let mut job = Self::load_existing(&conn, id)?;
        let state = job.record_failure(reason, now);
        Self::save(&conn, &job)?;
        Ok(state)
    }

    async fn get(&self, id: &str) -> Result<Option<Job>> {
        let conn = self.conn.lock().unwrap();
        Self::load(&conn, id)
    }

    async fn list(&self, state: Option<JobState>) -> Result<Vec<Job>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {} FROM jobs WHERE ?1 IS NULL OR state = ?1 ORDER BY seq ASC",
            JOB_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![state.map(|s| s.as_str())], JobRow::from_row)?;
        let mut jobs = Vec::new();
        for row in rows {
            jobs.push(row?.into_job()?);
        }
        Ok(jobs)
    }

    async fn next_run_after(&self, job_type: JobType) -> Result<Option<DateTime<Utc>>> {
        let conn = self.conn.lock().unwrap();
        let earliest: Option<i64> = conn.query_row(
            "SELECT MIN(run_after) FROM jobs WHERE job_type = ?1 AND state = ?2",
            params![job_type.as_str(), JobState::Pending.as_str()],
            |row| row.get(0),
        )?;
        earliest.map(from_millis).transpose()
    }

    async fn requeue_running(&self, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let requeued = conn.execute(
            "UPDATE jobs SET state = ?1, updated_at = ?2 WHERE state = ?3",
            params![JobState::Pending.as_str(), millis(now), JobState::Running.as_str()],
        )?;
        Ok(requeued)
    }
}

struct JobRow {
    id: String,
    job_type: String,
    payload: String,
    priority: i64,
    max_retries: i64,
    wait_ms: i64,
    state: String,
    failures: i64,
    run_after: i64,
    created_at: i64,
    updated_at: i64,
    failure_log: String,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            job_type: row.get(1)?,
            payload: row.get(2)?,
            priority: row.get(3)?,
            max_retries: row.get(4)?,
            wait_ms: row.get(5)?,
            state: row.get(6)?,
            failures: row.get(7)?,
            run_after: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
            failure_log: row.get(11)?,
        })
    }

    fn into_job(self) -> Result<Job> {
        let job_type = parse_job_type(&self.job_type)?;
        let state = JobState::parse(&self.state)
            .ok_or_else(|| HarvesterError::queue(format!("unknown job state '{}'", self.state)))?;
        let failure_log: Vec<FailureEntry> = serde_json::from_str(&self.failure_log)?;
        Ok(Job {
            id: self.id,
            payload: JobPayload::from_parts(job_type, serde_json::from_str(&self.payload)?)?,
            priority: Priority::from_rank(self.priority),
            retry: RetryPolicy {
                max_retries: self.max_retries.max(0) as u32,
                wait: Duration::from_millis(self.wait_ms.max(0) as u64),
            },
            state,
            failures: self.failures.max(0) as u32,
            run_after: from_millis(self.run_after)?,
            created_at: from_millis(self.created_at)?,
            updated_at: from_millis(self.updated_at)?,
            failure_log,
        })
    }
}

fn millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| HarvesterError::queue(format!("invalid timestamp {}", ms)))
}
