use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::{JobStore, StoreResult};
use crate::error::StoreError;
use crate::scheduler::job::{Job, JobStatus, Protocol};
use crate::worker::WorkerReport;

const DB_FILE: &str = "jobs.db";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    owner TEXT NOT NULL,
    pattern TEXT NOT NULL,
    protocol TEXT NOT NULL,
    input_length INTEGER NOT NULL,
    status TEXT NOT NULL,
    submitted_at_ms INTEGER NOT NULL,
    started_at_ms INTEGER,
    finished_at_ms INTEGER,
    success INTEGER,
    input TEXT,
    digest TEXT,
    error TEXT
);
CREATE INDEX IF NOT EXISTS jobs_status_submitted ON jobs(status, submitted_at_ms);
"#;

const SELECT_COLUMNS: &str = "id, owner, pattern, protocol, input_length, status, \
     submitted_at_ms, started_at_ms, finished_at_ms, success, input, digest, error";

/// SQLite-backed [`JobStore`]. One connection, serialized behind a mutex.
#[derive(Debug)]
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
}

impl SqliteJobStore {
    pub fn open(data_dir: impl AsRef<Path>) -> StoreResult<Self> {
        let data_dir = data_dir.as_ref();
        std::fs::create_dir_all(data_dir)?;

        let conn = Connection::open(data_dir.join(DB_FILE))?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl JobStore for SqliteJobStore {
    fn insert(&self, job: &Job) -> StoreResult<()> {
        self.conn()?.execute(
            r#"
            INSERT INTO jobs (id, owner, pattern, protocol, input_length, status, submitted_at_ms)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                job.id.to_string(),
                job.owner,
                job.pattern,
                job.protocol.as_str(),
                job.input_length,
                job.status.as_str(),
                job.submitted_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    fn get(&self, id: &Uuid) -> StoreResult<Option<Job>> {
        let conn = self.conn()?;
        let raw = conn
            .query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM jobs WHERE id=?1"),
                params![id.to_string()],
                RawJob::from_row,
            )
            .optional()?;
        raw.map(Job::try_from).transpose()
    }

    fn mark_running(&self, id: &Uuid, started_at: DateTime<Utc>) -> StoreResult<bool> {
        let changed = self.conn()?.execute(
            r#"
            UPDATE jobs
            SET status='running', started_at_ms=?2
            WHERE id=?1 AND status='queued'
            "#,
            params![id.to_string(), started_at.timestamp_millis()],
        )?;
        Ok(changed == 1)
    }

    fn mark_finished(
        &self,
        id: &Uuid,
        finished_at: DateTime<Utc>,
        report: &WorkerReport,
    ) -> StoreResult<bool> {
        let changed = self.conn()?.execute(
            r#"
            UPDATE jobs
            SET status='finished', finished_at_ms=?2, success=?3, input=?4, digest=?5
            WHERE id=?1 AND status='running'
            "#,
            params![
                id.to_string(),
                finished_at.timestamp_millis(),
                report.success,
                report.input,
                report.digest,
            ],
        )?;
        Ok(changed == 1)
    }

    fn mark_failed(
        &self,
        id: &Uuid,
        finished_at: DateTime<Utc>,
        error: &str,
    ) -> StoreResult<bool> {
        let changed = self.conn()?.execute(
            r#"
            UPDATE jobs
            SET status='failed', finished_at_ms=?2, error=?3
            WHERE id=?1 AND status='running'
            "#,
            params![id.to_string(), finished_at.timestamp_millis(), error],
        )?;
        Ok(changed == 1)
    }

    fn mark_cancelled(&self, id: &Uuid, finished_at: DateTime<Utc>) -> StoreResult<bool> {
        let changed = self.conn()?.execute(
            r#"
            UPDATE jobs
            SET status='cancelled', finished_at_ms=?2
            WHERE id=?1 AND (status='queued' OR status='running')
            "#,
            params![id.to_string(), finished_at.timestamp_millis()],
        )?;
        Ok(changed == 1)
    }

    fn list_by_status(&self, status: JobStatus) -> StoreResult<Vec<Job>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM jobs WHERE status=?1 ORDER BY submitted_at_ms, rowid"
        ))?;
        let raws = stmt
            .query_map(params![status.as_str()], RawJob::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        raws.into_iter().map(Job::try_from).collect()
    }
}

/// Column values as stored, before parsing ids, enums and timestamps.
struct RawJob {
    id: String,
    owner: String,
    pattern: String,
    protocol: String,
    input_length: u32,
    status: String,
    submitted_at_ms: i64,
    started_at_ms: Option<i64>,
    finished_at_ms: Option<i64>,
    success: Option<bool>,
    input: Option<String>,
    digest: Option<String>,
    error: Option<String>,
}

impl RawJob {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            owner: row.get(1)?,
            pattern: row.get(2)?,
            protocol: row.get(3)?,
            input_length: row.get(4)?,
            status: row.get(5)?,
            submitted_at_ms: row.get(6)?,
            started_at_ms: row.get(7)?,
            finished_at_ms: row.get(8)?,
            success: row.get(9)?,
            input: row.get(10)?,
            digest: row.get(11)?,
            error: row.get(12)?,
        })
    }
}

impl TryFrom<RawJob> for Job {
    type Error = StoreError;

    fn try_from(raw: RawJob) -> Result<Self, Self::Error> {
        let corrupt = |reason: String| StoreError::Corrupt {
            id: raw.id.clone(),
            reason,
        };
        let timestamp = |ms: i64| {
            DateTime::from_timestamp_millis(ms)
                .ok_or_else(|| corrupt(format!("timestamp out of range: {ms}")))
        };

        let id = Uuid::parse_str(&raw.id).map_err(|e| corrupt(e.to_string()))?;
        let protocol: Protocol = raw
            .protocol
            .parse()
            .map_err(|_| corrupt(format!("unknown protocol '{}'", raw.protocol)))?;
        let status: JobStatus = raw.status.parse().map_err(corrupt)?;
        let submitted_at = timestamp(raw.submitted_at_ms)?;
        let started_at = raw.started_at_ms.map(timestamp).transpose()?;
        let finished_at = raw.finished_at_ms.map(timestamp).transpose()?;

        Ok(Job {
            id,
            owner: raw.owner,
            pattern: raw.pattern,
            protocol,
            input_length: raw.input_length,
            status,
            submitted_at,
            started_at,
            finished_at,
            success: raw.success,
            input: raw.input,
            digest: raw.digest,
            error: raw.error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::job::JobRequest;

    fn queued_job(owner: &str) -> Job {
        let spec = JobRequest::new("abc", "sha256", 6).validate().unwrap();
        Job::new(owner, spec)
    }

    #[test]
    fn insert_then_get() {
        let store = SqliteJobStore::open_in_memory().unwrap();
        let job = queued_job("alice");
        store.insert(&job).unwrap();
        assert_eq!(store.get(&job.id).unwrap(), Some(job));
        assert_eq!(store.get(&Uuid::new_v4()).unwrap(), None);
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let store = SqliteJobStore::open_in_memory().unwrap();
        let job = queued_job("alice");
        store.insert(&job).unwrap();
        assert!(store.insert(&job).is_err());
    }

    #[test]
    fn running_transition_only_from_queued() {
        let store = SqliteJobStore::open_in_memory().unwrap();
        let job = queued_job("alice");
        store.insert(&job).unwrap();

        let started = job.next_timestamp();
        assert!(store.mark_running(&job.id, started).unwrap());
        assert!(!store.mark_running(&job.id, started).unwrap());

        let stored = store.get(&job.id).unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Running);
        assert_eq!(stored.started_at, Some(started));
    }

    #[test]
    fn finished_records_report() {
        let store = SqliteJobStore::open_in_memory().unwrap();
        let job = queued_job("alice");
        store.insert(&job).unwrap();

        let report = WorkerReport {
            success: false,
            input: Some("123".to_string()),
            digest: Some("ab12".to_string()),
            message: None,
        };
        // Not running yet.
        assert!(!store
            .mark_finished(&job.id, job.next_timestamp(), &report)
            .unwrap());

        store.mark_running(&job.id, job.next_timestamp()).unwrap();
        assert!(store
            .mark_finished(&job.id, job.next_timestamp(), &report)
            .unwrap());

        let stored = store.get(&job.id).unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Finished);
        assert_eq!(stored.success, Some(false));
        assert_eq!(stored.input.as_deref(), Some("123"));
        assert_eq!(stored.digest.as_deref(), Some("ab12"));
        assert!(stored.duration_ms().is_some());
    }

    #[test]
    fn cancel_is_terminal() {
        let store = SqliteJobStore::open_in_memory().unwrap();
        let job = queued_job("alice");
        store.insert(&job).unwrap();

        assert!(store.mark_cancelled(&job.id, job.next_timestamp()).unwrap());
        assert!(!store.mark_cancelled(&job.id, job.next_timestamp()).unwrap());
        assert!(!store.mark_running(&job.id, job.next_timestamp()).unwrap());
        assert_eq!(
            store.get(&job.id).unwrap().unwrap().status,
            JobStatus::Cancelled
        );
    }

    #[test]
    fn failed_only_from_running() {
        let store = SqliteJobStore::open_in_memory().unwrap();
        let job = queued_job("alice");
        store.insert(&job).unwrap();

        assert!(!store.mark_failed(&job.id, job.next_timestamp(), "boom").unwrap());
        store.mark_running(&job.id, job.next_timestamp()).unwrap();
        assert!(store.mark_failed(&job.id, job.next_timestamp(), "boom").unwrap());

        let stored = store.get(&job.id).unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.error.as_deref(), Some("boom"));
        assert!(stored.success.is_none());
    }

    #[test]
    fn list_by_status_in_submission_order() {
        let store = SqliteJobStore::open_in_memory().unwrap();
        let jobs: Vec<Job> = (0..3).map(|_| queued_job("bob")).collect();
        for job in &jobs {
            store.insert(job).unwrap();
        }
        store.mark_running(&jobs[1].id, jobs[1].next_timestamp()).unwrap();

        let queued: Vec<Uuid> = store
            .list_by_status(JobStatus::Queued)
            .unwrap()
            .into_iter()
            .map(|j| j.id)
            .collect();
        assert_eq!(queued, vec![jobs[0].id, jobs[2].id]);
        assert_eq!(store.list_by_status(JobStatus::Running).unwrap().len(), 1);
    }

    #[test]
    fn reopen_keeps_records() {
        let dir = tempfile::tempdir().unwrap();
        let job = queued_job("carol");
        {
            let store = SqliteJobStore::open(dir.path()).unwrap();
            store.insert(&job).unwrap();
        }
        let store = SqliteJobStore::open(dir.path()).unwrap();
        assert_eq!(store.get(&job.id).unwrap(), Some(job));
    }
}
