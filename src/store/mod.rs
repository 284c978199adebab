//! Durable job record storage.
//!
//! The dispatcher only depends on [`JobStore`]. Every state transition is a
//! conditional update keyed on the current status, so two callers can never
//! both move the same job out of a given state.

mod sqlite;

pub use sqlite::SqliteJobStore;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::scheduler::job::{Job, JobStatus};
use crate::worker::WorkerReport;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

pub trait JobStore: Send + Sync {
    /// Insert a new record. The job must be `queued`.
    fn insert(&self, job: &Job) -> StoreResult<()>;

    fn get(&self, id: &Uuid) -> StoreResult<Option<Job>>;

    /// `queued -> running`. Returns false if the job was not queued.
    fn mark_running(&self, id: &Uuid, started_at: DateTime<Utc>) -> StoreResult<bool>;

    /// `running -> finished`. Returns false if the job was not running.
    fn mark_finished(
        &self,
        id: &Uuid,
        finished_at: DateTime<Utc>,
        report: &WorkerReport,
    ) -> StoreResult<bool>;

    /// `running -> failed`. Returns false if the job was not running.
    fn mark_failed(&self, id: &Uuid, finished_at: DateTime<Utc>, error: &str)
        -> StoreResult<bool>;

    /// `queued | running -> cancelled`. Returns false if the job was already
    /// terminal.
    fn mark_cancelled(&self, id: &Uuid, finished_at: DateTime<Utc>) -> StoreResult<bool>;

    /// All jobs in `status`, oldest submission first.
    fn list_by_status(&self, status: JobStatus) -> StoreResult<Vec<Job>>;
}
