use thiserror::Error;
use uuid::Uuid;

use crate::scheduler::job::{JobStatus, ValidationError};

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Invalid job request: {0}")]
    Validation(#[from] ValidationError),

    #[error("Job queue is full, retry after {retry_after_secs}s")]
    QueueFull { retry_after_secs: u64 },

    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    #[error("Not authorized to access job {0}")]
    Forbidden(Uuid),

    #[error("Job {id} is already {status}")]
    AlreadyTerminal { id: Uuid, status: JobStatus },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt job record {id}: {reason}")]
    Corrupt { id: String, reason: String },

    #[error("store lock poisoned")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, DispatchError>;
