//! External worker process boundary.
//!
//! Each dispatched job runs in exactly one worker process:
//! - **Launch**: [`WorkerLauncher::run`] spawns the configured binary with
//!   `--pattern`, `--protocol`, `--input-length` and `--format json`
//! - **Output**: stdout is buffered until the stream closes, then decoded as a
//!   single JSON document ([`WorkerReport::parse`]); stderr is diagnostics only
//! - **Cancellation**: a `CancellationToken` kills the process, with a bounded
//!   wait for it to exit
//!
//! # Wire schema (version 1)
//!
//! ```json
//! {"success": true, "match_data": {"input": "...", "digest": "..."}, "message": null}
//! ```
//!
//! `match_data` is `null` when nothing matched. Unknown fields, including the
//! older top-level `input`/`digest` layout, make the output malformed.

pub mod launcher;
pub mod protocol;

use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;

pub use launcher::{WorkerLauncher, WorkerOutcome};
pub use protocol::{WorkerReport, WORKER_SCHEMA_VERSION};

/// Reasons a worker run produced no usable result.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("failed to launch worker: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("failed to read worker output: {0}")]
    Io(#[source] std::io::Error),

    #[error("worker exited with {status}: {stderr}")]
    Exit { status: ExitStatus, stderr: String },

    #[error("malformed worker output: {0}")]
    MalformedOutput(String),

    #[error("unsupported worker schema version {0}")]
    UnsupportedSchema(u32),

    #[error("worker exceeded runtime limit of {0:?}")]
    TimedOut(Duration),
}
