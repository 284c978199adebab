use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{WorkerError, WorkerReport};
use crate::config::WorkerConfig;
use crate::scheduler::Job;

/// How a single worker run ended.
#[derive(Debug)]
pub enum WorkerOutcome {
    Completed(WorkerReport),
    Failed(WorkerError),
    Cancelled,
}

enum Interrupted {
    Cancelled,
    TimedOut(Duration),
}

struct Collected {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    status: ExitStatus,
}

/// Launches one worker process per job and decodes its result.
#[derive(Debug, Clone)]
pub struct WorkerLauncher {
    config: WorkerConfig,
}

impl WorkerLauncher {
    pub fn new(config: WorkerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Fixed argument contract of the worker binary.
    pub fn args(job: &Job) -> Vec<String> {
        vec![
            "--pattern".to_string(),
            job.pattern.clone(),
            "--protocol".to_string(),
            job.protocol.to_string(),
            "--input-length".to_string(),
            job.input_length.to_string(),
            "--format".to_string(),
            "json".to_string(),
        ]
    }

    /// Run the worker for `job` until it exits, `cancel` fires, or the
    /// configured runtime limit passes.
    pub async fn run(&self, job: &Job, cancel: CancellationToken) -> WorkerOutcome {
        tracing::info!(
            job_id = %job.id,
            binary = %self.config.binary_path.display(),
            pattern = %job.pattern,
            input_length = job.input_length,
            "Launching worker"
        );

        let mut child = match Command::new(&self.config.binary_path)
            .args(Self::args(job))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Failed to launch worker");
                return WorkerOutcome::Failed(WorkerError::Spawn(e));
            }
        };

        let max_runtime = self.config.max_runtime;
        let deadline = async move {
            match max_runtime {
                Some(limit) => {
                    tokio::time::sleep(limit).await;
                    limit
                }
                None => std::future::pending().await,
            }
        };

        let result = tokio::select! {
            collected = collect(&mut child) => Ok(collected),
            _ = cancel.cancelled() => Err(Interrupted::Cancelled),
            limit = deadline => Err(Interrupted::TimedOut(limit)),
        };

        match result {
            Ok(collected) => Self::process_output(job.id, collected),
            Err(interrupted) => {
                self.terminate(job.id, &mut child).await;
                match interrupted {
                    Interrupted::Cancelled => WorkerOutcome::Cancelled,
                    Interrupted::TimedOut(limit) => {
                        tracing::error!(job_id = %job.id, ?limit, "Worker exceeded runtime limit");
                        WorkerOutcome::Failed(WorkerError::TimedOut(limit))
                    }
                }
            }
        }
    }

    /// Kill the process and wait for it, bounded by `cancel_timeout`. A child
    /// still alive after that is reaped by the runtime once dropped.
    async fn terminate(&self, job_id: Uuid, child: &mut Child) {
        if let Err(e) = child.start_kill() {
            tracing::debug!(job_id = %job_id, error = %e, "Worker already exited before kill");
        }

        match tokio::time::timeout(self.config.cancel_timeout, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::info!(job_id = %job_id, %status, "Worker terminated");
            }
            Ok(Err(e)) => {
                tracing::warn!(job_id = %job_id, error = %e, "Failed to reap terminated worker");
            }
            Err(_) => {
                tracing::warn!(
                    job_id = %job_id,
                    timeout = ?self.config.cancel_timeout,
                    "Worker did not exit in time, leaving it to background reaping"
                );
            }
        }
    }

    fn process_output(job_id: Uuid, result: std::io::Result<Collected>) -> WorkerOutcome {
        let collected = match result {
            Ok(collected) => collected,
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Failed to collect worker output");
                return WorkerOutcome::Failed(WorkerError::Io(e));
            }
        };

        let stderr = String::from_utf8_lossy(&collected.stderr).trim().to_string();

        if !collected.status.success() {
            tracing::error!(
                job_id = %job_id,
                status = %collected.status,
                stderr = %stderr,
                "Worker exited unsuccessfully"
            );
            return WorkerOutcome::Failed(WorkerError::Exit {
                status: collected.status,
                stderr,
            });
        }

        if !stderr.is_empty() {
            tracing::debug!(job_id = %job_id, stderr = %stderr, "Worker diagnostics");
        }

        match WorkerReport::parse(&collected.stdout) {
            Ok(report) => {
                tracing::info!(job_id = %job_id, success = report.success, "Worker completed");
                WorkerOutcome::Completed(report)
            }
            Err(e) => {
                tracing::error!(
                    job_id = %job_id,
                    error = %e,
                    raw_output = %String::from_utf8_lossy(&collected.stdout),
                    "Failed to decode worker output"
                );
                WorkerOutcome::Failed(e)
            }
        }
    }
}

/// Drain stdout and stderr to end-of-stream and wait for exit.
async fn collect(child: &mut Child) -> std::io::Result<Collected> {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let (stdout, stderr, status) =
        tokio::join!(read_to_end(stdout), read_to_end(stderr), child.wait());
    Ok(Collected {
        stdout: stdout?,
        stderr: stderr?,
        status: status?,
    })
}

async fn read_to_end<R: AsyncRead + Unpin>(reader: Option<R>) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        reader.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}
