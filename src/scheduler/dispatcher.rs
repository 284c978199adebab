use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::auth::Identity;
use crate::config::DispatchConfig;
use crate::error::{DispatchError, Result};
use crate::scheduler::admission::{Admission, AdmissionController};
use crate::scheduler::job::{Job, JobRequest, JobStatus};
use crate::scheduler::queue::PendingQueue;
use crate::store::JobStore;
use crate::worker::{WorkerLauncher, WorkerOutcome};

const RESTART_FAILURE: &str = "orchestrator restarted while job was running";
const PANIC_FAILURE: &str = "worker task panicked before recording a result";

/// Jobs touched by [`Dispatcher::recover`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Recovery {
    pub requeued: usize,
    pub failed: usize,
}

/// In-memory dispatch state. Only ever touched under [`Dispatcher::state`].
#[derive(Debug, Default)]
struct DispatchState {
    queue: PendingQueue,
    /// Dispatched jobs whose worker task has not released its slot yet.
    running: HashMap<Uuid, CancellationToken>,
}

/// Admits, queues and dispatches jobs to worker processes.
///
/// Queue and running set live behind one mutex, so admission, pop and slot
/// accounting are serialized. The lock is never held across an `.await`.
/// Dispatch runs after every enqueue and after every worker completion; there
/// is no polling timer.
///
/// Store calls are synchronous single-row statements. Callers on the HTTP
/// path run them on the blocking pool; the dispatch path issues one or two
/// per job start and finish.
pub struct Dispatcher {
    store: Arc<dyn JobStore>,
    launcher: WorkerLauncher,
    admission: AdmissionController,
    max_concurrent: usize,
    state: Mutex<DispatchState>,
    shutdown: CancellationToken,
}

impl Dispatcher {
    pub fn new(config: &DispatchConfig, store: Arc<dyn JobStore>) -> Arc<Self> {
        Arc::new(Self {
            store,
            launcher: WorkerLauncher::new(config.worker.clone()),
            admission: AdmissionController::new(config.max_queue, config.retry_after_secs),
            max_concurrent: config.max_concurrent,
            state: Mutex::new(DispatchState::default()),
            shutdown: CancellationToken::new(),
        })
    }

    fn state(&self) -> MutexGuard<'_, DispatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn queue_len(&self) -> usize {
        self.state().queue.len()
    }

    pub fn running_count(&self) -> usize {
        self.state().running.len()
    }

    /// Validate, admit, persist and enqueue a new job.
    ///
    /// Nothing is written when validation or admission fails. Admission,
    /// insert and enqueue happen under the dispatch lock, so concurrent
    /// submissions cannot overfill the queue.
    pub fn submit(self: &Arc<Self>, identity: &Identity, request: &JobRequest) -> Result<Job> {
        let spec = request.validate()?;

        let job = {
            let mut state = self.state();
            let depth = state.queue.len();
            if let Admission::Rejected { retry_after_secs } = self.admission.try_admit(depth) {
                tracing::warn!(queue_depth = depth, "Job queue at capacity, submission rejected");
                return Err(DispatchError::QueueFull { retry_after_secs });
            }

            let job = Job::new(identity.owner.clone(), spec);
            self.store.insert(&job)?;
            state.queue.push(job.id);
            job
        };

        tracing::info!(job_id = %job.id, owner = %job.owner, "Job queued");
        self.pump();
        Ok(job)
    }

    /// Fetch a job on behalf of `identity`.
    pub fn get_job(&self, id: &Uuid, identity: &Identity) -> Result<Job> {
        let job = self.store.get(id)?.ok_or(DispatchError::JobNotFound(*id))?;
        if !identity.can_access(&job.owner) {
            return Err(DispatchError::Forbidden(*id));
        }
        Ok(job)
    }

    /// Administrative cancel of a queued or running job.
    ///
    /// The store transition commits first. A running job then has its worker
    /// killed; its slot is released by the worker task, never here.
    pub fn cancel(&self, id: &Uuid, identity: &Identity) -> Result<Job> {
        let job = self.store.get(id)?.ok_or(DispatchError::JobNotFound(*id))?;
        if !identity.is_admin() {
            return Err(DispatchError::Forbidden(*id));
        }
        if job.status.is_terminal() {
            return Err(DispatchError::AlreadyTerminal {
                id: *id,
                status: job.status,
            });
        }

        if !self.store.mark_cancelled(id, job.next_timestamp())? {
            let status = self
                .store
                .get(id)?
                .map(|current| current.status)
                .unwrap_or(job.status);
            return Err(DispatchError::AlreadyTerminal { id: *id, status });
        }

        {
            let mut state = self.state();
            state.queue.remove(id);
            if let Some(token) = state.running.get(id) {
                token.cancel();
            }
        }

        tracing::info!(job_id = %id, previous = %job.status, by = %identity.owner, "Job cancelled");
        self.store.get(id)?.ok_or(DispatchError::JobNotFound(*id))
    }

    /// Rebuild in-memory state from the store after a restart.
    ///
    /// Jobs left `running` have lost their worker and are marked failed.
    /// Queued jobs are requeued oldest first, ignoring the admission limit
    /// since they were already admitted.
    pub fn recover(self: &Arc<Self>) -> Result<Recovery> {
        let orphaned = self.store.list_by_status(JobStatus::Running)?;
        for job in &orphaned {
            self.store
                .mark_failed(&job.id, job.next_timestamp(), RESTART_FAILURE)?;
            tracing::warn!(job_id = %job.id, "Marked orphaned running job as failed");
        }

        let queued = self.store.list_by_status(JobStatus::Queued)?;
        {
            let mut state = self.state();
            for job in &queued {
                state.queue.push(job.id);
            }
        }

        let recovery = Recovery {
            requeued: queued.len(),
            failed: orphaned.len(),
        };
        tracing::info!(
            requeued = recovery.requeued,
            failed = recovery.failed,
            "Recovered dispatcher state"
        );
        self.pump();
        Ok(recovery)
    }

    /// Stop dispatching and kill every running worker. Their jobs stay
    /// `running` in the store and are handled by [`Dispatcher::recover`] on
    /// the next start.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Wait until no worker task holds a slot, or `timeout` passes. Returns
    /// true if idle.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.running_count() > 0 {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        true
    }

    /// Start queued jobs until the concurrency limit is reached or the queue
    /// is empty.
    fn pump(self: &Arc<Self>) {
        // Spawn outside the lock: a task dropped by a stopping runtime
        // releases its slot synchronously.
        for (slot, job, token) in self.claim_dispatchable() {
            tokio::spawn(Self::run_job(slot, job, token));
        }
    }

    fn claim_dispatchable(self: &Arc<Self>) -> Vec<(SlotGuard, Job, CancellationToken)> {
        // Declared before the lock guard so guards unwind after it is released.
        let mut claimed = Vec::new();
        let mut state = self.state();

        while state.running.len() < self.max_concurrent && !self.shutdown.is_cancelled() {
            let Some(id) = state.queue.pop() else {
                break;
            };

            let job = match self.store.get(&id) {
                Ok(Some(job)) if job.status == JobStatus::Queued => job,
                Ok(Some(job)) => {
                    tracing::debug!(job_id = %id, status = %job.status, "Skipping job that is no longer queued");
                    continue;
                }
                Ok(None) => {
                    tracing::warn!(job_id = %id, "Queued id has no job record");
                    continue;
                }
                Err(e) => {
                    tracing::error!(job_id = %id, error = %e, "Failed to load queued job");
                    state.queue.push_front(id);
                    break;
                }
            };

            let started_at = job.next_timestamp();
            let token = self.shutdown.child_token();
            state.running.insert(id, token.clone());

            match self.store.mark_running(&id, started_at) {
                Ok(true) => {}
                Ok(false) => {
                    state.running.remove(&id);
                    tracing::debug!(job_id = %id, "Job left queued state before dispatch");
                    continue;
                }
                Err(e) => {
                    state.running.remove(&id);
                    state.queue.push_front(id);
                    tracing::error!(job_id = %id, error = %e, "Failed to mark job running");
                    break;
                }
            }

            let job = Job {
                status: JobStatus::Running,
                started_at: Some(started_at),
                ..job
            };
            tracing::info!(
                job_id = %id,
                running = state.running.len(),
                queued = state.queue.len(),
                "Job dispatched"
            );

            let slot = SlotGuard {
                dispatcher: Arc::clone(self),
                job_id: id,
                completed: false,
            };
            claimed.push((slot, job, token));
        }

        claimed
    }

    async fn run_job(mut slot: SlotGuard, job: Job, token: CancellationToken) {
        let dispatcher = Arc::clone(&slot.dispatcher);
        let run = AssertUnwindSafe(async {
            let outcome = dispatcher.launcher.run(&job, token).await;
            dispatcher.record_outcome(&job, outcome);
        });

        if run.catch_unwind().await.is_err() {
            tracing::error!(job_id = %job.id, "Worker task panicked");
            dispatcher.record_panic(&job.id);
        }
        slot.completed = true;
    }

    fn record_outcome(&self, job: &Job, outcome: WorkerOutcome) {
        let finished_at = job.next_timestamp();
        let recorded = match outcome {
            WorkerOutcome::Completed(report) => {
                self.store.mark_finished(&job.id, finished_at, &report)
            }
            WorkerOutcome::Failed(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Job failed");
                self.store.mark_failed(&job.id, finished_at, &e.to_string())
            }
            WorkerOutcome::Cancelled => {
                tracing::info!(job_id = %job.id, "Worker stopped by cancellation");
                return;
            }
        };

        match recorded {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(job_id = %job.id, "Job left running state before its result was recorded");
            }
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Failed to record job result");
            }
        }
    }

    fn record_panic(&self, id: &Uuid) {
        let failed = self.store.get(id).and_then(|job| match job {
            Some(job) => self.store.mark_failed(id, job.next_timestamp(), PANIC_FAILURE),
            None => Ok(false),
        });
        if let Err(e) = failed {
            tracing::error!(job_id = %id, error = %e, "Failed to record panicked job");
        }
    }

    fn release(&self, id: &Uuid) {
        self.state().running.remove(id);
    }
}

/// Holds one concurrency slot for a dispatched job. Dropping it always frees
/// the slot. Only a task that ran to completion dispatches the next job: a
/// task dropped unfinished means the runtime is going away, and its job is
/// left `running` for [`Dispatcher::recover`].
struct SlotGuard {
    dispatcher: Arc<Dispatcher>,
    job_id: Uuid,
    completed: bool,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.dispatcher.release(&self.job_id);

        if !self.completed {
            tracing::warn!(job_id = %self.job_id, "Worker task dropped before completion");
            return;
        }
        if tokio::runtime::Handle::try_current().is_ok() {
            self.dispatcher.pump();
        }
    }
}
