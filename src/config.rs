use std::path::PathBuf;
use std::time::Duration;

/// Configuration for launching the external search worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Path to the worker executable
    pub binary_path: PathBuf,
    /// Upper bound on how long a cancelled worker may take to exit
    pub cancel_timeout: Duration,
    /// Kill and fail a worker that runs longer than this
    pub max_runtime: Option<Duration>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            binary_path: PathBuf::from("./pattern-finder"),
            cancel_timeout: Duration::from_millis(5000),
            max_runtime: None,
        }
    }
}

/// Admission and concurrency limits for the dispatcher.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Maximum simultaneous worker processes. Each worker already uses every
    /// core of the host, so the default is one.
    pub max_concurrent: usize,
    /// Maximum number of queued (not yet started) jobs
    pub max_queue: usize,
    /// Retry hint handed back when the queue is full
    pub retry_after_secs: u64,
    pub worker: WorkerConfig,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 1,
            max_queue: 100,
            retry_after_secs: 30,
            worker: WorkerConfig::default(),
        }
    }
}

impl DispatchConfig {
    pub fn new(binary_path: impl Into<PathBuf>) -> Self {
        Self {
            worker: WorkerConfig {
                binary_path: binary_path.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    pub fn with_max_queue(mut self, max_queue: usize) -> Self {
        self.max_queue = max_queue;
        self
    }

    pub fn with_retry_after_secs(mut self, secs: u64) -> Self {
        self.retry_after_secs = secs;
        self
    }

    pub fn with_cancel_timeout(mut self, timeout: Duration) -> Self {
        self.worker.cancel_timeout = timeout;
        self
    }

    pub fn with_max_runtime(mut self, max_runtime: Duration) -> Self {
        self.worker.max_runtime = Some(max_runtime);
        self
    }
}
