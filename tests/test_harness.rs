//! Shared helpers for dispatcher, launcher and API integration tests.
//!
//! Workers are stand-in shell scripts written to a temp dir; they ignore the
//! search arguments and print a canned result.

#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use uuid::Uuid;

use digest_dispatch::auth::{Identity, Role};
use digest_dispatch::config::DispatchConfig;
use digest_dispatch::scheduler::{Dispatcher, Job, JobRequest, JobStatus};
use digest_dispatch::store::{JobStore, SqliteJobStore};

pub const MATCH_OUTPUT: &str =
    r#"{"success":true,"match_data":{"input":"42","digest":"00ab42"},"message":null}"#;

/// Prints a match immediately.
pub fn match_script() -> String {
    format!("printf '%s' '{MATCH_OUTPUT}'")
}

/// Sleeps, then prints a match.
pub fn slow_match_script(secs: f32) -> String {
    format!("sleep {secs}\nprintf '%s' '{MATCH_OUTPUT}'")
}

/// Reports no match but still sends the last candidate it tried.
pub fn no_match_script() -> String {
    r#"printf '%s' '{"success":false,"match_data":{"input":"999999","digest":"ffee"},"message":null}'"#
        .to_string()
}

pub fn failing_script() -> String {
    "echo 'search exploded' >&2\nexit 3".to_string()
}

pub fn garbage_script() -> String {
    "echo 'Match Found'\necho 'Input: 42'".to_string()
}

/// Runs until killed.
pub fn hanging_script() -> String {
    "exec sleep 30".to_string()
}

/// Write an executable `/bin/sh` script and return its path.
pub fn write_worker(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

pub fn alice() -> Identity {
    Identity::new("alice", Role::Standard)
}

pub fn bob() -> Identity {
    Identity::new("bob", Role::Standard)
}

pub fn admin() -> Identity {
    Identity::new("ops", Role::Admin)
}

pub fn valid_request() -> JobRequest {
    JobRequest::new("00ab", "sha256", 6)
}

/// A dispatcher over an in-memory store, running the given worker script.
pub struct TestDispatcher {
    pub dispatcher: Arc<Dispatcher>,
    pub store: Arc<SqliteJobStore>,
    pub dir: TempDir,
}

impl TestDispatcher {
    pub fn new(script: &str, configure: impl FnOnce(DispatchConfig) -> DispatchConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let binary = write_worker(dir.path(), "worker.sh", script);
        let store = Arc::new(SqliteJobStore::open_in_memory().unwrap());
        let config = configure(
            DispatchConfig::new(binary).with_cancel_timeout(Duration::from_millis(500)),
        );
        let dispatcher = Dispatcher::new(&config, store.clone());
        Self {
            dispatcher,
            store,
            dir,
        }
    }

    pub fn submit(&self) -> Job {
        self.dispatcher.submit(&alice(), &valid_request()).unwrap()
    }

    pub fn job(&self, id: &Uuid) -> Job {
        self.store.get(id).unwrap().expect("job record exists")
    }

    pub fn count(&self, status: JobStatus) -> usize {
        self.store.list_by_status(status).unwrap().len()
    }

    /// Poll until the job reaches `status`, panicking after `timeout`.
    pub async fn wait_for_status(&self, id: &Uuid, status: JobStatus, timeout: Duration) -> Job {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let job = self.job(id);
            if job.status == status {
                return job;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!("job {id} stuck in {} waiting for {status}", job.status);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
