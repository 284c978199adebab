/// Outcome of an admission decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    Rejected { retry_after_secs: u64 },
}

/// Accepts or rejects submissions based on pending queue depth.
#[derive(Debug, Clone, Copy)]
pub struct AdmissionController {
    max_queue: usize,
    retry_after_secs: u64,
}

impl AdmissionController {
    pub fn new(max_queue: usize, retry_after_secs: u64) -> Self {
        Self {
            max_queue,
            retry_after_secs,
        }
    }

    pub fn try_admit(&self, queue_depth: usize) -> Admission {
        if queue_depth >= self.max_queue {
            Admission::Rejected {
                retry_after_secs: self.retry_after_secs,
            }
        } else {
            Admission::Accepted
        }
    }
}
