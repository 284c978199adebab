pub mod admission;
pub mod dispatcher;
pub mod job;
pub mod queue;

pub use admission::{Admission, AdmissionController};
pub use dispatcher::{Dispatcher, Recovery};
pub use job::{Job, JobRequest, JobSpec, JobStatus, Protocol, ValidationError};
pub use queue::PendingQueue;
