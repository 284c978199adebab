use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

const MAX_PATTERN_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Finished,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Finished => "finished",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Finished | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "finished" => Ok(JobStatus::Finished),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(format!("unknown job status '{other}'")),
        }
    }
}

/// Hashing scheme the worker searches against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Sha256,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Sha256 => "sha256",
        }
    }

    /// Inclusive bounds for `inputLength` under this protocol.
    pub fn input_length_bounds(&self) -> (u32, u32) {
        match self {
            Protocol::Sha256 => (1, 64),
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sha256" => Ok(Protocol::Sha256),
            _ => Err(ValidationError::Protocol),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid hexadecimal pattern (1-64 hex digits)")]
    Pattern,

    #[error("Invalid protocol")]
    Protocol,

    #[error("Invalid input length ({min}-{max})")]
    InputLength { min: u32, max: u32 },
}

impl ValidationError {
    /// Name of the request field that failed, as it appears on the wire.
    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::Pattern => "pattern",
            ValidationError::Protocol => "protocol",
            ValidationError::InputLength { .. } => "inputLength",
        }
    }
}

/// Untrusted submission body. Fields stay loosely typed so that a value of
/// the wrong type is reported against its own field.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct JobRequest {
    pub pattern: Value,
    pub protocol: Value,
    pub input_length: Value,
}

impl JobRequest {
    pub fn new(pattern: &str, protocol: &str, input_length: i64) -> Self {
        Self {
            pattern: Value::from(pattern),
            protocol: Value::from(protocol),
            input_length: Value::from(input_length),
        }
    }

    /// Check fields in wire order and return the first failure.
    pub fn validate(&self) -> Result<JobSpec, ValidationError> {
        let pattern = self
            .pattern
            .as_str()
            .filter(|p| is_hex_pattern(p))
            .ok_or(ValidationError::Pattern)?
            .to_ascii_lowercase();

        let protocol: Protocol = self
            .protocol
            .as_str()
            .ok_or(ValidationError::Protocol)?
            .parse()?;

        let (min, max) = protocol.input_length_bounds();
        let input_length = match &self.input_length {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        }
        .filter(|n| (i64::from(min)..=i64::from(max)).contains(n))
        .ok_or(ValidationError::InputLength { min, max })?;

        Ok(JobSpec {
            pattern,
            protocol,
            input_length: input_length as u32,
        })
    }
}

fn is_hex_pattern(s: &str) -> bool {
    !s.is_empty() && s.len() <= MAX_PATTERN_LEN && s.chars().all(|c| c.is_ascii_hexdigit())
}

/// A validated search task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub pattern: String,
    pub protocol: Protocol,
    pub input_length: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub owner: String,
    pub pattern: String,
    pub protocol: Protocol,
    pub input_length: u32,
    pub status: JobStatus,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub success: Option<bool>,
    pub input: Option<String>,
    pub digest: Option<String>,
    pub error: Option<String>,
}

impl Job {
    pub fn new(owner: impl Into<String>, spec: JobSpec) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner: owner.into(),
            pattern: spec.pattern,
            protocol: spec.protocol,
            input_length: spec.input_length,
            status: JobStatus::Queued,
            submitted_at: now_millis(),
            started_at: None,
            finished_at: None,
            success: None,
            input: None,
            digest: None,
            error: None,
        }
    }

    /// `finishedAt - startedAt`, only once both are known.
    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.finished_at) {
            (Some(started), Some(finished)) => Some((finished - started).num_milliseconds()),
            _ => None,
        }
    }

    /// Timestamp for the next transition: now, but never earlier than any
    /// timestamp already recorded on this job.
    pub fn next_timestamp(&self) -> DateTime<Utc> {
        let floor = self
            .finished_at
            .or(self.started_at)
            .unwrap_or(self.submitted_at);
        now_millis().max(floor)
    }
}

/// Current time truncated to the millisecond precision the store keeps.
pub fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn valid_request_is_normalised() {
        let spec = JobRequest::new("00ABcd", "sha256", 6).validate().unwrap();
        assert_eq!(spec.pattern, "00abcd");
        assert_eq!(spec.protocol, Protocol::Sha256);
        assert_eq!(spec.input_length, 6);
    }

    #[test]
    fn pattern_bounds() {
        assert!(JobRequest::new("a", "sha256", 1).validate().is_ok());
        assert!(JobRequest::new(&"f".repeat(64), "sha256", 1).validate().is_ok());
        assert_eq!(
            JobRequest::new("", "sha256", 1).validate(),
            Err(ValidationError::Pattern)
        );
        assert_eq!(
            JobRequest::new(&"f".repeat(65), "sha256", 1).validate(),
            Err(ValidationError::Pattern)
        );
        assert_eq!(
            JobRequest::new("0x12", "sha256", 1).validate(),
            Err(ValidationError::Pattern)
        );
    }

    #[test]
    fn unknown_protocol_rejected() {
        let err = JobRequest::new("ab", "md5", 4).validate().unwrap_err();
        assert_eq!(err, ValidationError::Protocol);
        assert_eq!(err.field(), "protocol");
    }

    #[test]
    fn input_length_bounds() {
        for n in [0, 65, -3] {
            let err = JobRequest::new("ab", "sha256", n).validate().unwrap_err();
            assert_eq!(err.field(), "inputLength");
        }
        assert!(JobRequest::new("ab", "sha256", 64).validate().is_ok());
    }

    #[test]
    fn wrong_types_reported_per_field() {
        let req: JobRequest = serde_json::from_value(json!({
            "pattern": 12,
            "protocol": "sha256",
            "inputLength": 4
        }))
        .unwrap();
        assert_eq!(req.validate().unwrap_err().field(), "pattern");

        let req: JobRequest = serde_json::from_value(json!({
            "pattern": "ab",
            "protocol": "sha256",
        }))
        .unwrap();
        assert_eq!(req.validate().unwrap_err().field(), "inputLength");
    }

    #[test]
    fn numeric_string_input_length_accepted() {
        let req: JobRequest = serde_json::from_value(json!({
            "pattern": "ab",
            "protocol": "sha256",
            "inputLength": "12"
        }))
        .unwrap();
        assert_eq!(req.validate().unwrap().input_length, 12);
    }

    #[test]
    fn new_job_is_queued() {
        let spec = JobRequest::new("ab", "sha256", 4).validate().unwrap();
        let job = Job::new("alice", spec);
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.owner, "alice");
        assert!(job.started_at.is_none());
        assert!(job.duration_ms().is_none());
        assert!(job.next_timestamp() >= job.submitted_at);
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            JobStatus::Queued,
            JobStatus::Running,
            JobStatus::Finished,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>(), Ok(status));
        }
        assert!(JobStatus::Finished.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }
}
