use serde::{Deserialize, Serialize};

use super::WorkerError;

/// Version of the worker's JSON result document this crate understands.
pub const WORKER_SCHEMA_VERSION: u32 = 1;

/// Decoded worker result.
///
/// `success: false` is a normal outcome (the search space held no match), not
/// a failure. `input`/`digest` are present whenever the worker sent match data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerReport {
    pub success: bool,
    pub input: Option<String>,
    pub digest: Option<String>,
    pub message: Option<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct WireResult {
    success: bool,
    match_data: Option<WireMatch>,
    message: Option<String>,
    schema_version: Option<u32>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct WireMatch {
    input: String,
    digest: String,
}

impl WorkerReport {
    /// Decode the complete stdout of a worker. Only the nested `match_data`
    /// layout is accepted.
    pub fn parse(stdout: &[u8]) -> Result<Self, WorkerError> {
        if stdout.iter().all(u8::is_ascii_whitespace) {
            return Err(WorkerError::MalformedOutput("empty output".to_string()));
        }

        let wire: WireResult = serde_json::from_slice(stdout)
            .map_err(|e| WorkerError::MalformedOutput(e.to_string()))?;

        if let Some(version) = wire.schema_version {
            if version != WORKER_SCHEMA_VERSION {
                return Err(WorkerError::UnsupportedSchema(version));
            }
        }

        let (input, digest) = match wire.match_data {
            Some(m) => (Some(m.input), Some(m.digest)),
            None => (None, None),
        };

        Ok(Self {
            success: wire.success,
            input,
            digest,
            message: wire.message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_match() {
        let report = WorkerReport::parse(
            br#"{"success":true,"match_data":{"input":"1234","digest":"00ff"},"message":null}"#,
        )
        .unwrap();
        assert!(report.success);
        assert_eq!(report.input.as_deref(), Some("1234"));
        assert_eq!(report.digest.as_deref(), Some("00ff"));
    }

    #[test]
    fn no_match_is_not_an_error() {
        let report =
            WorkerReport::parse(br#"{"success":false,"match_data":null,"message":null}"#).unwrap();
        assert!(!report.success);
        assert!(report.input.is_none());
        assert!(report.digest.is_none());
    }

    #[test]
    fn trailing_newline_is_fine() {
        let report = WorkerReport::parse(b"{\"success\":false,\"match_data\":null}\n").unwrap();
        assert!(!report.success);
    }

    #[test]
    fn top_level_match_fields_are_rejected() {
        let err = WorkerReport::parse(br#"{"success":true,"input":"1","digest":"ab"}"#).unwrap_err();
        assert!(matches!(err, WorkerError::MalformedOutput(_)));
    }

    #[test]
    fn non_json_is_rejected() {
        assert!(matches!(
            WorkerReport::parse(b"Match Found\nInput: 1"),
            Err(WorkerError::MalformedOutput(_))
        ));
        assert!(matches!(
            WorkerReport::parse(b"  \n"),
            Err(WorkerError::MalformedOutput(_))
        ));
    }

    #[test]
    fn truncated_document_is_rejected() {
        assert!(matches!(
            WorkerReport::parse(br#"{"success":true,"match_data":{"inp"#),
            Err(WorkerError::MalformedOutput(_))
        ));
    }

    #[test]
    fn schema_version_is_checked() {
        assert!(WorkerReport::parse(br#"{"success":false,"match_data":null,"schema_version":1}"#).is_ok());
        assert!(matches!(
            WorkerReport::parse(br#"{"success":false,"match_data":null,"schema_version":2}"#),
            Err(WorkerError::UnsupportedSchema(2))
        ));
    }
}
