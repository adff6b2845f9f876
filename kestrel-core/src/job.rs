//! Job handles and remote-reported job status

use serde::{Deserialize, Serialize};

/// A handle to one remote job: the service-assigned job number plus the
/// password that authorizes all further operations on it.
///
/// Handles are created only from a successful submission and are immutable
/// afterwards. The job number is always positive; a zero number in a
/// submission response means the job was not submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    pub number: i32,
    pub password: String,
}

impl JobHandle {
    pub fn new(number: i32, password: impl Into<String>) -> Self {
        Self {
            number,
            password: password.into(),
        }
    }
}

impl std::fmt::Display for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.number, self.password)
    }
}

/// Status of a remote job as reported by the service.
///
/// `Running` and `Waiting` are the only non-terminal states; any other
/// reported string ends the poll loop and triggers retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Running,
    Waiting,
    /// Any other service-reported status ("Done", "Aborted", ...). Terminal.
    Other(String),
}

impl JobStatus {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "Running" => JobStatus::Running,
            "Waiting" => JobStatus::Waiting,
            other => JobStatus::Other(other.to_string()),
        }
    }

    /// Whether the job is still making progress on the remote side.
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Running | JobStatus::Waiting)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Running => write!(f, "Running"),
            JobStatus::Waiting => write!(f, "Waiting"),
            JobStatus::Other(s) => write!(f, "{}", s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_known_statuses() {
        assert_eq!(JobStatus::parse("Running"), JobStatus::Running);
        assert_eq!(JobStatus::parse("Waiting"), JobStatus::Waiting);
        assert_eq!(
            JobStatus::parse("Done"),
            JobStatus::Other("Done".to_string())
        );
    }

    #[test]
    fn only_running_and_waiting_are_active() {
        assert!(JobStatus::Running.is_active());
        assert!(JobStatus::Waiting.is_active());
        assert!(!JobStatus::Other("Done".to_string()).is_active());
        assert!(!JobStatus::Other("Aborted".to_string()).is_active());
        // Case matters: the service is case-sensitive about its own states.
        assert!(!JobStatus::parse("running").is_active());
    }

    #[test]
    fn handle_display_matches_store_format() {
        let job = JobHandle::new(2746671, "AnVsgUKc");
        assert_eq!(job.to_string(), "2746671 AnVsgUKc");
    }
}
