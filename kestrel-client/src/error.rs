//! Error types for the NEOS client

use thiserror::Error;

use crate::xmlrpc::RpcError;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur when talking to the NEOS server
#[derive(Debug, Error)]
pub enum ClientError {
    /// The liveness probe at session construction failed
    #[error("NEOS server is temporarily unavailable: {0}")]
    ServiceUnavailable(String),

    /// The service refused the job; carries the service's reason verbatim
    #[error("job not submitted: {0}")]
    SubmissionRejected(String),

    /// HTTP request failed
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// XML-RPC fault or malformed response
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// The call succeeded but the response had an unexpected shape
    #[error("unexpected response to {method}: {detail}")]
    UnexpectedResponse { method: String, detail: String },

    /// No solver name was configured
    #[error("no solver selected; choose from:\n{}", format_choices(.available))]
    NoSolverSelected { available: Vec<String> },

    /// The configured solver is not advertised by the service
    #[error("{requested} is not available on NEOS; choose from:\n{}", format_choices(.available))]
    SolverNotAvailable {
        requested: String,
        available: Vec<String>,
    },
}

fn format_choices(choices: &[String]) -> String {
    let mut out = String::new();
    for choice in choices {
        out.push('\t');
        out.push_str(choice);
        out.push('\n');
    }
    out
}
