//! NEOS XML-RPC client
//!
//! A thin, typed call surface over the NEOS server's XML-RPC interface.
//! The client owns no business state: it wraps an HTTP connection handle,
//! performs a liveness probe at construction, and exposes one method per
//! remote operation. The [`NeosApi`] trait is the seam the lifecycle layer
//! is written against, so it can be driven by a scripted implementation in
//! tests.

pub mod error;
pub mod solvers;
pub mod xmlrpc;

pub use error::{ClientError, Result};

use std::time::Duration;

use async_trait::async_trait;
use kestrel_core::{JobHandle, JobStatus, SubmissionPayload};
use reqwest::header::CONTENT_TYPE;
use tracing::debug;

use crate::xmlrpc::Value;

/// Default NEOS endpoint.
pub const DEFAULT_HOST: &str = "neos-server.org";
pub const DEFAULT_PORT: u16 = 3333;

const CALL_TIMEOUT: Duration = Duration::from_secs(90);

/// Account credentials for authenticated submission.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// The typed call surface of the NEOS job interface.
#[async_trait]
pub trait NeosApi: Send + Sync {
    /// Submit a job. Authenticated when credentials are given, anonymous
    /// otherwise. A response without a usable job number is a rejection.
    async fn submit(
        &self,
        payload: &SubmissionPayload,
        credentials: Option<&Credentials>,
    ) -> Result<JobHandle>;

    /// Current remote status of the job.
    async fn job_status(&self, job: &JobHandle) -> Result<JobStatus>;

    /// Incremental output since `offset`. The offset must be non-negative
    /// and threaded from the previous call's returned offset.
    async fn intermediate_output(&self, job: &JobHandle, offset: i32) -> Result<(String, i32)>;

    /// The job's final output.
    async fn final_results(&self, job: &JobHandle) -> Result<String>;

    /// Cancel the job; returns the service's confirmation text.
    async fn kill(&self, job: &JobHandle) -> Result<String>;

    /// Solver names the service advertises for a job category.
    async fn solvers_in_category(&self, category: &str) -> Result<Vec<String>>;
}

/// XML-RPC client for the NEOS server.
#[derive(Debug, Clone)]
pub struct NeosClient {
    endpoint: String,
    submitted_by: String,
    http: reqwest::Client,
}

impl NeosClient {
    /// Connect to the server and probe it for liveness.
    ///
    /// `submitted_by` tags anonymous submissions with who sent them
    /// (conventionally `user on host`).
    pub async fn connect(
        host: &str,
        port: u16,
        submitted_by: impl Into<String>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(CALL_TIMEOUT).build()?;
        let client = Self {
            endpoint: format!("https://{host}:{port}"),
            submitted_by: submitted_by.into(),
            http,
        };
        client.ping().await?;
        Ok(client)
    }

    /// Liveness probe; any failure is reported as the service being
    /// unavailable.
    pub async fn ping(&self) -> Result<()> {
        self.call("ping", Vec::new())
            .await
            .map(|_| ())
            .map_err(|err| ClientError::ServiceUnavailable(err.to_string()))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        debug!(method, "calling NEOS");
        let body = xmlrpc::render_call(method, &params);
        let response = self
            .http
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "text/xml")
            .body(body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(
                xmlrpc::RpcError::Malformed(format!("server returned HTTP {status}")).into(),
            );
        }
        let text = response.text().await?;
        Ok(xmlrpc::parse_response(&text)?)
    }

    fn unexpected(method: &str, response: &Value) -> ClientError {
        ClientError::UnexpectedResponse {
            method: method.to_string(),
            detail: format!("{response:?}"),
        }
    }
}

#[async_trait]
impl NeosApi for NeosClient {
    async fn submit(
        &self,
        payload: &SubmissionPayload,
        credentials: Option<&Credentials>,
    ) -> Result<JobHandle> {
        let document = Value::String(payload.as_xml().to_string());
        let (method, params) = match credentials {
            None => (
                "submitJob",
                vec![document, Value::String(self.submitted_by.clone())],
            ),
            Some(account) => (
                "authenticatedSubmitJob",
                vec![
                    document,
                    Value::String(account.username.clone()),
                    Value::String(account.password.clone()),
                ],
            ),
        };
        let response = self.call(method, params).await?;
        let Value::Array(items) = &response else {
            return Err(Self::unexpected(method, &response));
        };
        match items.as_slice() {
            // The second slot is the job password on success and the
            // rejection reason when the job number is zero.
            [Value::Int(number), Value::String(message)] => {
                if *number == 0 {
                    Err(ClientError::SubmissionRejected(message.clone()))
                } else {
                    Ok(JobHandle::new(*number, message.clone()))
                }
            }
            _ => Err(Self::unexpected(method, &response)),
        }
    }

    async fn job_status(&self, job: &JobHandle) -> Result<JobStatus> {
        let response = self.call("getJobStatus", job_params(job)).await?;
        match text_value(&response) {
            Some(status) => Ok(JobStatus::parse(status.trim())),
            None => Err(Self::unexpected("getJobStatus", &response)),
        }
    }

    async fn intermediate_output(&self, job: &JobHandle, offset: i32) -> Result<(String, i32)> {
        let mut params = job_params(job);
        params.push(Value::Int(offset));
        let response = self.call("getIntermediateResults", params).await?;
        let Value::Array(items) = &response else {
            return Err(Self::unexpected("getIntermediateResults", &response));
        };
        match items.as_slice() {
            [output, Value::Int(next_offset)] => match text_value(output) {
                Some(text) => Ok((text, *next_offset)),
                None => Err(Self::unexpected("getIntermediateResults", &response)),
            },
            _ => Err(Self::unexpected("getIntermediateResults", &response)),
        }
    }

    async fn final_results(&self, job: &JobHandle) -> Result<String> {
        let response = self.call("getFinalResults", job_params(job)).await?;
        text_value(&response).ok_or_else(|| Self::unexpected("getFinalResults", &response))
    }

    async fn kill(&self, job: &JobHandle) -> Result<String> {
        let response = self.call("killJob", job_params(job)).await?;
        text_value(&response).ok_or_else(|| Self::unexpected("killJob", &response))
    }

    async fn solvers_in_category(&self, category: &str) -> Result<Vec<String>> {
        let response = self
            .call(
                "listSolversInCategory",
                vec![Value::String(category.to_string())],
            )
            .await?;
        let Value::Array(items) = &response else {
            return Err(Self::unexpected("listSolversInCategory", &response));
        };
        items
            .iter()
            .map(|item| {
                text_value(item).ok_or_else(|| Self::unexpected("listSolversInCategory", &response))
            })
            .collect()
    }
}

fn job_params(job: &JobHandle) -> Vec<Value> {
    vec![
        Value::Int(job.number),
        Value::String(job.password.clone()),
    ]
}

/// Textual content of a value; base64 blobs are decoded as UTF-8 text.
fn text_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Base64(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        _ => None,
    }
}
