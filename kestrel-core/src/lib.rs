//! Kestrel domain types
//!
//! Core types shared by the NEOS client and the CLI: job handles, job
//! status, and the submission payload builder. This crate is pure: it
//! performs no network I/O and holds no connection state.

pub mod job;
pub mod payload;

pub use job::{JobHandle, JobStatus};
pub use payload::{PayloadError, PayloadSpec, SubmissionPayload};
