//! Solver resolution
//!
//! Validates the configured solver name against the list the service
//! advertises for the kestrel category. The caller's input is matched
//! case-insensitively, but the canonical casing from the service is what
//! goes into the submission, since the remote side is case-sensitive. Resolution
//! runs before every submission and is never cached across invocations.

use kestrel_core::payload::CATEGORY;

use crate::error::{ClientError, Result};
use crate::NeosApi;

const AMPL_SUFFIX: &str = ":AMPL";

/// Resolve the configured solver name against the live advertised list.
pub async fn resolve_solver<C: NeosApi + ?Sized>(
    client: &C,
    requested: Option<&str>,
) -> Result<String> {
    let advertised = client.solvers_in_category(CATEGORY).await?;
    match_solver(requested, &ampl_choices(&advertised))
}

/// Solvers usable for this input format: advertised entries carrying the
/// `:AMPL` suffix, with the suffix stripped.
fn ampl_choices(advertised: &[String]) -> Vec<String> {
    advertised
        .iter()
        .filter_map(|solver| solver.strip_suffix(AMPL_SUFFIX))
        .map(str::to_string)
        .collect()
}

fn match_solver(requested: Option<&str>, choices: &[String]) -> Result<String> {
    let requested = match requested {
        Some(name) if !name.is_empty() => name,
        _ => {
            return Err(ClientError::NoSolverSelected {
                available: choices.to_vec(),
            });
        }
    };
    choices
        .iter()
        .find(|choice| choice.eq_ignore_ascii_case(requested))
        .cloned()
        .ok_or_else(|| ClientError::SolverNotAvailable {
            requested: requested.to_string(),
            available: choices.to_vec(),
        })
}
