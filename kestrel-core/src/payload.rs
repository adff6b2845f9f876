//! Submission payload builder
//!
//! Assembles the XML document the NEOS service expects for a kestrel job:
//! solver selection, contact address, optional priority, a solver options
//! block, the gzip-compressed and base64-encoded problem file, and any
//! non-empty auxiliary files wrapped in CDATA sections. Pure and stateless;
//! its only side effect is reading the local problem files.

use std::fs;
use std::io::Write;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use flate2::Compression;
use flate2::write::GzEncoder;
use thiserror::Error;

/// Auxiliary file suffixes recognized by the service. Each candidate file is
/// named `<stub><suffix>` and embedded only when present and non-empty.
pub const AUX_SUFFIXES: &[&str] = &["adj", "col", "env", "fix", "spc", "row", "slc", "unv"];

/// Job category advertised by the service for this kind of submission.
pub const CATEGORY: &str = "kestrel";

/// Problem input format named in the submission document.
pub const INPUT_TYPE: &str = "AMPL";

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("could not read problem file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not compress problem file: {0}")]
    Encoding(#[source] std::io::Error),
}

/// Everything the builder needs besides the problem files themselves.
///
/// The solver name must already be resolved to the service's canonical
/// casing; the builder lowercases it only inside the options block, per the
/// remote convention.
#[derive(Debug, Clone)]
pub struct PayloadSpec {
    /// Canonically-cased solver name.
    pub solver: String,
    /// Contact address for the submission.
    pub email: String,
    /// Scheduling priority; `None` means the service default.
    pub priority: Option<String>,
    /// Solver-specific option string, if any was configured.
    pub solver_options: Option<String>,
    /// Named document option overrides, embedded verbatim as CDATA sections.
    pub document_options: Vec<(String, String)>,
}

/// A fully-formed submission document. Built once per submission, immutable,
/// and always sent whole.
#[derive(Debug, Clone)]
pub struct SubmissionPayload {
    xml: String,
}

impl SubmissionPayload {
    /// Build the document for the problem at `<stub>.nl`.
    ///
    /// The stub must name an existing problem file; that constraint is
    /// enforced by the read failing, not checked up front. Auxiliary files
    /// that are absent or empty are simply skipped.
    pub fn build(stub: &str, spec: &PayloadSpec) -> Result<Self, PayloadError> {
        let problem_path = format!("{stub}.nl");
        let problem = fs::read(&problem_path).map_err(|source| PayloadError::Io {
            path: problem_path,
            source,
        })?;
        let compressed = gzip(&problem).map_err(PayloadError::Encoding)?;

        let priority = match &spec.priority {
            Some(p) => format!("<priority>{p}</priority>\n"),
            None => String::new(),
        };

        let lower = spec.solver.to_lowercase();
        let mut solver_options = format!("kestrel_options:solver={lower}\n");
        if let Some(options) = &spec.solver_options {
            solver_options.push_str(&format!("{lower}_options:{options}\n"));
        }

        let mut xml = format!(
            "<document>\n\
             <category>{CATEGORY}</category>\n\
             <solver>{}</solver>\n\
             <inputType>{INPUT_TYPE}</inputType>\n\
             <email>{}</email>\n\
             {priority}\
             <solver_options>{solver_options}</solver_options>\n\
             <nlfile><base64>{}</base64></nlfile>\n",
            spec.solver,
            spec.email,
            BASE64.encode(&compressed),
        );

        for suffix in AUX_SUFFIXES {
            if let Ok(content) = fs::read(format!("{stub}{suffix}")) {
                if !content.is_empty() {
                    let text = String::from_utf8_lossy(&content);
                    xml.push_str(&format!("<{suffix}><![CDATA[{text}]]></{suffix}>\n"));
                }
            }
        }

        for (name, value) in &spec.document_options {
            xml.push_str(&format!("<{name}><![CDATA[{value}]]></{name}>\n"));
        }

        xml.push_str("</document>");
        Ok(Self { xml })
    }

    pub fn as_xml(&self) -> &str {
        &self.xml
    }
}

fn gzip(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    encoder.finish()
}
