//! Durable job queue store
//!
//! Persists pending job handles as an ordered stack in a file named after
//! the invoking session, under the system temporary directory. Absence of
//! the file IS the empty-queue representation; an empty store is never
//! written. The store is rewritten whole on every mutation and is not
//! designed for concurrent multi-process access.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use kestrel_core::JobHandle;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("could not access the job queue: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt job queue entry at line {line}: {text:?}")]
    Parse { line: usize, text: String },
}

/// File-backed LIFO store of job handles.
#[derive(Debug, Clone)]
pub struct JobQueueStore {
    path: PathBuf,
}

impl JobQueueStore {
    /// Store location for the given session identity.
    pub fn for_session(session: Option<&str>) -> Self {
        let name = match session {
            Some(id) => format!("kestrel-{id}.jobs"),
            None => "kestrel.jobs".to_string(),
        };
        Self {
            path: std::env::temp_dir().join(name),
        }
    }

    /// Store backed by an explicit path.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the queued handles, oldest first. An absent store is an empty
    /// queue; any other failure is an error.
    pub fn load(&self) -> Result<Vec<JobHandle>, StoreError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut jobs = Vec::new();
        for (index, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match parse_entry(line) {
                Some(job) => jobs.push(job),
                None => {
                    return Err(StoreError::Parse {
                        line: index + 1,
                        text: line.to_string(),
                    });
                }
            }
        }
        Ok(jobs)
    }

    /// Replace the store contents, oldest first.
    ///
    /// The write goes to a temporary file that is renamed into place, so a
    /// reader never observes a partial store; a failed write removes its
    /// partial artifact. An empty sequence removes the store entirely, and
    /// removing an already-absent store is not an error.
    pub fn save(&self, jobs: &[JobHandle]) -> Result<(), StoreError> {
        if jobs.is_empty() {
            return match fs::remove_file(&self.path) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
                Err(err) => Err(err.into()),
            };
        }

        let mut contents = String::new();
        for job in jobs {
            contents.push_str(&format!("{} {}\n", job.number, job.password));
        }

        let staged = self.path.with_extension("jobs.tmp");
        if let Err(err) = fs::write(&staged, &contents) {
            let _ = fs::remove_file(&staged);
            return Err(err.into());
        }
        if let Err(err) = fs::rename(&staged, &self.path) {
            let _ = fs::remove_file(&staged);
            return Err(err.into());
        }
        Ok(())
    }
}

fn parse_entry(line: &str) -> Option<JobHandle> {
    let mut fields = line.split_whitespace();
    let number = fields.next()?.parse::<i32>().ok().filter(|n| *n > 0)?;
    let password = fields.next()?.to_string();
    if fields.next().is_some() {
        return None;
    }
    Some(JobHandle::new(number, password))
}
