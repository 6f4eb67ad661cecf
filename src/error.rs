//! Error kinds for every fetch, job and search boundary.

use std::path::PathBuf;
use thiserror::Error;

/// The listing for a source could not be obtained. Fatal for the job.
#[derive(Debug, Error)]
pub enum ListError {
    #[error("source unavailable: {source_id}: {reason}")]
    SourceUnavailable { source_id: String, reason: String },
}

impl ListError {
    pub fn unavailable(source_id: &str, reason: impl Into<String>) -> Self {
        ListError::SourceUnavailable {
            source_id: source_id.to_string(),
            reason: reason.into(),
        }
    }
}

/// Outcome of a single item fetch that produced no content.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The item does not exist upstream. A benign skip, never a failure.
    #[error("item not found: {url}")]
    NotFound { url: String },

    /// Every attempt failed. Recorded in the failure set and retryable.
    #[error("fetch exhausted after {attempts} attempts: {url}")]
    Exhausted { url: String, attempts: u32 },
}

#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A search provider contributed nothing. Never fatal to the aggregate.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("{provider} requires human verification")]
    Blocked { provider: String, verify_url: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("{provider} answered with status {status}")]
    Status { provider: String, status: u16 },

    #[error("{provider} probe panicked")]
    Panicked { provider: String },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RetryError {
    #[error("no failed items to retry")]
    NoFailures,

    #[error("original item plan was not retained")]
    PlanMissing,

    #[error("job not found: {0}")]
    NotFound(String),

    #[error("job is still active")]
    Busy,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("source id is required")]
    MissingSource,

    #[error("job not found: {0}")]
    NotFound(String),

    #[error("invalid control action: {0}")]
    InvalidAction(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SearchError {
    #[error("keyword is required")]
    EmptyKeyword,
}
