//! Error types for the research pipeline
//!
//! Failures fall into three groups:
//! - malformed model output, absorbed entirely by [`crate::recovery`]
//! - branch-local search/generation failures, logged and turned into empty branches
//! - report generation failure, the only error that reaches the caller

use thiserror::Error;

/// Errors from the language-model service
#[derive(Error, Debug, Clone)]
pub enum LlmError {
    #[error("Model call timed out after {0} seconds")]
    Timeout(u64),

    #[error("Provider error: {0}")]
    Provider(String),

    /// The model answered, but not in the requested shape.
    /// `raw` keeps the reply so later recovery tiers can still mine it.
    #[error("Model output did not match the requested schema")]
    MalformedOutput { raw: String },
}

impl LlmError {
    /// Raw model text carried by the error, if any
    pub fn raw_output(&self) -> Option<&str> {
        match self {
            LlmError::MalformedOutput { raw } => Some(raw),
            _ => None,
        }
    }
}

/// Errors from the web and biomedical search collaborators
#[derive(Error, Debug, Clone)]
pub enum SearchError {
    #[error("Search timed out")]
    Timeout,

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Unauthorized - check API key")]
    Unauthorized,

    #[error("Rate limited - too many requests")]
    RateLimited,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Server error ({0}): {1}")]
    ServerError(u16, String),

    #[error("HTTP error ({0}): {1}")]
    HttpError(u16, String),

    #[error("Failed to parse response: {0}")]
    ParseError(String),
}

impl SearchError {
    /// Check if this error is worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SearchError::Timeout
                | SearchError::Connection(_)
                | SearchError::RateLimited
                | SearchError::ServerError(_, _)
        )
    }

    /// Classify a reqwest transport error
    pub fn from_transport(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SearchError::Timeout
        } else if e.is_connect() {
            SearchError::Connection(e.to_string())
        } else {
            SearchError::Network(e.to_string())
        }
    }

    /// Classify a non-success HTTP status
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => SearchError::Unauthorized,
            429 => SearchError::RateLimited,
            400 => SearchError::BadRequest(body),
            500..=599 => SearchError::ServerError(status, body),
            _ => SearchError::HttpError(status, body),
        }
    }
}

/// Raised when every recovery tier failed and the caller supplied no default
#[derive(Error, Debug, Clone)]
pub enum RecoveryError {
    #[error("All recovery tiers failed for {target}: {last_error}")]
    Exhausted { target: String, last_error: String },

    /// Every model call failed before producing any text
    #[error("Model unavailable for {target}: {source}")]
    Unavailable { target: String, source: LlmError },
}

/// Top-level research error
#[derive(Error, Debug)]
pub enum ResearchError {
    #[error("Invalid research request: {0}")]
    InvalidRequest(String),

    #[error("Research cancelled")]
    Cancelled,

    #[error("Report generation failed: {0}")]
    Report(#[from] RecoveryError),
}

/// Errors that can end a single branch. Never escapes the orchestrator.
#[derive(Error, Debug)]
pub(crate) enum BranchError {
    #[error("{0}")]
    Search(#[from] SearchError),

    #[error("{0}")]
    Generation(#[from] LlmError),

    #[error("child level failed: {0}")]
    Child(String),

    #[error("branch cancelled")]
    Cancelled,
}
