use thiserror::Error;

/// Failure inside one of the trust engine's own stores.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Record not found: {0}")]
    NotFound(String),
}

impl From<sled::Error> for StoreError {
    fn from(e: sled::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Errors surfaced to callers of the core.
///
/// Only persistence and task failures ever reach the caller; collaborator
/// outages are absorbed into named fallbacks and never appear here.
#[derive(Error, Debug)]
pub enum TrustError {
    #[error("persistence failure: {0}")]
    Persistence(#[from] StoreError),

    #[error("analysis aborted: {0}")]
    Aborted(String),
}

impl TrustError {
    /// Stable reason code for the request layer.
    pub fn reason_code(&self) -> &'static str {
        match self {
            TrustError::Persistence(_) => "persistence_failure",
            TrustError::Aborted(_) => "analysis_aborted",
        }
    }
}

/// Failure talking to an external collaborator (classifier, ledger, sink, registry).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExternalError {
    #[error("call timed out")]
    Timeout,

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for ExternalError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ExternalError::Timeout
        } else if e.is_decode() {
            ExternalError::Malformed(e.to_string())
        } else {
            ExternalError::Unavailable(e.to_string())
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
pub type Result<T> = std::result::Result<T, TrustError>;
