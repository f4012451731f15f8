//! Fetch error taxonomy.
//!
//! Failure and cancellation are distinct terminal outcomes: a canceled
//! fetch is routine bookkeeping during panning and must never be reported
//! as an error, while a failed fetch is local to its tile and never
//! escalates to the queue.

use thiserror::Error;

use crate::tiling::InvalidLevelError;

/// Outcome of one tile fetch.
pub type FetchResult<P> = Result<P, FetchError>;

/// Non-success terminal outcome of a fetch entry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The injected fetcher rejected the request.
    #[error("tile fetch failed: {0}")]
    Failed(String),
    /// The entry was canceled before a result could be delivered.
    #[error("tile fetch canceled")]
    Canceled,
}

impl FetchError {
    /// Convenience constructor for fetcher rejections.
    pub fn failed(reason: impl Into<String>) -> Self {
        FetchError::Failed(reason.into())
    }

    /// True for the cancellation outcome.
    pub fn is_canceled(&self) -> bool {
        matches!(self, FetchError::Canceled)
    }
}

impl From<InvalidLevelError> for FetchError {
    fn from(err: InvalidLevelError) -> Self {
        FetchError::Failed(err.to_string())
    }
}
