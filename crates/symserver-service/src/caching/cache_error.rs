use std::time::Duration;

use thiserror::Error;

/// An error that happens while obtaining a symcache for a module.
///
/// Only [`NotFound`](Self::NotFound) is persisted (as a negative sentinel);
/// all other variants are reported to the current request and recomputed on
/// the next one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The sym file was not found on any upstream source.
    #[error("not found")]
    NotFound,
    /// The download did not complete within its time budget.
    #[error("download timed out after {0:?}")]
    Timeout(Duration),
    /// The sym file could not be fetched due to connection loss, DNS
    /// resolution or a 5xx server response.
    ///
    /// The attached string contains the upstream response.
    #[error("download failed: {0}")]
    DownloadError(String),
    /// The sym file was fetched successfully, but could not be parsed or
    /// compiled into a symcache.
    #[error("malformed: {0}")]
    Malformed(String),
    /// An unexpected error in the service itself.
    ///
    /// This variant is never persisted.
    #[error("internal error")]
    InternalError,
}

impl From<std::io::Error> for CacheError {
    #[track_caller]
    fn from(err: std::io::Error) -> Self {
        Self::from_std_error(err)
    }
}

impl CacheError {
    #[track_caller]
    pub fn from_std_error<E: std::error::Error + 'static>(e: E) -> Self {
        let dynerr: &dyn std::error::Error = &e; // tracing expects a `&dyn Error`
        tracing::error!(error = dynerr);
        Self::InternalError
    }
}

/// The result of a cache or download operation.
pub type CacheContents<T = ()> = Result<T, CacheError>;
