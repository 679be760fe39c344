use std::error::Error;
use std::time::Duration;

use thiserror::Error;

/// An error that happens while looking up, storing, or fetching a blob.
///
/// Tier-internal problems (a disk read error, a file racing away during a
/// sweep) are absorbed by the tier that encountered them and reported as a
/// miss. Only a terminal failure to produce a blob through any tier ends up
/// in the waiters' results.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The blob is not present in the queried tier, or the remote server
    /// responded with a "not found" status.
    #[error("not found")]
    NotFound,
    /// A filesystem read, write, or delete failed.
    ///
    /// For lookups this is equivalent to a miss; the next tier is consulted.
    #[error("disk io failed: {0}")]
    Io(String),
    /// The download did not complete within the configured deadline.
    #[error("download timed out after {0:?}")]
    Timeout(Duration),
    /// The download failed due to a connection problem, a DNS failure, or an
    /// unexpected server response.
    ///
    /// The attached string contains the root cause as reported by the
    /// transport.
    #[error("download failed: {0}")]
    DownloadError(String),
}

impl From<std::io::Error> for CacheError {
    #[track_caller]
    fn from(err: std::io::Error) -> Self {
        let dynerr: &dyn Error = &err; // tracing expects a `&dyn Error`
        tracing::error!(error = dynerr, "disk io error");
        Self::Io(err.to_string())
    }
}

impl From<reqwest::Error> for CacheError {
    fn from(error: reqwest::Error) -> Self {
        Self::download_error(&error)
    }
}

impl CacheError {
    /// Builds a [`CacheError::DownloadError`] from the root cause of a
    /// transport error chain.
    pub fn download_error(mut error: &dyn Error) -> Self {
        while let Some(src) = error.source() {
            error = src;
        }

        Self::DownloadError(error.to_string())
    }
}

/// The result of a cache or download operation, either a value or the
/// [`CacheError`] explaining why none could be produced.
pub type CacheContents<T = ()> = Result<T, CacheError>;
