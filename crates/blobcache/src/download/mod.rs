//! The remote-origin tier.
//!
//! The fetch coordinator only depends on the [`Downloader`] trait: start a
//! download for a URL into a destination file, report progress along the way,
//! and finish with success or a [`CacheError`]. Transport concerns (redirects,
//! compression, connection pooling) live entirely behind the trait.
//!
//! [`HttpDownloader`] is the default implementation, built on `reqwest`.

use futures::future::BoxFuture;
use tokio::fs::File;

use crate::caching::CacheContents;

mod http;

pub use http::HttpDownloader;

/// Callback through which a downloader reports its progress as a fraction in
/// `0.0..=1.0`.
///
/// Downloaders may skip reporting entirely when the total size is unknown.
pub type ProgressFn<'a> = &'a (dyn Fn(f64) + Send + Sync);

/// The network capability consumed by the fetch coordinator.
pub trait Downloader: Send + Sync + 'static {
    /// Downloads `url` into `destination`.
    ///
    /// On success the destination file contains the complete blob and has
    /// been flushed. On failure the destination's contents are garbage.
    fn download<'a>(
        &'a self,
        url: &'a str,
        destination: &'a mut File,
        progress: ProgressFn<'a>,
    ) -> BoxFuture<'a, CacheContents<()>>;
}
