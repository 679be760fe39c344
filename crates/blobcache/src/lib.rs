//! A tiered cache for remote binary objects.
//!
//! `blobcache` fetches blobs by URL and keeps them close: a bounded in-memory
//! LRU tier in front of a TTL-expired on-disk tier, with the remote origin as
//! the tier of last resort. The entry point is [`FetchService`]:
//!
//! ```no_run
//! use blobcache::{Config, FetchService};
//!
//! # async fn example() -> Option<()> {
//! let service = FetchService::new(&Config::default());
//!
//! let mut handle = service.fetch("https://example.com/blob.png");
//! while let Some(fraction) = handle.recv_progress().await {
//!     println!("{:.0}%", fraction * 100.0);
//! }
//! let blob = handle.wait().await?.ok()?;
//! # Some(())
//! # }
//! ```
//!
//! Concurrent fetches for the same URL share one download, every waiter gets
//! the outcome, and a waiter can withdraw without affecting the others. See
//! the [`caching`] and [`download`] modules for the tier internals and the
//! [`fetcher`] module for the coordination rules.

pub mod caching;
pub mod config;
pub mod download;
pub mod fetcher;
pub mod logging;

pub use caching::{
    BlobCache, CacheBackend, CacheContents, CacheError, CacheKey, DiskStore, MemoryLru, SweepStats,
};
pub use config::Config;
pub use download::{Downloader, HttpDownloader};
pub use fetcher::{FetchHandle, FetchService};
