//! # The blobcache caching tiers
//!
//! This module contains the two local cache tiers and the abstraction the
//! fetch coordinator talks to.
//!
//! - [`MemoryLru`] is a bounded in-memory map with least-recently-used
//!   eviction. It is the first tier consulted and the only synchronous one.
//! - [`DiskStore`] persists one file per key under a root directory, with the
//!   file's modification time as the sole expiry signal. Lookups, writes, and
//!   the expiry sweep all run off the caller's task.
//! - [`CacheBackend`] is the capability set the coordinator requires. The
//!   default implementation, [`BlobCache`], combines the two tiers above; an
//!   alternative backend (a shared cache, an encrypted store, a pure
//!   in-memory cache) can be substituted without touching the coordinator.
//!
//! A lookup walks memory, then disk, then hands over to the download layer.
//! Disk hits are promoted into the memory tier as a side effect, so repeated
//! lookups are served without touching the filesystem again. Errors inside a
//! tier ([`CacheError::Io`] most of the time) degrade to a miss for that tier
//! and the walk continues; see [`CacheError`] for the full taxonomy.

use std::sync::Mutex;

use bytes::Bytes;
use futures::future::BoxFuture;
use tempfile::NamedTempFile;

mod disk;
mod error;
mod key;
mod memory;
#[cfg(test)]
mod tests;

pub use disk::{DiskStore, SweepStats};
pub use error::{CacheContents, CacheError};
pub use key::CacheKey;
pub use memory::MemoryLru;

/// The cache capabilities the fetch coordinator depends on.
///
/// The coordinator sequences these as memory, then disk, then download; it
/// never touches files directly. Implementations must keep [`from_memory`]
/// fast and non-blocking, while [`from_disk`] may take as long as it needs
/// since it is only awaited from the coordinator's driver task.
///
/// [`from_memory`]: CacheBackend::from_memory
/// [`from_disk`]: CacheBackend::from_disk
pub trait CacheBackend: Send + Sync + 'static {
    /// Fast, synchronous lookup in the memory tier, promoting the entry on a
    /// hit.
    fn from_memory(&self, key: &CacheKey) -> Option<Bytes>;

    /// Lookup in the disk tier.
    ///
    /// A hit also populates the memory tier so subsequent lookups are served
    /// from there.
    fn from_disk<'a>(&'a self, key: &'a CacheKey) -> BoxFuture<'a, CacheContents<Bytes>>;

    /// Stores a blob in both tiers.
    fn store<'a>(&'a self, key: &'a CacheKey, blob: Bytes) -> BoxFuture<'a, CacheContents<()>>;

    /// Relocates a downloaded temp file into the disk tier, populates the
    /// memory tier, and returns the blob.
    fn store_transfer<'a>(
        &'a self,
        key: &'a CacheKey,
        temp_file: NamedTempFile,
    ) -> BoxFuture<'a, CacheContents<Bytes>>;

    /// Drops every entry from the memory tier. Disk entries are unaffected.
    fn clear_memory(&self);

    /// Removes every expired entry from the disk tier.
    fn sweep(&self) -> BoxFuture<'_, CacheContents<SweepStats>>;

    /// Creates a temp file that a download can be written into and later
    /// passed to [`store_transfer`](CacheBackend::store_transfer).
    fn tempfile(&self) -> std::io::Result<NamedTempFile>;
}

/// The default [`CacheBackend`]: a [`MemoryLru`] in front of a [`DiskStore`].
#[derive(Debug)]
pub struct BlobCache {
    memory: Mutex<MemoryLru>,
    disk: DiskStore,
}

impl BlobCache {
    pub fn new(memory: MemoryLru, disk: DiskStore) -> Self {
        Self {
            memory: Mutex::new(memory),
            disk,
        }
    }

    pub fn disk(&self) -> &DiskStore {
        &self.disk
    }

    fn put_memory(&self, key: &CacheKey, blob: Bytes) {
        self.memory.lock().unwrap().put(key, blob);
    }
}

impl CacheBackend for BlobCache {
    fn from_memory(&self, key: &CacheKey) -> Option<Bytes> {
        self.memory.lock().unwrap().get(key)
    }

    fn from_disk<'a>(&'a self, key: &'a CacheKey) -> BoxFuture<'a, CacheContents<Bytes>> {
        Box::pin(async move {
            let blob = self.disk.lookup(key).await?;
            self.put_memory(key, blob.clone());
            Ok(blob)
        })
    }

    fn store<'a>(&'a self, key: &'a CacheKey, blob: Bytes) -> BoxFuture<'a, CacheContents<()>> {
        Box::pin(async move {
            self.disk.store(key, blob.clone()).await?;
            self.put_memory(key, blob);
            Ok(())
        })
    }

    fn store_transfer<'a>(
        &'a self,
        key: &'a CacheKey,
        temp_file: NamedTempFile,
    ) -> BoxFuture<'a, CacheContents<Bytes>> {
        Box::pin(async move {
            let blob = self.disk.store_transfer(key, temp_file).await?;
            self.put_memory(key, blob.clone());
            Ok(blob)
        })
    }

    fn clear_memory(&self) {
        self.memory.lock().unwrap().clear();
    }

    fn sweep(&self) -> BoxFuture<'_, CacheContents<SweepStats>> {
        let disk = self.disk.clone();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || disk.sweep())
                .await
                .map_err(|e| CacheError::Io(e.to_string()))?
        })
    }

    fn tempfile(&self) -> std::io::Result<NamedTempFile> {
        self.disk.tempfile()
    }
}
