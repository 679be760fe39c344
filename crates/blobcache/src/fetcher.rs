//! The fetch coordinator.
//!
//! [`FetchService`] sequences the three tiers for every requested URL:
//! memory first, then disk, then a download from the origin. Concurrent
//! fetches for the same key are deduplicated into a single in-flight
//! request — at most one disk lookup and one download per key at any time —
//! and every registered waiter receives the progress updates and the one
//! terminal outcome, in registration order.
//!
//! All coordinator bookkeeping (the pending-key table) and all memory-tier
//! mutation happens under a single mutex, never while awaiting. Disk and
//! network I/O run on a driver task per key and report back through that
//! mutex, so state mutation stays serialized even though I/O is concurrent.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use once_cell::sync::OnceCell;
use tokio::sync::{mpsc, oneshot};

use crate::caching::{
    BlobCache, CacheBackend, CacheContents, CacheError, CacheKey, DiskStore, MemoryLru, SweepStats,
};
use crate::config::Config;
use crate::download::{Downloader, HttpDownloader};

/// A caller registered for the outcome of a pending fetch.
///
/// Each waiter is delivered at most one terminal result; its channels are
/// dropped undelivered when the registration is canceled.
struct Waiter {
    id: u64,
    progress: mpsc::UnboundedSender<f64>,
    result: oneshot::Sender<CacheContents<Bytes>>,
}

/// The in-flight request for one key, holding its FIFO waiter list.
///
/// The generation ties the request to the driver task that was spawned for
/// it. After a cancellation the same key can become pending again with a new
/// driver; the superseded driver still completes, notices the generation
/// mismatch, and drops its outcome instead of delivering it to waiters of the
/// newer request.
struct PendingFetch {
    generation: u64,
    waiters: Vec<Waiter>,
}

#[derive(Default)]
struct PendingTable {
    requests: HashMap<CacheKey, PendingFetch>,
    next_waiter: u64,
}

/// Coordinates fetches across the memory, disk, and origin tiers.
///
/// Cheap to share: construct once (or use [`FetchService::shared`]) and hand
/// out clones of the [`Arc`].
pub struct FetchService {
    cache: Arc<dyn CacheBackend>,
    downloader: Arc<dyn Downloader>,
    runtime: tokio::runtime::Handle,
    max_download: Duration,
    pending: Mutex<PendingTable>,
}

impl std::fmt::Debug for FetchService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pending = self
            .pending
            .try_lock()
            .map(|p| p.requests.len())
            .unwrap_or_default();
        f.debug_struct("FetchService")
            .field("pending requests", &pending)
            .finish()
    }
}

static SHARED: OnceCell<Arc<FetchService>> = OnceCell::new();

impl FetchService {
    /// Creates a service with the default backend ([`BlobCache`]) and the
    /// default [`HttpDownloader`].
    ///
    /// Must be called within a tokio runtime.
    pub fn new(config: &Config) -> Arc<Self> {
        let memory = MemoryLru::new(config.memory_capacity);
        let disk = DiskStore::new(config.effective_cache_dir(), config.disk_ttl);
        let cache = Arc::new(BlobCache::new(memory, disk));
        let downloader = Arc::new(HttpDownloader::new(reqwest::Client::new()));
        Self::with_backend(config, cache, downloader)
    }

    /// Creates a service with a custom cache backend and downloader.
    ///
    /// Must be called within a tokio runtime.
    pub fn with_backend(
        config: &Config,
        cache: Arc<dyn CacheBackend>,
        downloader: Arc<dyn Downloader>,
    ) -> Arc<Self> {
        Arc::new(Self {
            cache,
            downloader,
            runtime: tokio::runtime::Handle::current(),
            max_download: config.max_download,
            pending: Mutex::new(PendingTable::default()),
        })
    }

    /// The process-wide default instance, created on first use with
    /// [`Config::default`].
    ///
    /// The first call must happen within a tokio runtime.
    pub fn shared() -> &'static Arc<FetchService> {
        SHARED.get_or_init(|| FetchService::new(&Config::default()))
    }

    /// Requests the blob for `url` from the nearest tier available.
    ///
    /// If the memory tier holds the key, the returned handle is already
    /// resolved and [`FetchHandle::wait`] completes without yielding.
    /// Otherwise the caller is registered as a waiter; if the key is already
    /// pending no additional disk or network work is started.
    pub fn fetch(self: &Arc<Self>, url: &str) -> FetchHandle {
        let key = CacheKey::from_url(url);
        let (result_tx, result_rx) = oneshot::channel();
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();

        if let Some(blob) = self.cache.from_memory(&key) {
            tracing::trace!(key = %key, "serving from memory");
            let _ = result_tx.send(Ok(blob));
            return FetchHandle {
                key,
                waiter: None,
                service: Arc::clone(self),
                progress: progress_rx,
                result: result_rx,
            };
        }

        let mut pending = self.pending.lock().unwrap();
        pending.next_waiter += 1;
        let id = pending.next_waiter;
        let waiter = Waiter {
            id,
            progress: progress_tx,
            result: result_tx,
        };

        match pending.requests.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().waiters.push(waiter);
            }
            Entry::Vacant(entry) => {
                entry.insert(PendingFetch {
                    generation: id,
                    waiters: vec![waiter],
                });
                self.spawn_resolve(url.to_owned(), key.clone(), id);
            }
        }
        drop(pending);

        FetchHandle {
            key,
            waiter: Some(id),
            service: Arc::clone(self),
            progress: progress_rx,
            result: result_rx,
        }
    }

    /// Cancels the pending fetch for `url`, dropping all of its waiters
    /// without delivering a result.
    ///
    /// Already-started disk or network I/O is not aborted; when it completes
    /// it may still populate the cache, but no waiter hears about it.
    pub fn cancel(&self, url: &str) {
        let key = CacheKey::from_url(url);
        if self.pending.lock().unwrap().requests.remove(&key).is_some() {
            tracing::debug!(key = %key, "canceled pending fetch");
        }
    }

    /// Drops every entry from the memory tier, e.g. to relieve memory
    /// pressure. Disk entries are unaffected.
    pub fn clear_cache(&self) {
        self.cache.clear_memory();
    }

    /// Removes all expired entries from the disk tier.
    pub async fn sweep(&self) -> CacheContents<SweepStats> {
        self.cache.sweep().await
    }

    pub fn cache(&self) -> &Arc<dyn CacheBackend> {
        &self.cache
    }

    fn spawn_resolve(self: &Arc<Self>, url: String, key: CacheKey, generation: u64) {
        tracing::debug!(url = %url, key = %key, "starting fetch");
        let this = Arc::clone(self);
        self.runtime.spawn(async move {
            let outcome = this.resolve(&url, &key, generation).await;
            this.finish(&key, generation, outcome);
        });
    }

    /// Walks the disk tier and then the origin. Runs on the driver task.
    async fn resolve(&self, url: &str, key: &CacheKey, generation: u64) -> CacheContents<Bytes> {
        match self.cache.from_disk(key).await {
            Ok(blob) => {
                tracing::trace!(key = %key, "serving from disk");
                return Ok(blob);
            }
            Err(CacheError::NotFound) => {}
            Err(err) => {
                tracing::debug!(key = %key, error = %err, "disk lookup failed, downloading");
            }
        }

        let temp_file = self.cache.tempfile()?;
        let mut destination = tokio::fs::File::from_std(temp_file.reopen()?);

        let progress = |fraction: f64| self.broadcast_progress(key, generation, fraction);
        let download = self.downloader.download(url, &mut destination, &progress);
        match tokio::time::timeout(self.max_download, download).await {
            Ok(result) => result?,
            Err(_) => return Err(CacheError::Timeout(self.max_download)),
        }
        drop(destination);

        let blob = self.cache.store_transfer(key, temp_file).await?;
        // serve the copy that made it into the memory tier
        Ok(self.cache.from_memory(key).unwrap_or(blob))
    }

    fn broadcast_progress(&self, key: &CacheKey, generation: u64, fraction: f64) {
        let pending = self.pending.lock().unwrap();
        if let Some(request) = pending.requests.get(key) {
            if request.generation == generation {
                for waiter in &request.waiters {
                    let _ = waiter.progress.send(fraction);
                }
            }
        }
    }

    /// Delivers the terminal outcome to every waiter, in registration order,
    /// and retires the pending request.
    ///
    /// Only the driver spawned for the current pending request may retire it.
    /// After a cancellation the key may be pending again under a newer
    /// generation, in which case this outcome belongs to nobody and is
    /// dropped.
    fn finish(&self, key: &CacheKey, generation: u64, outcome: CacheContents<Bytes>) {
        let request = {
            let mut pending = self.pending.lock().unwrap();
            match pending.requests.get(key) {
                Some(request) if request.generation == generation => {
                    pending.requests.remove(key)
                }
                _ => None,
            }
        };
        let Some(request) = request else {
            tracing::trace!(key = %key, "dropping outcome of a canceled fetch");
            return;
        };

        match &outcome {
            Ok(blob) => tracing::debug!(
                key = %key,
                bytes = blob.len(),
                waiters = request.waiters.len(),
                "fetch resolved",
            ),
            Err(err) => tracing::debug!(
                key = %key,
                error = %err,
                waiters = request.waiters.len(),
                "fetch failed",
            ),
        }

        for waiter in request.waiters {
            let _ = waiter.result.send(outcome.clone());
        }
    }
}

/// One caller's registration for a fetch.
///
/// The handle exposes the progress stream and the terminal outcome of the
/// fetch. Dropping the handle without waiting leaves the registration in
/// place until the fetch resolves; use [`cancel`](FetchHandle::cancel) to
/// withdraw it explicitly.
pub struct FetchHandle {
    key: CacheKey,
    waiter: Option<u64>,
    service: Arc<FetchService>,
    progress: mpsc::UnboundedReceiver<f64>,
    result: oneshot::Receiver<CacheContents<Bytes>>,
}

impl FetchHandle {
    /// The cache key this fetch is registered under.
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Receives the next progress fraction.
    ///
    /// Returns `None` once the fetch has reached a terminal outcome (or was
    /// canceled) and all buffered updates have been drained. No update is
    /// ever emitted after the terminal outcome.
    pub async fn recv_progress(&mut self) -> Option<f64> {
        self.progress.recv().await
    }

    /// Waits for the terminal outcome.
    ///
    /// Returns `None` if this registration was canceled — either
    /// individually or via [`FetchService::cancel`] for the whole key —
    /// before the fetch resolved.
    pub async fn wait(self) -> Option<CacheContents<Bytes>> {
        self.result.await.ok()
    }

    /// Withdraws this registration from the pending fetch.
    ///
    /// Other waiters for the same key are unaffected and the underlying I/O
    /// keeps running; this registration alone will never be delivered a
    /// result.
    pub fn cancel(self) {
        let Some(id) = self.waiter else { return };
        let mut pending = self.service.pending.lock().unwrap();
        if let Some(request) = pending.requests.get_mut(&self.key) {
            request.waiters.retain(|waiter| waiter.id != id);
        }
    }
}

impl std::fmt::Debug for FetchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchHandle")
            .field("key", &self.key.to_string())
            .finish()
    }
}
