use std::fs::read_dir;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use filetime::FileTime;
use tempfile::NamedTempFile;

use super::{CacheContents, CacheError, CacheKey};

/// On-disk blob store with time-based expiry.
///
/// Each key maps to one file directly under the root directory; the file's
/// modification time is the sole expiry signal. Entries older than the
/// configured TTL are deleted lazily on lookup and eagerly by [`sweep`].
///
/// [`sweep`]: DiskStore::sweep
#[derive(Debug, Clone)]
pub struct DiskStore {
    root: PathBuf,
    ttl: Duration,
}

/// Counters reported after a [`DiskStore::sweep`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub removed_files: usize,
    pub removed_bytes: u64,
    pub retained_files: usize,
    pub retained_bytes: u64,
}

impl DiskStore {
    /// Creates a store rooted at `root`.
    ///
    /// The directory itself is created lazily on the first write; a creation
    /// failure surfaces as [`CacheError::Io`] from the operation that needed
    /// it.
    pub fn new(root: PathBuf, ttl: Duration) -> Self {
        Self { root, ttl }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.file_name())
    }

    /// Looks up the blob for `key`.
    ///
    /// An entry older than the TTL is deleted and reported as
    /// [`CacheError::NotFound`]. All filesystem access happens on the
    /// blocking pool, never on the caller's task.
    pub async fn lookup(&self, key: &CacheKey) -> CacheContents<Bytes> {
        let path = self.entry_path(key);
        let ttl = self.ttl;

        spawn_io(move || {
            let Some(metadata) = catch_not_found(|| path.metadata())? else {
                return Err(CacheError::NotFound);
            };

            let age = metadata.modified()?.elapsed().unwrap_or_default();
            if age > ttl {
                tracing::trace!(path = %path.display(), ?age, "disk entry expired");
                // racing with a concurrent sweep here is fine, the entry is
                // gone either way
                catch_not_found(|| std::fs::remove_file(&path))?;
                return Err(CacheError::NotFound);
            }

            let Some(data) = catch_not_found(|| std::fs::read(&path))? else {
                return Err(CacheError::NotFound);
            };
            tracing::trace!(path = %path.display(), len = data.len(), "disk hit");
            Ok(Bytes::from(data))
        })
        .await
    }

    /// Writes (or overwrites) the blob for `key`.
    ///
    /// The write goes through a sibling temp file that is atomically renamed
    /// into place, so concurrent readers never observe a partial entry.
    pub async fn store(&self, key: &CacheKey, blob: Bytes) -> CacheContents<()> {
        let path = self.entry_path(key);
        let root = self.root.clone();

        spawn_io(move || {
            std::fs::create_dir_all(&root)?;
            let mut temp_file = fresh_tempfile(&root)?;
            io::Write::write_all(&mut temp_file, &blob)?;
            temp_file.persist(&path).map_err(|e| e.error)?;
            Ok(())
        })
        .await
    }

    /// Relocates a fully downloaded temp file into the store as the entry
    /// for `key`, replacing any previous entry, and returns its contents.
    ///
    /// The entry's modification time is reset so the relocation counts as a
    /// fresh write for expiry purposes. If the rename fails, the contents are
    /// still served from the temp file and the disk failure is only logged.
    pub async fn store_transfer(
        &self,
        key: &CacheKey,
        temp_file: NamedTempFile,
    ) -> CacheContents<Bytes> {
        let path = self.entry_path(key);
        let root = self.root.clone();

        spawn_io(move || {
            if let Err(e) = std::fs::create_dir_all(&root) {
                tracing::error!(
                    error = &e as &dyn std::error::Error,
                    path = %root.display(),
                    "failed to create cache directory",
                );
            }

            match temp_file.persist(&path) {
                Ok(_) => {
                    // restart the age clock, the rename preserves the temp
                    // file's timestamps
                    if let Err(e) = filetime::set_file_mtime(&path, FileTime::now()) {
                        tracing::error!(
                            error = &e as &dyn std::error::Error,
                            path = %path.display(),
                            "failed to refresh entry mtime",
                        );
                    }
                    Ok(Bytes::from(std::fs::read(&path)?))
                }
                Err(e) => {
                    tracing::error!(
                        error = &e.error as &dyn std::error::Error,
                        path = %path.display(),
                        "failed to persist downloaded file",
                    );
                    Ok(Bytes::from(std::fs::read(e.file.path())?))
                }
            }
        })
        .await
    }

    /// Creates a temp file suitable for handing to [`store_transfer`] later.
    ///
    /// The file lives inside the root directory so the final rename never
    /// crosses a filesystem boundary. Its name starts with a `.` which makes
    /// [`sweep`] skip it.
    ///
    /// [`store_transfer`]: DiskStore::store_transfer
    /// [`sweep`]: DiskStore::sweep
    pub fn tempfile(&self) -> io::Result<NamedTempFile> {
        std::fs::create_dir_all(&self.root)?;
        fresh_tempfile(&self.root)
    }

    /// Deletes every expired file under the root directory.
    ///
    /// Subdirectories are descended into but never deleted themselves, and
    /// hidden entries are skipped. A failure on one file does not abort the
    /// sweep of the remaining files.
    pub fn sweep(&self) -> CacheContents<SweepStats> {
        let mut stats = SweepStats::default();
        if catch_not_found(|| read_dir(&self.root))?.is_some() {
            self.sweep_directory(&self.root, &mut stats)?;
        }

        tracing::debug!(
            removed_files = stats.removed_files,
            removed_bytes = stats.removed_bytes,
            retained_files = stats.retained_files,
            retained_bytes = stats.retained_bytes,
            "disk sweep complete",
        );
        Ok(stats)
    }

    fn sweep_directory(&self, directory: &Path, stats: &mut SweepStats) -> CacheContents<()> {
        let Some(entries) = catch_not_found(|| read_dir(directory))? else {
            return Ok(());
        };

        for entry in entries {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(e) => {
                    tracing::error!(
                        error = &e as &dyn std::error::Error,
                        directory = %directory.display(),
                        "failed to read directory entry",
                    );
                    continue;
                }
            };

            if is_hidden(&path) {
                continue;
            }

            if path.is_dir() {
                if let Err(e) = self.sweep_directory(&path, stats) {
                    tracing::error!(
                        error = &e as &dyn std::error::Error,
                        path = %path.display(),
                        "failed to sweep cache subdirectory",
                    );
                }
            } else if let Err(e) = self.try_sweep_file(&path, stats) {
                tracing::error!(
                    error = &e as &dyn std::error::Error,
                    path = %path.display(),
                    "failed to sweep cache file",
                );
            }
        }

        Ok(())
    }

    fn try_sweep_file(&self, path: &Path, stats: &mut SweepStats) -> io::Result<()> {
        let Some(metadata) = catch_not_found(|| path.metadata())? else {
            return Ok(());
        };
        let size = metadata.len();

        let age = metadata.modified()?.elapsed().unwrap_or_default();
        if age > self.ttl {
            tracing::trace!(path = %path.display(), "removing expired file");
            catch_not_found(|| std::fs::remove_file(path))?;
            stats.removed_files += 1;
            stats.removed_bytes += size;
        } else {
            stats.retained_files += 1;
            stats.retained_bytes += size;
        }

        Ok(())
    }
}

fn fresh_tempfile(dir: &Path) -> io::Result<NamedTempFile> {
    tempfile::Builder::new().prefix(".tmp").tempfile_in(dir)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with('.'))
}

/// Runs a filesystem closure on the blocking pool.
async fn spawn_io<F, T>(f: F) -> CacheContents<T>
where
    F: FnOnce() -> CacheContents<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CacheError::Io(e.to_string()))?
}

/// Maps `io::ErrorKind::NotFound` to `None` so racing deletions read as
/// plain misses.
pub(super) fn catch_not_found<F, R>(f: F) -> io::Result<Option<R>>
where
    F: FnOnce() -> io::Result<R>,
{
    match f() {
        Ok(x) => Ok(Some(x)),
        Err(e) => match e.kind() {
            io::ErrorKind::NotFound => Ok(None),
            _ => Err(e),
        },
    }
}
