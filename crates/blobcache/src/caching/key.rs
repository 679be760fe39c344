use std::fmt::{self, Write};
use std::sync::Arc;

use sha2::{Digest, Sha256};

/// The key under which a blob is addressed across all cache tiers.
///
/// A key is derived deterministically from the request URL, so it is stable
/// across process restarts and usable as the join key between the memory
/// tier, the disk tier, and in-flight request deduplication. The URL is
/// normalized by stripping a single trailing `/` before hashing, so
/// `http://x/a/` and `http://x/a` address the same entry.
#[derive(Debug, Clone, Eq)]
pub struct CacheKey {
    url: Arc<str>,
    hash: [u8; 32],
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl std::hash::Hash for CacheKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.file_name())
    }
}

impl CacheKey {
    /// Derives the [`CacheKey`] for the given URL.
    pub fn from_url(url: &str) -> Self {
        let normalized = url.strip_suffix('/').unwrap_or(url);

        let hash = Sha256::digest(normalized);
        let hash = <[u8; 32]>::try_from(hash.as_slice()).expect("sha256 outputs 32 bytes");

        Self {
            url: normalized.into(),
            hash,
        }
    }

    /// The normalized URL this key was derived from.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The file name for this key inside the disk store's root directory.
    ///
    /// This is the hex-formatted sha-256 hash of the normalized URL, which
    /// contains no path separators or otherwise reserved characters.
    pub fn file_name(&self) -> String {
        let mut name = String::with_capacity(64);
        for b in &self.hash {
            name.write_fmt(format_args!("{b:02x}")).unwrap();
        }
        name
    }
}
