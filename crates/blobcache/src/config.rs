use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// User-facing cache configuration.
///
/// All fields have defaults, so an empty config file (or
/// `Config::default()`) yields a working setup.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory to use for storing cache entries. Will be created if it
    /// does not exist.
    ///
    /// Defaults to a `blobcache` directory inside the platform's cache
    /// directory.
    pub cache_dir: Option<PathBuf>,

    /// Maximum number of entries held in the memory tier.
    pub memory_capacity: usize,

    /// Age after which a disk entry is considered expired.
    #[serde(with = "humantime_serde")]
    pub disk_ttl: Duration,

    /// Overall deadline for a single download.
    ///
    /// A download exceeding it fails with
    /// [`CacheError::Timeout`](crate::CacheError::Timeout).
    #[serde(with = "humantime_serde")]
    pub max_download: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_dir: None,
            memory_capacity: 50,
            disk_ttl: Duration::from_secs(3600 * 24),
            max_download: Duration::from_secs(300),
        }
    }
}

impl Config {
    /// Loads the configuration from a YAML file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let source = fs::read_to_string(path)
            .with_context(|| format!("failed to open config file {}", path.display()))?;
        serde_yaml::from_str(&source)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    /// The root directory for the disk tier, falling back to the platform
    /// default when none is configured.
    pub fn effective_cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(env::temp_dir)
                .join("blobcache")
        })
    }
}
