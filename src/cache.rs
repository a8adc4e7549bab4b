//! Transcode cache: deterministic entry identity plus the on-disk store
//!
//! Entries are plain `<key>.mp3` files in the cache root. Presence of the
//! file IS the cache-hit signal; there is no index, no sidecar metadata and
//! no TTL. Entries are created on miss and only ever removed by `clear`.

use crate::error::{MediaError, Result};
use crate::models::{EncodingProfile, SourceFile};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

/// Hex length of a cache key
///
/// 64 bits of a SHA-256 digest. Collisions at library scale are negligible,
/// and the short form keeps cache filenames readable.
pub const CACHE_KEY_LEN: usize = 16;

/// File extension of every cache entry
const CACHE_ENTRY_EXT: &str = "mp3";

/// Compute the cache key for a (file, profile) pair
///
/// Deterministic over `(path, mtime, quality, bitrate)`: the same four
/// inputs always produce the same key, and replacing a source file (new
/// mtime) implicitly invalidates its old entries.
pub fn cache_key(source: &SourceFile, profile: &EncodingProfile) -> String {
    let key_data = format!(
        "{}:{}:{}:{}",
        source.path.display(),
        source.mtime_secs,
        profile.quality,
        profile.bitrate
    );

    let digest = Sha256::digest(key_data.as_bytes());
    let mut key = String::with_capacity(CACHE_KEY_LEN);
    for byte in digest.iter().take(CACHE_KEY_LEN / 2) {
        key.push_str(&format!("{:02x}", byte));
    }
    key
}

/// On-disk store for transcoded cache entries
#[derive(Debug, Clone)]
pub struct TranscodeCache {
    root: PathBuf,
}

impl TranscodeCache {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        TranscodeCache {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Cache root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path a cache entry for `key` lives at, whether or not it exists
    pub fn entry_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.{}", key, CACHE_ENTRY_EXT))
    }

    /// Create the cache directory if absent; idempotent, called at startup
    pub async fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await.map_err(|e| {
            MediaError::CacheError(format!(
                "Failed to create cache directory {}: {}",
                self.root.display(),
                e
            ))
        })
    }

    /// Whether a complete entry exists for `key`
    pub async fn exists(&self, key: &str) -> bool {
        fs::try_exists(self.entry_path(key)).await.unwrap_or(false)
    }

    /// Total size in bytes of all cache entries
    ///
    /// Only files matching the entry naming pattern count. An absent cache
    /// directory reads as zero, not an error.
    pub async fn total_size(&self) -> Result<u64> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(MediaError::CacheError(format!(
                    "Failed to read cache directory: {}",
                    e
                )))
            }
        };

        let mut total = 0u64;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| MediaError::CacheError(e.to_string()))?
        {
            if !is_cache_entry(&entry.path()) {
                continue;
            }
            match entry.metadata().await {
                Ok(meta) if meta.is_file() => total += meta.len(),
                Ok(_) => {}
                Err(e) => warn!("Failed to stat cache entry {:?}: {}", entry.path(), e),
            }
        }

        Ok(total)
    }

    /// Delete every cache entry, returning the number removed
    pub async fn clear(&self) -> Result<usize> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(MediaError::CacheError(format!(
                    "Failed to read cache directory: {}",
                    e
                )))
            }
        };

        let mut removed = 0usize;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| MediaError::CacheError(e.to_string()))?
        {
            let path = entry.path();
            if !is_cache_entry(&path) {
                continue;
            }
            match fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) => {
                    return Err(MediaError::CacheError(format!(
                        "Failed to remove cache entry {:?}: {}",
                        path, e
                    )))
                }
            }
        }

        debug!("Cleared {} cache entries from {}", removed, self.root.display());
        Ok(removed)
    }
}

fn is_cache_entry(path: &Path) -> bool {
    path.extension()
        .map(|e| e == CACHE_ENTRY_EXT)
        .unwrap_or(false)
}
