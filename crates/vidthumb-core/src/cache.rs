//! Two-tier cache for extracted thumbnails.
//!
//! This module combines:
//! - An ephemeral in-process map for repeated reads, never holding a video
//!   the durable tier has dropped
//! - A durable key/value store that survives restarts
//! - TTL expiry and source-URL freshness checks on read
//! - A soft entry cap enforced by a sweep after each write
//! - Evict-half-and-retry recovery when the durable store runs out of quota
//!
//! Cache operations never fail from the caller's point of view. Storage
//! errors are logged and the write or read is treated as a miss.
//!
//! # Example
//!
//! ```rust,ignore
//! use vidthumb_core::cache::{CacheConfig, ThumbnailCache};
//!
//! let cache = ThumbnailCache::open(CacheConfig::default())?;
//!
//! cache.set("video-1", "https://cdn.example.com/v1/index.m3u8", image);
//! if let Some(image) = cache.get("video-1", "https://cdn.example.com/v1/index.m3u8") {
//!     println!("cached cover: {} bytes", image.len());
//! }
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::ephemeral::EphemeralMap;
use crate::error::{Error, Result};
use crate::payload::ImageData;
use crate::store::{FileKvStore, KvStore};

/// Default cache TTL in seconds (7 days).
pub const DEFAULT_CACHE_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// Default soft cap on durable entries.
pub const DEFAULT_MAX_ENTRIES: usize = 500;

/// Default durable store quota in bytes (5 MiB).
pub const DEFAULT_MAX_STORE_BYTES: u64 = 5 * 1024 * 1024;

/// Prefix of every durable key owned by the thumbnail cache.
pub const CACHE_KEY_PREFIX: &str = "video_thumbnail_";

/// Cache configuration options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheConfig {
    /// Whether caching is enabled.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Time-to-live for durable entries in seconds.
    #[serde(default = "default_ttl")]
    pub ttl_secs: u64,

    /// Soft cap on the number of durable entries.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Quota for the durable store in bytes.
    #[serde(default = "default_max_store_bytes")]
    pub max_store_bytes: u64,

    /// Custom durable store directory (optional).
    /// If not set, uses the default platform-specific location.
    #[serde(default)]
    pub store_dir: Option<PathBuf>,
}

const fn default_true() -> bool {
    true
}

const fn default_ttl() -> u64 {
    DEFAULT_CACHE_TTL_SECS
}

const fn default_max_entries() -> usize {
    DEFAULT_MAX_ENTRIES
}

const fn default_max_store_bytes() -> u64 {
    DEFAULT_MAX_STORE_BYTES
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: DEFAULT_CACHE_TTL_SECS,
            max_entries: DEFAULT_MAX_ENTRIES,
            max_store_bytes: DEFAULT_MAX_STORE_BYTES,
            store_dir: None,
        }
    }
}

impl CacheConfig {
    /// Create a new cache configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the cache TTL.
    #[must_use]
    pub const fn with_ttl(mut self, ttl_secs: u64) -> Self {
        self.ttl_secs = ttl_secs;
        self
    }

    /// Set the soft cap on durable entries.
    #[must_use]
    pub const fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// Set the durable store quota.
    #[must_use]
    pub const fn with_max_store_bytes(mut self, max_store_bytes: u64) -> Self {
        self.max_store_bytes = max_store_bytes;
        self
    }

    /// Set the durable store directory.
    #[must_use]
    pub fn with_store_dir(mut self, path: PathBuf) -> Self {
        self.store_dir = Some(path);
        self
    }

    /// Disable caching entirely.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Durable store directory, falling back to the platform default.
    #[must_use]
    pub fn resolved_store_dir(&self) -> PathBuf {
        self.store_dir
            .clone()
            .unwrap_or_else(default_cache_directory)
    }

    /// Check the configuration for values the cache cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.max_entries == 0 {
            return Err(Error::configuration("cache.max_entries must be at least 1"));
        }
        if self.ttl_secs == 0 {
            return Err(Error::configuration("cache.ttl_secs must be at least 1"));
        }
        Ok(())
    }

    const fn ttl_millis(&self) -> u64 {
        self.ttl_secs.saturating_mul(1000)
    }
}

/// One durable cache entry, serialized as JSON under `video_thumbnail_<id>`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheEntry {
    /// The encoded cover frame.
    pub thumbnail: ImageData,
    /// Creation time in milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// Source URL the frame was extracted from.
    pub url: String,
}

impl CacheEntry {
    /// Create an entry stamped with the current time.
    #[must_use]
    pub fn new(thumbnail: ImageData, url: impl Into<String>) -> Self {
        Self::with_timestamp(thumbnail, url, now_millis())
    }

    /// Create an entry with an explicit creation time.
    #[must_use]
    pub fn with_timestamp(thumbnail: ImageData, url: impl Into<String>, timestamp: u64) -> Self {
        Self {
            thumbnail,
            timestamp,
            url: url.into(),
        }
    }

    /// Check if this entry has outlived the given TTL.
    #[must_use]
    pub const fn is_expired(&self, ttl_millis: u64, now_millis: u64) -> bool {
        now_millis.saturating_sub(self.timestamp) >= ttl_millis
    }

    /// Check if this entry was produced from `source_url`.
    #[must_use]
    pub fn matches_source(&self, source_url: &str) -> bool {
        self.url == source_url
    }
}

/// Statistics about the current cache state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct CacheStats {
    /// Number of entries in the durable tier.
    pub durable_count: usize,
    /// Number of entries in the ephemeral tier.
    pub ephemeral_count: usize,
    /// Total serialized size of durable entries in bytes.
    pub total_bytes: u64,
    /// Whether caching is enabled.
    pub enabled: bool,
}

/// Statistics from a cache clear operation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct CacheCleanupStats {
    /// Number of durable entries removed.
    pub entries_removed: usize,
    /// Bytes freed in the durable tier.
    pub bytes_freed: u64,
}

/// Two-tier thumbnail cache.
pub struct ThumbnailCache {
    /// Cache configuration.
    config: CacheConfig,
    /// Durable tier.
    durable: Arc<dyn KvStore>,
    /// Ephemeral tier.
    ephemeral: Arc<EphemeralMap>,
}

impl ThumbnailCache {
    /// Create a cache over the given tiers.
    #[must_use]
    pub fn new(config: CacheConfig, durable: Arc<dyn KvStore>, ephemeral: Arc<EphemeralMap>) -> Self {
        Self {
            config,
            durable,
            ephemeral,
        }
    }

    /// Open a cache backed by a file store in the configured directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the store
    /// directory cannot be created.
    pub fn open(config: CacheConfig) -> Result<Self> {
        config.validate()?;
        let dir = config.resolved_store_dir();
        let store = FileKvStore::open(&dir)?.with_quota(config.max_store_bytes);

        let cache = Self::new(config, Arc::new(store), Arc::new(EphemeralMap::new()));
        info!(
            "Thumbnail cache initialized at {} with {} entries",
            dir.display(),
            cache.durable_keys().len()
        );
        Ok(cache)
    }

    /// Get the cache configuration.
    #[must_use]
    pub const fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Check if caching is enabled.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// The ephemeral tier shared by this cache.
    #[must_use]
    pub fn ephemeral(&self) -> &Arc<EphemeralMap> {
        &self.ephemeral
    }

    /// Look up the thumbnail for a video.
    ///
    /// Returns `None` on a miss, when the durable entry has expired, or when it
    /// was produced from a different source URL. Expired and stale entries
    /// are evicted.
    pub fn get(&self, video_id: &str, source_url: &str) -> Option<ImageData> {
        if !self.config.enabled {
            return None;
        }

        if let Some(image) = self.ephemeral.get(video_id, source_url) {
            debug!("Ephemeral cache hit for {}", video_id);
            return Some(image);
        }

        let key = cache_key(video_id);
        let raw = match self.durable.get(&key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!("Failed to read cached thumbnail for {}: {}", video_id, e);
                return None;
            }
        };

        let entry: CacheEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Dropping unreadable cache entry for {}: {}", video_id, e);
                self.delete_durable(&key);
                return None;
            }
        };

        if entry.is_expired(self.config.ttl_millis(), now_millis()) {
            debug!("Cached thumbnail for {} expired", video_id);
            self.delete_durable(&key);
            return None;
        }

        if !entry.matches_source(source_url) {
            debug!("Cached thumbnail for {} is stale (source changed)", video_id);
            self.delete_durable(&key);
            return None;
        }

        debug!("Durable cache hit for {}", video_id);
        self.ephemeral
            .insert(video_id, source_url, entry.thumbnail.clone());
        Some(entry.thumbnail)
    }

    /// Store the thumbnail for a video in both tiers.
    ///
    /// The ephemeral write always happens. The durable write is best effort:
    /// on a quota failure the oldest half of the durable entries is evicted and
    /// the write retried once; any remaining failure is logged and dropped.
    pub fn set(&self, video_id: &str, source_url: &str, image: ImageData) {
        if !self.config.enabled {
            return;
        }

        self.ephemeral.insert(video_id, source_url, image.clone());

        let key = cache_key(video_id);
        let value = match serde_json::to_string(&CacheEntry::new(image, source_url)) {
            Ok(value) => value,
            Err(e) => {
                warn!("Failed to serialize cache entry for {}: {}", video_id, e);
                return;
            }
        };

        match self.durable.set(&key, &value) {
            Ok(()) => {}
            Err(e) if e.is_quota_exceeded() => {
                warn!("Durable cache full while storing {}, evicting oldest half", video_id);
                self.evict_oldest_half();
                if let Err(e) = self.durable.set(&key, &value) {
                    warn!("Retry failed, thumbnail for {} not persisted: {}", video_id, e);
                    return;
                }
            }
            Err(e) => {
                warn!("Failed to persist thumbnail for {}: {}", video_id, e);
                return;
            }
        }

        debug!("Cached thumbnail for video {}", video_id);
        self.sweep();
    }

    /// Remove the thumbnail for a video from both tiers.
    pub fn evict(&self, video_id: &str) {
        self.ephemeral.remove(video_id);
        self.delete_durable(&cache_key(video_id));
        debug!("Evicted thumbnail for video {}", video_id);
    }

    /// Clear both tiers. Keys in the durable store that do not belong to the
    /// cache are left alone.
    pub fn clear_all(&self) -> CacheCleanupStats {
        self.ephemeral.clear();

        let mut stats = CacheCleanupStats::default();
        for key in self.durable_keys() {
            let size = self
                .durable
                .get(&key)
                .ok()
                .flatten()
                .map_or(0, |v| v.len() as u64);
            if self.delete_durable(&key) {
                stats.entries_removed += 1;
                stats.bytes_freed += size;
            }
        }

        info!(
            "Thumbnail cache cleared: {} entries, {} bytes",
            stats.entries_removed, stats.bytes_freed
        );
        stats
    }

    /// Get cache statistics.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let keys = self.durable_keys();
        let total_bytes = keys
            .iter()
            .filter_map(|key| self.durable.get(key).ok().flatten())
            .map(|v| v.len() as u64)
            .sum();

        CacheStats {
            durable_count: keys.len(),
            ephemeral_count: self.ephemeral.len(),
            total_bytes,
            enabled: self.config.enabled,
        }
    }

    // =========================================================================
    // Durable Tier Maintenance
    // =========================================================================

    /// Trim the durable tier back to the soft cap, oldest first.
    fn sweep(&self) -> usize {
        let keys = self.durable_keys();
        if keys.len() <= self.config.max_entries {
            return 0;
        }

        let excess = keys.len() - self.config.max_entries;
        let removed = self.remove_oldest(keys, excess);
        debug!("Cache sweep removed {} entries", removed);
        removed
    }

    /// Drop the oldest ⌈n/2⌉ durable entries to make room after a quota failure.
    fn evict_oldest_half(&self) -> usize {
        let keys = self.durable_keys();
        let count = keys.len().div_ceil(2);
        let removed = self.remove_oldest(keys, count);
        info!("Evicted {} oldest cached thumbnails to free space", removed);
        removed
    }

    fn remove_oldest(&self, keys: Vec<String>, count: usize) -> usize {
        let mut aged: Vec<(u64, String)> = keys
            .into_iter()
            .map(|key| (self.durable_timestamp(&key), key))
            .collect();
        aged.sort();

        aged.into_iter()
            .take(count)
            .filter(|(_, key)| self.remove_entry(key))
            .count()
    }

    /// Remove a durable entry and the ephemeral copy of the same video.
    fn remove_entry(&self, key: &str) -> bool {
        if !self.delete_durable(key) {
            return false;
        }
        if let Some(video_id) = key.strip_prefix(CACHE_KEY_PREFIX) {
            self.ephemeral.remove(video_id);
        }
        true
    }

    /// Creation time of a durable entry; unreadable entries count as oldest.
    fn durable_timestamp(&self, key: &str) -> u64 {
        self.durable
            .get(key)
            .ok()
            .flatten()
            .and_then(|raw| serde_json::from_str::<TimestampOnly>(&raw).ok())
            .map_or(0, |t| t.timestamp)
    }

    fn durable_keys(&self) -> Vec<String> {
        match self.durable.keys() {
            Ok(keys) => keys
                .into_iter()
                .filter(|k| k.starts_with(CACHE_KEY_PREFIX))
                .collect(),
            Err(e) => {
                warn!("Failed to list durable cache keys: {}", e);
                Vec::new()
            }
        }
    }

    fn delete_durable(&self, key: &str) -> bool {
        match self.durable.delete(key) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to remove cache entry {}: {}", key, e);
                false
            }
        }
    }
}

/// Partial view of a durable entry used when ordering by age.
#[derive(Deserialize)]
struct TimestampOnly {
    timestamp: u64,
}

/// Durable key for a video id.
#[must_use]
pub fn cache_key(video_id: &str) -> String {
    format!("{CACHE_KEY_PREFIX}{video_id}")
}

/// Get the default durable store directory.
#[must_use]
pub fn default_cache_directory() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| dirs::data_local_dir().unwrap_or_else(|| PathBuf::from(".")))
        .join("vidthumb")
        .join("thumbnails")
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
