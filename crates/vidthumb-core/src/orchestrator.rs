//! Per-video thumbnail coordination.
//!
//! [`ThumbnailOrchestrator::get_thumbnail`] resolves a cover image for a
//! catalog record in order of cost: the record's stored thumbnail, then the
//! two-tier cache, then a frame extraction. Concurrent requests for the same
//! video share one extraction; failures are returned to every waiter and
//! are not cached or retried.
//!
//! Each extraction runs as its own task. When every request waiting on it
//! has gone away, the extraction is cancelled and its slot released, so a
//! later request always starts with a full timeout budget.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cache::ThumbnailCache;
use crate::error::ExtractError;
use crate::extractor::{ExtractOptions, FrameExtractor};
use crate::payload::ImageData;

/// Default seek position for catalog thumbnails.
pub const DEFAULT_SEEK_TIME_SECS: f64 = 0.5;

type SharedExtraction = Shared<BoxFuture<'static, Result<ImageData, ExtractError>>>;

/// A running extraction and the number of requests awaiting it.
struct InFlight {
    attempt: u64,
    outcome: SharedExtraction,
    waiters: usize,
    cancel: CancellationToken,
}

type InFlightMap = DashMap<String, InFlight>;

/// Registration of one request on an in-flight extraction.
///
/// Dropping the last waiter cancels the extraction and frees its slot.
struct Waiter<'a> {
    in_flight: &'a InFlightMap,
    video_id: &'a str,
    attempt: u64,
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        let released = self.in_flight.remove_if_mut(self.video_id, |_, slot| {
            if slot.attempt != self.attempt {
                return false;
            }
            slot.waiters = slot.waiters.saturating_sub(1);
            slot.waiters == 0
        });

        if let Some((_, slot)) = released {
            debug!("No requests left for {}, cancelling extraction", self.video_id);
            slot.cancel.cancel();
        }
    }
}

/// A catalog video as supplied by the catalog store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoRecord {
    /// Stable video identifier.
    pub id: String,
    /// Streaming source URL.
    pub source_url: String,
    /// Precomputed cover image, if the catalog has one.
    #[serde(default)]
    pub stored_thumbnail: Option<String>,
}

impl VideoRecord {
    /// Create a record without a stored thumbnail.
    pub fn new(id: impl Into<String>, source_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source_url: source_url.into(),
            stored_thumbnail: None,
        }
    }

    /// Attach a stored thumbnail.
    #[must_use]
    pub fn with_stored_thumbnail(mut self, thumbnail: impl Into<String>) -> Self {
        self.stored_thumbnail = Some(thumbnail.into());
        self
    }
}

/// A resolved thumbnail and where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Thumbnail {
    /// The record's own stored thumbnail, returned verbatim.
    Stored(String),
    /// Served from the cache.
    Cached(ImageData),
    /// Freshly extracted and written to the cache.
    Extracted(ImageData),
}

impl Thumbnail {
    /// The thumbnail as a string usable as an image source.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Stored(s) => s,
            Self::Cached(image) | Self::Extracted(image) => image.as_str(),
        }
    }

    /// Consume the thumbnail, returning its string form.
    #[must_use]
    pub fn into_string(self) -> String {
        match self {
            Self::Stored(s) => s,
            Self::Cached(image) | Self::Extracted(image) => image.into_string(),
        }
    }

    /// Short label for the thumbnail's origin.
    #[must_use]
    pub const fn origin(&self) -> &'static str {
        match self {
            Self::Stored(_) => "stored",
            Self::Cached(_) => "cached",
            Self::Extracted(_) => "extracted",
        }
    }
}

impl fmt::Display for Thumbnail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const fn default_seek_time_secs() -> f64 {
    DEFAULT_SEEK_TIME_SECS
}

const fn default_options() -> ExtractOptions {
    ExtractOptions::card()
}

/// Orchestrator settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Position of the extracted frame, in seconds.
    #[serde(default = "default_seek_time_secs")]
    pub seek_time_secs: f64,
    /// Extraction parameters.
    #[serde(default = "default_options")]
    pub options: ExtractOptions,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            seek_time_secs: DEFAULT_SEEK_TIME_SECS,
            options: ExtractOptions::card(),
        }
    }
}

/// Resolves thumbnails for catalog videos.
pub struct ThumbnailOrchestrator {
    cache: Arc<ThumbnailCache>,
    extractor: Arc<FrameExtractor>,
    config: OrchestratorConfig,
    in_flight: Arc<InFlightMap>,
    next_attempt: AtomicU64,
}

impl ThumbnailOrchestrator {
    /// Create an orchestrator.
    #[must_use]
    pub fn new(
        cache: Arc<ThumbnailCache>,
        extractor: Arc<FrameExtractor>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            cache,
            extractor,
            config,
            in_flight: Arc::new(DashMap::new()),
            next_attempt: AtomicU64::new(0),
        }
    }

    /// The cache consulted before extracting.
    #[must_use]
    pub fn cache(&self) -> &Arc<ThumbnailCache> {
        &self.cache
    }

    /// The extractor used on cache misses.
    #[must_use]
    pub fn extractor(&self) -> &Arc<FrameExtractor> {
        &self.extractor
    }

    /// Orchestrator settings.
    #[must_use]
    pub const fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Number of videos with an extraction currently running.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Resolve the thumbnail for `video`.
    pub async fn get_thumbnail(&self, video: &VideoRecord) -> Result<Thumbnail, ExtractError> {
        if let Some(stored) = video.stored_thumbnail.as_deref()
            && !stored.is_empty()
        {
            return Ok(Thumbnail::Stored(stored.to_string()));
        }

        if let Some(image) = self.cache.get(&video.id, &video.source_url) {
            return Ok(Thumbnail::Cached(image));
        }

        let (attempt, outcome) = self.join_or_start(video);
        let _waiter = Waiter {
            in_flight: &self.in_flight,
            video_id: &video.id,
            attempt,
        };
        outcome.await.map(Thumbnail::Extracted)
    }

    /// Register as a waiter on the running extraction for `video`, starting
    /// one if there is none.
    fn join_or_start(&self, video: &VideoRecord) -> (u64, SharedExtraction) {
        match self.in_flight.entry(video.id.clone()) {
            Entry::Occupied(mut entry) => {
                debug!("Joining in-flight extraction for {}", video.id);
                let slot = entry.get_mut();
                slot.waiters += 1;
                (slot.attempt, slot.outcome.clone())
            }
            Entry::Vacant(entry) => {
                info!("Starting thumbnail extraction for {}", video.id);
                let attempt = self.next_attempt.fetch_add(1, Ordering::Relaxed);
                let cancel = CancellationToken::new();
                let outcome = self.spawn_extraction(video, attempt, cancel.clone());
                entry.insert(InFlight {
                    attempt,
                    outcome: outcome.clone(),
                    waiters: 1,
                    cancel,
                });
                (attempt, outcome)
            }
        }
    }

    /// Extract on a separate task, write through on success, then release
    /// the in-flight slot if it still belongs to this attempt.
    fn spawn_extraction(
        &self,
        video: &VideoRecord,
        attempt: u64,
        cancel: CancellationToken,
    ) -> SharedExtraction {
        let cache = self.cache.clone();
        let extractor = self.extractor.clone();
        let in_flight = self.in_flight.clone();
        let config = self.config;
        let video_id = video.id.clone();
        let source_url = video.source_url.clone();

        let handle = tokio::spawn(async move {
            let result = extractor
                .extract_with_cancel(&source_url, config.seek_time_secs, &config.options, cancel)
                .await;

            if let Ok(image) = &result {
                cache.set(&video_id, &source_url, image.clone());
            }
            in_flight.remove_if(&video_id, |_, slot| slot.attempt == attempt);
            result
        });

        handle
            .map(|joined| {
                joined.unwrap_or_else(|e| {
                    Err(ExtractError::Fatal(format!("extraction task failed: {e}")))
                })
            })
            .boxed()
            .shared()
    }
}

impl fmt::Debug for ThumbnailOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThumbnailOrchestrator")
            .field("config", &self.config)
            .field("in_flight", &self.in_flight.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::ephemeral::EphemeralMap;
    use crate::payload::JPEG_MIME;
    use crate::scripted::{ScriptedBackend, ScriptedSource};
    use crate::store::MemoryKvStore;
    use std::time::Duration;

    const URL: &str = "https://cdn.example.com/v1/master.m3u8";

    fn orchestrator(backend: &Arc<ScriptedBackend>) -> ThumbnailOrchestrator {
        let cache = ThumbnailCache::new(
            CacheConfig::default(),
            Arc::new(MemoryKvStore::new()),
            Arc::new(EphemeralMap::new()),
        );
        ThumbnailOrchestrator::new(
            Arc::new(cache),
            Arc::new(FrameExtractor::new(backend.clone())),
            OrchestratorConfig::default(),
        )
    }

    fn healthy_backend() -> Arc<ScriptedBackend> {
        Arc::new(ScriptedBackend::new(
            ScriptedSource::healthy(10.0, 640, 360).with_open_delay(Duration::from_millis(20)),
        ))
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_extraction() {
        let backend = healthy_backend();
        let orchestrator = orchestrator(&backend);
        let video = VideoRecord::new("v1", URL);

        let (a, b, c) = tokio::join!(
            orchestrator.get_thumbnail(&video),
            orchestrator.get_thumbnail(&video),
            orchestrator.get_thumbnail(&video),
        );

        let a = a.unwrap();
        assert!(matches!(a, Thumbnail::Extracted(_)));
        assert_eq!(a, b.unwrap());
        assert_eq!(a, c.unwrap());
        assert_eq!(backend.opened(), 1);
        assert_eq!(orchestrator.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_extracted_thumbnail_is_cached() {
        let backend = healthy_backend();
        let orchestrator = orchestrator(&backend);
        let video = VideoRecord::new("v1", URL);

        let first = orchestrator.get_thumbnail(&video).await.unwrap();
        let second = orchestrator.get_thumbnail(&video).await.unwrap();

        assert_eq!(first.origin(), "extracted");
        assert_eq!(second.origin(), "cached");
        assert_eq!(first.as_str(), second.as_str());
        assert_eq!(backend.opened(), 1);
    }

    #[tokio::test]
    async fn test_stored_thumbnail_passthrough() {
        let backend = healthy_backend();
        let orchestrator = orchestrator(&backend);
        let video = VideoRecord::new("v1", URL).with_stored_thumbnail("https://img/cover.jpg");

        let thumbnail = orchestrator.get_thumbnail(&video).await.unwrap();

        assert_eq!(thumbnail, Thumbnail::Stored("https://img/cover.jpg".to_string()));
        assert_eq!(backend.opened(), 0);
    }

    #[tokio::test]
    async fn test_empty_stored_thumbnail_is_ignored() {
        let backend = healthy_backend();
        let orchestrator = orchestrator(&backend);
        let video = VideoRecord::new("v1", URL).with_stored_thumbnail("");

        let thumbnail = orchestrator.get_thumbnail(&video).await.unwrap();
        assert_eq!(thumbnail.origin(), "extracted");
    }

    #[tokio::test]
    async fn test_cache_hit_skips_extraction() {
        let backend = healthy_backend();
        let orchestrator = orchestrator(&backend);
        let image = ImageData::from_bytes(JPEG_MIME, &[0xFF, 0xD8]);
        orchestrator.cache().set("v1", URL, image.clone());

        let thumbnail = orchestrator.get_thumbnail(&VideoRecord::new("v1", URL)).await.unwrap();

        assert_eq!(thumbnail, Thumbnail::Cached(image));
        assert_eq!(backend.opened(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_not_cached_or_retried() {
        let backend = Arc::new(ScriptedBackend::new(ScriptedSource::stalled()));
        let orchestrator = orchestrator(&backend);
        let video = VideoRecord::new("v1", URL);

        let err = orchestrator.get_thumbnail(&video).await.unwrap_err();
        assert_eq!(err, ExtractError::Timeout { timeout_ms: 10_000 });
        assert_eq!(backend.opened(), 1);
        assert!(orchestrator.cache().get("v1", URL).is_none());
        assert_eq!(orchestrator.in_flight_count(), 0);

        // A later request starts a fresh attempt.
        let _ = orchestrator.get_thumbnail(&video).await;
        assert_eq!(backend.opened(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_request_does_not_leave_stale_extraction() {
        let backend = healthy_backend();
        let orchestrator = orchestrator(&backend);
        let video = VideoRecord::new("v1", URL);

        let abandoned =
            tokio::time::timeout(Duration::from_millis(5), orchestrator.get_thumbnail(&video)).await;
        assert!(abandoned.is_err());
        assert_eq!(orchestrator.in_flight_count(), 0);

        // Well past the extraction timeout of the abandoned attempt.
        tokio::time::sleep(Duration::from_secs(60)).await;

        let thumbnail = orchestrator.get_thumbnail(&video).await.unwrap();
        assert_eq!(thumbnail.origin(), "extracted");
        assert_eq!(backend.opened(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_waiter_dropped_releases_session() {
        let backend = Arc::new(ScriptedBackend::new(ScriptedSource::stalled()));
        let orchestrator = orchestrator(&backend);
        let video = VideoRecord::new("v1", URL);

        let abandoned =
            tokio::time::timeout(Duration::from_secs(1), orchestrator.get_thumbnail(&video)).await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(backend.opened(), 1);
        assert_eq!(backend.released(), 1);
        assert_eq!(orchestrator.in_flight_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remaining_waiter_keeps_extraction_alive() {
        let backend = healthy_backend();
        let orchestrator = orchestrator(&backend);
        let video = VideoRecord::new("v1", URL);

        let (abandoned, kept) = tokio::join!(
            tokio::time::timeout(Duration::from_millis(5), orchestrator.get_thumbnail(&video)),
            orchestrator.get_thumbnail(&video),
        );

        assert!(abandoned.is_err());
        assert_eq!(kept.unwrap().origin(), "extracted");
        assert_eq!(backend.opened(), 1);
        assert_eq!(orchestrator.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_distinct_videos_extract_independently() {
        let backend = healthy_backend();
        let orchestrator = orchestrator(&backend);
        let first = VideoRecord::new("v1", URL);
        let second = VideoRecord::new("v2", "https://cdn.example.com/v2/master.m3u8");

        let (a, b) = tokio::join!(
            orchestrator.get_thumbnail(&first),
            orchestrator.get_thumbnail(&second),
        );

        assert!(a.is_ok() && b.is_ok());
        assert_eq!(backend.opened(), 2);
    }

    #[test]
    fn test_config_defaults() {
        let config: OrchestratorConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, OrchestratorConfig::default());
        assert_eq!(config.seek_time_secs, 0.5);
        assert_eq!(config.options, ExtractOptions::card());
    }
}
