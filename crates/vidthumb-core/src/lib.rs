//! `Vidthumb` Core Library
//!
//! This crate provides the thumbnail subsystem of a video catalog:
//! - Single-frame extraction from streaming video sources
//! - A two-tier thumbnail cache (ephemeral map plus durable key/value store)
//! - Per-video orchestration with in-flight deduplication
//! - Media backends: an `ffprobe`/`ffmpeg` subprocess binding, plus a
//!   scripted backend for tests behind the `testing` feature
//! - Application configuration management
//!
//! # Error Handling
//!
//! Extraction failures are reported as [`ExtractError`]; everything else
//! goes through the crate-level [`Error`]. See the [`error`] module.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vidthumb_core::{
//!     AppConfig, FfmpegBackend, FrameExtractor, ThumbnailCache, ThumbnailOrchestrator,
//!     VideoRecord,
//! };
//!
//! let config = AppConfig::load()?;
//! let cache = Arc::new(ThumbnailCache::open(config.cache.clone())?);
//! let extractor = Arc::new(FrameExtractor::new(Arc::new(FfmpegBackend::new(&config.ffmpeg))));
//! let orchestrator = ThumbnailOrchestrator::new(cache, extractor, config.orchestrator());
//!
//! let video = VideoRecord::new("v1", "https://cdn.example.com/v1/master.m3u8");
//! let thumbnail = orchestrator.get_thumbnail(&video).await?;
//! ```

pub mod cache;
pub mod config;
pub mod ephemeral;
pub mod error;
pub mod extractor;
pub mod ffmpeg;
pub mod orchestrator;
pub mod payload;
pub mod raster;
#[cfg(any(test, feature = "testing"))]
pub mod scripted;
pub mod session;
pub mod store;

pub use cache::{
    CACHE_KEY_PREFIX, CacheCleanupStats, CacheConfig, CacheEntry, CacheStats,
    DEFAULT_CACHE_TTL_SECS, DEFAULT_MAX_ENTRIES, DEFAULT_MAX_STORE_BYTES, ThumbnailCache,
    cache_key, default_cache_directory,
};
pub use config::AppConfig;
pub use ephemeral::EphemeralMap;
pub use error::{Error, ErrorKind, ExtractError, PayloadError, Result, StoreError};
pub use extractor::{
    DEFAULT_MAX_WIDTH, DEFAULT_QUALITY, DEFAULT_TIMEOUT_MS, ExtractOptions, ExtractionState,
    FrameExtractor, METADATA_GRACE, SourceKind, clamp_seek,
};
pub use ffmpeg::{FfmpegBackend, FfmpegConfig, FfmpegSession, resolve_binary};
pub use orchestrator::{
    DEFAULT_SEEK_TIME_SECS, OrchestratorConfig, Thumbnail, ThumbnailOrchestrator, VideoRecord,
};
pub use payload::{ImageData, JPEG_MIME};
#[cfg(any(test, feature = "testing"))]
pub use scripted::{ScriptedBackend, ScriptedSource};
pub use session::{
    DecodeFault, FaultKind, MediaBackend, MediaMetadata, MediaSession, SessionEvent,
};
pub use store::{FileKvStore, KvStore, MemoryKvStore, StoreResult};
pub use tokio_util::sync::CancellationToken;
