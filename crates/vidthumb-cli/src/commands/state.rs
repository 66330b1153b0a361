//! Configuration and the services built from it.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};
use vidthumb_core::{
    AppConfig, FfmpegBackend, FrameExtractor, Result, ThumbnailCache, ThumbnailOrchestrator,
};

/// Loaded configuration shared by every subcommand.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Effective configuration.
    pub config: AppConfig,
}

impl AppState {
    /// Load configuration from `path`, or from the platform config directory.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => AppConfig::load_from(path)?,
            None => AppConfig::load()?,
        };
        debug!("Using configuration: {:?}", config);
        Ok(Self { config })
    }

    /// Open the configured thumbnail cache.
    pub fn cache(&self) -> Result<Arc<ThumbnailCache>> {
        Ok(Arc::new(ThumbnailCache::open(self.config.cache.clone())?))
    }

    /// Build a frame extractor over the ffmpeg backend.
    #[must_use]
    pub fn extractor(&self) -> Arc<FrameExtractor> {
        let backend = FfmpegBackend::new(&self.config.ffmpeg);
        if !backend.is_available() {
            warn!(
                "ffmpeg/ffprobe not found ({} / {}); extraction will fail",
                self.config.ffmpeg.ffmpeg_path.display(),
                self.config.ffmpeg.ffprobe_path.display()
            );
        }
        Arc::new(FrameExtractor::new(Arc::new(backend)))
    }

    /// Build an orchestrator over the cache and extractor.
    pub fn orchestrator(&self) -> Result<ThumbnailOrchestrator> {
        Ok(ThumbnailOrchestrator::new(
            self.cache()?,
            self.extractor(),
            self.config.orchestrator(),
        ))
    }
}
