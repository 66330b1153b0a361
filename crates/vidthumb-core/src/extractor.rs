//! Single-frame extraction from streaming video sources.
//!
//! [`FrameExtractor::extract`] drives one [`MediaSession`] through
//!
//! ```text
//! Idle -> SessionOpening -> MetadataReady -> Seeking -> Captured -> Done
//! ```
//!
//! while a wall-clock timer races the whole pipeline. Whichever settles first
//! decides the outcome and the session is disposed either way.
//!
//! Fatal network faults get one reload and fatal media faults one decoder
//! recovery before the extraction gives up. Non-fatal faults are ignored.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use image::RgbImage;
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ExtractError;
use crate::payload::ImageData;
use crate::raster;
use crate::session::{DecodeFault, FaultKind, MediaBackend, MediaMetadata, MediaSession, SessionEvent};

/// Default wall-clock budget for an extraction.
pub const DEFAULT_TIMEOUT_MS: u64 = 15_000;

/// Default JPEG quality.
pub const DEFAULT_QUALITY: f32 = 0.7;

/// Default raster width cap.
pub const DEFAULT_MAX_WIDTH: u32 = 640;

/// How long to wait for metadata after the sink reports playable before
/// seeking anyway.
pub const METADATA_GRACE: Duration = Duration::from_millis(100);

/// Seek ceiling used when the source duration is unknown.
const UNKNOWN_DURATION_SEEK_CAP: f64 = 1.0;

const fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

const fn default_quality() -> f32 {
    DEFAULT_QUALITY
}

#[allow(clippy::unnecessary_wraps)]
const fn default_max_width() -> Option<u32> {
    Some(DEFAULT_MAX_WIDTH)
}

/// Per-call extraction parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExtractOptions {
    /// Wall-clock budget in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// JPEG quality between 0 and 1. Out-of-range values are clamped.
    #[serde(default = "default_quality")]
    pub quality: f32,
    /// Maximum raster width. `None` keeps the native width.
    #[serde(default = "default_max_width")]
    pub max_width: Option<u32>,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            quality: DEFAULT_QUALITY,
            max_width: Some(DEFAULT_MAX_WIDTH),
        }
    }
}

impl ExtractOptions {
    /// Options for catalog grid cards.
    #[must_use]
    pub const fn card() -> Self {
        Self {
            timeout_ms: 10_000,
            quality: 0.6,
            max_width: Some(480),
        }
    }

    /// Options for a manual full-resolution capture.
    #[must_use]
    pub const fn full_frame() -> Self {
        Self {
            timeout_ms: 30_000,
            quality: 0.8,
            max_width: None,
        }
    }

    /// Set the timeout.
    #[must_use]
    pub const fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Set the JPEG quality.
    #[must_use]
    pub const fn with_quality(mut self, quality: f32) -> Self {
        self.quality = quality;
        self
    }

    /// Set the maximum raster width.
    #[must_use]
    pub const fn with_max_width(mut self, max_width: Option<u32>) -> Self {
        self.max_width = max_width;
        self
    }

    /// Timeout as a duration.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Reject options no extraction could satisfy.
    pub fn validate(&self) -> Result<(), ExtractError> {
        if self.timeout_ms == 0 {
            return Err(ExtractError::fatal("timeout must be greater than zero"));
        }
        if self.max_width == Some(0) {
            return Err(ExtractError::fatal("max width must be greater than zero"));
        }
        Ok(())
    }
}

/// How a source URL is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// An adaptive-streaming manifest.
    Adaptive,
    /// A plain progressive file.
    Progressive,
}

impl SourceKind {
    /// Classify a URL by the extension of its path.
    #[must_use]
    pub fn detect(url: &str) -> Self {
        let path = url.split(['?', '#']).next().unwrap_or(url);
        if path.to_ascii_lowercase().ends_with(".m3u8") {
            Self::Adaptive
        } else {
            Self::Progressive
        }
    }
}

/// Stage of a single extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionState {
    /// Nothing started yet.
    Idle,
    /// Waiting for the session to report metadata or playability.
    SessionOpening,
    /// Duration and dimensions are known.
    MetadataReady,
    /// A seek has been requested.
    Seeking,
    /// The frame has been rasterized and encoded.
    Captured,
    /// Resolved with a payload.
    Done,
}

impl fmt::Display for ExtractionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::SessionOpening => write!(f, "session_opening"),
            Self::MetadataReady => write!(f, "metadata_ready"),
            Self::Seeking => write!(f, "seeking"),
            Self::Captured => write!(f, "captured"),
            Self::Done => write!(f, "done"),
        }
    }
}

/// Clamp a requested seek position against the source duration.
///
/// Negative and NaN positions become 0. Live sources (infinite duration) are
/// not clamped; unknown or zero durations clamp against one second.
#[must_use]
pub fn clamp_seek(seek_secs: f64, duration_secs: Option<f64>) -> f64 {
    let seek = if seek_secs.is_nan() || seek_secs < 0.0 {
        0.0
    } else {
        seek_secs
    };

    match duration_secs {
        Some(d) if d == f64::INFINITY => seek,
        Some(d) if d.is_finite() && d > 0.0 => seek.min(d),
        _ => seek.min(UNKNOWN_DURATION_SEEK_CAP),
    }
}

enum Wake {
    Event(SessionEvent),
    GraceElapsed,
}

async fn grace_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Event loop for one open session.
struct Pipeline<'a> {
    session: &'a mut dyn MediaSession,
    seek_secs: f64,
    options: &'a ExtractOptions,
    state: ExtractionState,
    metadata: Option<MediaMetadata>,
    target: Option<(u32, u32)>,
    seek_requested: bool,
    grace_deadline: Option<Instant>,
    reloaded: bool,
    recovered: bool,
}

impl<'a> Pipeline<'a> {
    fn new(session: &'a mut dyn MediaSession, seek_secs: f64, options: &'a ExtractOptions) -> Self {
        Self {
            session,
            seek_secs,
            options,
            state: ExtractionState::Idle,
            metadata: None,
            target: None,
            seek_requested: false,
            grace_deadline: None,
            reloaded: false,
            recovered: false,
        }
    }

    fn transition(&mut self, next: ExtractionState) {
        debug!("Extraction state {} -> {}", self.state, next);
        self.state = next;
    }

    async fn run(mut self) -> Result<ImageData, ExtractError> {
        self.transition(ExtractionState::SessionOpening);

        loop {
            let grace = self.grace_deadline;
            let wake = tokio::select! {
                event = self.session.next_event() => Wake::Event(event),
                () = grace_elapsed(grace) => Wake::GraceElapsed,
            };

            let event = match wake {
                Wake::GraceElapsed => {
                    self.grace_deadline = None;
                    if !self.seek_requested {
                        debug!("No metadata within grace window, seeking anyway");
                        self.request_seek();
                    }
                    continue;
                }
                Wake::Event(event) => event,
            };

            match event {
                SessionEvent::Playable => {
                    if !self.seek_requested && self.grace_deadline.is_none() {
                        self.grace_deadline = Some(Instant::now() + METADATA_GRACE);
                    }
                }
                SessionEvent::MetadataReady(metadata) => self.on_metadata(metadata),
                SessionEvent::SeekComplete => {
                    if self.seek_requested {
                        return self.capture();
                    }
                }
                SessionEvent::Fault(fault) => self.on_fault(fault)?,
            }
        }
    }

    fn on_metadata(&mut self, metadata: MediaMetadata) {
        self.metadata = Some(metadata);
        if let Some((width, height)) = metadata.dimensions() {
            self.target = Some(raster::target_size(width, height, self.options.max_width));
        }
        if !self.seek_requested {
            self.transition(ExtractionState::MetadataReady);
            self.grace_deadline = None;
            self.request_seek();
        }
    }

    fn request_seek(&mut self) {
        let duration = self.metadata.and_then(|m| m.duration_secs);
        let position = clamp_seek(self.seek_secs, duration);
        self.seek_requested = true;
        self.transition(ExtractionState::Seeking);
        debug!("Seeking to {:.3}s", position);
        self.session.seek(position);
    }

    fn on_fault(&mut self, fault: DecodeFault) -> Result<(), ExtractError> {
        if !fault.fatal {
            debug!("Ignoring non-fatal decode fault: {}", fault.message);
            return Ok(());
        }

        match fault.kind {
            FaultKind::Network if !self.reloaded => {
                warn!("Network error, reloading source: {}", fault.message);
                self.reloaded = true;
                self.session.reload();
                Ok(())
            }
            FaultKind::Media if !self.recovered => {
                warn!("Media error, attempting recovery: {}", fault.message);
                self.recovered = true;
                self.session.recover_media_error();
                Ok(())
            }
            FaultKind::Network => Err(ExtractError::Network(fault.message)),
            FaultKind::Media => Err(ExtractError::Media(fault.message)),
            FaultKind::Other => Err(ExtractError::Fatal(fault.message)),
        }
    }

    fn capture(&mut self) -> Result<ImageData, ExtractError> {
        let frame: RgbImage = self
            .session
            .capture_frame()
            .map_err(|fault| ExtractError::fatal(format!("frame capture failed: {}", fault.message)))?;

        let target = self.target.unwrap_or_else(|| {
            raster::target_size(frame.width(), frame.height(), self.options.max_width)
        });
        let image = raster::render(&frame, target, self.options.quality)
            .map_err(|e| ExtractError::fatal(e.to_string()))?;

        self.transition(ExtractionState::Captured);
        debug!("Captured {}x{} frame ({} bytes)", target.0, target.1, image.len());
        self.transition(ExtractionState::Done);
        Ok(image)
    }
}

/// Extracts single cover frames through a [`MediaBackend`].
#[derive(Clone)]
pub struct FrameExtractor {
    backend: Arc<dyn MediaBackend>,
}

impl fmt::Debug for FrameExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameExtractor")
            .field(
                "adaptive_streaming",
                &self.backend.supports_adaptive_streaming(),
            )
            .finish()
    }
}

impl FrameExtractor {
    /// Create an extractor over the given backend.
    #[must_use]
    pub fn new(backend: Arc<dyn MediaBackend>) -> Self {
        Self { backend }
    }

    /// The backend sessions are opened on.
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn MediaBackend> {
        &self.backend
    }

    /// Extract the frame at `seek_secs` from `source_url`.
    pub async fn extract(
        &self,
        source_url: &str,
        seek_secs: f64,
        options: &ExtractOptions,
    ) -> Result<ImageData, ExtractError> {
        self.extract_with_cancel(source_url, seek_secs, options, CancellationToken::new())
            .await
    }

    /// Extract a frame, giving up early when `cancel` fires.
    pub async fn extract_with_cancel(
        &self,
        source_url: &str,
        seek_secs: f64,
        options: &ExtractOptions,
        cancel: CancellationToken,
    ) -> Result<ImageData, ExtractError> {
        options.validate()?;

        if SourceKind::detect(source_url) == SourceKind::Adaptive
            && !self.backend.supports_adaptive_streaming()
        {
            return Err(ExtractError::UnsupportedDecode(
                "adaptive streaming is not available on this platform".to_string(),
            ));
        }

        info!("Extracting frame at {}s from {}", seek_secs, source_url);
        let started = Instant::now();
        let mut slot: Option<Box<dyn MediaSession>> = None;

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(ExtractError::Cancelled),
            () = sleep(options.timeout()) => Err(ExtractError::Timeout {
                timeout_ms: options.timeout_ms,
            }),
            result = self.run_session(source_url, seek_secs, options, &mut slot) => result,
        };

        if let Some(mut session) = slot.take() {
            session.dispose();
        }

        match &outcome {
            Ok(image) => info!(
                "Extracted frame from {} in {:?} ({} bytes)",
                source_url,
                started.elapsed(),
                image.len()
            ),
            Err(e) => warn!("Frame extraction failed for {}: {}", source_url, e),
        }
        outcome
    }

    async fn run_session(
        &self,
        source_url: &str,
        seek_secs: f64,
        options: &ExtractOptions,
        slot: &mut Option<Box<dyn MediaSession>>,
    ) -> Result<ImageData, ExtractError> {
        let session = slot.insert(self.backend.open(source_url).await?);
        Pipeline::new(session.as_mut(), seek_secs, options).run().await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::scripted::{ScriptedBackend, ScriptedSource};
    use crate::session::DecodeFault;

    const MANIFEST: &str = "https://cdn.example.com/v1/master.m3u8";

    fn extractor(backend: &Arc<ScriptedBackend>) -> FrameExtractor {
        FrameExtractor::new(backend.clone())
    }

    #[test]
    fn test_option_presets() {
        let default = ExtractOptions::default();
        assert_eq!(default.timeout_ms, 15_000);
        assert_eq!(default.max_width, Some(640));

        let card = ExtractOptions::card();
        assert_eq!((card.timeout_ms, card.max_width), (10_000, Some(480)));

        assert_eq!(ExtractOptions::full_frame().max_width, None);
    }

    #[test]
    fn test_options_validation() {
        assert!(ExtractOptions::default().validate().is_ok());
        assert!(ExtractOptions::default().with_max_width(Some(0)).validate().is_err());
        assert!(ExtractOptions::default().with_timeout_ms(0).validate().is_err());
    }

    #[test]
    fn test_options_deserialize_with_defaults() {
        let options: ExtractOptions = serde_json::from_str(r#"{"quality": 0.5}"#).unwrap();
        assert_eq!(options.quality, 0.5);
        assert_eq!(options.timeout_ms, DEFAULT_TIMEOUT_MS);
        assert_eq!(options.max_width, Some(DEFAULT_MAX_WIDTH));
    }

    #[test]
    fn test_source_kind_detection() {
        assert_eq!(SourceKind::detect(MANIFEST), SourceKind::Adaptive);
        assert_eq!(
            SourceKind::detect("https://cdn.example.com/v1/INDEX.M3U8?token=abc"),
            SourceKind::Adaptive
        );
        assert_eq!(
            SourceKind::detect("https://cdn.example.com/v1/clip.mp4"),
            SourceKind::Progressive
        );
    }

    #[test]
    fn test_clamp_seek() {
        assert_eq!(clamp_seek(0.5, Some(10.0)), 0.5);
        assert_eq!(clamp_seek(30.0, Some(10.0)), 10.0);
        assert_eq!(clamp_seek(-2.0, Some(10.0)), 0.0);
        assert_eq!(clamp_seek(f64::NAN, Some(10.0)), 0.0);
        assert_eq!(clamp_seek(5.0, None), 1.0);
        assert_eq!(clamp_seek(5.0, Some(0.0)), 1.0);
        assert_eq!(clamp_seek(5.0, Some(f64::INFINITY)), 5.0);
    }

    #[tokio::test]
    async fn test_extracts_scaled_jpeg() {
        let backend = Arc::new(ScriptedBackend::new(ScriptedSource::healthy(10.0, 1280, 720)));
        let options = ExtractOptions::default()
            .with_timeout_ms(8000)
            .with_quality(0.5)
            .with_max_width(Some(320));

        let image = extractor(&backend).extract(MANIFEST, 0.5, &options).await.unwrap();

        assert!(image.is_jpeg());
        let (width, _) = raster::image_dimensions(&image).unwrap();
        assert!(width <= 320);
        assert_eq!(backend.opened(), 1);
        assert_eq!(backend.released(), 1);
        assert_eq!(backend.last_seek(), Some(0.5));
    }

    #[tokio::test]
    async fn test_seek_is_clamped_to_duration() {
        let backend = Arc::new(ScriptedBackend::new(ScriptedSource::healthy(2.0, 64, 36)));

        extractor(&backend)
            .extract(MANIFEST, 30.0, &ExtractOptions::default())
            .await
            .unwrap();

        assert_eq!(backend.last_seek(), Some(2.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_releases_session() {
        let backend = Arc::new(ScriptedBackend::new(ScriptedSource::stalled()));
        let options = ExtractOptions::default().with_timeout_ms(8000);

        let started = Instant::now();
        let err = extractor(&backend).extract(MANIFEST, 0.5, &options).await.unwrap_err();

        assert_eq!(err, ExtractError::Timeout { timeout_ms: 8000 });
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(8000));
        assert!(elapsed < Duration::from_millis(8100));
        assert_eq!(backend.released(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_grace_fallback_seeks_without_metadata() {
        let backend = Arc::new(ScriptedBackend::new(ScriptedSource::without_metadata(64, 36)));

        let image = extractor(&backend)
            .extract(MANIFEST, 0.5, &ExtractOptions::default())
            .await
            .unwrap();

        assert!(image.is_jpeg());
        assert_eq!(backend.seeks(), 1);
        assert_eq!(backend.last_seek(), Some(0.5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_grace_fallback_clamps_unknown_duration() {
        let backend = Arc::new(ScriptedBackend::new(ScriptedSource::without_metadata(64, 36)));

        extractor(&backend)
            .extract(MANIFEST, 5.0, &ExtractOptions::default())
            .await
            .unwrap();

        assert_eq!(backend.last_seek(), Some(1.0));
    }

    #[tokio::test]
    async fn test_network_error_reloads_once() {
        let backend = Arc::new(ScriptedBackend::new(ScriptedSource::with_network_faults(1)));

        let result = extractor(&backend)
            .extract(MANIFEST, 0.5, &ExtractOptions::default())
            .await;

        assert!(result.is_ok());
        assert_eq!(backend.reloads(), 1);
    }

    #[tokio::test]
    async fn test_second_network_error_escalates() {
        let backend = Arc::new(ScriptedBackend::new(ScriptedSource::with_network_faults(2)));

        let err = extractor(&backend)
            .extract(MANIFEST, 0.5, &ExtractOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, ExtractError::Network(_)));
        assert_eq!(backend.reloads(), 1);
        assert_eq!(backend.released(), 1);
    }

    #[tokio::test]
    async fn test_media_error_recovers_once() {
        let backend = Arc::new(ScriptedBackend::new(ScriptedSource::with_media_faults(1)));
        assert!(
            extractor(&backend)
                .extract(MANIFEST, 0.5, &ExtractOptions::default())
                .await
                .is_ok()
        );
        assert_eq!(backend.recoveries(), 1);

        let backend = Arc::new(ScriptedBackend::new(ScriptedSource::with_media_faults(2)));
        let err = extractor(&backend)
            .extract(MANIFEST, 0.5, &ExtractOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Media(_)));
    }

    #[tokio::test]
    async fn test_other_fatal_fault_fails_immediately() {
        let backend = Arc::new(ScriptedBackend::new(ScriptedSource::with_fault(
            DecodeFault::other("key system unavailable"),
        )));

        let err = extractor(&backend)
            .extract(MANIFEST, 0.5, &ExtractOptions::default())
            .await
            .unwrap_err();

        assert_eq!(err, ExtractError::Fatal("key system unavailable".to_string()));
        assert_eq!(backend.reloads() + backend.recoveries(), 0);
    }

    #[tokio::test]
    async fn test_non_fatal_faults_are_ignored() {
        let backend = Arc::new(ScriptedBackend::new(
            ScriptedSource::healthy(10.0, 64, 36)
                .with_leading_event(SessionEvent::Fault(DecodeFault::network("stall").non_fatal())),
        ));

        assert!(
            extractor(&backend)
                .extract(MANIFEST, 0.5, &ExtractOptions::default())
                .await
                .is_ok()
        );
        assert_eq!(backend.reloads(), 0);
    }

    #[tokio::test]
    async fn test_unsupported_adaptive_decode() {
        let backend = Arc::new(
            ScriptedBackend::new(ScriptedSource::healthy(10.0, 64, 36)).without_adaptive_support(),
        );
        let extractor = extractor(&backend);

        let err = extractor
            .extract(MANIFEST, 0.5, &ExtractOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedDecode(_)));
        assert_eq!(backend.opened(), 0);

        // Progressive sources do not need adaptive support.
        assert!(
            extractor
                .extract("https://cdn.example.com/clip.mp4", 1.0, &ExtractOptions::full_frame())
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_invalid_options_rejected_before_open() {
        let backend = Arc::new(ScriptedBackend::new(ScriptedSource::healthy(10.0, 64, 36)));
        let options = ExtractOptions::default().with_max_width(Some(0));

        let err = extractor(&backend).extract(MANIFEST, 0.5, &options).await.unwrap_err();

        assert!(matches!(err, ExtractError::Fatal(_)));
        assert_eq!(backend.opened(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_disposes_session() {
        let backend = Arc::new(ScriptedBackend::new(ScriptedSource::stalled()));
        let extractor = extractor(&backend);
        let token = CancellationToken::new();

        let canceller = {
            let token = token.clone();
            tokio::spawn(async move {
                sleep(Duration::from_millis(50)).await;
                token.cancel();
            })
        };

        let err = extractor
            .extract_with_cancel(MANIFEST, 0.5, &ExtractOptions::default(), token)
            .await
            .unwrap_err();
        canceller.await.unwrap();

        assert_eq!(err, ExtractError::Cancelled);
        assert_eq!(backend.released(), 1);
    }
}
