//! Media session capability driven by the frame extractor.
//!
//! A [`MediaBackend`] opens a [`MediaSession`] against a source URL. The
//! session loads passively (nothing is played) and reports progress through
//! [`SessionEvent`]s; the extractor reacts by requesting a seek and capturing
//! the decoded frame. Any decode binding that can answer these calls can back
//! the extractor: a native streaming library, a subprocess decoder, or the
//! scripted backend used in tests.

use async_trait::async_trait;
use image::RgbImage;

use crate::error::ExtractError;

/// Native properties of the opened media.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MediaMetadata {
    /// Duration in seconds, when known. Live streams report infinity.
    pub duration_secs: Option<f64>,
    /// Native frame width in pixels.
    pub width: u32,
    /// Native frame height in pixels.
    pub height: u32,
}

impl MediaMetadata {
    /// Create metadata for a source of known duration.
    #[must_use]
    pub const fn new(duration_secs: f64, width: u32, height: u32) -> Self {
        Self {
            duration_secs: Some(duration_secs),
            width,
            height,
        }
    }

    /// Native dimensions, if both are non-zero.
    #[must_use]
    pub const fn dimensions(&self) -> Option<(u32, u32)> {
        if self.width == 0 || self.height == 0 {
            None
        } else {
            Some((self.width, self.height))
        }
    }
}

/// Class of a decode-layer failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Fetching the manifest or segments failed.
    Network,
    /// The media could not be demuxed or decoded.
    Media,
    /// Anything else.
    Other,
}

/// A failure reported by the decode layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeFault {
    /// Failure class.
    pub kind: FaultKind,
    /// Whether the session cannot continue without intervention.
    /// Non-fatal faults are informational.
    pub fatal: bool,
    /// Description from the decode layer.
    pub message: String,
}

impl DecodeFault {
    /// A fatal network fault.
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            kind: FaultKind::Network,
            fatal: true,
            message: message.into(),
        }
    }

    /// A fatal media fault.
    pub fn media(message: impl Into<String>) -> Self {
        Self {
            kind: FaultKind::Media,
            fatal: true,
            message: message.into(),
        }
    }

    /// A fatal fault of any other kind.
    pub fn other(message: impl Into<String>) -> Self {
        Self {
            kind: FaultKind::Other,
            fatal: true,
            message: message.into(),
        }
    }

    /// Mark the fault as non-fatal.
    #[must_use]
    pub const fn non_fatal(mut self) -> Self {
        self.fatal = false;
        self
    }
}

/// Progress reported by a media session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The sink has buffered enough to play. May arrive before, after, or
    /// instead of [`SessionEvent::MetadataReady`].
    Playable,
    /// Duration and native dimensions are known.
    MetadataReady(MediaMetadata),
    /// The last requested seek finished and a frame is ready to capture.
    SeekComplete,
    /// The decode layer reported a failure.
    Fault(DecodeFault),
}

/// An open decode session against one source.
///
/// Implementations must release their resources when dropped as well as on
/// [`MediaSession::dispose`], so that abandoning an extraction future tears
/// the session down.
#[async_trait]
pub trait MediaSession: Send {
    /// Wait for the next event. Sessions with nothing left to report stay
    /// pending; the extractor's timeout bounds the wait.
    async fn next_event(&mut self) -> SessionEvent;

    /// Move the playback cursor to `position_secs` without playing.
    fn seek(&mut self, position_secs: f64);

    /// Take the frame decoded at the last completed seek.
    fn capture_frame(&mut self) -> Result<RgbImage, DecodeFault>;

    /// Restart loading after a network fault and continue where it left off.
    fn reload(&mut self);

    /// Attempt to recover the decoder after a media fault.
    fn recover_media_error(&mut self);

    /// Release the session. Further events must not be delivered.
    fn dispose(&mut self);
}

/// Factory for media sessions.
#[async_trait]
pub trait MediaBackend: Send + Sync {
    /// Whether adaptive-streaming manifests can be decoded.
    fn supports_adaptive_streaming(&self) -> bool;

    /// Attach a new, passive session to `source_url`.
    async fn open(&self, source_url: &str) -> Result<Box<dyn MediaSession>, ExtractError>;
}
