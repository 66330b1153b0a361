//! Subprocess media backend built on `ffprobe` and `ffmpeg`.
//!
//! Opening a session starts an `ffprobe` run for duration and native
//! dimensions. A seek starts an `ffmpeg` run that decodes a single frame at
//! the requested position and pipes it back as PNG. Every child is spawned
//! with `kill_on_drop`, so disposing or dropping the session kills whatever
//! is still running.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use image::{ImageFormat, RgbImage};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::ExtractError;
use crate::session::{DecodeFault, MediaBackend, MediaMetadata, MediaSession, SessionEvent};

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_ffprobe_path() -> PathBuf {
    PathBuf::from("ffprobe")
}

/// Locations of the decoder binaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FfmpegConfig {
    /// `ffmpeg` binary, either a path or a name looked up on `PATH`.
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,
    /// `ffprobe` binary, either a path or a name looked up on `PATH`.
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: PathBuf,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            ffprobe_path: default_ffprobe_path(),
        }
    }
}

/// Find an executable. Bare names are searched on `PATH`.
#[must_use]
pub fn resolve_binary(binary: &Path) -> Option<PathBuf> {
    if binary.components().count() > 1 || binary.is_absolute() {
        return binary.is_file().then(|| binary.to_path_buf());
    }

    let search_path = std::env::var_os("PATH")?;
    std::env::split_paths(&search_path)
        .map(|dir| dir.join(binary))
        .find(|candidate| candidate.is_file())
}

/// Media backend that shells out to `ffprobe` and `ffmpeg`.
#[derive(Debug, Clone)]
pub struct FfmpegBackend {
    ffmpeg: Option<PathBuf>,
    ffprobe: Option<PathBuf>,
}

impl FfmpegBackend {
    /// Resolve the configured binaries.
    #[must_use]
    pub fn new(config: &FfmpegConfig) -> Self {
        let ffmpeg = resolve_binary(&config.ffmpeg_path);
        let ffprobe = resolve_binary(&config.ffprobe_path);
        debug!(
            "Resolved decoder binaries: ffmpeg={:?} ffprobe={:?}",
            ffmpeg, ffprobe
        );
        Self { ffmpeg, ffprobe }
    }

    /// Whether both binaries were found.
    #[must_use]
    pub const fn is_available(&self) -> bool {
        self.ffmpeg.is_some() && self.ffprobe.is_some()
    }
}

#[async_trait]
impl MediaBackend for FfmpegBackend {
    fn supports_adaptive_streaming(&self) -> bool {
        self.is_available()
    }

    async fn open(&self, source_url: &str) -> Result<Box<dyn MediaSession>, ExtractError> {
        let (Some(ffmpeg), Some(ffprobe)) = (&self.ffmpeg, &self.ffprobe) else {
            return Err(ExtractError::UnsupportedDecode(
                "ffmpeg and ffprobe must both be installed".to_string(),
            ));
        };

        info!("Opening ffmpeg session for {}", source_url);
        Ok(Box::new(FfmpegSession::new(
            source_url.to_string(),
            ffmpeg.clone(),
            ffprobe.clone(),
        )))
    }
}

enum Operation {
    Probed(Result<MediaMetadata, DecodeFault>),
    Decoded(Result<RgbImage, DecodeFault>),
}

/// One source opened through the subprocess backend.
pub struct FfmpegSession {
    url: String,
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    running: Option<BoxFuture<'static, Operation>>,
    last_seek: Option<f64>,
    frame: Option<RgbImage>,
    disposed: bool,
}

impl FfmpegSession {
    fn new(url: String, ffmpeg: PathBuf, ffprobe: PathBuf) -> Self {
        let mut session = Self {
            url,
            ffmpeg,
            ffprobe,
            running: None,
            last_seek: None,
            frame: None,
            disposed: false,
        };
        session.start_probe();
        session
    }

    fn start_probe(&mut self) {
        let ffprobe = self.ffprobe.clone();
        let url = self.url.clone();
        self.running = Some(
            async move { Operation::Probed(probe(&ffprobe, &url).await) }.boxed(),
        );
    }

    fn start_decode(&mut self, position_secs: f64) {
        let ffmpeg = self.ffmpeg.clone();
        let url = self.url.clone();
        self.running = Some(
            async move { Operation::Decoded(decode_frame(&ffmpeg, &url, position_secs).await) }
                .boxed(),
        );
    }

    /// Re-run whatever step failed last.
    fn restart(&mut self) {
        if self.disposed {
            return;
        }
        match self.last_seek {
            Some(position) => self.start_decode(position),
            None => self.start_probe(),
        }
    }
}

#[async_trait]
impl MediaSession for FfmpegSession {
    async fn next_event(&mut self) -> SessionEvent {
        let Some(running) = self.running.as_mut() else {
            return std::future::pending().await;
        };
        let operation = running.await;
        self.running = None;

        match operation {
            Operation::Probed(Ok(metadata)) => SessionEvent::MetadataReady(metadata),
            Operation::Decoded(Ok(frame)) => {
                self.frame = Some(frame);
                SessionEvent::SeekComplete
            }
            Operation::Probed(Err(fault)) | Operation::Decoded(Err(fault)) => {
                SessionEvent::Fault(fault)
            }
        }
    }

    fn seek(&mut self, position_secs: f64) {
        if self.disposed {
            return;
        }
        self.last_seek = Some(position_secs);
        self.frame = None;
        self.start_decode(position_secs);
    }

    fn capture_frame(&mut self) -> Result<RgbImage, DecodeFault> {
        self.frame
            .take()
            .ok_or_else(|| DecodeFault::media("no frame decoded at the requested position"))
    }

    fn reload(&mut self) {
        debug!("Reloading {}", self.url);
        self.restart();
    }

    fn recover_media_error(&mut self) {
        debug!("Retrying decode of {}", self.url);
        self.restart();
    }

    fn dispose(&mut self) {
        self.disposed = true;
        self.running = None;
        self.frame = None;
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Parse `ffprobe -of json` output into session metadata.
fn parse_probe_output(stdout: &[u8]) -> Result<MediaMetadata, DecodeFault> {
    let output: ProbeOutput = serde_json::from_slice(stdout)
        .map_err(|e| DecodeFault::other(format!("unreadable ffprobe output: {e}")))?;

    let stream = output
        .streams
        .into_iter()
        .find(|s| s.width.is_some() && s.height.is_some())
        .ok_or_else(|| DecodeFault::media("source has no video stream"))?;

    let duration_secs = output
        .format
        .and_then(|f| f.duration)
        .and_then(|d| d.trim().parse::<f64>().ok());

    Ok(MediaMetadata {
        duration_secs,
        width: stream.width.unwrap_or_default(),
        height: stream.height.unwrap_or_default(),
    })
}

const NETWORK_MARKERS: &[&str] = &[
    "connection refused",
    "connection reset",
    "connection timed out",
    "network is unreachable",
    "failed to resolve hostname",
    "name or service not known",
    "http error",
    "server returned 4",
    "server returned 5",
];

const MEDIA_MARKERS: &[&str] = &[
    "invalid data found",
    "error while decoding",
    "decoding error",
    "could not find codec",
    "moov atom not found",
    "unsupported codec",
    "does not contain any stream",
];

/// Classify decoder stderr into a fatal fault.
fn classify_stderr(stderr: &str) -> DecodeFault {
    let message = stderr
        .lines()
        .map(str::trim)
        .rfind(|line| !line.is_empty())
        .unwrap_or("decoder exited with an error")
        .to_string();
    let lowered = stderr.to_ascii_lowercase();

    if NETWORK_MARKERS.iter().any(|m| lowered.contains(m)) {
        DecodeFault::network(message)
    } else if MEDIA_MARKERS.iter().any(|m| lowered.contains(m)) {
        DecodeFault::media(message)
    } else {
        DecodeFault::other(message)
    }
}

async fn probe(ffprobe: &Path, url: &str) -> Result<MediaMetadata, DecodeFault> {
    let output = Command::new(ffprobe)
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height:format=duration",
            "-of",
            "json",
        ])
        .arg(url)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| DecodeFault::other(format!("failed to execute ffprobe: {e}")))?;

    if !output.status.success() {
        return Err(classify_stderr(&String::from_utf8_lossy(&output.stderr)));
    }
    parse_probe_output(&output.stdout)
}

async fn decode_frame(ffmpeg: &Path, url: &str, position_secs: f64) -> Result<RgbImage, DecodeFault> {
    let output = Command::new(ffmpeg)
        .args(["-v", "error", "-nostdin", "-ss"])
        .arg(format!("{position_secs:.3}"))
        .arg("-i")
        .arg(url)
        .args(["-frames:v", "1", "-f", "image2pipe", "-c:v", "png", "-"])
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| DecodeFault::other(format!("failed to execute ffmpeg: {e}")))?;

    if !output.status.success() {
        return Err(classify_stderr(&String::from_utf8_lossy(&output.stderr)));
    }
    if output.stdout.is_empty() {
        return Err(DecodeFault::media(format!(
            "no frame decoded at {position_secs:.3}s"
        )));
    }

    image::load_from_memory_with_format(&output.stdout, ImageFormat::Png)
        .map(|decoded| decoded.to_rgb8())
        .map_err(|e| DecodeFault::media(format!("undecodable frame: {e}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::session::FaultKind;
    use tempfile::TempDir;

    #[test]
    fn test_parse_probe_output() {
        let json = br#"{
            "programs": [],
            "streams": [{"width": 1920, "height": 1080}],
            "format": {"duration": "10.010000"}
        }"#;

        let metadata = parse_probe_output(json).unwrap();
        assert_eq!(metadata.dimensions(), Some((1920, 1080)));
        assert_eq!(metadata.duration_secs, Some(10.01));
    }

    #[test]
    fn test_parse_probe_output_live_stream() {
        let json = br#"{"streams": [{"width": 640, "height": 360}], "format": {}}"#;
        let metadata = parse_probe_output(json).unwrap();
        assert_eq!(metadata.duration_secs, None);
    }

    #[test]
    fn test_parse_probe_output_without_video() {
        let json = br#"{"streams": [], "format": {"duration": "3.0"}}"#;
        let fault = parse_probe_output(json).unwrap_err();
        assert_eq!(fault.kind, FaultKind::Media);
    }

    #[test]
    fn test_classify_network_stderr() {
        let fault = classify_stderr(
            "[https @ 0x1] HTTP error 404 Not Found\nhttps://cdn/x.m3u8: Server returned 404 Not Found\n",
        );
        assert_eq!(fault.kind, FaultKind::Network);
        assert!(fault.fatal);
        assert_eq!(fault.message, "https://cdn/x.m3u8: Server returned 404 Not Found");
    }

    #[test]
    fn test_classify_media_stderr() {
        let fault = classify_stderr("clip.mp4: Invalid data found when processing input");
        assert_eq!(fault.kind, FaultKind::Media);
    }

    #[test]
    fn test_classify_unknown_stderr() {
        let fault = classify_stderr("");
        assert_eq!(fault.kind, FaultKind::Other);
        assert_eq!(fault.message, "decoder exited with an error");
    }

    #[test]
    fn test_resolve_explicit_path() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let binary = temp_dir.path().join("ffprobe");
        std::fs::write(&binary, "#!/bin/sh\n").unwrap();

        assert_eq!(resolve_binary(&binary), Some(binary.clone()));
        assert_eq!(resolve_binary(&temp_dir.path().join("missing")), None);
    }

    #[tokio::test]
    async fn test_missing_binaries_are_unsupported() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config = FfmpegConfig {
            ffmpeg_path: temp_dir.path().join("ffmpeg"),
            ffprobe_path: temp_dir.path().join("ffprobe"),
        };
        let backend = FfmpegBackend::new(&config);

        assert!(!backend.supports_adaptive_streaming());
        let err = backend.open("https://cdn/x.m3u8").await.err().unwrap();
        assert!(matches!(err, ExtractError::UnsupportedDecode(_)));
    }

    #[test]
    fn test_config_defaults() {
        let config: FfmpegConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, FfmpegConfig::default());
        assert_eq!(config.ffmpeg_path, PathBuf::from("ffmpeg"));
    }
}
