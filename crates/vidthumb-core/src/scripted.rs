//! Scripted media backend for tests and demos.
//!
//! A [`ScriptedSource`] lists the events a session reports after opening and
//! after each reload or recovery, plus what happens on seek. The
//! [`ScriptedBackend`] counts sessions opened and released so tests can
//! assert on deduplication and teardown.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use image::{Rgb, RgbImage};

use crate::error::ExtractError;
use crate::session::{DecodeFault, MediaBackend, MediaMetadata, MediaSession, SessionEvent};

/// Generate a deterministic gradient frame.
#[must_use]
pub fn test_pattern(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    })
}

/// Scripted behavior of a media source.
#[derive(Debug, Clone)]
pub struct ScriptedSource {
    /// Events per load attempt: the initial load, then one per reload or
    /// recovery. Missing scripts report nothing.
    loads: Vec<Vec<SessionEvent>>,
    /// Events reported after each seek.
    on_seek: Vec<SessionEvent>,
    /// Frame returned by capture, if any.
    frame: Option<RgbImage>,
    /// Delay before the session is handed out.
    open_delay: Duration,
}

impl ScriptedSource {
    /// A source that loads, reports metadata, and seeks cleanly.
    #[must_use]
    pub fn healthy(duration_secs: f64, width: u32, height: u32) -> Self {
        Self {
            loads: vec![healthy_load(duration_secs, width, height)],
            on_seek: vec![SessionEvent::SeekComplete],
            frame: Some(test_pattern(width, height)),
            open_delay: Duration::ZERO,
        }
    }

    /// A source that never reports anything.
    #[must_use]
    pub fn stalled() -> Self {
        Self {
            loads: vec![Vec::new()],
            on_seek: Vec::new(),
            frame: None,
            open_delay: Duration::ZERO,
        }
    }

    /// A source that becomes playable but never reports metadata.
    #[must_use]
    pub fn without_metadata(width: u32, height: u32) -> Self {
        Self {
            loads: vec![vec![SessionEvent::Playable]],
            on_seek: vec![SessionEvent::SeekComplete],
            frame: Some(test_pattern(width, height)),
            open_delay: Duration::ZERO,
        }
    }

    /// A healthy source whose first `failures` loads end in a fatal network
    /// fault.
    #[must_use]
    pub fn with_network_faults(failures: usize) -> Self {
        Self::failing_loads(failures, || DecodeFault::network("segment request failed"))
    }

    /// A healthy source whose first `failures` loads end in a fatal media
    /// fault.
    #[must_use]
    pub fn with_media_faults(failures: usize) -> Self {
        Self::failing_loads(failures, || DecodeFault::media("buffer append error"))
    }

    /// A source whose first load reports `fault`.
    #[must_use]
    pub fn with_fault(fault: DecodeFault) -> Self {
        Self {
            loads: vec![vec![SessionEvent::Fault(fault)]],
            ..Self::healthy(10.0, 64, 36)
        }
    }

    fn failing_loads(failures: usize, fault: impl Fn() -> DecodeFault) -> Self {
        let mut loads: Vec<_> = (0..failures)
            .map(|_| vec![SessionEvent::Fault(fault())])
            .collect();
        loads.push(healthy_load(10.0, 64, 36));
        Self {
            loads,
            ..Self::healthy(10.0, 64, 36)
        }
    }

    /// Report `event` before anything else on the first load.
    #[must_use]
    pub fn with_leading_event(mut self, event: SessionEvent) -> Self {
        if let Some(first) = self.loads.first_mut() {
            first.insert(0, event);
        } else {
            self.loads.push(vec![event]);
        }
        self
    }

    /// Replace what is reported after a seek.
    #[must_use]
    pub fn with_seek_events(mut self, events: Vec<SessionEvent>) -> Self {
        self.on_seek = events;
        self
    }

    /// Replace the captured frame.
    #[must_use]
    pub fn with_frame(mut self, frame: Option<RgbImage>) -> Self {
        self.frame = frame;
        self
    }

    /// Delay opening the session.
    #[must_use]
    pub const fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }
}

fn healthy_load(duration_secs: f64, width: u32, height: u32) -> Vec<SessionEvent> {
    vec![
        SessionEvent::Playable,
        SessionEvent::MetadataReady(MediaMetadata::new(duration_secs, width, height)),
    ]
}

#[derive(Debug, Default)]
struct Counters {
    opened: AtomicUsize,
    released: AtomicUsize,
    reloads: AtomicUsize,
    recoveries: AtomicUsize,
    seeks: AtomicUsize,
    last_seek_bits: AtomicU64,
}

/// Backend that replays [`ScriptedSource`]s.
#[derive(Debug)]
pub struct ScriptedBackend {
    default_source: ScriptedSource,
    sources: DashMap<String, ScriptedSource>,
    adaptive: bool,
    counters: Arc<Counters>,
}

impl ScriptedBackend {
    /// Serve `source` for every URL.
    #[must_use]
    pub fn new(source: ScriptedSource) -> Self {
        Self {
            default_source: source,
            sources: DashMap::new(),
            adaptive: true,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Serve a specific source for one URL.
    #[must_use]
    pub fn with_source(self, url: impl Into<String>, source: ScriptedSource) -> Self {
        self.sources.insert(url.into(), source);
        self
    }

    /// Report no adaptive-streaming support.
    #[must_use]
    pub const fn without_adaptive_support(mut self) -> Self {
        self.adaptive = false;
        self
    }

    /// Sessions opened so far.
    #[must_use]
    pub fn opened(&self) -> usize {
        self.counters.opened.load(Ordering::SeqCst)
    }

    /// Sessions disposed or dropped so far.
    #[must_use]
    pub fn released(&self) -> usize {
        self.counters.released.load(Ordering::SeqCst)
    }

    /// Reloads requested across all sessions.
    #[must_use]
    pub fn reloads(&self) -> usize {
        self.counters.reloads.load(Ordering::SeqCst)
    }

    /// Media recoveries requested across all sessions.
    #[must_use]
    pub fn recoveries(&self) -> usize {
        self.counters.recoveries.load(Ordering::SeqCst)
    }

    /// Seeks requested across all sessions.
    #[must_use]
    pub fn seeks(&self) -> usize {
        self.counters.seeks.load(Ordering::SeqCst)
    }

    /// Position of the most recent seek.
    #[must_use]
    pub fn last_seek(&self) -> Option<f64> {
        (self.seeks() > 0)
            .then(|| f64::from_bits(self.counters.last_seek_bits.load(Ordering::SeqCst)))
    }
}

#[async_trait]
impl MediaBackend for ScriptedBackend {
    fn supports_adaptive_streaming(&self) -> bool {
        self.adaptive
    }

    async fn open(&self, source_url: &str) -> Result<Box<dyn MediaSession>, ExtractError> {
        let source = self
            .sources
            .get(source_url)
            .map_or_else(|| self.default_source.clone(), |s| s.value().clone());

        if !source.open_delay.is_zero() {
            tokio::time::sleep(source.open_delay).await;
        }
        self.counters.opened.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(ScriptedSession::new(source, self.counters.clone())))
    }
}

struct ScriptedSession {
    pending: VecDeque<SessionEvent>,
    loads: VecDeque<Vec<SessionEvent>>,
    on_seek: Vec<SessionEvent>,
    frame: Option<RgbImage>,
    counters: Arc<Counters>,
    released: bool,
}

impl ScriptedSession {
    fn new(source: ScriptedSource, counters: Arc<Counters>) -> Self {
        let mut loads: VecDeque<_> = source.loads.into();
        let pending = loads.pop_front().unwrap_or_default().into();
        Self {
            pending,
            loads,
            on_seek: source.on_seek,
            frame: source.frame,
            counters,
            released: false,
        }
    }

    fn next_load(&mut self) {
        self.pending = self.loads.pop_front().unwrap_or_default().into();
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.pending.clear();
            self.counters.released.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl MediaSession for ScriptedSession {
    async fn next_event(&mut self) -> SessionEvent {
        if !self.released
            && let Some(event) = self.pending.pop_front()
        {
            tokio::task::yield_now().await;
            return event;
        }
        std::future::pending().await
    }

    fn seek(&mut self, position_secs: f64) {
        self.counters.seeks.fetch_add(1, Ordering::SeqCst);
        self.counters
            .last_seek_bits
            .store(position_secs.to_bits(), Ordering::SeqCst);
        self.pending.extend(self.on_seek.iter().cloned());
    }

    fn capture_frame(&mut self) -> Result<RgbImage, DecodeFault> {
        self.frame
            .clone()
            .ok_or_else(|| DecodeFault::media("no decoded frame available"))
    }

    fn reload(&mut self) {
        self.counters.reloads.fetch_add(1, Ordering::SeqCst);
        self.next_load();
    }

    fn recover_media_error(&mut self) {
        self.counters.recoveries.fetch_add(1, Ordering::SeqCst);
        self.next_load();
    }

    fn dispose(&mut self) {
        self.release();
    }
}

impl Drop for ScriptedSession {
    fn drop(&mut self) {
        self.release();
    }
}
