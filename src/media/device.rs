//! Capture device abstraction.
//!
//! The host environment (browser, OS capture stack, or the simulated backend)
//! provides camera/microphone capture, display capture and a preview surface.
//! Everything above this module only sees these traits.

use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("No capture device available: {0}")]
    NotFound(String),
    #[error("Capture cancelled by user")]
    Cancelled,
    #[error("Track error: {0}")]
    Track(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

/// A single captured audio or video track.
///
/// `stop` must be idempotent; stopping an already stopped track is a no-op.
pub trait MediaTrack: Send + Sync {
    fn id(&self) -> &str;
    fn kind(&self) -> TrackKind;
    fn enabled(&self) -> bool;
    fn set_enabled(&self, enabled: bool);
    fn stop(&self) -> Result<(), DeviceError>;
    fn is_live(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(u64);

impl StreamId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream-{}", self.0)
    }
}

/// A bundle of tracks captured together. Cloning shares the tracks.
#[derive(Clone)]
pub struct MediaStream {
    id: StreamId,
    tracks: Vec<Arc<dyn MediaTrack>>,
}

impl MediaStream {
    pub fn new(tracks: Vec<Arc<dyn MediaTrack>>) -> Self {
        Self {
            id: StreamId::next(),
            tracks,
        }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn tracks(&self) -> &[Arc<dyn MediaTrack>] {
        &self.tracks
    }

    pub fn audio_tracks(&self) -> impl Iterator<Item = &Arc<dyn MediaTrack>> {
        self.tracks_of(TrackKind::Audio)
    }

    pub fn video_tracks(&self) -> impl Iterator<Item = &Arc<dyn MediaTrack>> {
        self.tracks_of(TrackKind::Video)
    }

    fn tracks_of(&self, kind: TrackKind) -> impl Iterator<Item = &Arc<dyn MediaTrack>> {
        self.tracks.iter().filter(move |t| t.kind() == kind)
    }

    pub fn set_enabled(&self, kind: TrackKind, enabled: bool) {
        for track in self.tracks_of(kind) {
            track.set_enabled(enabled);
        }
    }

    /// Stop every track. Failures are logged, never returned.
    pub fn stop_all(&self) {
        for track in &self.tracks {
            if let Err(e) = track.stop() {
                warn!("Failed to stop track {} of {}: {}", track.id(), self.id, e);
            }
        }
        debug!("Stopped {} track(s) of {}", self.tracks.len(), self.id);
    }
}

impl fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaStream")
            .field("id", &self.id)
            .field("tracks", &self.tracks.len())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl MediaConstraints {
    pub fn camera_and_mic() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

/// Result of a display capture request.
///
/// `ended` resolves when the user stops sharing through the host's own UI.
/// If the host drops the sender instead, no native stop happened.
pub struct DisplayCapture {
    pub stream: MediaStream,
    pub ended: oneshot::Receiver<()>,
}

#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn get_user_media(&self, constraints: MediaConstraints)
        -> Result<MediaStream, DeviceError>;

    async fn get_display_media(&self) -> Result<DisplayCapture, DeviceError>;
}

/// Local self-view surface.
pub trait PreviewSink: Send + Sync {
    /// Render `source`, or the avatar fallback when `None`.
    fn show(&self, source: Option<&MediaStream>);
}

/// Preview sink for headless runs: logs what would be rendered.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogPreviewSink;

impl PreviewSink for LogPreviewSink {
    fn show(&self, source: Option<&MediaStream>) {
        match source {
            Some(stream) => info!("Preview now showing {}", stream.id()),
            None => info!("Preview cleared, showing avatar"),
        }
    }
}
