//! Headless capture backend.
//!
//! Produces tracks that only carry enable/stop state. Used by the binary when
//! no real capture stack is attached, and by tests to script permission
//! outcomes and native "stop sharing" clicks.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tracing::info;

use super::device::{
    DeviceError, DisplayCapture, MediaConstraints, MediaDevices, MediaStream, MediaTrack,
    PreviewSink, StreamId, TrackKind,
};

/// Scripted outcome of a capture request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Granted,
    Denied,
    Unavailable,
}

pub struct SimulatedTrack {
    id: String,
    kind: TrackKind,
    enabled: AtomicBool,
    live: AtomicBool,
}

impl SimulatedTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            id: id.into(),
            kind,
            enabled: AtomicBool::new(true),
            live: AtomicBool::new(true),
        }
    }
}

impl MediaTrack for SimulatedTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn stop(&self) -> Result<(), DeviceError> {
        self.live.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

pub struct SimulatedDevices {
    camera: Mutex<Availability>,
    display: Mutex<Availability>,
    native_stop: Mutex<Option<(oneshot::Sender<()>, Arc<SimulatedTrack>)>>,
    camera_requests: AtomicUsize,
    display_requests: AtomicUsize,
}

impl Default for SimulatedDevices {
    fn default() -> Self {
        Self::new(Availability::Granted, Availability::Granted)
    }
}

impl SimulatedDevices {
    pub fn new(camera: Availability, display: Availability) -> Self {
        Self {
            camera: Mutex::new(camera),
            display: Mutex::new(display),
            native_stop: Mutex::new(None),
            camera_requests: AtomicUsize::new(0),
            display_requests: AtomicUsize::new(0),
        }
    }

    pub fn set_camera(&self, availability: Availability) {
        if let Ok(mut camera) = self.camera.lock() {
            *camera = availability;
        }
    }

    pub fn set_display(&self, availability: Availability) {
        if let Ok(mut display) = self.display.lock() {
            *display = availability;
        }
    }

    /// Simulate the user pressing the host's own "stop sharing" control.
    /// Returns false when no live display capture is outstanding.
    pub fn end_display_capture(&self) -> bool {
        let pending = self.native_stop.lock().ok().and_then(|mut s| s.take());
        match pending {
            Some((tx, track)) if track.is_live() => {
                let _ = track.stop();
                tx.send(()).is_ok()
            }
            _ => false,
        }
    }

    pub fn camera_requests(&self) -> usize {
        self.camera_requests.load(Ordering::SeqCst)
    }

    pub fn display_requests(&self) -> usize {
        self.display_requests.load(Ordering::SeqCst)
    }

    fn availability(slot: &Mutex<Availability>) -> Availability {
        slot.lock().map(|a| *a).unwrap_or(Availability::Unavailable)
    }
}

#[async_trait]
impl MediaDevices for SimulatedDevices {
    async fn get_user_media(
        &self,
        constraints: MediaConstraints,
    ) -> Result<MediaStream, DeviceError> {
        let n = self.camera_requests.fetch_add(1, Ordering::SeqCst);
        match Self::availability(&self.camera) {
            Availability::Granted => {
                let mut tracks: Vec<Arc<dyn MediaTrack>> = Vec::new();
                if constraints.audio {
                    tracks.push(Arc::new(SimulatedTrack::new(
                        format!("mic-{n}"),
                        TrackKind::Audio,
                    )));
                }
                if constraints.video {
                    tracks.push(Arc::new(SimulatedTrack::new(
                        format!("camera-{n}"),
                        TrackKind::Video,
                    )));
                }
                let stream = MediaStream::new(tracks);
                info!("Simulated camera/mic capture granted: {}", stream.id());
                Ok(stream)
            }
            Availability::Denied => Err(DeviceError::PermissionDenied(
                "camera and microphone access refused".to_string(),
            )),
            Availability::Unavailable => Err(DeviceError::NotFound(
                "no camera or microphone attached".to_string(),
            )),
        }
    }

    async fn get_display_media(&self) -> Result<DisplayCapture, DeviceError> {
        let n = self.display_requests.fetch_add(1, Ordering::SeqCst);
        match Self::availability(&self.display) {
            Availability::Granted => {
                let track = Arc::new(SimulatedTrack::new(format!("screen-{n}"), TrackKind::Video));
                let stream = MediaStream::new(vec![track.clone() as Arc<dyn MediaTrack>]);
                let (tx, ended) = oneshot::channel();
                if let Ok(mut slot) = self.native_stop.lock() {
                    *slot = Some((tx, track));
                }
                info!("Simulated display capture granted: {}", stream.id());
                Ok(DisplayCapture { stream, ended })
            }
            Availability::Denied => Err(DeviceError::Cancelled),
            Availability::Unavailable => Err(DeviceError::NotFound(
                "display capture not supported".to_string(),
            )),
        }
    }
}

/// Preview sink that remembers every frame source it was asked to render.
#[derive(Default)]
pub struct CapturedPreview {
    history: Mutex<Vec<Option<StreamId>>>,
}

impl CapturedPreview {
    pub fn current(&self) -> Option<StreamId> {
        self.history
            .lock()
            .ok()
            .and_then(|h| h.last().copied().flatten())
    }

    pub fn history(&self) -> Vec<Option<StreamId>> {
        self.history.lock().map(|h| h.clone()).unwrap_or_default()
    }
}

impl PreviewSink for CapturedPreview {
    fn show(&self, source: Option<&MediaStream>) {
        if let Ok(mut history) = self.history.lock() {
            history.push(source.map(|s| s.id()));
        }
    }
}
