//! Local media sources: camera+mic stream, screen-share stream, preview.
//!
//! The preview source is never cached. It is re-derived from the streams and
//! flags after every mutation:
//! screen stream if sharing, else camera stream if video is on, else nothing.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::device::{
    DeviceError, MediaConstraints, MediaDevices, MediaStream, PreviewSink, StreamId, TrackKind,
};

/// Notifications raised by capture callbacks, delivered to the session loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaEvent {
    /// The user stopped sharing through the host UI rather than our control.
    ScreenShareEnded(StreamId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "stream", rename_all = "lowercase")]
pub enum PreviewSource {
    Screen(u64),
    Camera(u64),
    None,
}

/// Serializable view of the local media flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LocalMediaSnapshot {
    pub is_muted: bool,
    pub is_video_off: bool,
    pub is_screen_sharing: bool,
    pub is_recording: bool,
    pub has_camera_stream: bool,
    pub preview: PreviewSource,
}

#[derive(Debug, Clone, Copy)]
pub struct MediaOptions {
    pub start_muted: bool,
    pub start_video_off: bool,
}

impl Default for MediaOptions {
    fn default() -> Self {
        Self {
            start_muted: true,
            start_video_off: false,
        }
    }
}

struct ScreenShare {
    stream: MediaStream,
    watcher: JoinHandle<()>,
}

pub struct MediaSourceManager {
    devices: Arc<dyn MediaDevices>,
    preview: Arc<dyn PreviewSink>,
    events: mpsc::UnboundedSender<MediaEvent>,
    camera: Option<MediaStream>,
    screen: Option<ScreenShare>,
    muted: bool,
    video_off: bool,
}

impl MediaSourceManager {
    pub fn new(
        devices: Arc<dyn MediaDevices>,
        preview: Arc<dyn PreviewSink>,
        events: mpsc::UnboundedSender<MediaEvent>,
        options: MediaOptions,
    ) -> Self {
        Self {
            devices,
            preview,
            events,
            camera: None,
            screen: None,
            muted: options.start_muted,
            video_off: options.start_video_off,
        }
    }

    /// Request combined camera and microphone capture.
    ///
    /// Device absence is reported as `PermissionDenied`; the caller decides how
    /// to warn the user. No retry is attempted.
    pub async fn acquire_camera_and_mic(&mut self) -> Result<MediaStream, DeviceError> {
        let stream = match self
            .devices
            .get_user_media(MediaConstraints::camera_and_mic())
            .await
        {
            Ok(stream) => stream,
            Err(DeviceError::NotFound(reason)) => {
                warn!("Camera/microphone unavailable: {}", reason);
                return Err(DeviceError::PermissionDenied(reason));
            }
            Err(e) => {
                warn!("Camera/microphone acquisition failed: {}", e);
                return Err(e);
            }
        };

        stream.set_enabled(TrackKind::Audio, !self.muted);
        stream.set_enabled(TrackKind::Video, !self.video_off);

        if let Some(previous) = self.camera.replace(stream.clone()) {
            previous.stop_all();
        }

        info!(
            "Camera/microphone acquired: {} (muted={}, video_off={})",
            stream.id(),
            self.muted,
            self.video_off
        );
        self.render_preview();
        Ok(stream)
    }

    /// Flip video. Works without a camera stream; only the flag changes then.
    pub fn toggle_video(&mut self) -> bool {
        self.video_off = !self.video_off;
        if let Some(camera) = &self.camera {
            camera.set_enabled(TrackKind::Video, !self.video_off);
        }
        debug!("Video toggled: video_off={}", self.video_off);
        self.render_preview();
        self.video_off
    }

    /// Flip mute. Returns the new muted flag for presence propagation.
    pub fn toggle_mute(&mut self) -> bool {
        self.muted = !self.muted;
        if let Some(camera) = &self.camera {
            camera.set_enabled(TrackKind::Audio, !self.muted);
        }
        debug!("Microphone toggled: muted={}", self.muted);
        self.muted
    }

    /// Request display capture. Returns whether sharing is active afterwards.
    ///
    /// Denial or cancellation is not an error for the session: state is left
    /// untouched and `false` is returned.
    pub async fn start_screen_share(&mut self) -> bool {
        if self.screen.is_some() {
            debug!("Screen share already active");
            return true;
        }

        let capture = match self.devices.get_display_media().await {
            Ok(capture) => capture,
            Err(e) => {
                debug!("Screen share not started: {}", e);
                return false;
            }
        };

        let stream_id = capture.stream.id();
        let events = self.events.clone();
        let ended = capture.ended;
        let watcher = tokio::spawn(async move {
            if ended.await.is_ok() {
                debug!("Screen share {} ended by host UI", stream_id);
                let _ = events.send(MediaEvent::ScreenShareEnded(stream_id));
            }
        });

        self.screen = Some(ScreenShare {
            stream: capture.stream,
            watcher,
        });
        info!("Screen share started: {}", stream_id);
        self.render_preview();
        true
    }

    pub fn stop_screen_share(&mut self) {
        let Some(share) = self.screen.take() else {
            return;
        };
        share.watcher.abort();
        share.stream.stop_all();
        info!("Screen share stopped: {}", share.stream.id());
        self.render_preview();
    }

    /// Apply a capture callback. A stale event for an already replaced or
    /// stopped share is ignored.
    pub fn handle_event(&mut self, event: MediaEvent) {
        match event {
            MediaEvent::ScreenShareEnded(id) => {
                if self.screen.as_ref().map(|s| s.stream.id()) == Some(id) {
                    self.stop_screen_share();
                } else {
                    debug!("Ignoring end of stale screen share {}", id);
                }
            }
        }
    }

    /// Stop every track of both streams and clear the preview. Safe to repeat.
    pub fn teardown(&mut self) {
        if let Some(share) = self.screen.take() {
            share.watcher.abort();
            share.stream.stop_all();
        }
        if let Some(camera) = self.camera.take() {
            camera.stop_all();
        }
        self.preview.show(None);
    }

    pub fn preview_source(&self) -> PreviewSource {
        match self.preview_stream() {
            Some(s) if self.screen.is_some() => PreviewSource::Screen(s.id().as_u64()),
            Some(s) => PreviewSource::Camera(s.id().as_u64()),
            None => PreviewSource::None,
        }
    }

    fn preview_stream(&self) -> Option<&MediaStream> {
        if let Some(share) = &self.screen {
            return Some(&share.stream);
        }
        self.camera.as_ref().filter(|_| !self.video_off)
    }

    fn render_preview(&self) {
        self.preview.show(self.preview_stream());
    }

    /// Stream a new recording should capture: screen while sharing, else camera.
    pub fn stream_for_recording(&self) -> Option<MediaStream> {
        self.screen
            .as_ref()
            .map(|s| s.stream.clone())
            .or_else(|| self.camera.clone())
    }

    pub fn camera_stream(&self) -> Option<&MediaStream> {
        self.camera.as_ref()
    }

    pub fn screen_stream(&self) -> Option<&MediaStream> {
        self.screen.as_ref().map(|s| &s.stream)
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn is_video_off(&self) -> bool {
        self.video_off
    }

    pub fn is_screen_sharing(&self) -> bool {
        self.screen.is_some()
    }

    pub fn snapshot(&self, is_recording: bool) -> LocalMediaSnapshot {
        LocalMediaSnapshot {
            is_muted: self.muted,
            is_video_off: self.video_off,
            is_screen_sharing: self.is_screen_sharing(),
            is_recording,
            has_camera_stream: self.camera.is_some(),
            preview: self.preview_source(),
        }
    }
}

impl Drop for MediaSourceManager {
    fn drop(&mut self) {
        if self.camera.is_some() || self.screen.is_some() {
            debug!("Dropping MediaSourceManager with live streams, cleaning up");
            self.teardown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::simulated::{Availability, CapturedPreview, SimulatedDevices};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    struct Harness {
        devices: Arc<SimulatedDevices>,
        preview: Arc<CapturedPreview>,
        events: mpsc::UnboundedReceiver<MediaEvent>,
        manager: MediaSourceManager,
    }

    fn harness(camera: Availability) -> Harness {
        let devices = Arc::new(SimulatedDevices::new(camera, Availability::Granted));
        let preview = Arc::new(CapturedPreview::default());
        let (tx, events) = mpsc::unbounded_channel();
        let manager = MediaSourceManager::new(
            devices.clone(),
            preview.clone(),
            tx,
            MediaOptions::default(),
        );
        Harness {
            devices,
            preview,
            events,
            manager,
        }
    }

    fn expected_preview(m: &MediaSourceManager) -> Option<StreamId> {
        if let Some(screen) = m.screen_stream() {
            return Some(screen.id());
        }
        if !m.is_video_off() {
            return m.camera_stream().map(|c| c.id());
        }
        None
    }

    #[tokio::test]
    async fn test_acquire_applies_mute_to_audio_tracks() {
        let mut h = harness(Availability::Granted);
        let stream = h.manager.acquire_camera_and_mic().await.unwrap();

        assert!(stream.audio_tracks().all(|t| !t.enabled()));
        assert!(stream.video_tracks().all(|t| t.enabled()));
        assert_eq!(h.preview.current(), Some(stream.id()));
    }

    #[tokio::test]
    async fn test_acquire_reports_missing_device_as_permission_denied() {
        let mut h = harness(Availability::Unavailable);
        let err = h.manager.acquire_camera_and_mic().await.unwrap_err();
        assert!(matches!(err, DeviceError::PermissionDenied(_)));
        assert!(h.manager.camera_stream().is_none());
    }

    #[tokio::test]
    async fn test_toggle_video_without_camera_does_not_panic() {
        let mut h = harness(Availability::Denied);
        let _ = h.manager.acquire_camera_and_mic().await;
        assert!(h.manager.toggle_video());
        assert!(!h.manager.toggle_video());
        assert_eq!(h.manager.preview_source(), PreviewSource::None);
    }

    #[tokio::test]
    async fn test_mute_round_trip_restores_tracks() {
        let mut h = harness(Availability::Granted);
        let stream = h.manager.acquire_camera_and_mic().await.unwrap();
        let before = h.manager.is_muted();
        let track_before: Vec<bool> = stream.audio_tracks().map(|t| t.enabled()).collect();

        assert_eq!(h.manager.toggle_mute(), !before);
        assert!(stream.audio_tracks().all(|t| t.enabled() == before));
        h.manager.toggle_mute();

        assert_eq!(h.manager.is_muted(), before);
        let track_after: Vec<bool> = stream.audio_tracks().map(|t| t.enabled()).collect();
        assert_eq!(track_before, track_after);
    }

    #[tokio::test]
    async fn test_screen_share_takes_preview_priority() {
        let mut h = harness(Availability::Granted);
        let camera = h.manager.acquire_camera_and_mic().await.unwrap();
        assert!(h.manager.start_screen_share().await);

        let screen = h.manager.screen_stream().unwrap().id();
        assert_eq!(h.preview.current(), Some(screen));
        assert!(matches!(h.manager.preview_source(), PreviewSource::Screen(_)));

        h.manager.toggle_video();
        assert_eq!(h.preview.current(), Some(screen));

        h.manager.stop_screen_share();
        assert_eq!(h.preview.current(), None);
        h.manager.toggle_video();
        assert_eq!(h.preview.current(), Some(camera.id()));
    }

    #[tokio::test]
    async fn test_denied_screen_share_is_silent_no_op() {
        let mut h = harness(Availability::Granted);
        h.devices.set_display(Availability::Denied);
        assert!(!h.manager.start_screen_share().await);
        assert!(!h.manager.is_screen_sharing());
        assert_eq!(h.devices.display_requests(), 1);
        assert!(h.preview.history().is_empty());
    }

    #[tokio::test]
    async fn test_camera_granted_after_refusal_can_be_acquired() {
        let mut h = harness(Availability::Denied);
        assert!(h.manager.acquire_camera_and_mic().await.is_err());

        h.devices.set_camera(Availability::Granted);
        let stream = h.manager.acquire_camera_and_mic().await.unwrap();

        assert_eq!(h.devices.camera_requests(), 2);
        assert_eq!(h.preview.history(), vec![Some(stream.id())]);
    }

    #[tokio::test]
    async fn test_native_stop_matches_explicit_stop() {
        let mut native = harness(Availability::Granted);
        native.manager.acquire_camera_and_mic().await.unwrap();
        native.manager.start_screen_share().await;
        let screen = native.manager.screen_stream().unwrap().clone();

        assert!(native.devices.end_display_capture());
        let event = native.events.recv().await.unwrap();
        native.manager.handle_event(event);

        let mut explicit = harness(Availability::Granted);
        explicit.manager.acquire_camera_and_mic().await.unwrap();
        explicit.manager.start_screen_share().await;
        explicit.manager.stop_screen_share();

        assert!(screen.tracks().iter().all(|t| !t.is_live()));
        assert_eq!(
            native.manager.is_screen_sharing(),
            explicit.manager.is_screen_sharing()
        );
        assert!(matches!(
            native.manager.preview_source(),
            PreviewSource::Camera(_)
        ));
        assert!(matches!(
            explicit.manager.preview_source(),
            PreviewSource::Camera(_)
        ));
    }

    #[tokio::test]
    async fn test_stale_screen_share_event_is_ignored() {
        let mut h = harness(Availability::Granted);
        h.manager.start_screen_share().await;
        let first = h.manager.screen_stream().unwrap().id();
        h.manager.stop_screen_share();
        h.manager.start_screen_share().await;

        h.manager.handle_event(MediaEvent::ScreenShareEnded(first));
        assert!(h.manager.is_screen_sharing());
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent() {
        let mut never_acquired = harness(Availability::Denied);
        never_acquired.manager.teardown();
        never_acquired.manager.teardown();

        let mut h = harness(Availability::Granted);
        let camera = h.manager.acquire_camera_and_mic().await.unwrap();
        h.manager.start_screen_share().await;
        let screen = h.manager.screen_stream().unwrap().clone();

        h.manager.teardown();
        h.manager.teardown();

        assert!(camera.tracks().iter().all(|t| !t.is_live()));
        assert!(screen.tracks().iter().all(|t| !t.is_live()));
        assert_eq!(h.preview.current(), None);
        assert_eq!(h.manager.preview_source(), PreviewSource::None);
    }

    #[tokio::test]
    async fn test_preview_invariant_holds_for_random_sequences() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..50 {
            let mut h = harness(Availability::Granted);
            h.manager.acquire_camera_and_mic().await.unwrap();
            for _ in 0..40 {
                match rng.gen_range(0..4) {
                    0 => {
                        h.manager.toggle_video();
                    }
                    1 => {
                        h.manager.start_screen_share().await;
                    }
                    2 => h.manager.stop_screen_share(),
                    _ => {
                        if h.devices.end_display_capture() {
                            let event = h.events.recv().await.unwrap();
                            h.manager.handle_event(event);
                        }
                    }
                }
                assert_eq!(h.preview.current(), expected_preview(&h.manager));
            }
        }
    }
}
