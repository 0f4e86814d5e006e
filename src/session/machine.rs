//! Meeting session orchestrator.
//!
//! permission request → active → left
//!
//! Owns the local media sources, the recorder and the room presence for one
//! client, and exposes the controls the presentation layer calls. All
//! dependencies are injected via constructor.

use anyhow::{bail, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::notice::Notice;
use super::status::{SessionPhase, SessionStatusHandle};
use crate::media::{
    MediaDevices, MediaEvent, MediaOptions, MediaSourceManager, PreviewSink,
};
use crate::presence::{
    pick_avatar, DocumentStore, ParticipantRecord, ParticipantUpdate, PresenceSynchronizer,
    RosterSubscription,
};
use crate::recorder::{ArtifactSink, CaptureRecorder, Recorder, RecorderEvent, RecorderOptions};
use crate::room::{ParticipantId, RoomInfo};

/// Identity of one session: which room, and who we are in it.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub room: RoomInfo,
    pub local_id: ParticipantId,
    pub display_name: Option<String>,
    pub avatar_ref: String,
}

impl SessionContext {
    pub fn new(room: RoomInfo, display_name: Option<String>) -> Self {
        Self {
            room,
            local_id: ParticipantId::generate(),
            display_name,
            avatar_ref: pick_avatar(&mut rand::thread_rng()),
        }
    }
}

/// Host capabilities a session runs against.
#[derive(Clone)]
pub struct SessionBackends {
    pub devices: Arc<dyn MediaDevices>,
    pub preview: Arc<dyn PreviewSink>,
    pub encoder: Arc<dyn CaptureRecorder>,
    pub artifacts: Arc<dyn ArtifactSink>,
    pub store: Arc<dyn DocumentStore>,
}

#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub media: MediaOptions,
    pub recorder: RecorderOptions,
}

/// Controls exposed to the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    ToggleMute,
    ToggleVideo,
    ToggleScreenShare,
    ToggleRecording,
    Leave,
}

impl SessionCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ToggleMute => "toggle_mute",
            Self::ToggleVideo => "toggle_video",
            Self::ToggleScreenShare => "toggle_screen_share",
            Self::ToggleRecording => "toggle_recording",
            Self::Leave => "leave",
        }
    }
}

pub struct SessionMachine {
    ctx: SessionContext,
    media: MediaSourceManager,
    recorder: Recorder,
    presence: PresenceSynchronizer,
    roster_sub: Option<RosterSubscription>,
    status: SessionStatusHandle,
    notices: mpsc::UnboundedSender<Notice>,
    phase: SessionPhase,
    has_camera_permission: bool,
    media_rx: mpsc::UnboundedReceiver<MediaEvent>,
    recorder_rx: mpsc::UnboundedReceiver<RecorderEvent>,
    roster_tx: mpsc::UnboundedSender<Vec<ParticipantRecord>>,
    roster_rx: mpsc::UnboundedReceiver<Vec<ParticipantRecord>>,
}

impl SessionMachine {
    pub fn new(
        ctx: SessionContext,
        backends: SessionBackends,
        options: SessionOptions,
        status: SessionStatusHandle,
        notices: mpsc::UnboundedSender<Notice>,
    ) -> Self {
        let (media_tx, media_rx) = mpsc::unbounded_channel();
        let (recorder_tx, recorder_rx) = mpsc::unbounded_channel();
        let (roster_tx, roster_rx) = mpsc::unbounded_channel();

        let media = MediaSourceManager::new(
            backends.devices,
            backends.preview,
            media_tx,
            options.media,
        );
        let recorder = Recorder::new(
            backends.encoder,
            backends.artifacts,
            recorder_tx,
            options.recorder,
        );

        Self {
            ctx,
            media,
            recorder,
            presence: PresenceSynchronizer::new(backends.store),
            roster_sub: None,
            status,
            notices,
            phase: SessionPhase::PermissionPending,
            has_camera_permission: false,
            media_rx,
            recorder_rx,
            roster_tx,
            roster_rx,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    pub fn has_camera_permission(&self) -> bool {
        self.has_camera_permission
    }

    pub fn media(&self) -> &MediaSourceManager {
        &self.media
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_recording()
    }

    /// Request devices, then join the room and start following its roster.
    ///
    /// A refused camera does not block the session: it becomes active with
    /// the camera disabled so screen-share-only participation still works.
    pub async fn initialize(&mut self) -> Result<()> {
        if self.phase != SessionPhase::PermissionPending {
            bail!(
                "Session already initialized (current phase: {})",
                self.phase.as_str()
            );
        }

        self.status
            .set_identity(
                self.ctx.room.id.as_str(),
                &self.ctx.room.name,
                self.ctx.local_id.as_str(),
            )
            .await;

        match self.media.acquire_camera_and_mic().await {
            Ok(_) => self.has_camera_permission = true,
            Err(e) => {
                warn!("Continuing without camera: {}", e);
                self.has_camera_permission = false;
                self.notify(Notice::permission_denied()).await;
            }
        }

        self.phase = SessionPhase::Active;
        self.status.set_phase(SessionPhase::Active).await;
        self.publish_media().await;

        self.join_room().await;
        info!(
            "Session active in room {} ({}) as {}",
            self.ctx.room.id, self.ctx.room.name, self.ctx.local_id
        );
        Ok(())
    }

    async fn join_room(&mut self) {
        let record = ParticipantRecord::new(
            self.ctx.local_id.clone(),
            self.ctx.display_name.clone(),
            self.ctx.avatar_ref.clone(),
            self.media.is_muted(),
        );

        if let Err(e) = self
            .presence
            .join(&self.ctx.room.id, &self.ctx.local_id, &record)
            .await
        {
            warn!("Presence join failed, roster may stay empty: {}", e);
        }

        let tx = self.roster_tx.clone();
        match self.presence.subscribe(&self.ctx.room.id, move |roster| {
            let _ = tx.send(roster);
        }) {
            Ok(sub) => self.roster_sub = Some(sub),
            Err(e) => warn!("Roster subscription failed: {}", e),
        }
    }

    fn ensure_active(&self) -> Result<()> {
        match self.phase {
            SessionPhase::Active => Ok(()),
            SessionPhase::PermissionPending => {
                bail!("Session is still waiting for device permission")
            }
            SessionPhase::Left => bail!("Session has ended; start a new session to rejoin"),
        }
    }

    pub async fn toggle_mute(&mut self) -> Result<bool> {
        self.ensure_active()?;
        let muted = self.media.toggle_mute();

        if let Err(e) = self
            .presence
            .update_self(
                &self.ctx.room.id,
                &self.ctx.local_id,
                &ParticipantUpdate::muted(muted),
            )
            .await
        {
            warn!("Failed to publish mute state: {}", e);
        }

        self.publish_media().await;
        Ok(muted)
    }

    pub async fn toggle_video(&mut self) -> Result<bool> {
        self.ensure_active()?;
        let video_off = self.media.toggle_video();
        self.publish_media().await;
        Ok(video_off)
    }

    pub async fn start_screen_share(&mut self) -> Result<bool> {
        self.ensure_active()?;
        let sharing = self.media.start_screen_share().await;
        self.publish_media().await;
        Ok(sharing)
    }

    pub async fn stop_screen_share(&mut self) -> Result<()> {
        self.ensure_active()?;
        self.media.stop_screen_share();
        self.publish_media().await;
        Ok(())
    }

    pub async fn toggle_screen_share(&mut self) -> Result<bool> {
        if self.media.is_screen_sharing() {
            self.stop_screen_share().await?;
            Ok(false)
        } else {
            self.start_screen_share().await
        }
    }

    /// Start recording the current source. Returns whether recording began.
    pub async fn start_recording(&mut self) -> Result<bool> {
        self.ensure_active()?;
        let stream = self.media.stream_for_recording();

        let started = match self.recorder.start(stream.as_ref()) {
            Ok(()) => {
                self.notify(Notice::recording_started()).await;
                true
            }
            Err(e) => {
                warn!("Recording not started: {}", e);
                self.notify(Notice::from(&e)).await;
                false
            }
        };

        self.publish_media().await;
        Ok(started)
    }

    /// Stop recording. The artifact is announced separately once saved.
    pub async fn stop_recording(&mut self) -> Result<bool> {
        self.ensure_active()?;
        let stopped = self.recorder.stop().is_some();
        if stopped {
            self.notify(Notice::recording_stopped()).await;
        }
        self.publish_media().await;
        Ok(stopped)
    }

    pub async fn toggle_recording(&mut self) -> Result<bool> {
        if self.recorder.is_recording() {
            self.stop_recording().await?;
            Ok(false)
        } else {
            self.start_recording().await
        }
    }

    /// Leave the room. Terminal and idempotent.
    ///
    /// Every cleanup step runs regardless of how the previous one went.
    pub async fn leave(&mut self) {
        if self.phase == SessionPhase::Left {
            if self.presence.joined_path().is_some() {
                info!("Retrying removal of participant record");
                self.remove_record().await;
            } else {
                debug!("Session already left");
            }
            return;
        }
        info!("Leaving room {}", self.ctx.room.id);

        if self.recorder.stop().is_some() {
            self.notify(Notice::recording_stopped()).await;
        }

        self.media.teardown();

        if let Some(sub) = self.roster_sub.take() {
            sub.cancel();
        }

        self.remove_record().await;

        self.phase = SessionPhase::Left;
        self.status.set_phase(SessionPhase::Left).await;
        self.publish_media().await;
        self.notify(Notice::left_meeting()).await;
    }

    async fn remove_record(&mut self) {
        if let Err(e) = self
            .presence
            .leave(&self.ctx.room.id, &self.ctx.local_id)
            .await
        {
            warn!("Failed to remove participant record: {}", e);
        }
    }

    pub async fn apply(&mut self, command: SessionCommand) -> Result<()> {
        debug!("Applying session command {}", command.as_str());
        match command {
            SessionCommand::ToggleMute => {
                self.toggle_mute().await?;
            }
            SessionCommand::ToggleVideo => {
                self.toggle_video().await?;
            }
            SessionCommand::ToggleScreenShare => {
                self.toggle_screen_share().await?;
            }
            SessionCommand::ToggleRecording => {
                self.toggle_recording().await?;
            }
            SessionCommand::Leave => self.leave().await,
        }
        Ok(())
    }

    pub async fn handle_media_event(&mut self, event: MediaEvent) {
        if self.phase == SessionPhase::Left {
            return;
        }
        self.media.handle_event(event);
        self.publish_media().await;
    }

    pub async fn handle_recorder_event(&mut self, event: RecorderEvent) {
        match event {
            RecorderEvent::Started { .. } | RecorderEvent::Stopped { .. } => {}
            RecorderEvent::ArtifactReady(artifact) => {
                self.notify(Notice::recording_saved(&artifact)).await;
                self.status.set_artifact(artifact).await;
            }
            RecorderEvent::Failed(reason) => {
                self.notify(Notice::recording_failed(&reason)).await;
            }
        }
    }

    pub async fn handle_roster(&mut self, roster: Vec<ParticipantRecord>) {
        if self.phase != SessionPhase::Active {
            return;
        }
        debug!("Roster update: {} participant(s)", roster.len());
        self.status.set_roster(roster).await;
    }

    /// Wait for pending recordings to be written and announce them.
    pub async fn settle(&mut self) {
        self.recorder.flush().await;
        while let Ok(event) = self.recorder_rx.try_recv() {
            self.handle_recorder_event(event).await;
        }
    }

    /// Drive the session until it is left.
    ///
    /// Commands, capture callbacks, recorder events and roster deliveries are
    /// all handled on this one loop. Ctrl-C, SIGTERM or a closed command
    /// channel trigger a best-effort leave.
    pub async fn run(mut self, mut commands: mpsc::Receiver<SessionCommand>) -> Result<()> {
        // Registered before joining so a stop request during setup still leaves.
        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        if self.phase == SessionPhase::PermissionPending {
            self.initialize().await?;
        }

        while self.phase != SessionPhase::Left {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => {
                        if let Err(e) = self.apply(command).await {
                            warn!("Command {} rejected: {}", command.as_str(), e);
                        }
                    }
                    None => {
                        info!("Control channel closed, leaving room");
                        self.leave().await;
                    }
                },
                Some(event) = self.media_rx.recv() => self.handle_media_event(event).await,
                Some(event) = self.recorder_rx.recv() => self.handle_recorder_event(event).await,
                Some(roster) = self.roster_rx.recv() => self.handle_roster(roster).await,
                signal = &mut shutdown => {
                    warn!("{} received, leaving room (best effort)", signal);
                    self.leave().await;
                }
            }
        }

        self.settle().await;
        info!("Session ended");
        Ok(())
    }

    async fn publish_media(&self) {
        self.status
            .set_media(
                self.media.snapshot(self.recorder.is_recording()),
                self.has_camera_permission,
            )
            .await;
    }

    async fn notify(&self, notice: Notice) {
        if notice.is_persistent() {
            self.status.push_warning(notice.clone()).await;
        }
        if self.notices.send(notice).is_err() {
            debug!("No notice listener attached");
        }
    }
}

/// Registers the stop signals right away and returns a future that resolves
/// with the signal name once one arrives. A signal that cannot be registered
/// is logged and never fires.
#[cfg(unix)]
fn shutdown_signal() -> impl Future<Output = &'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = register(signal(SignalKind::interrupt()), "SIGINT");
    let mut terminate = register(signal(SignalKind::terminate()), "SIGTERM");

    async move {
        tokio::select! {
            name = next_signal(&mut interrupt, "SIGINT") => name,
            name = next_signal(&mut terminate, "SIGTERM") => name,
        }
    }
}

#[cfg(unix)]
fn register(
    stream: std::io::Result<tokio::signal::unix::Signal>,
    name: &str,
) -> Option<tokio::signal::unix::Signal> {
    stream
        .map_err(|e| error!("Cannot register {} handler: {}", name, e))
        .ok()
}

#[cfg(unix)]
async fn next_signal(
    stream: &mut Option<tokio::signal::unix::Signal>,
    name: &'static str,
) -> &'static str {
    if let Some(stream) = stream {
        if stream.recv().await.is_some() {
            return name;
        }
    }
    std::future::pending().await
}

#[cfg(not(unix))]
fn shutdown_signal() -> impl Future<Output = &'static str> {
    async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => "Ctrl-C",
            Err(e) => {
                error!("Cannot register Ctrl-C handler: {}", e);
                std::future::pending().await
            }
        }
    }
}
