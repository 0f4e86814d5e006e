use crate::api::ApiServer;
use crate::config::{Config, PresenceBackend, PresenceConfig};
use crate::media::simulated::SimulatedDevices;
use crate::media::LogPreviewSink;
use crate::presence::{DocumentStore, MemoryStore, SqliteStore};
use crate::recorder::simulated::SimulatedEncoder;
use crate::recorder::DirectorySink;
use crate::room::RoomInfo;
use crate::session::{
    Notice, SessionBackends, SessionCommand, SessionContext, SessionMachine, SessionOptions,
    SessionStatusHandle,
};
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Headless host capabilities: simulated devices and encoder, recordings
/// written to `config.recording`'s output dir, presence per `[presence]`.
pub fn headless_backends(config: &Config) -> Result<SessionBackends> {
    let output_dir = config.recording.resolve_output_dir()?;
    info!("Recordings will be saved to {:?}", output_dir);

    Ok(SessionBackends {
        devices: Arc::new(SimulatedDevices::default()),
        preview: Arc::new(LogPreviewSink),
        encoder: Arc::new(SimulatedEncoder::new(config.recording.timeslice())),
        artifacts: Arc::new(DirectorySink::new(output_dir)),
        store: presence_store(&config.presence)?,
    })
}

fn presence_store(config: &PresenceConfig) -> Result<Arc<dyn DocumentStore>> {
    match config.backend {
        PresenceBackend::Sqlite => {
            let db_path = config.resolve_database()?;
            Ok(Arc::new(SqliteStore::open(&db_path, config.poll_interval())?))
        }
        PresenceBackend::Memory => {
            warn!(
                "Presence is kept in this process only; \
                 other meetroom processes will not see this participant"
            );
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

/// Run one session in `room` until it is left or interrupted.
pub async fn run_session(room: RoomInfo, display_name: Option<String>) -> Result<()> {
    info!("Starting meetroom session");

    let config = Config::load()?;
    let backends = headless_backends(&config)?;

    let display_name = display_name.or_else(|| Some(config.participant.display_name.clone()));
    let ctx = SessionContext::new(room, display_name);
    let room_id = ctx.room.id.clone();

    let status_handle = SessionStatusHandle::default();
    let (notice_tx, notice_rx) = mpsc::unbounded_channel::<Notice>();
    spawn_notice_logger(notice_rx);

    let machine = SessionMachine::new(
        ctx,
        backends,
        SessionOptions {
            media: config.media.options(),
            recorder: config.recording.options(),
        },
        status_handle.clone(),
        notice_tx,
    );

    let (tx, rx) = mpsc::channel::<SessionCommand>(10);

    if config.api.enabled {
        let api_server = ApiServer::new(tx.clone(), status_handle.clone(), &config.api);
        tokio::spawn(async move {
            if let Err(e) = api_server.start().await {
                error!("API server failed: {}", e);
            }
        });
        info!("Room code: {}", room_id);
        info!(
            "Control the session with e.g.: curl -X POST http://127.0.0.1:{}/mute",
            config.api.port
        );
    } else {
        info!(
            "Room code: {} (HTTP control disabled, Ctrl-C or SIGTERM to leave)",
            room_id
        );
    }

    let result = machine.run(rx).await;
    drop(tx);
    result
}

fn spawn_notice_logger(mut notices: mpsc::UnboundedReceiver<Notice>) {
    tokio::spawn(async move {
        while let Some(notice) = notices.recv().await {
            if notice.is_persistent() {
                warn!("{}: {}", notice.title, notice.description);
            } else if notice.description.is_empty() {
                info!("{}", notice.title);
            } else {
                info!("{}: {}", notice.title, notice.description);
            }
        }
    });
}
