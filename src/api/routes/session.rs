//! Session control endpoints.
//!
//! Provides HTTP endpoints for:
//! - Reading the session (GET /status, GET /roster)
//! - Local media controls (POST /mute, /video, /screen-share, /recording)
//! - Leaving the room (POST /leave)

use crate::api::error::{ApiError, ApiResult};
use crate::presence::ParticipantRecord;
use crate::session::{SessionCommand, SessionStatus, SessionStatusHandle};
use axum::{
    extract::State,
    response::Json,
    routing::{get, post},
    Router,
};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info};

#[derive(Clone)]
pub struct SessionState {
    pub tx: mpsc::Sender<SessionCommand>,
    pub status: SessionStatusHandle,
}

/// Creates the session router with all control endpoints.
pub fn router(state: SessionState) -> Router {
    Router::new()
        .route("/status", get(session_status))
        .route("/roster", get(roster))
        .route("/mute", post(toggle_mute))
        .route("/video", post(toggle_video))
        .route("/screen-share", post(toggle_screen_share))
        .route("/recording", post(toggle_recording))
        .route("/leave", post(leave))
        .with_state(state)
}

async fn session_status(State(state): State<SessionState>) -> Json<SessionStatus> {
    Json(state.status.get().await)
}

async fn roster(State(state): State<SessionState>) -> Json<Vec<ParticipantRecord>> {
    Json(state.status.get().await.roster)
}

/// Enqueue `command` on the session loop and return the status it leads to.
async fn dispatch(state: &SessionState, command: SessionCommand) -> ApiResult<Json<SessionStatus>> {
    info!("{} command received via API", command.as_str());

    if let Err(e) = state.tx.send(command).await {
        error!("Failed to send {} command: {}", e.0.as_str(), e);
        return Err(ApiError::session_ended());
    }

    // Small delay to allow the status to be updated
    tokio::time::sleep(Duration::from_millis(50)).await;
    Ok(Json(state.status.get().await))
}

async fn toggle_mute(State(state): State<SessionState>) -> ApiResult<Json<SessionStatus>> {
    dispatch(&state, SessionCommand::ToggleMute).await
}

async fn toggle_video(State(state): State<SessionState>) -> ApiResult<Json<SessionStatus>> {
    dispatch(&state, SessionCommand::ToggleVideo).await
}

async fn toggle_screen_share(State(state): State<SessionState>) -> ApiResult<Json<SessionStatus>> {
    dispatch(&state, SessionCommand::ToggleScreenShare).await
}

async fn toggle_recording(State(state): State<SessionState>) -> ApiResult<Json<SessionStatus>> {
    dispatch(&state, SessionCommand::ToggleRecording).await
}

async fn leave(State(state): State<SessionState>) -> ApiResult<Json<SessionStatus>> {
    dispatch(&state, SessionCommand::Leave).await
}
