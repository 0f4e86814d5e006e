//! REST API server for a meeting session.
//!
//! Provides HTTP endpoints for:
//! - Session status and roster
//! - Local media controls (mute, video, screen share, recording)
//! - Leaving the room

pub mod error;
pub mod routes;

use crate::config::ApiConfig;
use crate::session::{SessionCommand, SessionStatusHandle};
use anyhow::Result;
use axum::{response::Json, routing::get, Router};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower::ServiceBuilder;
use tracing::info;

pub use routes::session::SessionState;

pub struct ApiServer {
    port: u16,
    session_state: SessionState,
}

impl ApiServer {
    pub fn new(
        tx: mpsc::Sender<SessionCommand>,
        status: SessionStatusHandle,
        config: &ApiConfig,
    ) -> Self {
        Self {
            port: config.port,
            session_state: SessionState { tx, status },
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(service_info))
            .merge(routes::session::router(self.session_state.clone()))
            .layer(ServiceBuilder::new())
    }

    pub async fn start(self) -> Result<()> {
        let app = self.router();
        let listener = tokio::net::TcpListener::bind(&format!("127.0.0.1:{}", self.port)).await?;

        info!("API server listening on http://127.0.0.1:{}", self.port);
        info!("Endpoints:");
        info!("  GET  /              - Service info");
        info!("  GET  /status        - Session status");
        info!("  GET  /roster        - Participants in the room");
        info!("  POST /mute          - Toggle microphone");
        info!("  POST /video         - Toggle camera");
        info!("  POST /screen-share  - Toggle screen share");
        info!("  POST /recording     - Toggle recording");
        info!("  POST /leave         - Leave the room");

        axum::serve(listener, app).await?;

        Ok(())
    }
}

async fn service_info() -> Json<Value> {
    Json(json!({
        "service": "meetroom",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}
