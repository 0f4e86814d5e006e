//! Session status types and shared state handle.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::notice::Notice;
use crate::media::LocalMediaSnapshot;
use crate::presence::ParticipantRecord;
use crate::recorder::Artifact;

/// Lifecycle of a meeting session. `Left` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    PermissionPending,
    Active,
    Left,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PermissionPending => "permission_pending",
            Self::Active => "active",
            Self::Left => "left",
        }
    }
}

/// Read model of a session, served to the presentation layer.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub phase: SessionPhase,
    pub room_id: Option<String>,
    pub room_name: Option<String>,
    pub local_id: Option<String>,
    pub has_camera_permission: bool,
    pub media: Option<LocalMediaSnapshot>,
    pub roster: Vec<ParticipantRecord>,
    pub warnings: Vec<Notice>,
    pub last_artifact: Option<Artifact>,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self {
            phase: SessionPhase::PermissionPending,
            room_id: None,
            room_name: None,
            local_id: None,
            has_camera_permission: false,
            media: None,
            roster: Vec::new(),
            warnings: Vec::new(),
            last_artifact: None,
        }
    }
}

/// Thread-safe handle for sharing session state between the loop and API handlers.
#[derive(Clone, Default)]
pub struct SessionStatusHandle {
    inner: Arc<Mutex<SessionStatus>>,
}

impl SessionStatusHandle {
    pub async fn get(&self) -> SessionStatus {
        self.inner.lock().await.clone()
    }

    pub async fn set_identity(&self, room_id: &str, room_name: &str, local_id: &str) {
        let mut status = self.inner.lock().await;
        status.room_id = Some(room_id.to_string());
        status.room_name = Some(room_name.to_string());
        status.local_id = Some(local_id.to_string());
    }

    pub async fn set_phase(&self, phase: SessionPhase) {
        let mut status = self.inner.lock().await;
        status.phase = phase;
        if phase == SessionPhase::Left {
            status.warnings.clear();
            status.roster.clear();
        }
    }

    pub async fn set_media(&self, media: LocalMediaSnapshot, has_camera_permission: bool) {
        let mut status = self.inner.lock().await;
        status.media = Some(media);
        status.has_camera_permission = has_camera_permission;
    }

    /// Replace the roster wholesale.
    pub async fn set_roster(&self, roster: Vec<ParticipantRecord>) {
        let mut status = self.inner.lock().await;
        status.roster = roster;
    }

    pub async fn push_warning(&self, notice: Notice) {
        let mut status = self.inner.lock().await;
        if !status.warnings.contains(&notice) {
            status.warnings.push(notice);
        }
    }

    pub async fn set_artifact(&self, artifact: Artifact) {
        let mut status = self.inner.lock().await;
        status.last_artifact = Some(artifact);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::ParticipantId;

    #[test]
    fn test_session_phase_as_str() {
        assert_eq!(SessionPhase::PermissionPending.as_str(), "permission_pending");
        assert_eq!(SessionPhase::Active.as_str(), "active");
        assert_eq!(SessionPhase::Left.as_str(), "left");
    }

    #[test]
    fn test_session_phase_serialization() {
        let json = serde_json::to_string(&SessionPhase::PermissionPending).unwrap();
        assert_eq!(json, "\"permission_pending\"");
    }

    #[tokio::test]
    async fn test_warnings_are_deduplicated_and_cleared_on_leave() {
        let handle = SessionStatusHandle::default();
        handle.push_warning(Notice::permission_denied()).await;
        handle.push_warning(Notice::permission_denied()).await;
        assert_eq!(handle.get().await.warnings.len(), 1);

        handle.set_phase(SessionPhase::Left).await;
        let status = handle.get().await;
        assert_eq!(status.phase, SessionPhase::Left);
        assert!(status.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_roster_is_replaced_wholesale() {
        let handle = SessionStatusHandle::default();
        let a = ParticipantRecord::new(ParticipantId::new("a"), None, "user1".into(), true);
        let b = ParticipantRecord::new(ParticipantId::new("b"), None, "user2".into(), true);

        handle.set_roster(vec![a.clone(), b]).await;
        handle.set_roster(vec![a.clone()]).await;
        assert_eq!(handle.get().await.roster, vec![a]);
    }
}
