//! User-facing notices raised by the session.
//!
//! Persistent notices stay until the session ends; transient ones may be
//! dismissed or time out in the presentation layer.

use serde::Serialize;

use crate::recorder::{Artifact, RecorderError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeKind {
    Persistent,
    Transient,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub title: String,
    pub description: String,
}

impl Notice {
    fn new(kind: NoticeKind, title: &str, description: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.to_string(),
            description: description.into(),
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.kind == NoticeKind::Persistent
    }

    pub fn permission_denied() -> Self {
        Self::new(
            NoticeKind::Persistent,
            "Access Denied",
            "Please enable camera and microphone permissions in your browser settings.",
        )
    }

    pub fn recording_started() -> Self {
        Self::new(
            NoticeKind::Transient,
            "Recording Started",
            "The meeting is now being recorded.",
        )
    }

    pub fn recording_stopped() -> Self {
        Self::new(
            NoticeKind::Transient,
            "Recording Stopped",
            "Your recording will be downloaded shortly.",
        )
    }

    pub fn recording_saved(artifact: &Artifact) -> Self {
        Self::new(
            NoticeKind::Transient,
            "Recording Saved",
            format!("Saved {} ({} bytes).", artifact.file_name, artifact.size_bytes),
        )
    }

    pub fn recording_failed(reason: &str) -> Self {
        Self::new(
            NoticeKind::Transient,
            "Recording Error",
            format!("The recording could not be saved: {reason}"),
        )
    }

    pub fn left_meeting() -> Self {
        Self::new(NoticeKind::Transient, "You have left the meeting.", "")
    }
}

impl From<&RecorderError> for Notice {
    fn from(err: &RecorderError) -> Self {
        match err {
            RecorderError::NoStreamAvailable => Self::new(
                NoticeKind::Transient,
                "Recording Error",
                "No media stream available to record.",
            ),
            RecorderError::Unsupported(_) => Self::new(
                NoticeKind::Transient,
                "Recording Error",
                "Could not start recording. Your browser may not support it.",
            ),
            RecorderError::Sink(e) => Self::recording_failed(&e.to_string()),
        }
    }
}
