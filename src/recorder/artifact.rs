//! Finalized recording output.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::io;
use std::path::PathBuf;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::capture::RecorderError;

/// A downloadable recording file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    pub file_name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub location: PathBuf,
}

/// `recording-<ISO8601 stop timestamp>.<ext>`
pub fn artifact_file_name(stopped_at: DateTime<Utc>, extension: &str) -> String {
    format!(
        "recording-{}.{}",
        stopped_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        extension
    )
}

#[async_trait]
pub trait ArtifactSink: Send + Sync {
    async fn save(
        &self,
        file_name: &str,
        mime_type: &str,
        data: Vec<u8>,
    ) -> Result<Artifact, RecorderError>;
}

/// Writes artifacts into a local directory, creating it on demand.
///
/// An existing file is never overwritten: a clashing name gets a `-N`
/// suffix before the extension, and the returned artifact carries the name
/// actually used.
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    async fn create_unique(&self, file_name: &str) -> io::Result<(File, String, PathBuf)> {
        let (stem, extension) = match file_name.rsplit_once('.') {
            Some((stem, ext)) => (stem, Some(ext)),
            None => (file_name, None),
        };

        let mut attempt = 0u32;
        loop {
            let candidate = match (attempt, extension) {
                (0, _) => file_name.to_string(),
                (n, Some(ext)) => format!("{stem}-{n}.{ext}"),
                (n, None) => format!("{stem}-{n}"),
            };
            let location = self.dir.join(&candidate);
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&location)
                .await
            {
                Ok(file) => return Ok((file, candidate, location)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    debug!("{:?} exists, trying next name", location);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl ArtifactSink for DirectorySink {
    async fn save(
        &self,
        file_name: &str,
        mime_type: &str,
        data: Vec<u8>,
    ) -> Result<Artifact, RecorderError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let (mut file, file_name, location) = self.create_unique(file_name).await?;
        let size_bytes = data.len() as u64;
        file.write_all(&data).await?;
        file.flush().await?;

        info!("Recording saved: {:?} ({} bytes)", location, size_bytes);
        Ok(Artifact {
            file_name,
            mime_type: mime_type.to_string(),
            size_bytes,
            location,
        })
    }
}
