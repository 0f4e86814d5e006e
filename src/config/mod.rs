use crate::global;
use crate::media::MediaOptions;
use crate::recorder::RecorderOptions;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub participant: ParticipantConfig,
    pub media: MediaConfig,
    pub recording: RecordingConfig,
    pub presence: PresenceConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticipantConfig {
    /// Name shown to other participants unless overridden with `--name`.
    pub display_name: String,
}

impl Default for ParticipantConfig {
    fn default() -> Self {
        Self {
            display_name: crate::presence::DEFAULT_DISPLAY_NAME.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub start_muted: bool,
    pub start_video_off: bool,
}

impl Default for MediaConfig {
    fn default() -> Self {
        let defaults = MediaOptions::default();
        Self {
            start_muted: defaults.start_muted,
            start_video_off: defaults.start_video_off,
        }
    }
}

impl MediaConfig {
    pub fn options(&self) -> MediaOptions {
        MediaOptions {
            start_muted: self.start_muted,
            start_video_off: self.start_video_off,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Where finished recordings are written. Falls back to the download dir.
    pub output_dir: Option<PathBuf>,
    pub mime_type: String,
    pub file_extension: String,
    /// How often the encoder hands over a chunk, in milliseconds.
    pub timeslice_ms: u64,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        let defaults = RecorderOptions::default();
        Self {
            output_dir: None,
            mime_type: defaults.mime_type,
            file_extension: defaults.file_extension,
            timeslice_ms: 1000,
        }
    }
}

impl RecordingConfig {
    pub fn options(&self) -> RecorderOptions {
        RecorderOptions {
            mime_type: self.mime_type.clone(),
            file_extension: self.file_extension.clone(),
        }
    }

    pub fn timeslice(&self) -> Duration {
        Duration::from_millis(self.timeslice_ms.max(1))
    }

    pub fn resolve_output_dir(&self) -> Result<PathBuf> {
        match &self.output_dir {
            Some(dir) => Ok(dir.clone()),
            None => global::recordings_dir(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceBackend {
    /// SQLite file shared by every meetroom process on this machine.
    Sqlite,
    /// Kept inside this process; other processes never see it.
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    pub backend: PresenceBackend,
    /// Database file for the `sqlite` backend. Defaults to the data dir.
    pub database: Option<PathBuf>,
    /// How often the roster is re-read from the database, in milliseconds.
    pub poll_ms: u64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            backend: PresenceBackend::Sqlite,
            database: None,
            poll_ms: 250,
        }
    }
}

impl PresenceConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_ms.max(10))
    }

    pub fn resolve_database(&self) -> Result<PathBuf> {
        match &self.database {
            Some(path) => Ok(path.clone()),
            None => global::presence_db_file(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 3838,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        if !config_path.exists() {
            info!(
                "Config file not found, creating default at {:?}",
                config_path
            );
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content =
            std::fs::read_to_string(&config_path).context("Failed to read config file")?;
        let config = Self::from_toml_str(&content)?;

        info!("Loaded config from {:?}", config_path);
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&config_path, content).context("Failed to write config file")?;

        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        global::config_file()
    }
}
