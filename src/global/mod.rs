use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;

const APP_DIR: &str = "meetroom";

pub fn config_dir() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR))
        .context("Unable to determine config directory")
}

pub fn config_file() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

pub fn data_dir() -> Result<PathBuf> {
    if let Some(dir) = dirs::data_dir() {
        return Ok(dir.join(APP_DIR));
    }
    if let Some(home) = dirs::home_dir() {
        return Ok(home.join(".local").join("share").join(APP_DIR));
    }
    Err(anyhow!("Unable to determine data directory"))
}

/// Presence database shared by every meetroom process of this user.
pub fn presence_db_file() -> Result<PathBuf> {
    Ok(data_dir()?.join("presence.db"))
}

/// Default destination for finished recordings: the user's download folder,
/// or a `recordings` folder under the data dir when there is none.
pub fn recordings_dir() -> Result<PathBuf> {
    if let Some(dir) = dirs::download_dir() {
        return Ok(dir);
    }
    Ok(data_dir()?.join("recordings"))
}
