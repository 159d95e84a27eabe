//! Settings files for mailroom
//!
//! Mailroom keeps its connection settings (`server.json`: host, user,
//! auth mechanism, slice size) as JSON under the platform config dir,
//! e.g. `~/.config/mailroom/server.json` on Linux. The mail crate decides
//! what goes in the files; this crate only locates, reads and writes them.

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

/// Directory under the platform config dir
const APP_DIR: &str = "mailroom";

/// The mailroom settings directory, if the platform has a config dir
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join(APP_DIR))
}

/// Where the settings file `filename` (e.g. `server.json`) lives
pub fn config_path(filename: &str) -> Option<PathBuf> {
    config_dir().map(|p| p.join(filename))
}

/// Read a settings file from the mailroom directory
pub fn load_json<T: DeserializeOwned>(filename: &str) -> Result<T> {
    let path = config_path(filename).context("No config directory on this platform")?;
    load_json_file(&path)
}

/// Read settings from an explicit path outside the mailroom directory
pub fn load_json_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings from {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Invalid settings JSON in {}", path.display()))
}

/// Whether `filename` has been written to the mailroom directory
pub fn config_exists(filename: &str) -> bool {
    config_path(filename).is_some_and(|p| p.is_file())
}

/// Create the mailroom directory on first save
pub fn ensure_config_dir() -> Result<PathBuf> {
    let dir = config_dir().context("No config directory on this platform")?;
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    Ok(dir)
}

/// Write a settings file into the mailroom directory
pub fn save_json<T: Serialize>(filename: &str, value: &T) -> Result<()> {
    let dir = ensure_config_dir()?;
    save_json_file(&dir.join(filename), value)
}

/// Write settings as pretty JSON to an explicit path
pub fn save_json_file<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(value).context("Failed to serialize settings")?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write settings to {}", path.display()))
}
