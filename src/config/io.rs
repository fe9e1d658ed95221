use std::env::current_exe;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::str;
use directories_next::ProjectDirs;
use fd_lock::RwLock;
use log::{info, warn};
use serde_json;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::config::types::Settings;
use crate::error::ConfigError;

// creates a path to haptic-bridge.json next to the host executable, so that a portable install
// can carry its own settings
fn get_portable_settings_path() -> Option<PathBuf> {
    match current_exe() {
        Ok(path) => Some(path.with_file_name("haptic-bridge.json")),
        Err(err) => {
            warn!("failed to get current exe path: {:?}", err);
            None
        },
    }
}

// creates a path to haptic-bridge.json in an os dependent standard directory, such as %AppData% on
// windows.
fn get_local_settings_path() -> Option<PathBuf> {
    ProjectDirs::from("io", "haptic-bridge", "haptic-bridge").map(|dirs| {
        dirs.config_dir().join("haptic-bridge.json")
    })
}

fn get_settings_path() -> Result<PathBuf, ConfigError> {
    if let Some(path) = get_portable_settings_path() {
        if let Ok(attr) = std::fs::metadata(&path) {
            if attr.is_file() {
                return Ok(path);
            }
        }
    }

    match get_local_settings_path() {
        None => Err(ConfigError::NoConfigPath),
        Some(path) => Ok(path),
    }
}

/// Durable medium of the settings store: one JSON file.
#[derive(Debug, Clone)]
pub struct SettingsIO {
    path: PathBuf,
}

impl SettingsIO {
    /// Uses the portable settings file if one exists, the per-user config directory otherwise.
    pub fn new() -> Result<Self, ConfigError> {
        let path = get_settings_path()?;
        Ok(Self::at_path(path))
    }

    pub fn at_path<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        info!("Using settings file {}", path.to_string_lossy());
        SettingsIO { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn read(&self) -> Result<Settings, ConfigError> {
        let mut file = File::open(&self.path).await?;
        info!("Reading settings file");

        let mut content = vec![];
        file.read_to_end(&mut content).await?;

        if content.is_empty() {
            return Ok(Settings::default());
        }

        let content = str::from_utf8(&content)?;

        let mut settings: Settings = serde_json::from_str(content)?;
        settings.normalize();
        Ok(settings)
    }

    /// Replaces the file content with `settings`. Holds an exclusive lock on the file while
    /// writing, so two processes never interleave their writes.
    pub async fn save(&self, settings: &Settings) -> Result<(), ConfigError> {
        if let Some(directory) = self.path.parent() {
            tokio::fs::create_dir_all(directory).await?;
        }

        let std_file = OpenOptions::new()
            .read(true)
            .write(true)
            .truncate(false)
            .append(false)
            .create(true)
            .open(&self.path)?;

        let mut lock = RwLock::new(std_file);
        let guard = match lock.try_write() {
            Ok(guard) => guard,
            Err(source) => return Err(ConfigError::CanNotLock { source }),
        };
        let mut file = File::from_std(guard.try_clone()?);
        info!("Saving settings");

        let content = serde_json::to_string_pretty(settings)?;
        file.rewind().await?;
        file.set_len(0).await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        file.sync_all().await?;

        drop(guard);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_is_reported_as_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let io = SettingsIO::at_path(dir.path().join("missing.json"));

        let err = io.read().await.unwrap_err();
        assert!(err.is_file_not_found_error());
    }

    #[tokio::test]
    async fn empty_file_reads_as_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.json");
        std::fs::write(&path, b"").unwrap();

        let settings = SettingsIO::at_path(&path).read().await.unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[tokio::test]
    async fn save_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let io = SettingsIO::at_path(dir.path().join("nested").join("settings.json"));

        let mut settings = Settings::default();
        settings.set_enabled("Lovense Edge", false);
        settings.set_events("Lovense Edge", vec![String::from("Orgasm")]);
        io.save(&settings).await.unwrap();

        // a shorter second write must not leave trailing bytes of the first
        let mut shorter = Settings::default();
        shorter.set_enabled("a", true);
        io.save(&shorter).await.unwrap();
        io.save(&settings).await.unwrap();

        let loaded = io.read().await.unwrap();
        assert!(!loaded.is_enabled("Lovense Edge"));
        assert_eq!(loaded.get_events("Lovense Edge"), vec![String::from("orgasm")]);
    }

    #[tokio::test]
    async fn malformed_file_is_a_json_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, b"{ not json").unwrap();

        let err = SettingsIO::at_path(&path).read().await.unwrap_err();
        assert!(matches!(err, ConfigError::JsonError { .. }));
    }
}
