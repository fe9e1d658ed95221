use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use log::{error, info};

use crate::config::io::SettingsIO;
use crate::config::types::Settings;
use crate::error::ConfigError;

/// In-memory settings with an explicit durability step.
///
/// Setters only touch memory; `store()` writes the full mapping. Without an IO backend the
/// store is memory-only and `store()` succeeds without writing.
#[derive(Clone, Default)]
pub struct SettingsStore {
    settings: Arc<RwLock<Settings>>,
    io: Option<SettingsIO>,
}

impl SettingsStore {
    pub fn in_memory(settings: Settings) -> Self {
        SettingsStore { settings: Arc::new(RwLock::new(settings)), io: None }
    }

    /// Loads settings from `io`. A missing file is the first start; any other read error is
    /// logged and the defaults are used, so a broken file never prevents the bridge from working.
    pub async fn load(io: SettingsIO) -> Self {
        let settings = match io.read().await {
            Ok(settings) => settings,
            Err(err) => {
                if err.is_file_not_found_error() {
                    info!("Settings file not found, using defaults");
                } else {
                    error!("Failed to load settings: {:?}", &err);
                }
                Settings::default()
            },
        };

        SettingsStore { settings: Arc::new(RwLock::new(settings)), io: Some(io) }
    }

    fn read(&self) -> RwLockReadGuard<'_, Settings> {
        self.settings.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Settings> {
        self.settings.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get_enabled(&self, name: &str) -> bool {
        self.read().is_enabled(name)
    }

    pub fn set_enabled(&self, name: &str, enabled: bool) {
        self.write().set_enabled(name, enabled);
    }

    pub fn get_events(&self, name: &str) -> Vec<String> {
        self.read().get_events(name)
    }

    pub fn set_events(&self, name: &str, events: Vec<String>) {
        self.write().set_events(name, events);
    }

    pub fn device_names(&self) -> Vec<String> {
        self.read().device_names().map(String::from).collect()
    }

    pub fn snapshot(&self) -> Settings {
        self.read().clone()
    }

    pub fn io(&self) -> Option<&SettingsIO> {
        self.io.as_ref()
    }

    pub async fn store(&self) -> Result<(), ConfigError> {
        let Some(io) = &self.io else {
            return Ok(());
        };

        let snapshot = self.snapshot();
        io.save(&snapshot).await
    }
}
