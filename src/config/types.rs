use serde::{Deserialize, Serialize};

use crate::command::scope::sanitize_tags;
use crate::device::constants::DEFAULT_ENABLED;

fn default_enabled() -> bool {
    DEFAULT_ENABLED
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSettings {
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub events: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Enabled flag of identities without an entry.
    #[serde(default = "default_enabled")]
    pub default_enabled: bool,
    #[serde(default)]
    pub devices: Vec<DeviceSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            default_enabled: DEFAULT_ENABLED,
            devices: vec![],
        }
    }
}

impl Settings {
    fn entry(&self, name: &str) -> Option<&DeviceSettings> {
        self.devices.iter().find(|d| d.name == name)
    }

    fn entry_mut(&mut self, name: &str) -> &mut DeviceSettings {
        let position = match self.devices.iter().position(|d| d.name == name) {
            Some(position) => position,
            None => {
                self.devices.push(DeviceSettings {
                    name: name.to_string(),
                    enabled: self.default_enabled,
                    events: vec![],
                });
                self.devices.len() - 1
            },
        };

        &mut self.devices[position]
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.entry(name).map(|d| d.enabled).unwrap_or(self.default_enabled)
    }

    pub fn set_enabled(&mut self, name: &str, enabled: bool) {
        self.entry_mut(name).enabled = enabled;
    }

    pub fn get_events(&self, name: &str) -> Vec<String> {
        self.entry(name).map(|d| d.events.clone()).unwrap_or_default()
    }

    /// Stores the tags trimmed and lower-cased, the same way requested tags are normalized.
    pub fn set_events(&mut self, name: &str, events: Vec<String>) {
        self.entry_mut(name).events = sanitize_tags(events);
    }

    pub fn device_names(&self) -> impl Iterator<Item = &str> {
        self.devices.iter().map(|d| d.name.as_str())
    }

    pub fn normalize(&mut self) {
        for device in &mut self.devices {
            device.events = sanitize_tags(std::mem::take(&mut device.events));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_device_uses_default() {
        let mut settings = Settings::default();
        assert_eq!(settings.is_enabled("never seen"), DEFAULT_ENABLED);

        settings.default_enabled = false;
        assert!(!settings.is_enabled("never seen"));
    }

    #[test]
    fn set_enabled_creates_entry_once() {
        let mut settings = Settings::default();
        settings.set_enabled("vib1", false);
        settings.set_enabled("vib1", true);
        settings.set_enabled("vib2", false);

        assert_eq!(settings.devices.len(), 2);
        assert!(settings.is_enabled("vib1"));
        assert!(!settings.is_enabled("vib2"));
    }

    #[test]
    fn events_are_trimmed_and_lowercased() {
        let mut settings = Settings::default();
        settings.set_events("vib1", vec![String::from(" SoMe EvEnT    "), String::from("")]);

        assert_eq!(settings.get_events("vib1"), vec![String::from("some event")]);
        assert!(settings.get_events("vib2").is_empty());
    }

    #[test]
    fn parses_partial_json() {
        let settings: Settings = serde_json::from_str(r#"{"devices":[{"name":"vib1","enabled":false}]}"#).unwrap();

        assert!(settings.default_enabled);
        assert!(!settings.is_enabled("vib1"));
        assert!(settings.get_events("vib1").is_empty());
    }
}
