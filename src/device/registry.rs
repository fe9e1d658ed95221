use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;
use indexmap::IndexMap;
use log::{debug, warn};

use crate::device::types::{Capability, Device, DeviceStatus};

/// Authoritative table of known devices, in discovery order.
///
/// Readers get snapshots. Mutation is crate-internal and only driven by the connector
/// (discovery, status) and the settings store (enabled flag).
#[derive(Clone, Default)]
pub struct DeviceRegistry {
    devices: Arc<RwLock<IndexMap<String, Device>>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // a panic while holding the lock cannot leave a device half-updated, so poisoning is ignored
    fn read(&self) -> RwLockReadGuard<'_, IndexMap<String, Device>> {
        self.devices.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, IndexMap<String, Device>> {
        self.devices.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, name: &str) -> Option<Device> {
        self.read().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    pub fn capabilities(&self, name: &str) -> Vec<Capability> {
        self.read()
            .get(name)
            .map(|d| d.capabilities.clone())
            .unwrap_or_default()
    }

    pub fn is_connected(&self, name: &str) -> bool {
        self.read().get(name).map(|d| d.is_connected()).unwrap_or(false)
    }

    pub fn is_enabled(&self, name: &str) -> Option<bool> {
        self.read().get(name).map(|d| d.enabled)
    }

    pub fn connected(&self) -> Vec<Device> {
        self.read()
            .values()
            .filter(|d| d.is_connected())
            .cloned()
            .collect()
    }

    /// Devices a stop may still reach: connected ones, and ones downgraded to `Error` that may
    /// still be running their last command.
    pub fn stoppable(&self) -> Vec<Device> {
        self.read()
            .values()
            .filter(|d| matches!(d.status, DeviceStatus::Connected | DeviceStatus::Error))
            .cloned()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Registers a freshly discovered device in `Connecting` state. A device that is already
    /// known gets its capabilities refreshed and is moved back into `Connecting` if it was
    /// disconnected or errored.
    pub(crate) fn insert_discovered(&self, name: &str, capabilities: Vec<Capability>, enabled: bool) {
        let mut devices = self.write();

        match devices.get_mut(name) {
            Some(device) => {
                device.capabilities = capabilities;
                if device.status == DeviceStatus::Error {
                    device.status = DeviceStatus::Disconnected;
                }
                if device.status == DeviceStatus::Disconnected {
                    device.status = DeviceStatus::Connecting;
                }
            },
            None => {
                debug!("Registering device '{}' {:?}", name, capabilities);
                let mut device = Device::new(name, capabilities, enabled);
                device.status = DeviceStatus::Connecting;
                devices.insert(name.to_string(), device);
            },
        }
    }

    /// Moves a device to `next`. Returns the previous status, or `None` if the device is unknown
    /// or the move is not an allowed transition.
    pub(crate) fn set_status(&self, name: &str, next: DeviceStatus) -> Option<DeviceStatus> {
        let mut devices = self.write();
        let device = devices.get_mut(name)?;
        let previous = device.status;

        if !previous.can_transition_to(next) {
            warn!("Ignoring status change of '{}' from {} to {}", name, previous, next);
            return None;
        }

        device.status = next;
        Some(previous)
    }

    pub(crate) fn set_enabled(&self, name: &str, enabled: bool) {
        if let Some(device) = self.write().get_mut(name) {
            device.enabled = enabled;
        }
    }

    pub(crate) fn touch(&self, name: &str, at: Instant) {
        if let Some(device) = self.write().get_mut(name) {
            device.last_command = Some(at);
        }
    }

    pub(crate) fn remove(&self, name: &str) -> Option<Device> {
        self.write().shift_remove(name)
    }

    pub(crate) fn clear(&self) {
        self.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected_registry(name: &str) -> DeviceRegistry {
        let registry = DeviceRegistry::new();
        registry.insert_discovered(name, vec![Capability::Vibrate], true);
        registry.set_status(name, DeviceStatus::Connected);
        registry
    }

    #[test]
    fn discovered_device_is_connecting_until_ready() {
        let registry = DeviceRegistry::new();
        registry.insert_discovered("vib1", vec![Capability::Vibrate], true);

        assert_eq!(registry.get("vib1").unwrap().status, DeviceStatus::Connecting);
        assert!(!registry.is_connected("vib1"));

        assert_eq!(registry.set_status("vib1", DeviceStatus::Connected), Some(DeviceStatus::Connecting));
        assert!(registry.is_connected("vib1"));
    }

    #[test]
    fn rejects_invalid_transition() {
        let registry = connected_registry("vib1");
        registry.set_status("vib1", DeviceStatus::Disconnected);

        assert_eq!(registry.set_status("vib1", DeviceStatus::Connected), None);
        assert_eq!(registry.get("vib1").unwrap().status, DeviceStatus::Disconnected);
    }

    #[test]
    fn errored_device_can_be_rediscovered() {
        let registry = connected_registry("vib1");
        registry.set_status("vib1", DeviceStatus::Error);
        registry.insert_discovered("vib1", vec![Capability::Vibrate, Capability::Vibrate], true);

        let device = registry.get("vib1").unwrap();
        assert_eq!(device.status, DeviceStatus::Connecting);
        assert_eq!(device.vibration_actuators(), 2);
    }

    #[test]
    fn errored_devices_are_stoppable_but_not_connected() {
        let registry = connected_registry("vib1");
        registry.insert_discovered("vib2", vec![Capability::Vibrate], true);
        registry.set_status("vib1", DeviceStatus::Error);

        assert!(registry.connected().is_empty());
        let names: Vec<String> = registry.stoppable().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec![String::from("vib1")]);
    }

    #[test]
    fn snapshots_are_detached_from_the_registry() {
        let registry = connected_registry("vib1");
        let mut snapshot = registry.get("vib1").unwrap();
        snapshot.enabled = false;

        assert_eq!(registry.is_enabled("vib1"), Some(true));
    }

    #[test]
    fn unknown_device_queries_are_empty() {
        let registry = DeviceRegistry::new();
        assert!(registry.capabilities("nope").is_empty());
        assert!(!registry.is_connected("nope"));
        assert!(registry.get("nope").is_none());
    }

    #[test]
    fn keeps_discovery_order_and_clears() {
        let registry = DeviceRegistry::new();
        registry.insert_discovered("b", vec![], true);
        registry.insert_discovered("a", vec![], true);
        registry.insert_discovered("c", vec![], true);
        registry.remove("a");

        assert_eq!(registry.names(), vec!["b".to_string(), "c".to_string()]);
        registry.clear();
        assert!(registry.is_empty());
    }
}
