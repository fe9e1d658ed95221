use std::time::Instant;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    Vibrate,
    Rotate,
    Oscillate,
    Constrict,
    Inflate,
    Position,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let result = match self {
            Capability::Vibrate => "Vibrate",
            Capability::Rotate => "Rotate",
            Capability::Oscillate => "Oscillate",
            Capability::Constrict => "Constrict",
            Capability::Inflate => "Inflate",
            Capability::Position => "Position",
        };

        write!(f, "{}", result)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl DeviceStatus {
    /// Allowed moves: Disconnected -> Connecting -> Connected -> Disconnected, and
    /// Connecting/Connected -> Error -> Disconnected. Staying in place is always allowed.
    pub fn can_transition_to(&self, next: DeviceStatus) -> bool {
        use DeviceStatus::*;

        if *self == next {
            return true;
        }

        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Error)
                | (Connected, Disconnected)
                | (Connected, Error)
                | (Error, Disconnected)
        )
    }
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let result = match self {
            DeviceStatus::Disconnected => "Disconnected",
            DeviceStatus::Connecting => "Connecting",
            DeviceStatus::Connected => "Connected",
            DeviceStatus::Error => "Error",
        };

        write!(f, "{}", result)
    }
}

/// Snapshot of a device as known to the registry. Handed out by value.
#[derive(Debug, Clone)]
pub struct Device {
    pub name: String,
    pub capabilities: Vec<Capability>,
    pub status: DeviceStatus,
    pub enabled: bool,
    pub last_command: Option<Instant>,
}

impl Device {
    pub fn new(name: &str, capabilities: Vec<Capability>, enabled: bool) -> Self {
        Device {
            name: name.to_string(),
            capabilities,
            status: DeviceStatus::Disconnected,
            enabled,
            last_command: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status == DeviceStatus::Connected
    }

    pub fn can_vibrate(&self) -> bool {
        self.capabilities.contains(&Capability::Vibrate)
    }

    pub fn vibration_actuators(&self) -> usize {
        self.capabilities.iter().filter(|c| **c == Capability::Vibrate).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use DeviceStatus::*;

    #[test]
    fn status_never_jumps_from_disconnected_to_connected() {
        assert!(!Disconnected.can_transition_to(Connected));
        assert!(!Disconnected.can_transition_to(Error));
        assert!(!Error.can_transition_to(Connected));
        assert!(!Error.can_transition_to(Connecting));
    }

    #[test]
    fn status_follows_lifecycle() {
        assert!(Disconnected.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Connected));
        assert!(Connected.can_transition_to(Disconnected));
        assert!(Connecting.can_transition_to(Error));
        assert!(Error.can_transition_to(Disconnected));
    }

    #[test]
    fn counts_vibration_actuators() {
        let device = Device::new("vib", vec![Capability::Vibrate, Capability::Rotate, Capability::Vibrate], true);
        assert_eq!(device.vibration_actuators(), 2);
        assert!(device.can_vibrate());
        assert!(!Device::new("lin", vec![Capability::Position], true).can_vibrate());
    }
}
