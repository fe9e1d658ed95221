use serde::Serialize;

use crate::error::BridgeError;

/// Why a command did not reach a device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum CommandFailure {
    DeviceUnknown,
    DeviceDisabled,
    DeviceDisconnected,
    Rejected(String),
    Transport(String),
}

impl std::fmt::Display for CommandFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandFailure::DeviceUnknown => write!(f, "device is unknown"),
            CommandFailure::DeviceDisabled => write!(f, "device is disabled"),
            CommandFailure::DeviceDisconnected => write!(f, "device is not connected"),
            CommandFailure::Rejected(reason) => write!(f, "command rejected: {}", reason),
            CommandFailure::Transport(reason) => write!(f, "transport failure: {}", reason),
        }
    }
}

impl From<&BridgeError> for CommandFailure {
    fn from(error: &BridgeError) -> Self {
        match error {
            BridgeError::DeviceUnknown(_) => CommandFailure::DeviceUnknown,
            BridgeError::DeviceDisabled(_) => CommandFailure::DeviceDisabled,
            BridgeError::DeviceDisconnected(_) => CommandFailure::DeviceDisconnected,
            BridgeError::CommandRejected(reason) => CommandFailure::Rejected(reason.clone()),
            other => CommandFailure::Transport(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EventKind {
    DeviceConnected { device: String },
    DeviceDisconnected { device: String },
    ScanStarted,
    ScanEnded,
    DeviceVibrated { device: String, speed: f32, clamped: bool },
    DeviceStopped { device: String },
    CommandFailed { device: Option<String>, reason: CommandFailure },
    Error { message: String },
}

impl EventKind {
    pub fn device(&self) -> Option<&str> {
        match self {
            EventKind::DeviceConnected { device }
            | EventKind::DeviceDisconnected { device }
            | EventKind::DeviceVibrated { device, .. }
            | EventKind::DeviceStopped { device } => Some(device),
            EventKind::CommandFailed { device, .. } => device.as_deref(),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::DeviceConnected { device } => write!(f, "DeviceConnected '{}'", device),
            EventKind::DeviceDisconnected { device } => write!(f, "DeviceDisconnected '{}'", device),
            EventKind::ScanStarted => write!(f, "ScanStarted"),
            EventKind::ScanEnded => write!(f, "ScanEnded"),
            EventKind::DeviceVibrated { device, speed, clamped } => {
                write!(f, "DeviceVibrated '{}' speed={:.2} clamped={}", device, speed, clamped)
            },
            EventKind::DeviceStopped { device } => write!(f, "DeviceStopped '{}'", device),
            EventKind::CommandFailed { device: Some(device), reason } => {
                write!(f, "CommandFailed '{}': {}", device, reason)
            },
            EventKind::CommandFailed { device: None, reason } => write!(f, "CommandFailed: {}", reason),
            EventKind::Error { message } => write!(f, "Error: {}", message),
        }
    }
}

/// An event as delivered to the host. `sequence` increases by one per delivered event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub sequence: u64,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind)
    }
}
