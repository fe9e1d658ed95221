use std::io;
use std::str::Utf8Error;
use thiserror::Error;
use btleplug;
use buttplug::client::ButtplugClientError;
use serde_json;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to determine path to settings file")]
    NoConfigPath,

    #[error("Failed to acquire file lock on settings file: {source}")]
    CanNotLock { source: io::Error },

    #[error("Failed to encode/decode settings as utf-8: {source}")]
    Utf8Error { #[from] source: Utf8Error },

    #[error("Failed to read/write settings file: {source}")]
    IOError { #[from] source: io::Error },

    #[error("Failed to parse/build settings file: {source}")]
    JsonError { #[from] source: serde_json::Error },
}

impl ConfigError {
    pub fn is_file_not_found_error(&self) -> bool {
        match self {
            ConfigError::IOError { source } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Error communicating with device (btleplug): {source}")]
    Btle { #[from] source: btleplug::Error },

    #[error("Error communicating with buttplug server: {source}")]
    Buttplug { #[from] source: ButtplugClientError },

    #[error("No bluetooth adapter is available")]
    NoAdapter,

    #[error("A required bluetooth characteristic is not available")]
    MissingCharacteristic,

    #[error("Device '{0}' is not known to the transport")]
    UnknownDevice(String),

    #[error("Device '{0}' did not acknowledge the command in time")]
    Deadline(String),

    #[error("Device '{device}' rejected the command: {reason}")]
    Rejected { device: String, reason: String },

    #[error("The transport is not connected")]
    NotConnected,
}

/// Failure taxonomy of the control engine. None of these are fatal; the host sees them as
/// `false`/empty results or as `CommandFailed`/`Error` events.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("The device backend is unavailable: {source}")]
    TransportUnavailable { #[from] source: DeviceError },

    #[error("device is unknown")]
    DeviceUnknown(String),

    #[error("device is disabled")]
    DeviceDisabled(String),

    #[error("device is not connected")]
    DeviceDisconnected(String),

    #[error("command rejected: {0}")]
    CommandRejected(String),

    #[error("Failed to persist settings: {source}")]
    PersistenceFailure { #[from] source: ConfigError },

    #[error("The session has been closed")]
    Closed,

    #[error("Failed to start the async runtime: {source}")]
    Runtime { source: io::Error },
}

#[derive(Error, Debug)]
pub enum AppRunError {
    #[error("Failed to start (bridge): {source}")]
    Bridge { #[from] source: BridgeError },

    #[error("Failed to start (settings): {source}")]
    ConfigError { #[from] source: ConfigError },
}
