use async_trait::async_trait;
use futures::channel::mpsc::UnboundedReceiver;

use crate::device::types::Capability;
use crate::error::DeviceError;

/// Signals a transport reports about its devices. Device names are the identities used by the
/// registry.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A device was found and the transport started connecting to it.
    DeviceFound { name: String, capabilities: Vec<Capability> },
    /// A previously found device can now be commanded.
    DeviceReady(String),
    /// Connecting to a found device failed.
    DeviceFailed { name: String, reason: String },
    DeviceLost(String),
    ScanFinished,
    Error(String),
}

pub type TransportEvents = UnboundedReceiver<TransportEvent>;

/// The device backend. Implementations must be cheap to call concurrently: the dispatcher
/// drives every device from its own task.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    /// Establishes the backend session. The returned stream carries every device signal of
    /// this session and ends when the session is gone.
    async fn connect(&self) -> Result<TransportEvents, DeviceError>;

    async fn start_scanning(&self) -> Result<(), DeviceError>;

    /// Requests discovery to halt. Completion is reported through `TransportEvent::ScanFinished`.
    async fn stop_scanning(&self) -> Result<(), DeviceError>;

    /// `speed` is normalized to [0.0, 1.0]; the transport converts it to the device's own scale.
    async fn vibrate(&self, device: &str, speed: f64) -> Result<(), DeviceError>;

    async fn stop(&self, device: &str) -> Result<(), DeviceError>;

    async fn disconnect(&self) -> Result<(), DeviceError>;
}
