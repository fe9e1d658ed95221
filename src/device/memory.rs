use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use async_trait::async_trait;
use futures::channel::mpsc::{unbounded, UnboundedSender};
use indexmap::IndexMap;
use log::{debug, info};

use crate::device::transport::{Transport, TransportEvent, TransportEvents};
use crate::device::types::Capability;
use crate::error::DeviceError;

/// A command as it reached a loopback device. Stops are recorded with speed 0.
#[derive(Debug, Clone)]
pub struct TransportCall {
    pub device: String,
    pub speed: f64,
    pub time: Instant,
}

impl TransportCall {
    pub fn is_stop(&self) -> bool {
        self.speed == 0.0
    }

    pub fn vibration_started_strength(&self, strength: f64) -> bool {
        (self.speed - strength).abs() < 0.0001
    }
}

#[derive(Debug, Clone)]
struct MemoryDevice {
    capabilities: Vec<Capability>,
    connectable: bool,
    failing: bool,
    announced: bool,
}

#[derive(Default)]
struct MemoryState {
    reachable: bool,
    scanning: bool,
    devices: IndexMap<String, MemoryDevice>,
    events: Option<UnboundedSender<TransportEvent>>,
    calls: Vec<TransportCall>,
    stop_delay: Duration,
}

impl MemoryState {
    fn emit(&self, event: TransportEvent) {
        if let Some(events) = &self.events {
            // a closed receiver means the session is gone
            let _ = events.unbounded_send(event);
        }
    }

    fn announce(&mut self, name: &str) {
        let device = match self.devices.get_mut(name) {
            Some(device) if !device.announced => device,
            _ => return,
        };
        device.announced = true;
        let device = device.clone();

        self.emit(TransportEvent::DeviceFound {
            name: name.to_string(),
            capabilities: device.capabilities.clone(),
        });

        if device.connectable {
            self.emit(TransportEvent::DeviceReady(name.to_string()));
        } else {
            self.emit(TransportEvent::DeviceFailed {
                name: name.to_string(),
                reason: String::from("device refused the connection"),
            });
        }
    }
}

/// Loopback transport: devices live in memory, every command is recorded.
///
/// Used by hosts that run without hardware and by the test-suite. Clones share state, so a
/// caller can keep a handle to inspect calls after giving the transport to a bridge.
#[derive(Clone)]
pub struct InMemoryTransport {
    state: Arc<Mutex<MemoryState>>,
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTransport {
    pub fn new() -> Self {
        let state = MemoryState { reachable: true, ..MemoryState::default() };
        InMemoryTransport { state: Arc::new(Mutex::new(state)) }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn with_device(self, name: &str, capabilities: Vec<Capability>) -> Self {
        self.add_device(name, capabilities);
        self
    }

    /// A device that is found by scanning but fails to connect.
    pub fn with_unconnectable_device(self, name: &str, capabilities: Vec<Capability>) -> Self {
        self.lock().devices.insert(name.to_string(), MemoryDevice {
            capabilities,
            connectable: false,
            failing: false,
            announced: false,
        });
        self
    }

    /// `connect()` fails as if the backend could not be reached.
    pub fn unreachable(self) -> Self {
        self.lock().reachable = false;
        self
    }

    /// Every stop takes `delay` before it reaches the device.
    pub fn with_slow_stop(self, delay: Duration) -> Self {
        self.lock().stop_delay = delay;
        self
    }

    /// Adds a device. It is announced right away if a scan is running.
    pub fn add_device(&self, name: &str, capabilities: Vec<Capability>) {
        let mut state = self.lock();
        state.devices.insert(name.to_string(), MemoryDevice {
            capabilities,
            connectable: true,
            failing: false,
            announced: false,
        });

        if state.scanning {
            state.announce(name);
        }
    }

    pub fn remove_device(&self, name: &str) {
        let mut state = self.lock();
        if let Some(device) = state.devices.shift_remove(name) {
            if device.announced {
                state.emit(TransportEvent::DeviceLost(name.to_string()));
            }
        }
    }

    /// Every following command to `name` fails.
    pub fn fail_device(&self, name: &str) {
        if let Some(device) = self.lock().devices.get_mut(name) {
            device.failing = true;
        }
    }

    /// Undoes `fail_device`.
    pub fn recover_device(&self, name: &str) {
        if let Some(device) = self.lock().devices.get_mut(name) {
            device.failing = false;
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.lock().scanning
    }

    pub fn is_connected(&self) -> bool {
        self.lock().events.is_some()
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.lock().calls.clone()
    }

    pub fn calls_for(&self, name: &str) -> Vec<TransportCall> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.device == name)
            .cloned()
            .collect()
    }

    fn record(&self, device: &str, speed: f64) -> Result<(), DeviceError> {
        let mut state = self.lock();

        if state.events.is_none() {
            return Err(DeviceError::NotConnected);
        }

        match state.devices.get(device) {
            Some(d) if d.announced && d.connectable => {
                if d.failing {
                    return Err(DeviceError::Rejected {
                        device: device.to_string(),
                        reason: String::from("simulated write failure"),
                    });
                }
            },
            _ => return Err(DeviceError::UnknownDevice(device.to_string())),
        }

        debug!("Loopback device '{}' speed={:.2}", device, speed);
        state.calls.push(TransportCall {
            device: device.to_string(),
            speed,
            time: Instant::now(),
        });
        Ok(())
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    fn name(&self) -> &str {
        "in-memory"
    }

    async fn connect(&self) -> Result<TransportEvents, DeviceError> {
        let mut state = self.lock();
        if !state.reachable {
            return Err(DeviceError::NotConnected);
        }

        info!("Loopback transport connected");
        let (sender, receiver) = unbounded();
        state.events = Some(sender);
        Ok(receiver)
    }

    async fn start_scanning(&self) -> Result<(), DeviceError> {
        let mut state = self.lock();
        if state.events.is_none() {
            return Err(DeviceError::NotConnected);
        }

        state.scanning = true;
        let names: Vec<String> = state.devices.keys().cloned().collect();
        for name in names {
            state.announce(&name);
        }
        Ok(())
    }

    async fn stop_scanning(&self) -> Result<(), DeviceError> {
        let mut state = self.lock();
        if state.events.is_none() {
            return Err(DeviceError::NotConnected);
        }

        state.scanning = false;
        state.emit(TransportEvent::ScanFinished);
        Ok(())
    }

    async fn vibrate(&self, device: &str, speed: f64) -> Result<(), DeviceError> {
        self.record(device, speed)
    }

    async fn stop(&self, device: &str) -> Result<(), DeviceError> {
        let delay = self.lock().stop_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.record(device, 0.0)
    }

    async fn disconnect(&self) -> Result<(), DeviceError> {
        let mut state = self.lock();
        state.scanning = false;
        state.events = None;
        for device in state.devices.values_mut() {
            device.announced = false;
        }
        info!("Loopback transport disconnected");
        Ok(())
    }
}
