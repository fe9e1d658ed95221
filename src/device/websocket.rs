use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use async_trait::async_trait;
use buttplug::client::{ButtplugClient, ButtplugClientDevice, ButtplugClientEvent, ScalarValueCommand};
use buttplug::core::connector::new_json_ws_client_connector;
use buttplug::core::message::ActuatorType;
use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::{Stream, StreamExt};
use log::{info, warn};
use tokio::spawn;
use tokio_util::sync::CancellationToken;

use crate::device::transport::{Transport, TransportEvent, TransportEvents};
use crate::device::types::Capability;
use crate::error::DeviceError;

const CLIENT_NAME: &str = "haptic-bridge";

struct ButtplugSession {
    client: Arc<ButtplugClient>,
    cancel: CancellationToken,
}

type Devices = Arc<Mutex<HashMap<String, Arc<ButtplugClientDevice>>>>;

/// Transport that talks to a buttplug server (such as Intiface Central) over a websocket.
/// The server owns the hardware; this side only forwards commands.
pub struct ButtplugTransport {
    uri: String,
    session: Mutex<Option<ButtplugSession>>,
    devices: Devices,
}

fn lock_devices(devices: &Mutex<HashMap<String, Arc<ButtplugClientDevice>>>) -> MutexGuard<'_, HashMap<String, Arc<ButtplugClientDevice>>> {
    devices.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// "127.0.0.1:12345" and "ws://127.0.0.1:12345" both address the same server.
pub fn websocket_uri(address: &str) -> String {
    if address.contains("://") {
        address.to_string()
    } else {
        format!("ws://{}", address)
    }
}

fn capability_of(actuator: ActuatorType) -> Option<Capability> {
    match actuator {
        ActuatorType::Vibrate => Some(Capability::Vibrate),
        ActuatorType::Rotate => Some(Capability::Rotate),
        ActuatorType::Oscillate => Some(Capability::Oscillate),
        ActuatorType::Constrict => Some(Capability::Constrict),
        ActuatorType::Inflate => Some(Capability::Inflate),
        ActuatorType::Position => Some(Capability::Position),
        _ => None,
    }
}

/// Scalar actuators map one to one; linear actuators move to a position and rotate actuators
/// spin. Each capability is listed once, in the order it was first seen.
fn capabilities_of(scalar: &[ActuatorType], linear: usize, rotate: usize) -> Vec<Capability> {
    let mut capabilities = Vec::new();
    let mut push = |capability: Capability| {
        if !capabilities.contains(&capability) {
            capabilities.push(capability);
        }
    };

    for actuator in scalar {
        if let Some(capability) = capability_of(*actuator) {
            push(capability);
        }
    }
    if linear > 0 {
        push(Capability::Position);
    }
    if rotate > 0 {
        push(Capability::Rotate);
    }
    capabilities
}

fn device_capabilities(device: &ButtplugClientDevice) -> Vec<Capability> {
    let attributes = device.message_attributes();
    let scalar: Vec<ActuatorType> = match attributes.scalar_cmd() {
        Some(scalar) => scalar.iter().map(|a| *a.actuator_type()).collect(),
        None => Vec::new(),
    };
    let linear = attributes.linear_cmd().as_ref().map_or(0, |l| l.len());
    let rotate = attributes.rotate_cmd().as_ref().map_or(0, |r| r.len());

    capabilities_of(&scalar, linear, rotate)
}

fn added_device_name(devices: &HashMap<String, Arc<ButtplugClientDevice>>, device: &ButtplugClientDevice) -> String {
    let name = device.name().to_string();
    // the server may expose two toys of the same model
    if devices.contains_key(&name) {
        return format!("{} {}", name, device.index());
    }
    name
}

async fn forward_events<S>(cancel: CancellationToken, mut client_events: S, devices: Devices, events: UnboundedSender<TransportEvent>)
where
    S: Stream<Item = ButtplugClientEvent> + Unpin,
{
    'mainloop: loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break 'mainloop;
            },
            event = client_events.next() => match event {
                None => break 'mainloop,
                Some(ButtplugClientEvent::DeviceAdded(device)) => {
                    let capabilities = device_capabilities(&device);
                    let name = {
                        let mut shared = lock_devices(&devices);
                        if shared.values().any(|d| d.index() == device.index()) {
                            continue;
                        }
                        let name = added_device_name(&shared, &device);
                        shared.insert(name.clone(), device);
                        name
                    };

                    info!("Device '{}' added with {:?}", name, capabilities);
                    let _ = events.unbounded_send(TransportEvent::DeviceFound { name: name.clone(), capabilities });
                    let _ = events.unbounded_send(TransportEvent::DeviceReady(name));
                },
                Some(ButtplugClientEvent::DeviceRemoved(device)) => {
                    let lost = {
                        let mut shared = lock_devices(&devices);
                        let name = shared.iter().find(|(_, d)| d.index() == device.index()).map(|(n, _)| n.clone());
                        if let Some(name) = &name {
                            shared.remove(name);
                        }
                        name
                    };

                    if let Some(name) = lost {
                        warn!("Device '{}' removed", name);
                        let _ = events.unbounded_send(TransportEvent::DeviceLost(name));
                    }
                },
                Some(ButtplugClientEvent::ScanningFinished) => {
                    let _ = events.unbounded_send(TransportEvent::ScanFinished);
                },
                Some(ButtplugClientEvent::ServerDisconnect) => {
                    warn!("Buttplug server disconnected");
                    let _ = events.unbounded_send(TransportEvent::Error(String::from("server disconnected")));
                    break 'mainloop;
                },
                Some(ButtplugClientEvent::Error(err)) => {
                    warn!("Buttplug server reported an error: {}", err);
                    let _ = events.unbounded_send(TransportEvent::Error(err.to_string()));
                },
                Some(_) => {},
            },
        }
    }
}

impl ButtplugTransport {
    pub fn new(address: &str) -> Self {
        Self {
            uri: websocket_uri(address),
            session: Mutex::new(None),
            devices: Arc::default(),
        }
    }

    fn session(&self) -> MutexGuard<'_, Option<ButtplugSession>> {
        self.session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn client(&self) -> Result<Arc<ButtplugClient>, DeviceError> {
        match self.session().as_ref() {
            Some(session) => Ok(session.client.clone()),
            None => Err(DeviceError::NotConnected),
        }
    }

    fn device(&self, name: &str) -> Result<Arc<ButtplugClientDevice>, DeviceError> {
        lock_devices(&self.devices)
            .get(name)
            .cloned()
            .ok_or_else(|| DeviceError::UnknownDevice(name.to_string()))
    }
}

#[async_trait]
impl Transport for ButtplugTransport {
    fn name(&self) -> &str {
        "buttplug-websocket"
    }

    async fn connect(&self) -> Result<TransportEvents, DeviceError> {
        info!("Connecting to buttplug server at {}...", self.uri);
        let client = Arc::new(ButtplugClient::new(CLIENT_NAME));
        // subscribe first, the server announces already known devices right after the handshake
        let client_events = Box::pin(client.event_stream());
        client.connect(new_json_ws_client_connector(&self.uri)).await?;
        info!("Connected to buttplug server");

        let cancel = CancellationToken::new();
        let (sender, receiver) = unbounded();
        spawn(forward_events(cancel.clone(), client_events, self.devices.clone(), sender));

        *self.session() = Some(ButtplugSession { client, cancel });
        Ok(receiver)
    }

    async fn start_scanning(&self) -> Result<(), DeviceError> {
        self.client()?.start_scanning().await?;
        Ok(())
    }

    async fn stop_scanning(&self) -> Result<(), DeviceError> {
        // the server answers with ScanningFinished
        self.client()?.stop_scanning().await?;
        Ok(())
    }

    async fn vibrate(&self, device: &str, speed: f64) -> Result<(), DeviceError> {
        let target = self.device(device)?;
        target.vibrate(&ScalarValueCommand::ScalarValue(speed.clamp(0.0, 1.0))).await?;
        Ok(())
    }

    async fn stop(&self, device: &str) -> Result<(), DeviceError> {
        self.device(device)?.stop().await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), DeviceError> {
        let session = self.session().take();
        let Some(session) = session else {
            return Ok(());
        };
        session.cancel.cancel();
        lock_devices(&self.devices).clear();

        if let Err(err) = session.client.disconnect().await {
            warn!("Failed to disconnect from buttplug server: {:?}", err);
        }
        info!("Buttplug transport disconnected");
        Ok(())
    }
}
