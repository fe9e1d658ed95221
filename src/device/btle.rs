use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use async_trait::async_trait;
use btleplug::api::{BDAddr, Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::spawn;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;

use crate::device::constants::{is_lovense_tx_uuid, lovense_vibrate_command, LOVENSE_NAME_PREFIX, PERIPHERAL_CONNECT_DEADLINE};
use crate::device::transport::{Transport, TransportEvent, TransportEvents};
use crate::device::types::Capability;
use crate::error::DeviceError;

#[derive(Clone)]
struct BtleDevice {
    id: PeripheralId,
    peripheral: Peripheral,
    tx_char: Characteristic,
}

#[derive(Default)]
struct Peripherals {
    ready: HashMap<String, BtleDevice>,
    // peripherals we are currently connecting to, so repeated advertisements are ignored
    pending: HashSet<PeripheralId>,
}

struct BtleSession {
    adapters: Vec<Adapter>,
    events: UnboundedSender<TransportEvent>,
    cancel: CancellationToken,
}

/// Bluetooth LE transport for Lovense toys, running in-process on top of btleplug.
#[derive(Default)]
pub struct BtleTransport {
    session: Mutex<Option<BtleSession>>,
    peripherals: Arc<Mutex<Peripherals>>,
}

fn lock_peripherals(peripherals: &Mutex<Peripherals>) -> MutexGuard<'_, Peripherals> {
    peripherals.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl BtleTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn session(&self) -> MutexGuard<'_, Option<BtleSession>> {
        self.session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn adapters(&self) -> Result<(Vec<Adapter>, UnboundedSender<TransportEvent>), DeviceError> {
        match self.session().as_ref() {
            Some(session) => Ok((session.adapters.clone(), session.events.clone())),
            None => Err(DeviceError::NotConnected),
        }
    }

    fn device(&self, name: &str) -> Result<BtleDevice, DeviceError> {
        lock_peripherals(&self.peripherals)
            .ready
            .get(name)
            .cloned()
            .ok_or_else(|| DeviceError::UnknownDevice(name.to_string()))
    }

    async fn write(&self, name: &str, data: &[u8]) -> Result<(), DeviceError> {
        let device = self.device(name)?;
        let write_type = if device.tx_char.properties.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE) {
            WriteType::WithoutResponse
        } else {
            WriteType::WithResponse
        };

        device.peripheral.write(&device.tx_char, data, write_type).await?;
        Ok(())
    }
}

async fn connect_peripheral(peripheral: &Peripheral) -> Result<Characteristic, DeviceError> {
    info!("Connecting to peripheral...");
    peripheral.connect().await?;

    info!("Connected; Discovering services...");
    peripheral.discover_services().await?;

    for characteristic in peripheral.characteristics() {
        if !is_lovense_tx_uuid(&characteristic.uuid) {
            continue;
        }

        if characteristic.properties.intersects(CharPropFlags::WRITE | CharPropFlags::WRITE_WITHOUT_RESPONSE) {
            info!("Using characteristic {:?} {:?}", characteristic.service_uuid, characteristic.uuid);
            return Ok(characteristic);
        }
    }

    Err(DeviceError::MissingCharacteristic)
}

async fn identify_peripheral(peripheral: &Peripheral, peripherals: &Mutex<Peripherals>) -> Option<String> {
    let properties = match peripheral.properties().await {
        Err(err) => {
            warn!("Could not query peripheral for properties: {:?}", err);
            return None;
        },
        Ok(None) => {
            debug!("Peripheral has no properties");
            return None;
        },
        Ok(Some(properties)) => properties,
    };

    let peripherals = lock_peripherals(peripherals);
    let id = peripheral.id();
    if peripherals.pending.contains(&id) || peripherals.ready.values().any(|d| d.id == id) {
        return None;
    }

    lovense_device_name(properties.local_name, properties.address, |name| peripherals.ready.contains_key(name))
}

// None until the advertisement carries a Lovense local name; the same peripheral is looked at
// again on every update
fn lovense_device_name<F>(local_name: Option<String>, address: BDAddr, is_taken: F) -> Option<String>
where
    F: Fn(&str) -> bool,
{
    let local_name = local_name?;
    if !local_name.starts_with(LOVENSE_NAME_PREFIX) {
        return None;
    }

    // two toys of the same model advertise the same name
    if is_taken(&local_name) {
        return Some(format!("{} {}", local_name, address));
    }
    Some(local_name)
}

fn connect_peripheral_task(
    name: String,
    peripheral: Peripheral,
    peripherals: Arc<Mutex<Peripherals>>,
    events: UnboundedSender<TransportEvent>,
) {
    let id = peripheral.id();
    lock_peripherals(&peripherals).pending.insert(id.clone());

    let _ = events.unbounded_send(TransportEvent::DeviceFound {
        name: name.clone(),
        capabilities: vec![Capability::Vibrate],
    });

    spawn(async move {
        let result = timeout(
            Duration::from_millis(PERIPHERAL_CONNECT_DEADLINE),
            connect_peripheral(&peripheral),
        ).await;

        let mut shared = lock_peripherals(&peripherals);
        shared.pending.remove(&id);

        let event = match result {
            Ok(Ok(tx_char)) => {
                info!("Peripheral '{}' ready", name);
                shared.ready.insert(name.clone(), BtleDevice { id, peripheral, tx_char });
                TransportEvent::DeviceReady(name)
            },
            Ok(Err(err)) => {
                warn!("Connecting to peripheral '{}' failed: {:?}", name, err);
                TransportEvent::DeviceFailed { name, reason: err.to_string() }
            },
            Err(_) => {
                warn!("Connecting to peripheral '{}' took too long", name);
                TransportEvent::DeviceFailed { name, reason: String::from("connection deadline exceeded") }
            },
        };
        let _ = events.unbounded_send(event);
    });
}

async fn watch_adapter(
    cancel: CancellationToken,
    adapter: Adapter,
    peripherals: Arc<Mutex<Peripherals>>,
    events: UnboundedSender<TransportEvent>,
) -> Result<(), DeviceError> {
    let mut central_events = adapter.events().await?;

    'mainloop: loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break 'mainloop;
            },
            event = central_events.next() => match event {
                None => break 'mainloop,
                // the local name often only comes with a later scan response
                Some(CentralEvent::DeviceDiscovered(id)) | Some(CentralEvent::DeviceUpdated(id)) => {
                    let peripheral = match adapter.peripheral(&id).await {
                        Ok(p) => p,
                        Err(err) => {
                            warn!("Failed to look up discovered peripheral: {}", err);
                            continue;
                        },
                    };

                    if let Some(name) = identify_peripheral(&peripheral, &peripherals).await {
                        connect_peripheral_task(name, peripheral, peripherals.clone(), events.clone());
                    }
                },
                Some(CentralEvent::DeviceDisconnected(id)) => {
                    let lost = {
                        let mut shared = lock_peripherals(&peripherals);
                        let name = shared.ready.iter().find(|(_, d)| d.id == id).map(|(n, _)| n.clone());
                        if let Some(name) = &name {
                            shared.ready.remove(name);
                        }
                        name
                    };

                    if let Some(name) = lost {
                        warn!("Connection to '{}' lost", name);
                        let _ = events.unbounded_send(TransportEvent::DeviceLost(name));
                    }
                },
                Some(_) => {},
            },
        }
    }

    Ok(())
}

#[async_trait]
impl Transport for BtleTransport {
    fn name(&self) -> &str {
        "bluetooth-le"
    }

    async fn connect(&self) -> Result<TransportEvents, DeviceError> {
        let manager = Manager::new().await?;
        let adapters = manager.adapters().await?;
        if adapters.is_empty() {
            return Err(DeviceError::NoAdapter);
        }

        let cancel = CancellationToken::new();
        let (sender, receiver) = unbounded();

        for adapter in &adapters {
            let cancel = cancel.clone();
            let adapter = adapter.clone();
            let peripherals = self.peripherals.clone();
            let events = sender.clone();

            spawn(async move {
                if let Err(err) = watch_adapter(cancel, adapter, peripherals, events.clone()).await {
                    warn!("Watching adapter failed: {:?}", err);
                    let _ = events.unbounded_send(TransportEvent::Error(err.to_string()));
                }
            });
        }

        *self.session() = Some(BtleSession { adapters, events: sender, cancel });
        Ok(receiver)
    }

    async fn start_scanning(&self) -> Result<(), DeviceError> {
        let (adapters, _) = self.adapters()?;

        for adapter in &adapters {
            info!("Scanning using adapter {}...", adapter.adapter_info().await.unwrap_or("UNKNOWN".to_string()));
            if let Err(err) = adapter.start_scan(ScanFilter::default()).await {
                if let btleplug::Error::PermissionDenied = err {
                    warn!("Scanning is not permitted; bluetooth access has to be granted to this application");
                }
                return Err(err.into());
            }
        }
        Ok(())
    }

    async fn stop_scanning(&self) -> Result<(), DeviceError> {
        let (adapters, events) = self.adapters()?;

        for adapter in &adapters {
            adapter.stop_scan().await?;
        }
        let _ = events.unbounded_send(TransportEvent::ScanFinished);
        Ok(())
    }

    async fn vibrate(&self, device: &str, speed: f64) -> Result<(), DeviceError> {
        self.write(device, &lovense_vibrate_command(speed)).await
    }

    async fn stop(&self, device: &str) -> Result<(), DeviceError> {
        self.write(device, &lovense_vibrate_command(0.0)).await
    }

    async fn disconnect(&self) -> Result<(), DeviceError> {
        let session = self.session().take();
        let Some(session) = session else {
            return Ok(());
        };
        session.cancel.cancel();

        for adapter in &session.adapters {
            if let Err(err) = adapter.stop_scan().await {
                debug!("Stopping scan on disconnect failed: {:?}", err);
            }
        }

        let devices: Vec<BtleDevice> = {
            let mut shared = lock_peripherals(&self.peripherals);
            shared.pending.clear();
            shared.ready.drain().map(|(_, d)| d).collect()
        };

        for device in devices {
            if let Err(err) = device.peripheral.disconnect().await {
                warn!("Failed to disconnect peripheral: {:?}", err);
            }
        }
        info!("Bluetooth transport disconnected");
        Ok(())
    }
}
