use futures::StreamExt;
use log::{debug, error, info, warn};
use tokio::spawn;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};

use crate::device::constants::CONNECT_DEADLINE;
use crate::device::transport::{TransportEvent, TransportEvents};
use crate::device::types::DeviceStatus;
use crate::error::DeviceError;
use crate::event::types::EventKind;
use crate::session::Session;

/// Owns the lifecycle of the backend session: connect, scan, stop-scan and disconnect, and
/// turns the transport's device signals into registry updates and host events.
#[derive(Clone)]
pub struct Connector {
    session: Session,
}

impl Connector {
    pub fn new(session: Session) -> Self {
        Connector { session }
    }

    /// Connects the transport and starts forwarding its signals. The returned task ends when
    /// the session is cancelled or the transport closes its event stream.
    pub async fn connect(&self) -> Result<JoinHandle<()>, DeviceError> {
        let transport = self.session.transport.clone();
        info!("Connecting transport {}", transport.name());

        let events = match timeout(Duration::from_millis(CONNECT_DEADLINE), transport.connect()).await {
            Ok(result) => result?,
            Err(_) => return Err(DeviceError::Deadline(transport.name().to_string())),
        };

        info!("Transport {} connected", transport.name());
        Ok(spawn(forward_transport_events(self.session.clone(), events)))
    }

    /// `ScanStarted` precedes every device signal of this scan. A scan the transport refuses is
    /// reported as `Error` followed by `ScanEnded`.
    pub async fn start_scan(&self) -> bool {
        info!("Starting scan");
        self.session.events.send(EventKind::ScanStarted);
        match self.session.transport.start_scanning().await {
            Ok(_) => true,
            Err(err) => {
                error!("Failed to start scan: {:?}", err);
                self.session.events.error(format!("Scan failed: {}", err));
                self.session.events.send(EventKind::ScanEnded);
                false
            },
        }
    }

    /// The matching `ScanEnded` event is produced when the transport reports the scan as
    /// finished, not here.
    pub async fn stop_scan(&self) -> bool {
        info!("Stopping scan");
        match self.session.transport.stop_scanning().await {
            Ok(_) => true,
            Err(err) => {
                error!("Failed to stop scan: {:?}", err);
                self.session.events.error(format!("Stopping scan failed: {}", err));
                false
            },
        }
    }

    pub async fn close(&self) {
        info!("Disconnecting transport {}", self.session.transport.name());
        if let Err(err) = self.session.transport.disconnect().await {
            warn!("Disconnecting transport failed: {:?}", err);
        }
    }
}

async fn forward_transport_events(session: Session, mut events: TransportEvents) {
    'mainloop: loop {
        tokio::select! {
            _ = session.cancel.cancelled() => {
                break 'mainloop;
            },
            event = events.next() => match event {
                Some(event) => apply_transport_event(&session, event),
                None => {
                    debug!("Transport event stream ended");
                    break 'mainloop;
                },
            },
        }
    }
}

// a device leaves the registry on every path that ends in Disconnected. Returns true if the
// host had been told the device is connected; a device in Error got there from Connected.
fn drop_device(session: &Session, name: &str) -> bool {
    let Some(device) = session.registry.get(name) else {
        return false;
    };

    if device.status == DeviceStatus::Connecting {
        session.registry.set_status(name, DeviceStatus::Error);
    }
    session.registry.set_status(name, DeviceStatus::Disconnected);
    session.registry.remove(name);
    matches!(device.status, DeviceStatus::Connected | DeviceStatus::Error)
}

pub(crate) fn apply_transport_event(session: &Session, event: TransportEvent) {
    match event {
        TransportEvent::DeviceFound { name, capabilities } => {
            let enabled = session.settings.get_enabled(&name);
            info!("Found device '{}' {:?} enabled={}", name, capabilities, enabled);
            session.registry.insert_discovered(&name, capabilities, enabled);
        },
        TransportEvent::DeviceReady(name) => {
            if session.registry.get(&name).is_none() {
                warn!("Transport reported unannounced device '{}' as ready", name);
                let enabled = session.settings.get_enabled(&name);
                session.registry.insert_discovered(&name, vec![], enabled);
            }

            match session.registry.set_status(&name, DeviceStatus::Connected) {
                Some(DeviceStatus::Connected) => {},
                Some(_) => {
                    info!("Device '{}' connected", name);
                    session.events.send(EventKind::DeviceConnected { device: name });
                },
                None => warn!("Device '{}' can not become connected", name),
            }
        },
        TransportEvent::DeviceFailed { name, reason } => {
            warn!("Device '{}' failed to connect: {}", name, reason);
            let was_connected = drop_device(session, &name);
            session.events.error(format!("Connecting to '{}' failed: {}", name, reason));
            if was_connected {
                session.events.send(EventKind::DeviceDisconnected { device: name });
            }
        },
        TransportEvent::DeviceLost(name) => {
            if drop_device(session, &name) {
                info!("Device '{}' disconnected", name);
                session.events.send(EventKind::DeviceDisconnected { device: name });
            }
        },
        TransportEvent::ScanFinished => {
            session.events.send(EventKind::ScanEnded);
        },
        TransportEvent::Error(message) => {
            error!("Transport error: {}", message);
            session.events.error(message);
        },
    }
}
