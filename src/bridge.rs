use std::mem;
use std::sync::Arc;
use log::{debug, error, info, warn};
use tokio::runtime::{Builder, Runtime};
use tokio::spawn;
use tokio::sync::mpsc::{channel, Receiver, Sender};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;

use crate::command::dispatcher::Dispatcher;
use crate::command::scope::sanitize_tags;
use crate::command::types::{Command, CommandDuration, Scope};
use crate::config::io::SettingsIO;
use crate::config::store::SettingsStore;
use crate::config::types::Settings;
use crate::device::btle::BtleTransport;
use crate::device::connection::Connector;
use crate::device::constants::{ACTION_QUEUE_CAPACITY, CLOSE_DEADLINE, DISCONNECT_DEADLINE};
use crate::device::registry::DeviceRegistry;
use crate::device::transport::Transport;
use crate::device::websocket::ButtplugTransport;
use crate::error::BridgeError;
use crate::event::channel::{event_channel, EventReceiver};
use crate::event::types::Event;
use crate::session::Session;

#[derive(Debug)]
enum Request {
    Scan,
    StopScan,
    Command(Command),
    StopAll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninit,
    Active,
    Closed,
}

enum Lifecycle {
    Uninit,
    Active {
        requests: Sender<Request>,
        worker: JoinHandle<()>,
        connector: Connector,
    },
    Closed,
}

async fn run_worker(
    connector: Connector,
    mut dispatcher: Dispatcher,
    mut requests: Receiver<Request>,
    cancel: CancellationToken,
) {
    'mainloop: loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break 'mainloop;
            },
            request = requests.recv() => match request {
                // scan start/stop may take a while on real adapters; commands must not wait for it
                Some(Request::Scan) => {
                    let connector = connector.clone();
                    spawn(async move { connector.start_scan().await });
                },
                Some(Request::StopScan) => {
                    let connector = connector.clone();
                    spawn(async move { connector.stop_scan().await });
                },
                Some(Request::Command(command)) => {
                    dispatcher.dispatch(command);
                },
                Some(Request::StopAll) => {
                    dispatcher.stop_all();
                },
                None => {
                    info!("Request queue closed, stopping devices");
                    dispatcher.shutdown().await;
                    break 'mainloop;
                },
            },
        }
    }
}

/// The host call surface.
///
/// Every call returns promptly: requests are queued to a worker running on the bridge's own
/// runtime, and everything asynchronous comes back through `poll_events`. Lifecycle is
/// Uninit -> Active (`connect`) -> Closed (`close`); a closed bridge stays closed, create a new
/// one to reconnect.
pub struct HapticBridge {
    runtime: Option<Runtime>,
    session: Session,
    events: EventReceiver,
    lifecycle: Lifecycle,
}

impl HapticBridge {
    pub fn new(transport: Arc<dyn Transport>, settings: SettingsStore) -> Result<Self, BridgeError> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("haptic-bridge")
            .enable_all()
            .build()
            .map_err(|source| BridgeError::Runtime { source })?;

        let (sender, receiver) = event_channel();
        let session = Session::new(transport, settings, sender);

        Ok(HapticBridge {
            runtime: Some(runtime),
            session,
            events: receiver,
            lifecycle: Lifecycle::Uninit,
        })
    }

    /// Loads settings from `io` before returning.
    pub fn with_settings_file(transport: Arc<dyn Transport>, io: SettingsIO) -> Result<Self, BridgeError> {
        let mut bridge = Self::new(transport, SettingsStore::default())?;
        if let Some(runtime) = &bridge.runtime {
            let settings = runtime.block_on(SettingsStore::load(io));
            bridge.session.settings = settings;
        }
        Ok(bridge)
    }

    /// Bluetooth LE transport with the default settings file. If no settings location can be
    /// determined, settings are kept in memory only.
    pub fn bluetooth() -> Result<Self, BridgeError> {
        Self::with_default_settings(Arc::new(BtleTransport::new()))
    }

    /// Buttplug server (Intiface) reachable over a websocket at `address`, with the default
    /// settings file.
    pub fn websocket(address: &str) -> Result<Self, BridgeError> {
        Self::with_default_settings(Arc::new(ButtplugTransport::new(address)))
    }

    fn with_default_settings(transport: Arc<dyn Transport>) -> Result<Self, BridgeError> {
        match SettingsIO::new() {
            Ok(io) => Self::with_settings_file(transport, io),
            Err(err) => {
                error!("Settings will not be persisted: {}", err);
                Self::new(transport, SettingsStore::in_memory(Settings::default()))
            },
        }
    }

    pub fn state(&self) -> SessionState {
        match self.lifecycle {
            Lifecycle::Uninit => SessionState::Uninit,
            Lifecycle::Active { .. } => SessionState::Active,
            Lifecycle::Closed => SessionState::Closed,
        }
    }

    fn is_closed(&self) -> bool {
        matches!(self.lifecycle, Lifecycle::Closed)
    }

    /// Read-only view of the device registry.
    pub fn registry(&self) -> &DeviceRegistry {
        &self.session.registry
    }

    pub fn connect(&mut self) -> bool {
        match self.lifecycle {
            Lifecycle::Active { .. } => return true,
            Lifecycle::Closed => {
                warn!("connect() after close(); a closed bridge can not be reused");
                return false;
            },
            Lifecycle::Uninit => {},
        }

        let Some(runtime) = &self.runtime else {
            return false;
        };

        let connector = Connector::new(self.session.clone());
        if let Err(err) = runtime.block_on(connector.connect()) {
            let err = BridgeError::from(err);
            error!("Failed to connect: {}", err);
            self.session.events.error(err.to_string());
            return false;
        }

        let (requests, receiver) = channel(ACTION_QUEUE_CAPACITY);
        let dispatcher = Dispatcher::new(self.session.clone());
        let worker = runtime.spawn(run_worker(connector.clone(), dispatcher, receiver, self.session.cancel.clone()));

        self.lifecycle = Lifecycle::Active { requests, worker, connector };
        true
    }

    fn request(&self, request: Request) -> bool {
        let requests = match &self.lifecycle {
            Lifecycle::Active { requests, .. } => requests,
            Lifecycle::Closed => {
                debug!("Dropping {:?}: {}", request, BridgeError::Closed);
                return false;
            },
            Lifecycle::Uninit => {
                debug!("Dropping {:?}: not connected", request);
                return false;
            },
        };

        if let Err(err) = requests.try_send(request) {
            error!("Failed to queue request: {}", err);
            return false;
        }
        true
    }

    pub fn scan_for_devices(&self) -> bool {
        info!("Received: Scan for devices");
        self.request(Request::Scan)
    }

    pub fn stop_scan(&self) -> bool {
        info!("Received: Stop scan");
        self.request(Request::StopScan)
    }

    /// Stops all devices, disconnects the backend, discards pending events and clears the
    /// registry. Returns false if the bridge was already closed.
    pub fn close(&mut self) -> bool {
        info!("Received: Close");
        let lifecycle = mem::replace(&mut self.lifecycle, Lifecycle::Closed);

        match lifecycle {
            Lifecycle::Closed => return false,
            Lifecycle::Uninit => {},
            Lifecycle::Active { requests, worker, connector } => {
                drop(requests);
                if let Some(runtime) = &self.runtime {
                    runtime.block_on(async {
                        if timeout(Duration::from_millis(CLOSE_DEADLINE), worker).await.is_err() {
                            warn!("Stopping devices took too long");
                        }
                        // the backend is disconnected even if some devices did not confirm the stop
                        if timeout(Duration::from_millis(DISCONNECT_DEADLINE), connector.close()).await.is_err() {
                            warn!("Disconnecting the transport took too long");
                        }
                    });
                }
            },
        }

        self.session.cancel.cancel();
        self.session.registry.clear();
        let discarded = self.events.close();
        debug!("Discarded {} events on close", discarded);

        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
        true
    }

    /// Connected devices first, then devices only known from settings.
    pub fn get_devices(&self) -> Vec<String> {
        if self.is_closed() {
            return vec![];
        }

        let mut names = self.session.registry.names();
        for name in self.session.settings.device_names() {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }

    pub fn get_device_capabilities(&self, name: &str) -> Vec<String> {
        debug!("Getting '{}' capabilities", name);
        self.session
            .registry
            .capabilities(name)
            .iter()
            .map(|c| c.to_string())
            .collect()
    }

    pub fn get_device_connected(&self, name: &str) -> bool {
        self.session.registry.is_connected(name)
    }

    /// Vibrates every connected, enabled device. `duration` is in seconds, `f32::INFINITY`
    /// vibrates until superseded or stopped.
    pub fn vibrate(&self, speed: f32, duration: f32) -> bool {
        info!("Received: Vibrate speed={} duration={}", speed, duration);
        let duration = CommandDuration::from_secs_f32(duration);
        self.request(Request::Command(Command::vibrate(Scope::All, speed, duration)))
    }

    /// Vibrates the devices subscribed to any of `events`. No events at all vibrates every
    /// device; events that are all blank vibrate none.
    pub fn vibrate_events(&self, speed: f32, duration: f32, events: Vec<String>) -> bool {
        info!("Received: Vibrate speed={} duration={} events={:?}", speed, duration, events);
        let duration = CommandDuration::from_secs_f32(duration);
        let scope = if events.is_empty() { Scope::All } else { Scope::Events(sanitize_tags(events)) };
        self.request(Request::Command(Command::vibrate(scope, speed, duration)))
    }

    pub fn vibrate_device(&self, name: &str, speed: f32, duration: f32) -> bool {
        info!("Received: Vibrate '{}' speed={} duration={}", name, speed, duration);
        let duration = CommandDuration::from_secs_f32(duration);
        let scope = Scope::Device(name.to_string());
        self.request(Request::Command(Command::vibrate(scope, speed, duration)))
    }

    pub fn stop_all(&self) -> bool {
        info!("Received: Stop all");
        self.request(Request::StopAll)
    }

    pub fn poll_event_records(&mut self) -> Vec<Event> {
        if self.is_closed() {
            return vec![];
        }
        self.events.drain()
    }

    pub fn poll_events(&mut self) -> Vec<String> {
        self.poll_event_records().iter().map(|e| e.to_string()).collect()
    }

    pub fn settings_get_enabled(&self, name: &str) -> bool {
        if self.is_closed() {
            return false;
        }
        let enabled = self.session.settings.get_enabled(name);
        debug!("Getting setting '{}'.enabled={}", name, enabled);
        enabled
    }

    pub fn settings_set_enabled(&self, name: &str, enabled: bool) {
        if self.is_closed() {
            return;
        }
        info!("Setting '{}'.enabled={}", name, enabled);
        self.session.settings.set_enabled(name, enabled);
        self.session.registry.set_enabled(name, enabled);
    }

    pub fn settings_get_events(&self, name: &str) -> Vec<String> {
        if self.is_closed() {
            return vec![];
        }
        self.session.settings.get_events(name)
    }

    pub fn settings_set_events(&self, name: &str, events: Vec<String>) {
        if self.is_closed() {
            return;
        }
        info!("Setting '{}'.events={:?}", name, events);
        self.session.settings.set_events(name, events);
    }

    /// Writes the settings to their durable medium.
    pub fn settings_store(&self) -> bool {
        let Some(runtime) = &self.runtime else {
            return false;
        };

        match runtime.block_on(self.session.settings.store()) {
            Ok(_) => true,
            Err(err) => {
                let err = BridgeError::from(err);
                match self.session.settings.io() {
                    Some(io) => error!("{} ({})", err, io.path().to_string_lossy()),
                    None => error!("{}", err),
                }
                false
            },
        }
    }
}

impl Drop for HapticBridge {
    fn drop(&mut self) {
        if !self.is_closed() {
            self.close();
        }
    }
}
