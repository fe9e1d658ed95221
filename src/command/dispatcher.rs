use std::collections::HashMap;
use std::time::Instant;
use futures::future::join_all;
use log::{debug, info, warn};
use tokio::spawn;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

use crate::command::scope::{accepts_vibrate, sanitize_tags};
use crate::command::types::{Action, Command, CommandDuration, Scope, Speed};
use crate::device::constants::WRITE_DEADLINE;
use crate::device::types::{Device, DeviceStatus};
use crate::error::{BridgeError, DeviceError};
use crate::event::types::{CommandFailure, EventKind};
use crate::session::Session;

/// Per-device work item. `generation` orders commands to the same device: an auto-revert only
/// applies if no newer command reached the device in the meantime.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Actuation {
    Vibrate { speed: Speed, clamped: bool, generation: u64 },
    Revert { generation: u64 },
    Stop { generation: u64 },
}

struct DeviceWorker {
    sender: UnboundedSender<Actuation>,
    cancel: CancellationToken,
    generation: u64,
    revert: Option<CancellationToken>,
}

impl DeviceWorker {
    fn cancel_revert(&mut self) {
        if let Some(revert) = self.revert.take() {
            revert.cancel();
        }
    }

    fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }
}

/// Turns commands into per-device actuations.
///
/// Each device gets its own task, so commands to one device are applied in issue order and a
/// slow device never holds up the others. Commands are last-writer-wins per device: a new
/// command cancels the pending auto-revert of the previous one.
pub struct Dispatcher {
    session: Session,
    workers: HashMap<String, DeviceWorker>,
}

impl Dispatcher {
    pub fn new(session: Session) -> Self {
        Dispatcher { session, workers: HashMap::new() }
    }

    /// Resolves `scope` to the connected, enabled devices a vibrate command goes to. Broadcast
    /// scopes skip devices that can not take the command; only a single-device scope reports why.
    pub fn resolve(&self, scope: &Scope) -> Result<Vec<Device>, BridgeError> {
        let registry = &self.session.registry;
        let settings = &self.session.settings;

        match scope {
            Scope::Device(name) => {
                let device = registry.get(name).ok_or_else(|| BridgeError::DeviceUnknown(name.clone()))?;
                if !device.enabled {
                    return Err(BridgeError::DeviceDisabled(name.clone()));
                }
                if !device.is_connected() {
                    return Err(BridgeError::DeviceDisconnected(name.clone()));
                }
                if !device.can_vibrate() {
                    return Err(BridgeError::CommandRejected(String::from("device has no vibration actuator")));
                }
                Ok(vec![device])
            },
            Scope::All => Ok(registry
                .connected()
                .into_iter()
                .filter(|d| d.enabled && d.can_vibrate())
                .collect()),
            Scope::Events(tags) => {
                let tags = sanitize_tags(tags.clone());
                Ok(registry
                    .connected()
                    .into_iter()
                    .filter(|d| d.enabled)
                    .filter(|d| accepts_vibrate(&d.capabilities, &settings.get_events(&d.name), &tags))
                    .collect())
            },
        }
    }

    /// Returns the number of devices the command was handed to.
    pub fn dispatch(&mut self, command: Command) -> usize {
        self.prune();

        let devices = match self.resolve(&command.scope) {
            Ok(devices) => devices,
            Err(err) => {
                let device = match &command.scope {
                    Scope::Device(name) => Some(name.clone()),
                    _ => None,
                };
                warn!("Command {:?} not dispatched: {}", command.scope, err);
                self.session.events.send(EventKind::CommandFailed { device, reason: (&err).into() });
                return 0;
            },
        };

        if devices.is_empty() {
            debug!("Command {:?} matched no devices", command.scope);
            return 0;
        }

        match command.action {
            Action::Vibrate { speed, clamped, duration } => {
                if clamped {
                    info!("Speed clamped to {:.2}", speed.value());
                }
                for device in &devices {
                    self.vibrate(&device.name, speed, clamped, duration);
                }
            },
            Action::Stop => {
                for device in &devices {
                    self.stop(&device.name);
                }
            },
        }

        devices.len()
    }

    fn vibrate(&mut self, name: &str, speed: Speed, clamped: bool, duration: CommandDuration) {
        let worker = self.worker(name);
        worker.cancel_revert();
        let generation = worker.next_generation();

        if worker.sender.send(Actuation::Vibrate { speed, clamped, generation }).is_err() {
            warn!("Worker of '{}' is gone", name);
            return;
        }

        if let CommandDuration::Timed(duration) = duration {
            let revert = worker.cancel.child_token();
            worker.revert = Some(revert.clone());
            spawn_revert(revert, worker.sender.clone(), generation, duration);
        }
    }

    fn stop(&mut self, name: &str) {
        let worker = self.worker(name);
        worker.cancel_revert();
        let generation = worker.next_generation();
        let _ = worker.sender.send(Actuation::Stop { generation });
    }

    /// Cancels every pending auto-revert and stops every device that may be running, enabled
    /// or not, including devices whose last write failed.
    pub fn stop_all(&mut self) -> usize {
        self.prune();

        for worker in self.workers.values_mut() {
            worker.cancel_revert();
        }

        let devices = self.session.registry.stoppable();
        for device in &devices {
            self.stop(&device.name);
        }
        devices.len()
    }

    /// Ends all device workers and sends a final stop to every device that may be running.
    /// Best-effort: failures are only logged.
    pub async fn shutdown(&mut self) {
        for (_, worker) in self.workers.drain() {
            worker.cancel.cancel();
        }

        let devices = self.session.registry.stoppable();
        let stops = devices.iter().map(|device| {
            let session = self.session.clone();
            let name = device.name.clone();
            async move {
                if let Err(err) = write_with_deadline(&session, &name, None).await {
                    warn!("Failed to stop '{}' on shutdown: {:?}", name, err);
                }
            }
        });
        join_all(stops).await;
    }

    fn worker(&mut self, name: &str) -> &mut DeviceWorker {
        let session = &self.session;
        self.workers.entry(name.to_string()).or_insert_with(|| {
            let (sender, receiver) = unbounded_channel();
            let cancel = session.cancel.child_token();
            spawn(device_worker_task(session.clone(), name.to_string(), cancel.clone(), receiver));
            DeviceWorker { sender, cancel, generation: 0, revert: None }
        })
    }

    // drop workers of devices that left the registry
    fn prune(&mut self) {
        let registry = &self.session.registry;
        self.workers.retain(|name, worker| {
            let known = registry.get(name).is_some();
            if !known {
                debug!("Dropping worker of '{}'", name);
                worker.cancel.cancel();
            }
            known
        });
    }
}

// `revert` is a child of the device worker's token, so closing the session cancels it too
fn spawn_revert(
    revert: CancellationToken,
    sender: UnboundedSender<Actuation>,
    generation: u64,
    duration: Duration,
) {
    spawn(async move {
        tokio::select! {
            _ = revert.cancelled() => {},
            _ = sleep(duration) => {
                let _ = sender.send(Actuation::Revert { generation });
            },
        }
    });
}

async fn write_with_deadline(session: &Session, name: &str, speed: Option<f64>) -> Result<(), DeviceError> {
    let transport = session.transport.clone();
    let fut = async {
        match speed {
            Some(speed) => transport.vibrate(name, speed).await,
            None => transport.stop(name).await,
        }
    };

    tokio::select! {
        _ = sleep(Duration::from_millis(WRITE_DEADLINE)) => {
            warn!("Sending to '{}' took too long", name);
            Err(DeviceError::Deadline(name.to_string()))
        }
        result = fut => result,
    }
}

async fn device_worker_task(
    session: Session,
    name: String,
    cancel: CancellationToken,
    mut receiver: UnboundedReceiver<Actuation>,
) {
    let mut latest: u64 = 0;

    'mainloop: loop {
        let actuation = tokio::select! {
            _ = cancel.cancelled() => {
                break 'mainloop;
            },
            actuation = receiver.recv() => match actuation {
                Some(actuation) => actuation,
                None => break 'mainloop,
            },
        };

        let (speed, event) = match actuation {
            Actuation::Vibrate { speed, clamped, generation } => {
                latest = generation;
                (
                    Some(speed.value() as f64),
                    EventKind::DeviceVibrated { device: name.clone(), speed: speed.value(), clamped },
                )
            },
            Actuation::Revert { generation } => {
                if generation != latest {
                    debug!("Skipping superseded revert of '{}'", name);
                    continue 'mainloop;
                }
                (None, EventKind::DeviceStopped { device: name.clone() })
            },
            Actuation::Stop { generation } => {
                latest = generation;
                (None, EventKind::DeviceStopped { device: name.clone() })
            },
        };

        match write_with_deadline(&session, &name, speed).await {
            Ok(_) => {
                session.registry.touch(&name, Instant::now());
                session.events.send(event);
            },
            Err(err) => {
                warn!("Command to '{}' failed: {:?}", name, err);
                session.registry.set_status(&name, DeviceStatus::Error);
                session.events.send(EventKind::CommandFailed {
                    device: Some(name.clone()),
                    reason: CommandFailure::Transport(err.to_string()),
                });
            },
        }
    }

    debug!("Worker of '{}' stopped", name);
}
