use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::store::SettingsStore;
use crate::device::registry::DeviceRegistry;
use crate::device::transport::Transport;
use crate::event::channel::EventSender;

/// Shared handles of one backend session, given to every component at construction.
/// Cancelling `cancel` ends every task spawned on behalf of the session.
#[derive(Clone)]
pub struct Session {
    pub registry: DeviceRegistry,
    pub settings: SettingsStore,
    pub events: EventSender,
    pub transport: Arc<dyn Transport>,
    pub cancel: CancellationToken,
}

impl Session {
    pub fn new(transport: Arc<dyn Transport>, settings: SettingsStore, events: EventSender) -> Self {
        Session {
            registry: DeviceRegistry::new(),
            settings,
            events,
            transport,
            cancel: CancellationToken::new(),
        }
    }
}
