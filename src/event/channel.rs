use log::{debug, warn};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::mpsc::error::TryRecvError;

use crate::event::types::{Event, EventKind};

/// Producer half of the event channel. Cloned into every task that reports to the host.
/// Sending never blocks and never waits for the consumer.
#[derive(Clone, Debug)]
pub struct EventSender {
    sender: UnboundedSender<EventKind>,
}

impl EventSender {
    /// Returns false once the channel has been torn down by `close()`.
    pub fn send(&self, kind: EventKind) -> bool {
        debug!("Event {}", kind);
        match self.sender.send(kind) {
            Ok(_) => true,
            Err(err) => {
                debug!("Dropped event after close: {}", err.0);
                false
            },
        }
    }

    pub fn error(&self, message: String) -> bool {
        self.send(EventKind::Error { message })
    }
}

/// Consumer half, owned by the host-facing bridge.
#[derive(Debug)]
pub struct EventReceiver {
    receiver: UnboundedReceiver<EventKind>,
    next_sequence: u64,
    closed: bool,
}

pub fn event_channel() -> (EventSender, EventReceiver) {
    let (sender, receiver) = unbounded_channel();
    (
        EventSender { sender },
        EventReceiver { receiver, next_sequence: 0, closed: false },
    )
}

impl EventReceiver {
    /// Takes every event produced so far, in production order. Never waits for new events.
    pub fn drain(&mut self) -> Vec<Event> {
        let mut events = vec![];

        loop {
            match self.receiver.try_recv() {
                Ok(kind) => {
                    self.next_sequence += 1;
                    events.push(Event { sequence: self.next_sequence, kind });
                },
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if !self.closed {
                        warn!("All event producers are gone");
                        self.closed = true;
                    }
                    break;
                },
            }
        }

        events
    }

    /// Invalidates the channel: pending events are discarded and later sends fail.
    pub fn close(&mut self) -> usize {
        self.receiver.close();
        self.closed = true;

        let mut discarded = 0;
        while self.receiver.try_recv().is_ok() {
            discarded += 1;
        }
        discarded
    }
}
