use tokio::sync::broadcast;

use crate::common::InboxSignal;

const SIGNAL_CAPACITY: usize = 64;

/// Local broadcast bus for [`InboxSignal`]s.
#[derive(Debug, Clone)]
pub struct SignalBus {
    sender: broadcast::Sender<InboxSignal>,
}

impl SignalBus {
    pub fn new() -> Self {
        let (sender, _receiver) = broadcast::channel(SIGNAL_CAPACITY);
        Self { sender }
    }

    pub fn publish(&self, signal: InboxSignal) {
        // No listeners is fine: the badge may not be started yet.
        if self.sender.send(signal).is_err() {
            log::trace!("No listeners for {signal:?}");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InboxSignal> {
        self.sender.subscribe()
    }
}

impl Default for SignalBus {
    fn default() -> Self {
        Self::new()
    }
}
