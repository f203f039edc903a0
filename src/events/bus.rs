use flume::{Receiver, Sender};
use parking_lot::Mutex;

/// Fan-out of typed events to any number of subscribers.
///
/// Each subscriber receives its own copy of every event emitted after it
/// subscribed. Subscribers are pruned once they drop their receiver.
#[derive(Debug)]
pub struct EventBus<T> {
    senders: Mutex<Vec<Sender<T>>>,
}

impl<T> Default for EventBus<T> {
    fn default() -> Self {
        Self {
            senders: Mutex::new(Vec::new()),
        }
    }
}

impl<T: Clone> EventBus<T> {
    /// Registers a new subscriber.
    pub fn subscribe(&self) -> Receiver<T> {
        let (tx, rx) = flume::unbounded();
        self.senders.lock().push(tx);
        rx
    }

    /// Sends `event` to all live subscribers.
    pub fn emit(&self, event: T) {
        self.senders
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Disconnects every subscriber.
    pub fn clear(&self) {
        self.senders.lock().clear();
    }

    /// Number of subscribers registered.
    pub fn subscriber_count(&self) -> usize {
        self.senders.lock().len()
    }
}
