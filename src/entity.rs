//! Reference-counted listener lists for subscribable entities
//!
//! An entity (account, order book, the global transaction feed) only holds a
//! network subscription while at least one [`Subscription`] guard is alive.
//! The count is kept under a lock together with the edge callback, so the
//! subscribe and unsubscribe commands go out in the same order as the edges.

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::warn;

const EVENT_CAPACITY: usize = 256;

pub struct Listeners<E> {
    count: Mutex<usize>,
    events: broadcast::Sender<E>,
}

impl<E: Clone> Listeners<E> {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            count: Mutex::new(0),
            events,
        }
    }

    pub fn count(&self) -> usize {
        *self.count.lock()
    }

    /// Adds a listener. `on_first` runs only on the 0 to 1 edge.
    pub fn attach(&self, on_first: impl FnOnce()) -> broadcast::Receiver<E> {
        let mut count = self.count.lock();
        let receiver = self.events.subscribe();
        *count += 1;
        if *count == 1 {
            on_first();
        }
        receiver
    }

    /// Removes a listener. `on_last` runs only on the 1 to 0 edge.
    pub fn detach(&self, on_last: impl FnOnce()) {
        let mut count = self.count.lock();
        if *count == 0 {
            return;
        }
        *count -= 1;
        if *count == 0 {
            on_last();
        }
    }

    pub fn emit(&self, event: E) {
        // no receivers is fine
        let _ = self.events.send(event);
    }
}

impl<E: Clone> Default for Listeners<E> {
    fn default() -> Self {
        Self::new()
    }
}

type DetachFn = Box<dyn FnOnce() + Send>;

/// A live listener registration. Dropping it detaches the listener.
pub struct Subscription<E> {
    receiver: broadcast::Receiver<E>,
    on_drop: Option<DetachFn>,
}

impl<E: Clone> Subscription<E> {
    pub(crate) fn new(receiver: broadcast::Receiver<E>, on_drop: DetachFn) -> Self {
        Self {
            receiver,
            on_drop: Some(on_drop),
        }
    }

    /// Next event, or `None` once the entity is gone.
    pub async fn recv(&mut self) -> Option<E> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("subscriber lagged by {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<E> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("subscriber lagged by {} events", n);
                }
                Err(_) => return None,
            }
        }
    }
}

impl<E> Drop for Subscription<E> {
    fn drop(&mut self) {
        if let Some(detach) = self.on_drop.take() {
            detach();
        }
    }
}
