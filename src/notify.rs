//! Asynchronous observer notification.
//!
//! The `fasync` side of the original drivers: interested parties register
//! with a [`Broadcaster`], and when the resource produces data every
//! registered [`Observer`] is told, without any of them having to block in
//! a read. Registration is keyed by an [`ObserverId`] chosen by the
//! subscriber (the file-descriptor number, in the original), so the same
//! subscriber can re-register idempotently and deregister on close.
//!
//! Delivery is best-effort. An observer that fails to take an event is
//! logged and skipped; it stays subscribed, and the remaining observers
//! still get theirs.

use crate::{readiness::Ready, sync::SpinLock};
use std::{collections::BTreeMap, sync::Arc, sync::mpsc};

/// A subscriber-chosen registration key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ObserverId(pub u64);

/// What happened on the resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Data became available to read.
    DataReady,
}

/// A notification delivered to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    /// What happened.
    pub kind: EventKind,
    /// The poll mask at notification time.
    pub ready: Ready,
}

impl Event {
    /// The event a writer raises: data is ready, poll would say readable.
    pub fn data_ready() -> Event {
        Event {
            kind: EventKind::DataReady,
            ready: Ready::IN | Ready::RDNORM,
        }
    }
}

/// The observer could not take the event.
#[derive(Debug, PartialEq, Eq)]
pub struct DeliveryFailed;

/// A party interested in resource events.
///
/// `notify` is called from the producing task with no locks held, but it
/// should still return promptly; a slow observer delays its peers.
pub trait Observer: Send + Sync {
    /// Take one event.
    ///
    /// # Errors
    ///
    /// [`DeliveryFailed`] if the event could not be accepted (for example,
    /// the receiving side is gone). The failure is logged by the
    /// [`Broadcaster`] and does not affect other observers.
    fn notify(&self, event: Event) -> Result<(), DeliveryFailed>;
}

/// The registered-observer set of one resource.
#[derive(Default)]
pub struct Broadcaster {
    observers: SpinLock<BTreeMap<u64, Arc<dyn Observer>>>,
}

impl Broadcaster {
    /// Creates an empty broadcaster.
    pub const fn new() -> Self {
        Self {
            observers: SpinLock::new(BTreeMap::new()),
        }
    }

    /// Register `observer` under `id`.
    ///
    /// Re-registering an id is a no-op that keeps the existing observer,
    /// matching the original helper's treatment of an already-listed entry.
    pub fn subscribe(&self, id: ObserverId, observer: Arc<dyn Observer>) {
        let mut obs = self.observers.lock();
        obs.entry(id.0).or_insert(observer);
        obs.unlock();
    }

    /// Remove the observer registered under `id`, if any.
    pub fn unsubscribe(&self, id: ObserverId) {
        let mut obs = self.observers.lock();
        obs.remove(&id.0);
        obs.unlock();
    }

    /// Drop every registration. Used on resource shutdown.
    pub fn clear(&self) {
        let mut obs = self.observers.lock();
        obs.clear();
        obs.unlock();
    }

    /// Number of registered observers.
    pub fn len(&self) -> usize {
        let obs = self.observers.lock();
        let n = obs.len();
        obs.unlock();
        n
    }

    /// Whether no observer is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `event` to every registered observer.
    ///
    /// The observer set is snapshotted first and delivery happens with no
    /// locks held, so an observer may call back into the broadcaster.
    /// Returns how many deliveries succeeded.
    pub fn notify_all(&self, event: Event) -> usize {
        let obs = self.observers.lock();
        let snapshot: Vec<(u64, Arc<dyn Observer>)> =
            obs.iter().map(|(id, o)| (*id, o.clone())).collect();
        obs.unlock();

        let mut delivered = 0;
        for (id, observer) in snapshot {
            match observer.notify(event) {
                Ok(()) => delivered += 1,
                Err(DeliveryFailed) => {
                    tracing::warn!(observer = id, ?event, "event delivery failed");
                }
            }
        }
        delivered
    }
}

/// An [`Observer`] that forwards events into an [`mpsc`] channel.
///
/// The convenient receiving end for tests and in-process consumers; the
/// analogue of the signal the original delivers to a registered process.
pub struct ChannelObserver {
    // Sender is not Sync; the lock makes the observer shareable.
    tx: SpinLock<mpsc::Sender<Event>>,
}

impl ChannelObserver {
    /// Create an observer delivering into a fresh channel, returning the
    /// receiving half alongside it.
    pub fn new() -> (Arc<Self>, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel();
        (
            Arc::new(ChannelObserver {
                tx: SpinLock::new(tx),
            }),
            rx,
        )
    }
}

impl Observer for ChannelObserver {
    fn notify(&self, event: Event) -> Result<(), DeliveryFailed> {
        let tx = self.tx.lock();
        let result = tx.send(event);
        tx.unlock();
        result.map_err(|_| DeliveryFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_is_idempotent() {
        let b = Broadcaster::new();
        let (obs, rx) = ChannelObserver::new();
        b.subscribe(ObserverId(3), obs.clone());
        b.subscribe(ObserverId(3), obs);
        assert_eq!(b.len(), 1);
        assert_eq!(b.notify_all(Event::data_ready()), 1);
        assert_eq!(rx.try_recv().ok(), Some(Event::data_ready()));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn failed_delivery_skips_to_next() {
        let b = Broadcaster::new();
        let (dead, rx) = ChannelObserver::new();
        drop(rx);
        let (live, live_rx) = ChannelObserver::new();
        b.subscribe(ObserverId(1), dead);
        b.subscribe(ObserverId(2), live);
        assert_eq!(b.notify_all(Event::data_ready()), 1);
        assert_eq!(live_rx.try_recv().ok(), Some(Event::data_ready()));
    }

    #[test]
    fn unsubscribe_unknown_is_noop() {
        let b = Broadcaster::new();
        b.unsubscribe(ObserverId(9));
        assert!(b.is_empty());
    }
}
