//! Publish/subscribe fan-out over `std::sync::mpsc`.
//!
//! Every subscriber gets its own unbounded channel, so publishing never
//! blocks on a slow listener and each listener sees events in emission
//! order. Subscribers whose receiver was dropped are pruned on the next
//! publish.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use tracing::warn;

type Sink<E> = Box<dyn Fn(E) -> bool + Send>;

/// Cloneable event fan-out. Clones share subscribers.
pub struct EventBus<E> {
    sinks: Arc<Mutex<Vec<Sink<E>>>>,
    muted: Arc<AtomicBool>,
}

impl<E> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            sinks: Arc::clone(&self.sinks),
            muted: Arc::clone(&self.muted),
        }
    }
}

impl<E: Clone + Send + 'static> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Clone + Send + 'static> EventBus<E> {
    pub fn new() -> Self {
        Self {
            sinks: Arc::new(Mutex::new(Vec::new())),
            muted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Register a new listener.
    pub fn subscribe(&self) -> Receiver<E> {
        let (tx, rx) = mpsc::channel();
        self.forward(tx, |event| event);
        rx
    }

    /// Route every event into an existing channel, wrapped by `wrap`.
    pub fn forward<T, F>(&self, tx: Sender<T>, wrap: F)
    where
        T: Send + 'static,
        F: Fn(E) -> T + Send + 'static,
    {
        let sink: Sink<E> = Box::new(move |event| tx.send(wrap(event)).is_ok());
        match self.sinks.lock() {
            Ok(mut sinks) => sinks.push(sink),
            Err(_) => warn!("Event bus lock poisoned, subscriber dropped"),
        }
    }

    /// Deliver `event` to every live subscriber. No-op once muted.
    pub fn publish(&self, event: E) {
        let Ok(mut sinks) = self.sinks.lock() else {
            warn!("Event bus lock poisoned, event dropped");
            return;
        };
        if self.is_muted() {
            return;
        }
        sinks.retain(|sink| sink(event.clone()));
    }

    /// Deliver `event` and mute the bus in one step: no other publisher can
    /// slip an event in after it. Returns false if the bus was already muted.
    pub fn publish_last(&self, event: E) -> bool {
        let Ok(mut sinks) = self.sinks.lock() else {
            warn!("Event bus lock poisoned, event dropped");
            self.mute();
            return false;
        };
        if self.muted.swap(true, Ordering::SeqCst) {
            return false;
        }
        sinks.retain(|sink| sink(event.clone()));
        true
    }

    /// Silence the bus for good. Events published afterwards are dropped.
    pub fn mute(&self) {
        self.muted.store(true, Ordering::SeqCst);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sinks.lock().map(|sinks| sinks.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_subscriber_sees_events_in_order() {
        let bus = EventBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();

        for i in 0..3 {
            bus.publish(i);
        }

        assert_eq!(a.try_iter().collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(b.try_iter().collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let bus = EventBus::new();
        let kept = bus.subscribe();
        drop(bus.subscribe());

        bus.publish("first");
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(kept.recv().unwrap(), "first");
    }

    #[test]
    fn test_forward_wraps_events() {
        let bus = EventBus::new();
        let (tx, rx) = mpsc::channel();
        bus.forward(tx, |n: u32| (7, n));

        bus.publish(3);
        assert_eq!(rx.recv().unwrap(), (7, 3));
    }

    #[test]
    fn test_muted_bus_drops_events() {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        bus.publish(1);
        bus.clone().mute();
        bus.publish(2);

        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_publish_last_is_final() {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        assert!(bus.publish_last("stopped"));
        assert!(!bus.publish_last("again"));
        bus.publish("late");

        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec!["stopped"]);
    }
}
