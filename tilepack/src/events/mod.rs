//! Progress and diagnostics event delivery.
//!
//! A single logical channel with many subscribers, fanned out over one
//! unbounded queue per subscriber. Each subscriber sees every event published
//! after it subscribed, however slowly it polls; there is no replay of
//! history. Events for one pack are delivered FIFO because publishers hold
//! that pack's lock while sending; ordering across packs is unspecified.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::manager::{PackId, PackProgress};

/// Events published by the pack manager and download engine.
#[derive(Debug, Clone, PartialEq)]
pub enum PackEvent {
    /// A pack's progress snapshot changed.
    ProgressChanged {
        /// The pack that progressed.
        pack_id: PackId,
        /// Point-in-time progress copy.
        progress: PackProgress,
    },
    /// One resource permanently failed to download. The pack keeps going;
    /// this is diagnostics, not a state change.
    ResourceError {
        /// The affected pack.
        pack_id: PackId,
        /// Human-readable failure reason.
        reason: String,
    },
    /// The pack hit its maximum-tiles ceiling. Informational: the pack stays
    /// Active and the caller decides whether to suspend it.
    QuotaReached {
        /// The affected pack.
        pack_id: PackId,
        /// The ceiling that was reached.
        max_tiles: u64,
    },
    /// Every expected resource is downloaded; the pack is Complete.
    Completed {
        /// The completed pack.
        pack_id: PackId,
    },
}

impl PackEvent {
    /// The pack this event belongs to.
    pub fn pack_id(&self) -> PackId {
        match self {
            Self::ProgressChanged { pack_id, .. }
            | Self::ResourceError { pack_id, .. }
            | Self::QuotaReached { pack_id, .. }
            | Self::Completed { pack_id } => *pack_id,
        }
    }
}

/// Typed publish/subscribe channel for [`PackEvent`]s.
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<PackEvent>>>>,
}

impl EventBus {
    /// Creates a bus with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes an event to all current subscribers.
    ///
    /// Publishing with no subscribers is fine; the event is dropped.
    /// Subscribers whose stream was dropped are pruned here.
    pub fn publish(&self, event: PackEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Subscribes to all events published from this point on.
    pub fn subscribe(&self) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        EventStream { rx }
    }
}

/// A lazy, unbounded, per-subscriber sequence of events.
///
/// Events queue until consumed; a slow subscriber never misses one.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<PackEvent>,
}

impl EventStream {
    /// Waits for the next event.
    ///
    /// Returns `None` once the bus is dropped and all queued events were
    /// consumed.
    pub async fn next(&mut self) -> Option<PackEvent> {
        self.rx.recv().await
    }

    /// Returns the next already-queued event without waiting.
    pub fn try_next(&mut self) -> Option<PackEvent> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress_event(id: u64, completed: u64) -> PackEvent {
        PackEvent::ProgressChanged {
            pack_id: PackId::from_raw(id),
            progress: PackProgress {
                resources_completed: completed,
                resources_expected: 1000,
                bytes_completed: completed * 100,
                tiles_exceeded_quota: false,
            },
        }
    }

    #[tokio::test]
    async fn test_subscriber_sees_events_after_subscribe() {
        let bus = EventBus::default();
        let mut stream = bus.subscribe();

        bus.publish(progress_event(1, 1));
        let event = stream.next().await.expect("event should arrive");
        assert_eq!(event.pack_id(), PackId::from_raw(1));
    }

    #[tokio::test]
    async fn test_no_replay_of_history() {
        let bus = EventBus::default();
        bus.publish(progress_event(1, 1));

        let mut stream = bus.subscribe();
        bus.publish(progress_event(2, 1));

        let event = stream.next().await.expect("event should arrive");
        assert_eq!(event.pack_id(), PackId::from_raw(2));
        assert!(stream.try_next().is_none());
    }

    #[tokio::test]
    async fn test_per_pack_fifo_ordering() {
        let bus = EventBus::default();
        let mut stream = bus.subscribe();

        for completed in 1..=5 {
            bus.publish(progress_event(7, completed));
        }

        let mut last = 0;
        for _ in 0..5 {
            let Some(PackEvent::ProgressChanged { progress, .. }) = stream.next().await else {
                panic!("expected progress event");
            };
            assert!(progress.resources_completed > last);
            last = progress.resources_completed;
        }
    }

    #[tokio::test]
    async fn test_every_subscriber_sees_every_event() {
        let bus = EventBus::default();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.publish(progress_event(3, 1));

        assert_eq!(a.next().await.unwrap().pack_id(), PackId::from_raw(3));
        assert_eq!(b.next().await.unwrap().pack_id(), PackId::from_raw(3));
    }

    #[tokio::test]
    async fn test_unpolled_subscriber_loses_nothing() {
        let bus = EventBus::default();
        let mut stream = bus.subscribe();

        // A large pack publishes one progress event per resource; none may
        // be dropped no matter how long the subscriber waits to poll.
        for completed in 0..500 {
            bus.publish(progress_event(1, completed));
        }

        let mut seen = 0u64;
        while let Some(PackEvent::ProgressChanged { progress, .. }) = stream.try_next() {
            assert_eq!(progress.resources_completed, seen);
            seen += 1;
        }
        assert_eq!(seen, 500, "every published event must be delivered");
    }

    #[tokio::test]
    async fn test_dropped_subscriber_is_pruned() {
        let bus = EventBus::default();
        let stream = bus.subscribe();
        drop(stream);

        // Publishing after the drop must not fail or leak the sender.
        bus.publish(progress_event(1, 1));
        assert!(bus.subscribers.lock().is_empty());
    }
}
