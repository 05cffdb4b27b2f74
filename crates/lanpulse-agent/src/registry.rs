// ── Subscriber registry / broadcast fan-out ──
//
// Explicitly owned by the service instance (no ambient globals); the
// accept loop registers connections, the scheduler loops broadcast
// into it. The mutex is std::sync and is never held across an await.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::{debug, error};

use lanpulse_core::Frame;

/// Identifies one live subscriber connection for the duration the
/// underlying channel is open.
pub type SubscriberId = u64;

struct RegistryInner {
    next_id: SubscriberId,
    subscribers: HashMap<SubscriberId, mpsc::UnboundedSender<String>>,
}

/// The set of currently connected subscriber channels.
///
/// Invariant: every entry has an open channel. A subscriber whose
/// channel has closed is removed eagerly during the broadcast that
/// discovers the failure, not lazily on a later read.
pub struct SubscriberRegistry {
    inner: Mutex<RegistryInner>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                next_id: 1,
                subscribers: HashMap::new(),
            }),
        }
    }

    /// Register a new subscriber. Returns its id and the receiving end
    /// of its outbound queue; the connection's writer task drains the
    /// receiver into the WebSocket sink.
    pub fn register(&self) -> (SubscriberId, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().expect("registry mutex poisoned");
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.insert(id, tx);
        debug!(subscriber = id, total = inner.subscribers.len(), "subscriber registered");
        (id, rx)
    }

    /// Remove a subscriber on disconnect. Dropping its sender ends the
    /// writer task. Removing an already-absent id is a no-op.
    pub fn deregister(&self, id: SubscriberId) {
        let mut inner = self.inner.lock().expect("registry mutex poisoned");
        if inner.subscribers.remove(&id).is_some() {
            debug!(subscriber = id, total = inner.subscribers.len(), "subscriber deregistered");
        }
    }

    /// Number of currently connected subscribers. The scheduler gates
    /// probe work on this being non-zero.
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().expect("registry mutex poisoned").subscribers.len()
    }

    /// Fan one frame out to every live subscriber, pruning any whose
    /// peer has gone away. Returns the number of deliveries.
    pub fn broadcast(&self, frame: &Frame) -> usize {
        let text = match frame.encode() {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, "dropping unencodable broadcast frame");
                return 0;
            }
        };

        let mut inner = self.inner.lock().expect("registry mutex poisoned");
        let mut dead = Vec::new();
        let mut delivered = 0;

        for (&id, tx) in &inner.subscribers {
            if tx.send(text.clone()).is_ok() {
                delivered += 1;
            } else {
                dead.push(id);
            }
        }

        for id in dead {
            inner.subscribers.remove(&id);
            debug!(subscriber = id, "pruned dead subscriber during broadcast");
        }

        delivered
    }

    /// Deliver one frame to a single subscriber (on-demand command
    /// replies, first-paint latency). Returns `false` if the
    /// subscriber is gone; the entry is pruned in that case.
    pub fn send_to(&self, id: SubscriberId, frame: &Frame) -> bool {
        let text = match frame.encode() {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, subscriber = id, "dropping unencodable frame");
                return false;
            }
        };

        let mut inner = self.inner.lock().expect("registry mutex poisoned");
        match inner.subscribers.get(&id) {
            Some(tx) if tx.send(text).is_ok() => true,
            Some(_) => {
                inner.subscribers.remove(&id);
                debug!(subscriber = id, "pruned dead subscriber during send");
                false
            }
            None => false,
        }
    }
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanpulse_core::{EventKind, EventPayload, ProbeResult};

    fn latency_frame(millis: f64) -> Frame {
        Frame::event(
            EventKind::LatencyUpdate,
            &EventPayload::new(ProbeResult::Latency { millis }),
        )
        .unwrap()
    }

    #[test]
    fn broadcast_reaches_every_live_subscriber() {
        let registry = SubscriberRegistry::new();
        let (_a, mut rx_a) = registry.register();
        let (_b, mut rx_b) = registry.register();
        let (_c, mut rx_c) = registry.register();

        let delivered = registry.broadcast(&latency_frame(20.0));
        assert_eq!(delivered, 3);

        for rx in [&mut rx_a, &mut rx_b, &mut rx_c] {
            let text = rx.try_recv().unwrap();
            assert!(text.contains("latency-update"));
        }
    }

    #[test]
    fn disconnected_subscribers_are_pruned_eagerly() {
        let registry = SubscriberRegistry::new();
        let (_a, rx_a) = registry.register();
        let (_b, _rx_b) = registry.register();
        assert_eq!(registry.subscriber_count(), 2);

        // Peer goes away: its receiver is dropped.
        drop(rx_a);

        let delivered = registry.broadcast(&latency_frame(20.0));
        assert_eq!(delivered, 1);
        assert_eq!(registry.subscriber_count(), 1);
    }

    #[test]
    fn send_to_targets_exactly_one_subscriber() {
        let registry = SubscriberRegistry::new();
        let (id_a, mut rx_a) = registry.register();
        let (_b, mut rx_b) = registry.register();

        assert!(registry.send_to(id_a, &latency_frame(12.0)));
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn send_to_unknown_or_dead_subscriber_is_false() {
        let registry = SubscriberRegistry::new();
        assert!(!registry.send_to(42, &latency_frame(1.0)));

        let (id, rx) = registry.register();
        drop(rx);
        assert!(!registry.send_to(id, &latency_frame(1.0)));
        assert_eq!(registry.subscriber_count(), 0);
    }

    #[test]
    fn deregister_is_idempotent() {
        let registry = SubscriberRegistry::new();
        let (id, _rx) = registry.register();
        registry.deregister(id);
        registry.deregister(id);
        assert_eq!(registry.subscriber_count(), 0);
    }
}
