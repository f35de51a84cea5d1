// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Topic-based in-process fan-out (spec.md §4.A).
//!
//! Publish is best-effort per subscriber: a saturated subscriber's queue
//! drops the event rather than blocking the publisher. Slow consumers must
//! not wedge the daemon.

use crate::Event;
use parking_lot::Mutex;
use smol_str::SmolStr;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

/// An event as delivered to a subscriber: the full topic string (including
/// any `:suffix`) alongside the payload.
#[derive(Debug, Clone)]
pub struct BusEvent {
    pub topic: SmolStr,
    pub payload: Event,
}

const DEFAULT_CAPACITY: usize = 32;

struct Subscriber {
    id: u64,
    topics: HashSet<SmolStr>,
    tx: mpsc::Sender<BusEvent>,
}

/// Handle returned by [`EventBus::subscribe`]. Holding the receiver end and
/// dropping the handle without calling [`EventBus::unsubscribe`] leaves a
/// dead registry entry until the next publish notices the closed channel.
pub struct SubscriberHandle {
    id: u64,
    rx: mpsc::Receiver<BusEvent>,
}

impl SubscriberHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn recv(&mut self) -> Option<BusEvent> {
        self.rx.recv().await
    }
}

#[derive(Default)]
struct Registry {
    subscribers: Vec<Subscriber>,
}

/// Topic → subscriber fan-out bus (spec.md §4.A).
#[derive(Clone)]
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
    next_id: Arc<AtomicU64>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self { registry: Arc::new(Mutex::new(Registry::default())), next_id: Arc::new(AtomicU64::new(1)) }
    }

    /// Subscribe to a set of topic prefixes (the part of a published topic
    /// string before any `:suffix`).
    pub fn subscribe(&self, topics: impl IntoIterator<Item = impl Into<SmolStr>>) -> SubscriberHandle {
        self.subscribe_with_capacity(topics, DEFAULT_CAPACITY)
    }

    pub fn subscribe_with_capacity(
        &self,
        topics: impl IntoIterator<Item = impl Into<SmolStr>>,
        capacity: usize,
    ) -> SubscriberHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let topics = topics.into_iter().map(Into::into).collect();
        self.registry.lock().subscribers.push(Subscriber { id, topics, tx });
        SubscriberHandle { id, rx }
    }

    /// Idempotent: unsubscribing an unknown or already-removed id is a no-op.
    pub fn unsubscribe(&self, handle: &SubscriberHandle) {
        self.registry.lock().subscribers.retain(|s| s.id != handle.id);
    }

    /// Publish `payload` under `topic`. `topic` may carry a `:suffix`
    /// (e.g. `"backup:<uuid>"`); the prefix before `:` is matched against
    /// each subscriber's topic set, and the full string travels with the
    /// event. Saturated subscribers drop the event; this never blocks.
    pub fn publish(&self, topic: impl AsRef<str>, payload: Event) {
        let topic = topic.as_ref();
        let prefix = topic.split(':').next().unwrap_or(topic);
        let event = BusEvent { topic: SmolStr::new(topic), payload };

        let mut registry = self.registry.lock();
        registry.subscribers.retain_mut(|sub| {
            if !sub.topics.contains(prefix) {
                return true;
            }
            match sub.tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(subscriber_id = sub.id, topic = %event.topic, "subscriber queue full, dropping event");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }

    /// Closes every subscriber queue and clears the registry.
    pub fn destroy(&self) {
        self.registry.lock().subscribers.clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.lock().subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ProcState;

    #[tokio::test]
    async fn delivers_only_to_matching_topic() {
        let bus = EventBus::new();
        let mut status_sub = bus.subscribe(["status"]);
        let mut console_sub = bus.subscribe(["console output"]);

        bus.publish("status", Event::StateChange(ProcState::Running));

        let received = status_sub.recv().await.unwrap();
        assert_eq!(received.topic.as_str(), "status");
        assert!(matches!(received.payload, Event::StateChange(ProcState::Running)));

        // console subscriber got nothing; prove it by trying a non-blocking poll.
        assert!(console_sub.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn topic_suffix_is_preserved_but_prefix_is_the_subscription_key() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(["backup completed"]);
        bus.publish(
            "backup completed:9b1f",
            Event::BackupCompleted { backup_id: "9b1f".into(), successful: true },
        );
        let event = sub.recv().await.unwrap();
        assert_eq!(event.topic.as_str(), "backup completed:9b1f");
    }

    #[tokio::test]
    async fn full_queue_drops_event_without_blocking_publisher() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe_with_capacity(["status"], 1);
        bus.publish("status", Event::StateChange(ProcState::Starting));
        // Queue now full (capacity 1); this publish must drop, not block.
        bus.publish("status", Event::StateChange(ProcState::Running));

        let first = sub.recv().await.unwrap();
        assert!(matches!(first.payload, Event::StateChange(ProcState::Starting)));
        assert!(sub.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent() {
        let bus = EventBus::new();
        let handle = bus.subscribe(["status"]);
        bus.unsubscribe(&handle);
        bus.unsubscribe(&handle);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn dropped_receiver_is_pruned_on_next_publish() {
        let bus = EventBus::new();
        let handle = bus.subscribe(["status"]);
        drop(handle);
        bus.publish("status", Event::StateChange(ProcState::Offline));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn destroy_clears_registry() {
        let bus = EventBus::new();
        let _h1 = bus.subscribe(["status"]);
        let _h2 = bus.subscribe(["stats"]);
        bus.destroy();
        assert_eq!(bus.subscriber_count(), 0);
    }
}
