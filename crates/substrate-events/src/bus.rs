//! In-process fan-out from `append` to live `subscribe` callers.
//!
//! Adapted from a simple `Mutex<Vec<Sender>>` broadcast pattern, swapped to
//! bounded `tokio::sync::mpsc` channels so a slow subscriber can't grow
//! memory without bound. A full channel gets a terminal `Delivery::Lagged`
//! instead of a silently dropped event, then is removed from the fan-out
//! list.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::{self, Receiver, Sender};

use crate::event::Event;

/// Default bounded channel capacity per subscriber.
const CHANNEL_CAPACITY: usize = 1024;

/// A message delivered to a subscriber: either the next event, or a terminal
/// notice that this subscriber fell behind and must re-subscribe (reading
/// the gap via `EventStore::read` first).
#[derive(Debug, Clone)]
pub enum Delivery {
    Event(Event),
    Lagged,
}

#[derive(Clone)]
pub struct SubscriptionBus {
    subscribers: Arc<Mutex<HashMap<String, Vec<Sender<Delivery>>>>>,
}

impl SubscriptionBus {
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Registers a new subscriber for `project_key`. `since_sequence` is
    /// accepted for symmetry with `EventStore::read` callers that first
    /// catch up via `read` then subscribe for what comes after — the bus
    /// itself only ever delivers events appended after this call.
    pub fn subscribe(&self, project_key: &str, _since_sequence: i64) -> Receiver<Delivery> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        self.subscribers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .entry(project_key.to_string())
            .or_default()
            .push(tx);
        rx
    }

    /// Fans `event` out to every live subscriber of its project. A
    /// subscriber whose channel is full is sent `Delivery::Lagged` (best
    /// effort, non-blocking) and dropped from the list; one that's closed
    /// is dropped silently.
    pub fn publish(&self, project_key: &str, event: Event) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let Some(senders) = subscribers.get_mut(project_key) else {
            return;
        };

        senders.retain_mut(|tx| match tx.try_send(Delivery::Event(event.clone())) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                let _ = tx.try_send(Delivery::Lagged);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }
}

impl Default for SubscriptionBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event(sequence: i64) -> Event {
        Event {
            id: sequence,
            project_key: "proj-a".to_string(),
            event_type: "agent_registered".to_string(),
            sequence,
            timestamp_ms: 0,
            data: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn subscriber_receives_published_events_in_order() {
        let bus = SubscriptionBus::new();
        let mut rx = bus.subscribe("proj-a", 0);

        bus.publish("proj-a", sample_event(1));
        bus.publish("proj-a", sample_event(2));

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        match (first, second) {
            (Delivery::Event(a), Delivery::Event(b)) => {
                assert_eq!(a.sequence, 1);
                assert_eq!(b.sequence, 2);
            }
            _ => panic!("expected two events"),
        }
    }

    #[tokio::test]
    async fn other_projects_do_not_receive_events() {
        let bus = SubscriptionBus::new();
        let mut rx = bus.subscribe("proj-b", 0);

        bus.publish("proj-a", sample_event(1));

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn full_channel_gets_lagged_and_is_dropped() {
        let bus = SubscriptionBus::new();
        let mut rx = bus.subscribe("proj-a", 0);

        for seq in 0..(CHANNEL_CAPACITY as i64 + 5) {
            bus.publish("proj-a", sample_event(seq));
        }

        let mut saw_lagged = false;
        while let Ok(delivery) = rx.try_recv() {
            if matches!(delivery, Delivery::Lagged) {
                saw_lagged = true;
            }
        }
        assert!(saw_lagged);

        bus.publish("proj-a", sample_event(9999));
        assert!(rx.try_recv().is_err());
    }
}
