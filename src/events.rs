use chrono::Utc;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// How many past events a newly-attached subscriber gets replayed.
pub const HISTORY_SIZE: usize = 300;

/// Per-subscriber queue capacity. On overflow the oldest event in that
/// subscriber's queue is dropped; consumers must tolerate gaps.
const SUBSCRIBER_QUEUE_CAP: usize = 512;

#[derive(Debug, Clone)]
pub struct BusEvent {
    pub topic: String,
    pub data: Value,
    pub ts: f64,
}

struct SubscriberQueue {
    events: Mutex<VecDeque<BusEvent>>,
    notify: Notify,
    cap: usize,
}

impl SubscriberQueue {
    fn push(&self, event: BusEvent) {
        let mut q = self.events.lock().unwrap_or_else(|e| e.into_inner());
        if q.len() >= self.cap {
            q.pop_front();
        }
        q.push_back(event);
        drop(q);
        self.notify.notify_one();
    }
}

/// Handle returned by [`EventBus::subscribe`]. Dropping it does not detach
/// the subscriber; call [`EventBus::unsubscribe`] for that.
pub struct Subscription {
    id: u64,
    queue: Arc<SubscriberQueue>,
}

impl Subscription {
    /// Await the next event in publish order. History replay events are
    /// delivered before any event published after subscription.
    pub async fn recv(&self) -> BusEvent {
        loop {
            if let Some(event) = self.try_recv() {
                return event;
            }
            self.queue.notify.notified().await;
        }
    }

    pub fn try_recv(&self) -> Option<BusEvent> {
        self.queue
            .events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

struct BusInner {
    subscribers: Vec<(u64, Arc<SubscriberQueue>)>,
    history: VecDeque<BusEvent>,
    history_cap: usize,
    next_id: u64,
}

/// Thread-safe publish/subscribe bus bridging background loops to live
/// consumers. `publish` never blocks: each subscriber has its own bounded
/// queue, and history is a fixed-size ring replayed to new subscribers.
pub struct EventBus {
    inner: Mutex<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_history(HISTORY_SIZE)
    }

    pub fn with_history(history_cap: usize) -> Self {
        Self {
            inner: Mutex::new(BusInner {
                subscribers: Vec::new(),
                history: VecDeque::with_capacity(history_cap),
                history_cap,
                next_id: 0,
            }),
        }
    }

    /// Publish an event from any task. Appends to history, then fans out to
    /// every attached subscriber queue.
    pub fn publish(&self, topic: &str, data: Value) {
        let event = BusEvent {
            topic: topic.to_string(),
            data,
            ts: now_ts(),
        };

        let queues: Vec<Arc<SubscriberQueue>> = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            if inner.history.len() >= inner.history_cap {
                inner.history.pop_front();
            }
            inner.history.push_back(event.clone());
            inner.subscribers.iter().map(|(_, q)| q.clone()).collect()
        };

        for queue in queues {
            queue.push(event.clone());
        }
    }

    /// Attach a new subscriber. Its queue is pre-loaded with the history
    /// ring, so replay completes before any live event is seen.
    pub fn subscribe(&self) -> Subscription {
        let queue = Arc::new(SubscriberQueue {
            events: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            cap: SUBSCRIBER_QUEUE_CAP,
        });

        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let id = inner.next_id;
        inner.next_id += 1;

        {
            let mut q = queue.events.lock().unwrap_or_else(|e| e.into_inner());
            q.extend(inner.history.iter().cloned());
        }
        inner.subscribers.push((id, queue.clone()));

        Subscription { id, queue }
    }

    /// Detach a subscriber. Idempotent.
    pub fn unsubscribe(&self, sub: &Subscription) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.subscribers.retain(|(id, _)| *id != sub.id);
    }

    pub fn history(&self) -> Vec<BusEvent> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.history.iter().cloned().collect()
    }

    pub fn subscriber_count(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.subscribers.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

pub fn now_ts() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_history_replay_before_live() {
        let bus = EventBus::new();
        bus.publish("a", json!({"n": 1}));
        bus.publish("a", json!({"n": 2}));

        let sub = bus.subscribe();
        bus.publish("a", json!({"n": 3}));

        for expected in 1..=3 {
            let event = sub.recv().await;
            assert_eq!(event.data["n"], expected);
        }
    }

    #[tokio::test]
    async fn test_publish_order_preserved() {
        let bus = EventBus::new();
        let sub = bus.subscribe();
        for n in 0..100 {
            bus.publish("seq", json!({"n": n}));
        }
        for n in 0..100 {
            assert_eq!(sub.recv().await.data["n"], n);
        }
    }

    #[test]
    fn test_history_ring_bounded() {
        let bus = EventBus::with_history(5);
        for n in 0..20 {
            bus.publish("x", json!({"n": n}));
        }
        let history = bus.history();
        assert_eq!(history.len(), 5);
        assert_eq!(history[0].data["n"], 15);
        assert_eq!(history[4].data["n"], 19);
    }

    #[test]
    fn test_slow_subscriber_drops_oldest() {
        let bus = EventBus::with_history(1);
        let sub = bus.subscribe();
        // One from history replay, then flood well past the queue cap.
        for n in 0..2 * SUBSCRIBER_QUEUE_CAP {
            bus.publish("x", json!({"n": n}));
        }
        // First surviving event is not the first published: a gap happened.
        let first = sub.try_recv().expect("queue should not be empty");
        assert!(first.data["n"].as_u64().unwrap() > 0);
        // But the newest event survived.
        let mut last = first;
        while let Some(event) = sub.try_recv() {
            last = event;
        }
        assert_eq!(last.data["n"], 2 * SUBSCRIBER_QUEUE_CAP as u64 - 1);
    }

    #[test]
    fn test_unsubscribe_idempotent() {
        let bus = EventBus::new();
        let sub = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        bus.unsubscribe(&sub);
        bus.unsubscribe(&sub);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
