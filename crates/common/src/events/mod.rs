//! The event hub: fan-out from operation workers to HTTP stream subscribers
//!
//! Grounded on the teacher's `EventBus` (a `tokio::sync::broadcast` wrapper),
//! generalized per spec.md §4.10: broadcast's built-in behavior for a slow
//! reader is to silently skip ahead (`RecvError::Lagged`), but the event hub
//! contract requires a slow subscriber to be disconnected outright once its
//! bounded queue overflows, and requires a heartbeat plus a reaped-on-silence
//! liveness check per subscription. That needs an explicit per-subscriber
//! registry rather than a single broadcast channel, so this module keeps the
//! teacher's non-blocking-publish, tokio-channel idiom but replaces
//! `broadcast` with a `HashMap` of bounded `mpsc` senders.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::time::Instant;

/// Default bounded per-subscriber queue depth (spec.md §4.10: "e.g. 256").
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 256;
/// Default heartbeat interval (spec.md §4.10: "every 15 seconds (configurable)").
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Event kinds a subscriber can filter on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    OperationProgress,
    OperationStatus,
    OperationLog,
    SystemStatus,
    SystemHeartbeat,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::OperationProgress => "operation.progress",
            EventKind::OperationStatus => "operation.status",
            EventKind::OperationLog => "operation.log",
            EventKind::SystemStatus => "system.status",
            EventKind::SystemHeartbeat => "system.heartbeat",
        }
    }
}

/// A published event: a kind, an optional owning operation id (used for
/// per-operation filtering), and a JSON payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub operation_id: Option<String>,
    pub payload: serde_json::Value,
}

impl Event {
    pub fn new(kind: EventKind, operation_id: Option<String>, payload: serde_json::Value) -> Self {
        Self {
            kind,
            operation_id,
            payload,
        }
    }

    pub fn heartbeat() -> Self {
        Self::new(EventKind::SystemHeartbeat, None, serde_json::json!({}))
    }
}

/// A subscriber's filter: an allowlist of kinds (empty = all kinds) and an
/// allowlist of operation ids (empty = all operations).
#[derive(Debug, Clone, Default)]
pub struct Filter {
    pub kinds: Vec<EventKind>,
    pub operation_ids: Vec<String>,
}

impl Filter {
    pub fn matches(&self, event: &Event) -> bool {
        let kind_ok = self.kinds.is_empty() || self.kinds.contains(&event.kind);
        let op_ok = self.operation_ids.is_empty()
            || event
                .operation_id
                .as_deref()
                .is_some_and(|id| self.operation_ids.iter().any(|x| x == id));
        kind_ok && op_ok
    }
}

struct SubscriberEntry {
    tx: mpsc::Sender<Event>,
    filter: Filter,
    last_seen: Arc<RwLock<Instant>>,
}

/// A live subscription handle. Dropping it unsubscribes implicitly once the
/// hub notices the channel is closed; callers SHOULD also call
/// `EventHub::unsubscribe` for prompt cleanup.
pub struct Subscription {
    pub id: u64,
    rx: mpsc::Receiver<Event>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }
}

/// Fan-out broker from operation/system producers to HTTP stream consumers.
///
/// `Publish` never blocks: it uses `try_send` against each subscriber's
/// bounded channel, and a subscriber whose channel is full is disconnected
/// rather than allowed to stall the producer (spec.md §4.10).
#[derive(Clone)]
pub struct EventHub {
    inner: Arc<RwLock<HashMap<u64, SubscriberEntry>>>,
    next_id: Arc<AtomicU64>,
    capacity: usize,
    heartbeat_interval: Duration,
}

impl EventHub {
    pub fn new(capacity: usize, heartbeat_interval: Duration) -> Self {
        let hub = Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            capacity,
            heartbeat_interval,
        };
        hub.spawn_heartbeat_task();
        hub
    }

    /// Subscribe with a filter. Returns a handle that yields matching events
    /// (including heartbeats, which always pass every filter) until the hub
    /// disconnects it or the caller drops it.
    pub async fn subscribe(&self, filter: Filter) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(self.capacity);
        let entry = SubscriberEntry {
            tx,
            filter,
            last_seen: Arc::new(RwLock::new(Instant::now())),
        };
        self.inner.write().await.insert(id, entry);
        Subscription { id, rx }
    }

    pub async fn unsubscribe(&self, id: u64) {
        self.inner.write().await.remove(&id);
    }

    /// Publish an event to every matching, still-connected subscriber.
    /// Non-blocking: a subscriber whose queue is full is dropped.
    pub async fn publish(&self, event: Event) {
        let mut dead = Vec::new();
        {
            let subs = self.inner.read().await;
            for (id, sub) in subs.iter() {
                if !sub.filter.matches(&event) {
                    continue;
                }
                match sub.tx.try_send(event.clone()) {
                    Ok(()) => *sub.last_seen.write().await = Instant::now(),
                    Err(_) => dead.push(*id),
                }
            }
        }
        if !dead.is_empty() {
            let mut subs = self.inner.write().await;
            for id in dead {
                subs.remove(&id);
            }
        }
    }

    pub async fn subscriber_count(&self) -> usize {
        self.inner.read().await.len()
    }

    fn spawn_heartbeat_task(&self) {
        let inner = Arc::clone(&self.inner);
        let interval = self.heartbeat_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let event = Event::heartbeat();
                let mut dead = Vec::new();
                let deadline = interval * 2;
                {
                    let subs = inner.read().await;
                    for (id, sub) in subs.iter() {
                        if sub.last_seen.read().await.elapsed() > deadline {
                            dead.push(*id);
                            continue;
                        }
                        match sub.tx.try_send(event.clone()) {
                            Ok(()) => *sub.last_seen.write().await = Instant::now(),
                            Err(_) => dead.push(*id),
                        }
                    }
                }
                if !dead.is_empty() {
                    let mut subs = inner.write().await;
                    for id in dead {
                        subs.remove(&id);
                    }
                }
            }
        });
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_CAPACITY, DEFAULT_HEARTBEAT_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_delivers_to_matching_subscriber() {
        let hub = EventHub::new(8, Duration::from_secs(3600));
        let mut sub = hub.subscribe(Filter::default()).await;
        hub.publish(Event::new(
            EventKind::OperationStatus,
            Some("op-1".into()),
            serde_json::json!({"state": "running"}),
        ))
        .await;
        let event = sub.recv().await.expect("event delivered");
        assert_eq!(event.kind, EventKind::OperationStatus);
    }

    #[tokio::test]
    async fn filter_excludes_non_matching_operation_id() {
        let hub = EventHub::new(8, Duration::from_secs(3600));
        let mut sub = hub
            .subscribe(Filter {
                kinds: vec![],
                operation_ids: vec!["op-1".into()],
            })
            .await;
        hub.publish(Event::new(
            EventKind::OperationProgress,
            Some("op-2".into()),
            serde_json::json!({}),
        ))
        .await;
        hub.publish(Event::new(
            EventKind::OperationProgress,
            Some("op-1".into()),
            serde_json::json!({"current": 1}),
        ))
        .await;
        let event = sub.recv().await.expect("event delivered");
        assert_eq!(event.operation_id.as_deref(), Some("op-1"));
    }

    #[tokio::test]
    async fn overflowing_subscriber_is_disconnected() {
        let hub = EventHub::new(1, Duration::from_secs(3600));
        let sub = hub.subscribe(Filter::default()).await;
        for _ in 0..5 {
            hub.publish(Event::new(
                EventKind::SystemStatus,
                None,
                serde_json::json!({}),
            ))
            .await;
        }
        assert_eq!(hub.subscriber_count().await, 0);
        drop(sub);
    }

    #[tokio::test]
    async fn publish_never_blocks_without_subscribers() {
        let hub = EventHub::new(4, Duration::from_secs(3600));
        hub.publish(Event::new(EventKind::SystemStatus, None, serde_json::json!({})))
            .await;
        assert_eq!(hub.subscriber_count().await, 0);
    }
}
