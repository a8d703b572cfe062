use crate::event::Event;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, trace, warn};

pub const DEFAULT_CAPACITY: usize = 256;

/// What a publisher does when a subscriber's queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// Discard the subscriber's oldest queued event. Publishers never wait.
    #[default]
    DropOldest,
    /// Wait until the subscriber makes room.
    BlockPublisher,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusConfig {
    /// Per-subscriber queue length. Under `DropOldest` it is rounded up to
    /// a power of two.
    pub capacity: usize,
    pub policy: BackpressurePolicy,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            policy: BackpressurePolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Publishing end of one subscriber's queue.
#[derive(Clone)]
enum Sender {
    /// A lagging receiver loses the oldest events.
    Lossy(broadcast::Sender<Event>),
    Bounded(mpsc::Sender<Event>),
}

enum Receiver {
    Lossy(broadcast::Receiver<Event>),
    Bounded(mpsc::Receiver<Event>),
}

struct Inner {
    config: BusConfig,
    subscribers: Mutex<HashMap<SubscriptionId, Sender>>,
    next_id: AtomicU64,
}

impl Inner {
    fn remove(&self, id: SubscriptionId) -> Option<Sender> {
        lock(&self.subscribers).remove(&id)
    }
}

/// Process-wide publish/subscribe channel for lifecycle events.
///
/// Every subscriber has its own bounded queue, so a slow subscriber only
/// ever affects itself under [`BackpressurePolicy::DropOldest`]. Cloning
/// the bus shares it; subscriptions end when the last clone is dropped.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl EventBus {
    pub fn new(config: BusConfig) -> Self {
        let config = BusConfig {
            capacity: config.capacity.max(1),
            ..config
        };
        Self {
            inner: Arc::new(Inner {
                config,
                subscribers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> BusConfig {
        self.inner.config
    }

    pub fn subscribe(&self) -> Subscription {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let capacity = self.inner.config.capacity;
        let (sender, receiver) = match self.inner.config.policy {
            BackpressurePolicy::DropOldest => {
                let (tx, rx) = broadcast::channel(capacity);
                (Sender::Lossy(tx), Receiver::Lossy(rx))
            }
            BackpressurePolicy::BlockPublisher => {
                let (tx, rx) = mpsc::channel(capacity);
                (Sender::Bounded(tx), Receiver::Bounded(rx))
            }
        };
        lock(&self.inner.subscribers).insert(id, sender);
        debug!(subscription = %id, "Event subscriber added");
        Subscription {
            id,
            receiver,
            dropped: 0,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Detach a subscriber. Events already queued for it can still be
    /// received. Returns false if `id` was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        match self.inner.remove(id) {
            Some(_) => {
                debug!(subscription = %id, "Event subscriber removed");
                true
            }
            None => false,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner.subscribers).len()
    }

    /// Deliver `event` to every current subscriber. Returns how many
    /// subscribers it was queued for.
    pub async fn publish(&self, event: Event) -> usize {
        let senders: Vec<Sender> = lock(&self.inner.subscribers).values().cloned().collect();
        trace!(event = %event.name, workspace = %event.payload.workspace_name, subscribers = senders.len(), "Publishing event");

        let mut delivered = 0;
        for sender in senders {
            let queued = match sender {
                Sender::Lossy(tx) => tx.send(event.clone()).is_ok(),
                Sender::Bounded(tx) => tx.send(event.clone()).await.is_ok(),
            };
            if queued {
                delivered += 1;
            }
        }
        delivered
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("config", &self.inner.config)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// A live subscription. Dropping it unsubscribes.
pub struct Subscription {
    id: SubscriptionId,
    receiver: Receiver,
    dropped: u64,
    bus: Weak<Inner>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// The next event, or `None` once the subscription has been detached
    /// (or the bus dropped) and its queue is drained.
    pub async fn recv(&mut self) -> Option<Event> {
        match &mut self.receiver {
            Receiver::Lossy(rx) => loop {
                match rx.recv().await {
                    Ok(event) => return Some(event),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(subscription = %self.id, missed, "Event subscriber fell behind");
                        self.dropped += missed;
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            },
            Receiver::Bounded(rx) => rx.recv().await,
        }
    }

    pub fn try_recv(&mut self) -> Option<Event> {
        match &mut self.receiver {
            Receiver::Lossy(rx) => loop {
                match rx.try_recv() {
                    Ok(event) => return Some(event),
                    Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                        self.dropped += missed;
                    }
                    Err(_) => return None,
                }
            },
            Receiver::Bounded(rx) => rx.try_recv().ok(),
        }
    }

    /// Events this subscriber missed because its queue was full. Counted
    /// as the gap is noticed on receive.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.bus.upgrade() {
            inner.remove(self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("dropped", &self.dropped)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventName;
    use std::time::Duration;

    fn created(workspace: &str) -> Event {
        Event::workspace(EventName::Created, workspace)
    }

    #[tokio::test]
    async fn test_fan_out_preserves_order() {
        let bus = EventBus::default();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        assert_eq!(bus.publish(Event::workspace(EventName::Creating, "a")).await, 2);
        assert_eq!(bus.publish(created("a")).await, 2);

        for sub in [&mut first, &mut second] {
            assert_eq!(sub.recv().await.unwrap().name, EventName::Creating);
            assert_eq!(sub.recv().await.unwrap().name, EventName::Created);
            assert!(sub.try_recv().is_none());
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = EventBus::default();
        assert_eq!(bus.publish(created("a")).await, 0);
    }

    #[tokio::test]
    async fn test_drop_oldest_keeps_newest_events() {
        let bus = EventBus::new(BusConfig {
            capacity: 2,
            policy: BackpressurePolicy::DropOldest,
        });
        let mut slow = bus.subscribe();

        for name in ["one", "two", "three"] {
            bus.publish(created(name)).await;
        }

        assert_eq!(slow.recv().await.unwrap().payload.workspace_name, "two");
        assert_eq!(slow.dropped(), 1);
        assert_eq!(slow.recv().await.unwrap().payload.workspace_name, "three");
        assert!(slow.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_try_recv_skips_over_missed_events() {
        let bus = EventBus::new(BusConfig {
            capacity: 4,
            policy: BackpressurePolicy::DropOldest,
        });
        let mut slow = bus.subscribe();

        for i in 0..10 {
            assert_eq!(bus.publish(created(&format!("ws-{i}"))).await, 1);
        }

        let names: Vec<String> = std::iter::from_fn(|| slow.try_recv())
            .map(|event| event.payload.workspace_name)
            .collect();
        assert_eq!(names, vec!["ws-6", "ws-7", "ws-8", "ws-9"]);
        assert_eq!(slow.dropped(), 6);
    }

    #[tokio::test]
    async fn test_block_publisher_never_drops() {
        let bus = EventBus::new(BusConfig {
            capacity: 2,
            policy: BackpressurePolicy::BlockPublisher,
        });
        let mut sub = bus.subscribe();

        let publisher = {
            let bus = bus.clone();
            tokio::spawn(async move {
                for i in 0..5 {
                    bus.publish(created(&format!("ws-{i}"))).await;
                }
            })
        };

        for i in 0..5 {
            let event = sub.recv().await.unwrap();
            assert_eq!(event.payload.workspace_name, format!("ws-{i}"));
        }
        publisher.await.unwrap();
        assert_eq!(sub.dropped(), 0);
    }

    #[tokio::test]
    async fn test_slow_subscriber_does_not_hold_back_others() {
        let bus = EventBus::new(BusConfig {
            capacity: 1,
            policy: BackpressurePolicy::DropOldest,
        });
        let _slow = bus.subscribe();
        let mut fast = bus.subscribe();

        for name in ["one", "two"] {
            bus.publish(created(name)).await;
            assert_eq!(fast.recv().await.unwrap().payload.workspace_name, name);
        }
    }

    #[tokio::test]
    async fn test_block_publisher_waits_for_room() {
        let bus = EventBus::new(BusConfig {
            capacity: 1,
            policy: BackpressurePolicy::BlockPublisher,
        });
        let mut sub = bus.subscribe();
        bus.publish(created("one")).await;

        let publisher = {
            let bus = bus.clone();
            tokio::spawn(async move { bus.publish(created("two")).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!publisher.is_finished());

        assert_eq!(sub.recv().await.unwrap().payload.workspace_name, "one");
        assert_eq!(publisher.await.unwrap(), 1);
        assert_eq!(sub.recv().await.unwrap().payload.workspace_name, "two");
        assert_eq!(sub.dropped(), 0);
    }

    #[tokio::test]
    async fn test_blocked_publisher_released_when_subscriber_leaves() {
        let bus = EventBus::new(BusConfig {
            capacity: 1,
            policy: BackpressurePolicy::BlockPublisher,
        });
        let sub = bus.subscribe();
        bus.publish(created("one")).await;

        let publisher = {
            let bus = bus.clone();
            tokio::spawn(async move { bus.publish(created("two")).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(sub);

        let delivered = tokio::time::timeout(Duration::from_secs(1), publisher)
            .await
            .expect("publisher stayed blocked")
            .unwrap();
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_drains_then_ends() {
        let bus = EventBus::default();
        let mut sub = bus.subscribe();
        bus.publish(created("a")).await;

        assert!(bus.unsubscribe(sub.id()));
        assert!(!bus.unsubscribe(sub.id()));
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.publish(created("b")).await, 0);

        assert_eq!(sub.recv().await.unwrap().payload.workspace_name, "a");
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_dropping_subscription_unsubscribes() {
        let bus = EventBus::default();
        let sub = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        drop(sub);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_recv_ends_when_bus_dropped() {
        let bus = EventBus::default();
        let mut sub = bus.subscribe();
        let waiter = tokio::spawn(async move { sub.recv().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(bus);
        assert!(waiter.await.unwrap().is_none());
    }
}
