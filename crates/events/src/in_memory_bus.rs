//! In-memory event bus.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::broadcast;

use atelier_core::ProjectId;

use crate::bus::{BusError, EventBus, Subscription};

/// Default per-project buffer.
pub const DEFAULT_CAPACITY: usize = 256;

/// In-memory pub/sub bus with one broadcast channel per project.
///
/// - Channels are created lazily on first subscribe
/// - A channel is dropped once a publish finds no live receivers
#[derive(Debug)]
pub struct InMemoryEventBus<M> {
    capacity: usize,
    topics: Mutex<HashMap<ProjectId, broadcast::Sender<M>>>,
}

impl<M> InMemoryEventBus<M> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            topics: Mutex::new(HashMap::new()),
        }
    }

    /// Number of live subscribers for a project.
    pub fn subscriber_count(&self, topic: ProjectId) -> usize {
        self.topics
            .lock()
            .ok()
            .and_then(|t| t.get(&topic).map(|tx| tx.receiver_count()))
            .unwrap_or(0)
    }
}

impl<M> Default for InMemoryEventBus<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> EventBus<M> for InMemoryEventBus<M>
where
    M: Clone + Send + Sync + 'static,
{
    fn publish(&self, topic: ProjectId, message: M) -> Result<usize, BusError> {
        let mut topics = self.topics.lock().map_err(|_| BusError::Poisoned)?;

        let Some(tx) = topics.get(&topic) else {
            return Ok(0);
        };

        match tx.send(message) {
            Ok(delivered) => Ok(delivered),
            Err(_) => {
                // Every receiver is gone.
                topics.remove(&topic);
                Ok(0)
            }
        }
    }

    fn subscribe(&self, topic: ProjectId) -> Subscription<M> {
        let receiver = match self.topics.lock() {
            Ok(mut topics) => topics
                .entry(topic)
                .or_insert_with(|| broadcast::channel(self.capacity).0)
                .subscribe(),
            // A poisoned bus still hands out a subscription; it just never
            // receives anything.
            Err(_) => broadcast::channel(1).1,
        };
        Subscription::new(receiver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn every_subscriber_gets_every_event() {
        let bus: InMemoryEventBus<u32> = InMemoryEventBus::new();
        let project = ProjectId::new();
        let mut a = bus.subscribe(project);
        let mut b = bus.subscribe(project);

        assert_eq!(bus.publish(project, 1).unwrap(), 2);
        assert_eq!(bus.publish(project, 2).unwrap(), 2);

        assert_eq!(a.recv().await, Some(1));
        assert_eq!(a.recv().await, Some(2));
        assert_eq!(b.recv().await, Some(1));
        assert_eq!(b.recv().await, Some(2));
    }

    #[tokio::test]
    async fn topics_are_isolated() {
        let bus: InMemoryEventBus<&'static str> = InMemoryEventBus::new();
        let p1 = ProjectId::new();
        let p2 = ProjectId::new();
        let mut sub = bus.subscribe(p1);

        bus.publish(p2, "other").unwrap();
        bus.publish(p1, "mine").unwrap();

        assert_eq!(sub.recv().await, Some("mine"));
        assert_eq!(sub.try_recv(), None);
    }

    #[test]
    fn publish_without_subscribers_is_ok() {
        let bus: InMemoryEventBus<u8> = InMemoryEventBus::new();
        assert_eq!(bus.publish(ProjectId::new(), 7).unwrap(), 0);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus: Arc<InMemoryEventBus<u8>> = Arc::new(InMemoryEventBus::new());
        let project = ProjectId::new();
        let sub = bus.subscribe(project);
        assert_eq!(bus.subscriber_count(project), 1);
        drop(sub);

        assert_eq!(bus.publish(project, 1).unwrap(), 0);
        assert_eq!(bus.subscriber_count(project), 0);
    }

    #[tokio::test]
    async fn lagging_subscriber_skips_to_newer_events() {
        let bus: InMemoryEventBus<u32> = InMemoryEventBus::with_capacity(2);
        let project = ProjectId::new();
        let mut sub = bus.subscribe(project);

        for i in 0..5 {
            bus.publish(project, i).unwrap();
        }

        assert_eq!(sub.recv().await, Some(3));
        assert_eq!(sub.recv().await, Some(4));
    }
}
