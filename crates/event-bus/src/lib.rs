use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{trace, warn};

use flowpilot_core_types::CoreError;

/// Trait implemented by payload types that can be carried on the bus.
pub trait Event: Clone + Send + Sync + std::fmt::Debug + 'static {}

impl<T> Event for T where T: Clone + Send + Sync + std::fmt::Debug + 'static {}

#[async_trait]
pub trait EventBus<E>: Send + Sync
where
    E: Event,
{
    /// Publish an event, returning how many subscribers received it.
    async fn publish(&self, event: E) -> Result<usize, CoreError>;
    fn subscribe(&self) -> Subscription<E>;
}

type Filter<E> = Box<dyn Fn(&E) -> bool + Send + Sync>;

/// In-process broadcast bus shared by every execution.
pub struct InMemoryBus<E>
where
    E: Event,
{
    sender: broadcast::Sender<E>,
}

impl<E> InMemoryBus<E>
where
    E: Event,
{
    pub fn new(capacity: usize) -> Arc<Self> {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Arc::new(Self { sender })
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Synchronous variant of [`EventBus::publish`] for callers outside an async context.
    pub fn send(&self, event: E) -> usize {
        self.sender.send(event).unwrap_or_else(|_| {
            trace!("event dropped: bus has no subscribers");
            0
        })
    }

    /// Subscription that only yields events accepted by `filter`.
    pub fn subscribe_filtered<F>(&self, filter: F) -> Subscription<E>
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        Subscription {
            receiver: self.sender.subscribe(),
            filter: Some(Box::new(filter)),
            missed: 0,
        }
    }
}

#[async_trait]
impl<E> EventBus<E> for InMemoryBus<E>
where
    E: Event,
{
    async fn publish(&self, event: E) -> Result<usize, CoreError> {
        Ok(self.send(event))
    }

    fn subscribe(&self) -> Subscription<E> {
        Subscription {
            receiver: self.sender.subscribe(),
            filter: None,
            missed: 0,
        }
    }
}

/// Receiving end of the bus.
///
/// Slow subscribers skip what the channel already overwrote instead of failing; the number of
/// skipped events is available from [`Subscription::missed`].
pub struct Subscription<E>
where
    E: Event,
{
    receiver: broadcast::Receiver<E>,
    filter: Option<Filter<E>>,
    missed: u64,
}

impl<E> Subscription<E>
where
    E: Event,
{
    /// Next matching event, or `None` once the bus is gone.
    pub async fn next(&mut self) -> Option<E> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.as_ref().map_or(true, |accept| accept(&event)) {
                        return Some(event);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    self.missed += skipped;
                    warn!(skipped, "bus subscriber lagged; events dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn missed(&self) -> u64 {
        self.missed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn publish_without_subscribers_is_not_an_error() {
        let bus = InMemoryBus::<u32>::new(8);
        assert_eq!(bus.publish(1).await.unwrap(), 0);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn subscribers_observe_events_in_order() {
        let bus = InMemoryBus::<u32>::new(8);
        let mut sub = bus.subscribe();
        for value in 0..3 {
            assert_eq!(bus.publish(value).await.unwrap(), 1);
        }
        for expected in 0..3 {
            assert_eq!(sub.next().await, Some(expected));
        }
    }

    #[tokio::test]
    async fn filtered_subscription_skips_other_events() {
        let bus = InMemoryBus::<u32>::new(8);
        let mut evens = bus.subscribe_filtered(|value| value % 2 == 0);
        for value in 1..=4 {
            bus.send(value);
        }
        assert_eq!(evens.next().await, Some(2));
        assert_eq!(evens.next().await, Some(4));
    }

    #[tokio::test]
    async fn lagging_subscriber_resumes_with_newest_events() {
        let bus = InMemoryBus::<u32>::new(2);
        let mut sub = bus.subscribe();
        for value in 0..5 {
            bus.send(value);
        }
        assert_eq!(sub.next().await, Some(3));
        assert_eq!(sub.missed(), 3);
    }

    #[tokio::test]
    async fn subscription_ends_when_bus_is_dropped() {
        let bus = InMemoryBus::<u32>::new(2);
        let mut sub = bus.subscribe();
        drop(bus);
        let next = timeout(Duration::from_secs(1), sub.next())
            .await
            .expect("closed bus resolves");
        assert_eq!(next, None);
    }
}
