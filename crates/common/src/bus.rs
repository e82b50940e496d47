//! In-process publish/subscribe bus.
//!
//! Publishing never blocks and never fails: events published while nobody is
//! subscribed are dropped, and slow subscribers observe
//! [`broadcast::error::RecvError::Lagged`] instead of stalling the publisher.

use {tokio::sync::broadcast, tracing::trace};

/// Default number of events buffered per subscriber.
pub const DEFAULT_CAPACITY: usize = 256;

/// Typed fan-out bus. Every subscriber sees every event published after it
/// subscribed, in publish order.
#[derive(Debug)]
pub struct EventBus<E> {
    sender: broadcast::Sender<E>,
}

impl<E: Clone + Send + 'static> EventBus<E> {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Register a new subscriber.
    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.sender.subscribe()
    }

    /// Publish an event, returning how many subscribers will receive it.
    pub fn publish(&self, event: E) -> usize {
        match self.sender.send(event) {
            Ok(delivered) => delivered,
            Err(_) => {
                trace!("event published with no subscribers");
                0
            },
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<E: Clone + Send + 'static> Default for EventBus<E> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl<E> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_in_publish_order() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        assert_eq!(bus.publish(1u32), 1);
        assert_eq!(bus.publish(2u32), 1);

        assert_eq!(rx.recv().await.unwrap(), 1);
        assert_eq!(rx.recv().await.unwrap(), 2);
    }

    #[test]
    fn publish_without_subscribers_is_dropped() {
        let bus: EventBus<&'static str> = EventBus::default();
        assert_eq!(bus.publish("lost"), 0);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn clones_share_subscribers() {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();
        let other = bus.clone();

        other.publish("from clone");
        assert_eq!(rx.recv().await.unwrap(), "from clone");
        assert_eq!(other.subscriber_count(), 1);
    }
}
