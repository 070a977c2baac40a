//! Bounded event bus.
//!
//! A thin wrapper over a bounded `tokio` channel fixing the engine-wide
//! overflow policy: producers are backpressured, events are never dropped.

use tokio::sync::mpsc;

/// Sending half of a bounded event queue.
#[derive(Debug)]
pub struct EventBus<T> {
    tx: mpsc::Sender<T>,
}

impl<T> Clone for EventBus<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T: Send> EventBus<T> {
    /// Creates a bus with the given capacity, returning the consumer end.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<T>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Publishes an event, waiting for queue space when the bus is full.
    ///
    /// # Errors
    /// Returns the event back if every consumer has gone away.
    pub async fn publish(&self, event: T) -> Result<(), BusClosed<T>> {
        self.tx.send(event).await.map_err(|e| BusClosed(e.0))
    }

    /// Number of queued events the bus can still absorb without blocking.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.tx.capacity()
    }
}

/// The consumer side of the bus has been dropped; carries the undelivered
/// event.
#[derive(Debug)]
pub struct BusClosed<T>(pub T);

impl<T> std::fmt::Display for BusClosed<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "event bus closed")
    }
}

impl<T: std::fmt::Debug> std::error::Error for BusClosed<T> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_and_receive_in_order() {
        let (bus, mut rx) = EventBus::channel(4);
        bus.publish(1u32).await.unwrap();
        bus.publish(2u32).await.unwrap();
        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, Some(2));
    }

    #[tokio::test]
    async fn test_publish_backpressures_instead_of_dropping() {
        let (bus, mut rx) = EventBus::channel(1);
        bus.publish(1u32).await.unwrap();

        let bus2 = bus.clone();
        let producer = tokio::spawn(async move { bus2.publish(2u32).await });

        // The second publish cannot complete until the consumer drains.
        tokio::task::yield_now().await;
        assert!(!producer.is_finished());

        assert_eq!(rx.recv().await, Some(1));
        producer.await.unwrap().unwrap();
        assert_eq!(rx.recv().await, Some(2));
    }

    #[tokio::test]
    async fn test_publish_fails_when_closed() {
        let (bus, rx) = EventBus::channel(1);
        drop(rx);
        assert!(bus.publish(9u32).await.is_err());
    }
}
