//! Typed publish/subscribe primitive
//!
//! One [`EventBus`] instance exists per lifecycle scope (connection, call,
//! notifications). Publishing never blocks and never fails; subscribers that
//! fall behind lose the oldest events, which is acceptable for UI-facing
//! signaling fan-out.

use tokio::sync::broadcast;
use tracing::warn;

const DEFAULT_CAPACITY: usize = 128;

/// A typed broadcast bus for one lifecycle scope
pub struct EventBus<E> {
    tx: broadcast::Sender<E>,
}

impl<E: Clone + Send + 'static> EventBus<E> {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(DEFAULT_CAPACITY);
        Self { tx }
    }

    /// Publish an event to all current subscribers
    ///
    /// An event with no subscribers is dropped silently; publication is
    /// fire-and-forget by design.
    pub fn emit(&self, event: E) {
        let _ = self.tx.send(event);
    }

    /// Long-lived subscription; drop the receiver to unsubscribe
    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.tx.subscribe()
    }

    /// Wait for the next event on the bus
    pub async fn wait(&self) -> E {
        self.wait_map(Some).await
    }

    /// Wait for the first event the extractor accepts
    ///
    /// The extractor may match any number of variants, so a single
    /// `wait_map` call races several event names and resolves with whichever
    /// fires first. The returned future settles exactly once; dropping it
    /// unsubscribes.
    pub async fn wait_map<T, F>(&self, mut extract: F) -> T
    where
        F: FnMut(E) -> Option<T>,
    {
        let mut rx = self.subscribe();
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Some(value) = extract(event) {
                        return value;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "event bus subscriber lagged, events dropped");
                }
                // The bus holds the sender for as long as this borrow lives.
                Err(broadcast::error::RecvError::Closed) => {
                    return futures::future::pending().await;
                }
            }
        }
    }
}

impl<E: Clone + Send + 'static> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    enum TestEvent {
        A(u32),
        B(u32),
        C,
    }

    #[tokio::test]
    async fn wait_resolves_with_next_event() {
        let bus = EventBus::<TestEvent>::new();
        let wait = bus.wait();
        tokio::pin!(wait);

        // Subscribe happens inside wait; poll it once before emitting.
        tokio::select! {
            biased;
            _ = &mut wait => panic!("resolved before any event"),
            _ = tokio::time::sleep(Duration::from_millis(1)) => {}
        }

        bus.emit(TestEvent::C);
        assert_eq!(wait.await, TestEvent::C);
    }

    #[tokio::test]
    async fn wait_map_races_multiple_variants() {
        let bus = EventBus::<TestEvent>::new();
        let race = bus.wait_map(|e| match e {
            TestEvent::A(n) | TestEvent::B(n) => Some(n),
            TestEvent::C => None,
        });
        tokio::pin!(race);

        tokio::select! {
            biased;
            _ = &mut race => panic!("resolved before any event"),
            _ = tokio::time::sleep(Duration::from_millis(1)) => {}
        }

        bus.emit(TestEvent::C);
        bus.emit(TestEvent::B(7));
        bus.emit(TestEvent::A(9));
        assert_eq!(race.await, 7);
    }

    #[tokio::test]
    async fn emit_without_subscribers_is_a_no_op() {
        let bus = EventBus::<TestEvent>::new();
        bus.emit(TestEvent::A(1));

        let mut rx = bus.subscribe();
        bus.emit(TestEvent::A(2));
        assert_eq!(rx.recv().await.unwrap(), TestEvent::A(2));
    }
}
