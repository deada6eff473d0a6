//! In-memory channel for tests/dev.

use std::sync::{Mutex, mpsc};

use crate::channel::{Delivery, StockEventChannel, Subscription};
use crate::wire::StockEvent;

#[derive(Debug)]
pub enum InMemoryChannelError {
    /// Publish failed due to internal lock poisoning.
    Poisoned,
    /// The event could not be serialized to its wire form.
    Serialization(String),
}

/// In-memory broadcast channel.
///
/// - No IO / no async
/// - Each subscriber receives every delivery in publish order, so per-key
///   ordering holds trivially
/// - At-least-once acceptable (subscribers must tolerate duplicates)
#[derive(Debug)]
pub struct InMemoryStockChannel {
    subscribers: Mutex<Vec<mpsc::Sender<Delivery>>>,
}

impl InMemoryStockChannel {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Default for InMemoryStockChannel {
    fn default() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }
}

impl StockEventChannel for InMemoryStockChannel {
    type Error = InMemoryChannelError;

    fn publish(&self, event: &StockEvent) -> Result<(), Self::Error> {
        let payload = serde_json::to_string(event)
            .map_err(|e| InMemoryChannelError::Serialization(e.to_string()))?;

        let delivery = Delivery {
            topic: event.topic().to_string(),
            key: event.partition_key(),
            payload,
        };

        let mut subs = self
            .subscribers
            .lock()
            .map_err(|_| InMemoryChannelError::Poisoned)?;

        // Drop any dead subscribers while publishing.
        subs.retain(|tx| tx.send(delivery.clone()).is_ok());

        Ok(())
    }

    fn subscribe(&self) -> Subscription<Delivery> {
        let (tx, rx) = mpsc::channel();

        // If the lock is poisoned, we still return a subscription;
        // it just won't receive messages until the process restarts.
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(tx);
        }

        Subscription::new(rx)
    }
}
