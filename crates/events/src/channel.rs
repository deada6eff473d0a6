//! Channel abstraction connecting event producers and the consumer.
//!
//! ## Delivery Guarantees
//!
//! The channel provides **at-least-once delivery**:
//!
//! - A published event is never silently dropped by the channel itself.
//! - An event may be delivered more than once (redelivery after a crash or
//!   an unacknowledged read); the consumer must tolerate duplicates.
//! - Deliveries with the same key (product id) arrive in publish order;
//!   there is **no ordering guarantee across keys**.
//!
//! The channel carries serialized payloads, not typed events: the consumer
//! deserializes at its boundary and decides what to do with malformed or
//! unprocessable messages (this core logs and drops them).

use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::Duration;

use crate::wire::StockEvent;

/// One message as handed to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Topic the event was published on.
    pub topic: String,
    /// Partition key (product id) the publisher keyed the event with.
    pub key: String,
    /// Serialized JSON body of the stock event.
    pub payload: String,
}

/// A subscription to the channel.
///
/// Each subscription gets a copy of every delivery (broadcast semantics).
/// Subscriptions are designed for single-threaded consumption: one worker
/// loop per subscription.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, std::sync::mpsc::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, std::sync::mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, std::sync::mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

/// Producer/consumer contract for stock events.
///
/// `publish()` serializes the event and keys it by product id. It can fail
/// (serialization, transport); producers log such failures and move on —
/// emission of one line item never rolls back an order transition or the
/// other lines' events.
pub trait StockEventChannel: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, event: &StockEvent) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<Delivery>;
}

impl<C> StockEventChannel for Arc<C>
where
    C: StockEventChannel + ?Sized,
{
    type Error = C::Error;

    fn publish(&self, event: &StockEvent) -> Result<(), Self::Error> {
        (**self).publish(event)
    }

    fn subscribe(&self) -> Subscription<Delivery> {
        (**self).subscribe()
    }
}
