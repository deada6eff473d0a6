//! `stockflow-events` — the stock event wire contract and channel.
//!
//! The channel is the only coupling between the order-fulfillment side
//! (producers) and the inventory side (consumer). Delivery is
//! **at-least-once**: consumers must tolerate redelivery.

pub mod channel;
pub mod in_memory;
pub mod wire;

pub use channel::{Delivery, StockEventChannel, Subscription};
pub use in_memory::{InMemoryChannelError, InMemoryStockChannel};
pub use wire::{STOCK_IN_TOPIC, STOCK_OUT_TOPIC, StockEvent, StockEventKind};
