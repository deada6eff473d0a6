//! Infrastructure layer: channel consumer, alert dispatch, storage backends.

pub mod alerts;
pub mod consumer;
pub mod postgres;
pub mod worker;

#[cfg(feature = "redis")]
pub mod redis_channel;


pub use alerts::{AlertQueueConfig, AlertWorker, LogNotifier, Notifier, QueuedAlertSink, alert_queue};
pub use consumer::StockEventConsumer;
pub use postgres::{MovementQuery, PostgresStockLedger};
pub use worker::WorkerHandle;

#[cfg(feature = "redis")]
pub use redis_channel::{RedisChannelConfig, RedisChannelError, RedisStreamsStockChannel};
