//! Redis Streams-backed stock event channel (durable, at-least-once).
//!
//! Uses one Redis stream per topic (XADD/XREADGROUP):
//! - **Durable delivery**: entries persist until acknowledged
//! - **At-least-once**: unacknowledged entries are reclaimed and redelivered
//! - **Consumer groups**: each consumer process reads through its group
//!
//! There is no dead-letter stream: the consumer contract drops poison
//! messages after logging, so nothing downstream would drain one.
//!
//! ## Stream layout
//!
//! Stream keys are the topic names (`stock.in.events`, `stock.out.events`).
//! Each entry carries the partition key (product id) and the serialized
//! event payload as fields.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tracing::{error, warn};

use stockflow_events::{
    Delivery, STOCK_IN_TOPIC, STOCK_OUT_TOPIC, StockEvent, StockEventChannel, Subscription,
};

/// Default max entries fetched per poll.
const DEFAULT_READ_COUNT: usize = 10;

/// Default blocking read timeout per poll.
const DEFAULT_BLOCK_MS: u64 = 100;

/// Entries idle longer than this are reclaimed from other consumers.
const DEFAULT_PENDING_TIMEOUT_MS: u64 = 60_000;

#[derive(Debug, thiserror::Error)]
pub enum RedisChannelError {
    #[error("redis connection error: {0}")]
    Connection(String),

    #[error("redis command error: {0}")]
    Command(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),
}

/// Consumer-group identity and polling cadence.
#[derive(Debug, Clone)]
pub struct RedisChannelConfig {
    pub group: String,
    pub consumer: String,
    pub pending_timeout_ms: u64,
}

impl Default for RedisChannelConfig {
    fn default() -> Self {
        Self {
            group: "stock-ledger".to_string(),
            consumer: format!("consumer-{}", uuid::Uuid::now_v7()),
            pending_timeout_ms: DEFAULT_PENDING_TIMEOUT_MS,
        }
    }
}

/// Stock event channel over Redis Streams.
#[derive(Debug, Clone)]
pub struct RedisStreamsStockChannel {
    client: Arc<redis::Client>,
    config: RedisChannelConfig,
}

impl RedisStreamsStockChannel {
    pub fn new(
        redis_url: impl AsRef<str>,
        config: RedisChannelConfig,
    ) -> Result<Self, RedisChannelError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| RedisChannelError::Connection(e.to_string()))?;

        Ok(Self {
            client: Arc::new(client),
            config,
        })
    }

    /// Ensure the consumer group exists on both topic streams (idempotent).
    pub fn ensure_consumer_groups(&self) -> Result<(), RedisChannelError> {
        let mut conn = self
            .client
            .get_connection()
            .map_err(|e| RedisChannelError::Connection(e.to_string()))?;

        for stream in [STOCK_IN_TOPIC, STOCK_OUT_TOPIC] {
            // MKSTREAM creates the stream if it doesn't exist; an existing
            // group returns an error we ignore.
            let _: Result<String, _> = redis::cmd("XGROUP")
                .arg("CREATE")
                .arg(stream)
                .arg(&self.config.group)
                .arg("0")
                .arg("MKSTREAM")
                .query(&mut conn);
        }

        Ok(())
    }

    fn publish_sync(&self, event: &StockEvent) -> Result<(), RedisChannelError> {
        let payload = serde_json::to_string(event)
            .map_err(|e| RedisChannelError::Serialization(e.to_string()))?;

        let mut conn = self
            .client
            .get_connection()
            .map_err(|e| RedisChannelError::Connection(e.to_string()))?;

        let _: String = redis::cmd("XADD")
            .arg(event.topic())
            .arg("*")
            .arg("key")
            .arg(event.partition_key())
            .arg("event_id")
            .arg(event.event_id.to_string())
            .arg("payload")
            .arg(&payload)
            .query(&mut conn)
            .map_err(|e| RedisChannelError::Command(format!("XADD failed: {e}")))?;

        Ok(())
    }

    fn acknowledge_sync(
        &self,
        conn: &mut redis::Connection,
        stream: &str,
        entry_ids: &[String],
    ) -> Result<(), RedisChannelError> {
        if entry_ids.is_empty() {
            return Ok(());
        }

        let _: u64 = redis::cmd("XACK")
            .arg(stream)
            .arg(&self.config.group)
            .arg(entry_ids)
            .query(conn)
            .map_err(|e| RedisChannelError::Command(format!("XACK failed: {e}")))?;

        Ok(())
    }

    /// Reclaim entries another consumer read but never acknowledged.
    fn read_pending_sync(
        &self,
        conn: &mut redis::Connection,
        stream: &str,
        count: usize,
    ) -> Result<Vec<(String, Delivery)>, RedisChannelError> {
        let pending_info: redis::RedisResult<Vec<(String, String, u64, u64)>> =
            redis::cmd("XPENDING")
                .arg(stream)
                .arg(&self.config.group)
                .arg("-")
                .arg("+")
                .arg(count.to_string())
                .query(conn);

        let pending_ids = match pending_info {
            Ok(entries) => entries.into_iter().map(|(id, _, _, _)| id).collect::<Vec<_>>(),
            Err(_) => return Ok(vec![]),
        };

        if pending_ids.is_empty() {
            return Ok(vec![]);
        }

        let claimed: redis::RedisResult<Vec<redis::Value>> = redis::cmd("XCLAIM")
            .arg(stream)
            .arg(&self.config.group)
            .arg(&self.config.consumer)
            .arg(self.config.pending_timeout_ms.to_string())
            .arg(&pending_ids[..])
            .query(conn);

        let claimed_entries = match claimed {
            Ok(entries) => entries,
            Err(_) => return Ok(vec![]),
        };

        let mut deliveries = Vec::new();
        for entry in claimed_entries {
            match parse_stream_entry(stream, entry) {
                Ok(parsed) => deliveries.push(parsed),
                Err(err) => warn!(stream, error = %err, "skipping unparseable stream entry"),
            }
        }

        Ok(deliveries)
    }

    /// Read new entries for this consumer group (blocking with timeout).
    fn read_new_sync(
        &self,
        conn: &mut redis::Connection,
        stream: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<(String, Delivery)>, RedisChannelError> {
        let result: redis::RedisResult<HashMap<String, Vec<redis::Value>>> =
            redis::cmd("XREADGROUP")
                .arg("GROUP")
                .arg(&self.config.group)
                .arg(&self.config.consumer)
                .arg("COUNT")
                .arg(count.to_string())
                .arg("BLOCK")
                .arg(block_ms.to_string())
                .arg("STREAMS")
                .arg(stream)
                .arg(">")
                .query(conn);

        let stream_data = match result {
            Ok(data) => data,
            // A nil reply (blocking timeout with no entries) surfaces as a
            // conversion error for this reply shape.
            Err(_) => return Ok(vec![]),
        };

        let entries = stream_data.get(stream).cloned().unwrap_or_default();

        let mut deliveries = Vec::new();
        for entry in entries {
            match parse_stream_entry(stream, entry) {
                Ok(parsed) => deliveries.push(parsed),
                Err(err) => warn!(stream, error = %err, "skipping unparseable stream entry"),
            }
        }

        Ok(deliveries)
    }
}

/// Parse one stream entry (`[entry_id, [field, value, ...]]`) into a
/// delivery keyed by the entry id (needed for the later XACK).
fn parse_stream_entry(
    stream: &str,
    entry: redis::Value,
) -> Result<(String, Delivery), RedisChannelError> {
    let entry_vec: Vec<redis::Value> = match entry {
        redis::Value::Bulk(v) => v,
        _ => {
            return Err(RedisChannelError::Deserialization(
                "invalid entry format".to_string(),
            ));
        }
    };

    if entry_vec.len() < 2 {
        return Err(RedisChannelError::Deserialization(
            "entry too short".to_string(),
        ));
    }

    let entry_id = match &entry_vec[0] {
        redis::Value::Data(data) => String::from_utf8_lossy(data).to_string(),
        _ => {
            return Err(RedisChannelError::Deserialization(
                "invalid entry id format".to_string(),
            ));
        }
    };

    let fields_vec: Vec<redis::Value> = match &entry_vec[1] {
        redis::Value::Bulk(v) => v.clone(),
        _ => {
            return Err(RedisChannelError::Deserialization(
                "invalid fields format".to_string(),
            ));
        }
    };

    let mut fields = HashMap::new();
    for chunk in fields_vec.chunks(2) {
        if chunk.len() == 2 {
            if let (redis::Value::Data(key), redis::Value::Data(value)) = (&chunk[0], &chunk[1]) {
                fields.insert(
                    String::from_utf8_lossy(key).to_string(),
                    String::from_utf8_lossy(value).to_string(),
                );
            }
        }
    }

    let key = fields
        .remove("key")
        .ok_or_else(|| RedisChannelError::Deserialization("missing key field".to_string()))?;
    let payload = fields
        .remove("payload")
        .ok_or_else(|| RedisChannelError::Deserialization("missing payload field".to_string()))?;

    Ok((
        entry_id,
        Delivery {
            topic: stream.to_string(),
            key,
            payload,
        },
    ))
}

impl StockEventChannel for RedisStreamsStockChannel {
    type Error = RedisChannelError;

    fn publish(&self, event: &StockEvent) -> Result<(), Self::Error> {
        self.publish_sync(event)
    }

    /// Spawn a polling thread that reads both topic streams through the
    /// consumer group and forwards deliveries over a std channel.
    ///
    /// Entries are acknowledged after forwarding; an entry read but never
    /// forwarded (crash between read and ack) stays pending and is
    /// reclaimed later — the at-least-once side of the contract.
    fn subscribe(&self) -> Subscription<Delivery> {
        if let Err(err) = self.ensure_consumer_groups() {
            error!(error = %err, "failed to create consumer groups");
        }

        let (tx, rx) = mpsc::channel();
        let channel = self.clone();

        thread::spawn(move || {
            loop {
                let mut conn = match channel.client.get_connection() {
                    Ok(conn) => conn,
                    Err(err) => {
                        error!(error = %err, "redis connection failed, retrying");
                        thread::sleep(Duration::from_millis(1000));
                        continue;
                    }
                };

                for stream in [STOCK_IN_TOPIC, STOCK_OUT_TOPIC] {
                    let mut batch = match channel.read_pending_sync(
                        &mut conn,
                        stream,
                        DEFAULT_READ_COUNT,
                    ) {
                        Ok(batch) => batch,
                        Err(err) => {
                            error!(stream, error = %err, "failed to read pending entries");
                            Vec::new()
                        }
                    };

                    if batch.is_empty() {
                        batch = match channel.read_new_sync(
                            &mut conn,
                            stream,
                            DEFAULT_READ_COUNT,
                            DEFAULT_BLOCK_MS,
                        ) {
                            Ok(batch) => batch,
                            Err(err) => {
                                error!(stream, error = %err, "failed to read new entries");
                                Vec::new()
                            }
                        };
                    }

                    let mut forwarded = Vec::with_capacity(batch.len());
                    for (entry_id, delivery) in batch {
                        if tx.send(delivery).is_err() {
                            // Receiver dropped; stop the polling thread.
                            return;
                        }
                        forwarded.push(entry_id);
                    }

                    if let Err(err) = channel.acknowledge_sync(&mut conn, stream, &forwarded) {
                        error!(stream, error = %err, "failed to acknowledge entries");
                    }
                }

                thread::sleep(Duration::from_millis(DEFAULT_BLOCK_MS));
            }
        });

        Subscription::new(rx)
    }
}
