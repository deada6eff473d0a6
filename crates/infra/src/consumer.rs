//! Consumer side of the stock event channel.
//!
//! Receives deliveries, deserializes them, and applies them through the
//! [`AdjustmentEngine`]. Any processing failure — malformed payload,
//! unknown product, insufficient stock — is logged and the event dropped:
//! no retry, no dead-letter, nothing surfaced to the producer. The
//! producer-side order state and the ledger can therefore silently
//! diverge; that gap is inherent to the fire-and-forget choreography.
//!
//! There is deliberately no deduplication by event id: a redelivered event
//! mutates the ledger again. See DESIGN.md for the disposition.

use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tracing::{error, info};

use stockflow_core::{StockError, StockResult};
use stockflow_events::{Delivery, StockEvent, StockEventKind, Subscription};
use stockflow_ledger::{AdjustmentEngine, AlertSink, Catalog, StockLedger, StockLevel};

use crate::worker::WorkerHandle;

/// Background worker draining one channel subscription into the engine.
#[derive(Debug)]
pub struct StockEventConsumer;

impl StockEventConsumer {
    /// Spawn the consumer thread.
    ///
    /// The engine it shares with direct callers gives inbound events the
    /// same per-cell serialization as manual adjustments.
    pub fn spawn<L, C, S>(
        name: &'static str,
        subscription: Subscription<Delivery>,
        engine: Arc<AdjustmentEngine<L, C, S>>,
    ) -> WorkerHandle
    where
        L: StockLedger + 'static,
        C: Catalog + 'static,
        S: AlertSink + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || consumer_loop(name, subscription, shutdown_rx, engine))
            .expect("failed to spawn stock event consumer thread");

        WorkerHandle::new(shutdown_tx, join)
    }

    /// Apply one delivery to the engine.
    ///
    /// Split out of the loop so the pipeline can be driven synchronously
    /// in tests.
    pub fn process<L, C, S>(
        delivery: &Delivery,
        engine: &AdjustmentEngine<L, C, S>,
    ) -> StockResult<StockLevel>
    where
        L: StockLedger,
        C: Catalog,
        S: AlertSink,
    {
        let event: StockEvent = serde_json::from_str(&delivery.payload)
            .map_err(|e| StockError::bad_request(format!("malformed stock event: {e}")))?;

        info!(event_id = %event.event_id, topic = %delivery.topic, "received stock event");

        match event.event_type {
            StockEventKind::StockIn => engine.apply_inbound_event(
                event.product_id,
                event.warehouse_id,
                event.quantity,
                event.reference_id,
            ),
            StockEventKind::StockOut => engine.apply_outbound_event(
                event.product_id,
                event.warehouse_id,
                event.quantity,
                event.reference_id,
            ),
        }
    }
}

fn consumer_loop<L, C, S>(
    name: &'static str,
    subscription: Subscription<Delivery>,
    shutdown_rx: mpsc::Receiver<()>,
    engine: Arc<AdjustmentEngine<L, C, S>>,
) where
    L: StockLedger,
    C: Catalog,
    S: AlertSink,
{
    let tick = Duration::from_millis(250);

    loop {
        // Shutdown check (non-blocking)
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        match subscription.recv_timeout(tick) {
            Ok(delivery) => {
                if let Err(err) = StockEventConsumer::process(&delivery, &engine) {
                    // Dropped after logging: the channel is at-least-once,
                    // but this boundary does not retry.
                    error!(
                        consumer = name,
                        topic = %delivery.topic,
                        key = %delivery.key,
                        error = %err,
                        "failed to process stock event"
                    );
                }
            }
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
}
