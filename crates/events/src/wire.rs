//! Wire-level stock event contract.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockflow_core::{EventId, ProductId, ReferenceId, WarehouseId};

/// Topic carrying STOCK_IN events (purchase-order receipts).
pub const STOCK_IN_TOPIC: &str = "stock.in.events";

/// Topic carrying STOCK_OUT events (sales-order confirmations).
pub const STOCK_OUT_TOPIC: &str = "stock.out.events";

/// Discriminator of a stock event on the wire.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockEventKind {
    #[serde(rename = "STOCK_IN_EVENT")]
    StockIn,
    #[serde(rename = "STOCK_OUT_EVENT")]
    StockOut,
}

impl StockEventKind {
    pub fn topic(&self) -> &'static str {
        match self {
            StockEventKind::StockIn => STOCK_IN_TOPIC,
            StockEventKind::StockOut => STOCK_OUT_TOPIC,
        }
    }
}

/// A stock event as carried on the channel (camelCase JSON).
///
/// Produced exactly once by an order lifecycle transition; consumed zero or
/// more times (at-least-once delivery). The `event_id` is producer-assigned
/// and unique; `reference_id` is the originating order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockEvent {
    pub event_id: EventId,
    pub event_type: StockEventKind,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub quantity: i64,
    pub reference_id: ReferenceId,
    pub timestamp: DateTime<Utc>,
}

impl StockEvent {
    /// Build a STOCK_IN event (goods received against a purchase order).
    pub fn stock_in(
        product_id: ProductId,
        warehouse_id: WarehouseId,
        quantity: i64,
        reference_id: ReferenceId,
    ) -> Self {
        Self {
            event_id: EventId::new(),
            event_type: StockEventKind::StockIn,
            product_id,
            warehouse_id,
            quantity,
            reference_id,
            timestamp: Utc::now(),
        }
    }

    /// Build a STOCK_OUT event (goods leaving against a sales order).
    pub fn stock_out(
        product_id: ProductId,
        warehouse_id: WarehouseId,
        quantity: i64,
        reference_id: ReferenceId,
    ) -> Self {
        Self {
            event_id: EventId::new(),
            event_type: StockEventKind::StockOut,
            product_id,
            warehouse_id,
            quantity,
            reference_id,
            timestamp: Utc::now(),
        }
    }

    /// Partition key: events for one product stay ordered relative to each
    /// other, events for different products may interleave.
    pub fn partition_key(&self) -> String {
        self.product_id.to_string()
    }

    pub fn topic(&self) -> &'static str {
        self.event_type.topic()
    }
}
