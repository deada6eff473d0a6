//! Post-mutation reorder threshold check.
//!
//! The monitor is stateless and strictly fire-and-forget: it runs after the
//! mutation has committed, outside its critical section, and a failure to
//! hand off the alert never fails or rolls back the originating operation.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use stockflow_core::{ProductId, WarehouseId};

use crate::catalog::ProductRecord;
use crate::movement::StockLevel;

/// Notification request emitted when a cell falls to its reorder level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LowStockAlert {
    pub product_id: ProductId,
    pub sku: String,
    pub product_name: String,
    pub warehouse_id: WarehouseId,
    pub current_quantity: i64,
    pub reorder_level: i64,
}

/// Hand-off failure (queue full, receiver gone, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertSendError(pub String);

impl core::fmt::Display for AlertSendError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "alert send failed: {}", self.0)
    }
}

/// Where alerts go. Implementations must not block the caller.
pub trait AlertSink: Send + Sync {
    fn send(&self, alert: LowStockAlert) -> Result<(), AlertSendError>;
}

impl<S> AlertSink for Arc<S>
where
    S: AlertSink + ?Sized,
{
    fn send(&self, alert: LowStockAlert) -> Result<(), AlertSendError> {
        (**self).send(alert)
    }
}

/// Sink that discards every alert (tests, alerting disabled).
#[derive(Debug, Default)]
pub struct NullAlertSink;

impl AlertSink for NullAlertSink {
    fn send(&self, _alert: LowStockAlert) -> Result<(), AlertSendError> {
        Ok(())
    }
}

/// Stateless reorder-threshold evaluator.
#[derive(Debug)]
pub struct LowStockMonitor<S: AlertSink> {
    sink: S,
}

impl<S: AlertSink> LowStockMonitor<S> {
    pub fn new(sink: S) -> Self {
        Self { sink }
    }

    /// Evaluate a freshly-mutated level against the product's reorder level.
    pub fn check(&self, level: &StockLevel, product: &ProductRecord) {
        if level.quantity > product.reorder_level {
            return;
        }

        warn!(
            sku = %product.sku,
            warehouse_id = %level.warehouse_id,
            quantity = level.quantity,
            reorder_level = product.reorder_level,
            "low stock"
        );

        let alert = LowStockAlert {
            product_id: product.id,
            sku: product.sku.clone(),
            product_name: product.name.clone(),
            warehouse_id: level.warehouse_id,
            current_quantity: level.quantity,
            reorder_level: product.reorder_level,
        };

        if let Err(err) = self.sink.send(alert) {
            warn!(error = %err, sku = %product.sku, "dropping low stock alert");
        }
    }
}
