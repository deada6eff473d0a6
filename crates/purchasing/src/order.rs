use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockflow_core::{ProductId, ReferenceId, StockError, StockResult, WarehouseId};
use stockflow_events::StockEvent;

/// Purchase order identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PurchaseOrderId(Uuid);

impl PurchaseOrderId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for PurchaseOrderId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for PurchaseOrderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl From<PurchaseOrderId> for ReferenceId {
    fn from(value: PurchaseOrderId) -> Self {
        ReferenceId::from_uuid(value.0)
    }
}

/// Purchase order status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PurchaseOrderStatus {
    Created,
    Received,
}

/// One order line: a quantity of one product bound for one warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub quantity: i64,
}

/// A purchase order: goods ordered from a supplier, received into stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrder {
    id: PurchaseOrderId,
    supplier_name: String,
    status: PurchaseOrderStatus,
    lines: Vec<OrderLine>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl PurchaseOrder {
    pub fn new(supplier_name: impl Into<String>, lines: Vec<OrderLine>) -> StockResult<Self> {
        let supplier_name = supplier_name.into();
        if supplier_name.trim().is_empty() {
            return Err(StockError::bad_request("supplier name cannot be empty"));
        }
        for line in &lines {
            if line.quantity <= 0 {
                return Err(StockError::bad_request("line quantity must be positive"));
            }
        }

        let now = Utc::now();
        Ok(Self {
            id: PurchaseOrderId::new(),
            supplier_name,
            status: PurchaseOrderStatus::Created,
            lines,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn id(&self) -> PurchaseOrderId {
        self.id
    }

    pub fn supplier_name(&self) -> &str {
        &self.supplier_name
    }

    pub fn status(&self) -> PurchaseOrderStatus {
        self.status
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Mark the order received and return the STOCK_IN events to publish,
    /// one per line, each carrying this order's id as the reference.
    pub fn receive(&mut self) -> StockResult<Vec<StockEvent>> {
        if self.status == PurchaseOrderStatus::Received {
            return Err(StockError::bad_request(
                "purchase order has already been received",
            ));
        }

        self.status = PurchaseOrderStatus::Received;
        self.updated_at = Utc::now();

        Ok(self
            .lines
            .iter()
            .map(|line| {
                StockEvent::stock_in(
                    line.product_id,
                    line.warehouse_id,
                    line.quantity,
                    self.id.into(),
                )
            })
            .collect())
    }
}
