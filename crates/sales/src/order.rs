use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockflow_core::{ProductId, ReferenceId, StockError, StockResult, WarehouseId};
use stockflow_events::StockEvent;

/// Sales order identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SalesOrderId(Uuid);

impl SalesOrderId {
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

impl Default for SalesOrderId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for SalesOrderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl From<SalesOrderId> for ReferenceId {
    fn from(value: SalesOrderId) -> Self {
        ReferenceId::from_uuid(value.0)
    }
}

/// Sales order status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SalesOrderStatus {
    Created,
    Confirmed,
    Cancelled,
}

/// One order line: a quantity of one product shipped from one warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub quantity: i64,
}

/// A sales order: goods sold to a customer, shipped out of stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesOrder {
    id: SalesOrderId,
    customer_name: String,
    status: SalesOrderStatus,
    lines: Vec<OrderLine>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl SalesOrder {
    pub fn new(customer_name: impl Into<String>, lines: Vec<OrderLine>) -> StockResult<Self> {
        let customer_name = customer_name.into();
        if customer_name.trim().is_empty() {
            return Err(StockError::bad_request("customer name cannot be empty"));
        }
        for line in &lines {
            if line.quantity <= 0 {
                return Err(StockError::bad_request("line quantity must be positive"));
            }
        }

        let now = Utc::now();
        Ok(Self {
            id: SalesOrderId::new(),
            customer_name,
            status: SalesOrderStatus::Created,
            lines,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn id(&self) -> SalesOrderId {
        self.id
    }

    pub fn customer_name(&self) -> &str {
        &self.customer_name
    }

    pub fn status(&self) -> SalesOrderStatus {
        self.status
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Confirm the order and return the STOCK_OUT events to publish, one
    /// per line, each carrying this order's id as the reference.
    pub fn confirm(&mut self) -> StockResult<Vec<StockEvent>> {
        match self.status {
            SalesOrderStatus::Confirmed => {
                return Err(StockError::bad_request(
                    "sales order has already been confirmed",
                ));
            }
            SalesOrderStatus::Cancelled => {
                return Err(StockError::bad_request("cannot confirm a cancelled order"));
            }
            SalesOrderStatus::Created => {}
        }

        self.status = SalesOrderStatus::Confirmed;
        self.updated_at = Utc::now();

        Ok(self
            .lines
            .iter()
            .map(|line| {
                StockEvent::stock_out(
                    line.product_id,
                    line.warehouse_id,
                    line.quantity,
                    self.id.into(),
                )
            })
            .collect())
    }

    /// Cancel the order. Confirmed orders cannot be cancelled: their stock
    /// events are already on the wire.
    pub fn cancel(&mut self) -> StockResult<()> {
        match self.status {
            SalesOrderStatus::Confirmed => {
                return Err(StockError::bad_request("cannot cancel a confirmed order"));
            }
            SalesOrderStatus::Cancelled => {
                return Err(StockError::bad_request("order is already cancelled"));
            }
            SalesOrderStatus::Created => {}
        }

        self.status = SalesOrderStatus::Cancelled;
        self.updated_at = Utc::now();
        Ok(())
    }
}
