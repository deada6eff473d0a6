//! Ledger data model: levels, movements, and query types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockflow_core::{MovementId, ProductId, ReferenceId, WarehouseId};

/// A (product, warehouse) pair.
///
/// `Ord` gives the fixed global order used when an operation has to hold
/// two cells at once (transfers): locks are always acquired in key order,
/// never in request-submission order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellKey {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
}

impl CellKey {
    pub fn new(product_id: ProductId, warehouse_id: WarehouseId) -> Self {
        Self {
            product_id,
            warehouse_id,
        }
    }
}

/// Current quantity of one cell.
///
/// Maintained denormalized for read speed; always derivable as the running
/// sum of the cell's movements because every mutation updates both in one
/// atomic unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub quantity: i64,
    pub last_updated: DateTime<Utc>,
}

impl StockLevel {
    /// A zero-quantity level for a cell that has never seen a movement.
    pub fn empty(product_id: ProductId, warehouse_id: WarehouseId) -> Self {
        Self {
            product_id,
            warehouse_id,
            quantity: 0,
            last_updated: Utc::now(),
        }
    }
}

/// Cause of a single quantity change.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementType {
    In,
    Out,
    Adjust,
    TransferIn,
    TransferOut,
}

impl MovementType {
    /// Stable storage/wire name, matching the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::In => "IN",
            MovementType::Out => "OUT",
            MovementType::Adjust => "ADJUST",
            MovementType::TransferIn => "TRANSFER_IN",
            MovementType::TransferOut => "TRANSFER_OUT",
        }
    }
}

impl core::str::FromStr for MovementType {
    type Err = stockflow_core::StockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IN" => Ok(MovementType::In),
            "OUT" => Ok(MovementType::Out),
            "ADJUST" => Ok(MovementType::Adjust),
            "TRANSFER_IN" => Ok(MovementType::TransferIn),
            "TRANSFER_OUT" => Ok(MovementType::TransferOut),
            other => Err(stockflow_core::StockError::bad_request(format!(
                "unknown movement type: {other}"
            ))),
        }
    }
}

/// One immutable ledger entry.
///
/// Movements are append-only: never updated or deleted after creation.
/// `quantity` is always the positive magnitude of the change; the sign is
/// carried by `movement_type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: MovementId,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub movement_type: MovementType,
    pub quantity: i64,
    /// Links the paired rows of a transfer, or the originating order.
    pub reference_id: Option<ReferenceId>,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Filter criteria for movement queries.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MovementFilter {
    pub product_id: Option<ProductId>,
    pub warehouse_id: Option<WarehouseId>,
}

impl MovementFilter {
    pub fn matches(&self, movement: &StockMovement) -> bool {
        if let Some(product_id) = self.product_id {
            if movement.product_id != product_id {
                return false;
            }
        }
        if let Some(warehouse_id) = self.warehouse_id {
            if movement.warehouse_id != warehouse_id {
                return false;
            }
        }
        true
    }
}

/// Pagination parameters for movement queries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Pagination {
    /// Maximum number of movements to return.
    pub limit: u32,
    /// Offset for pagination (0-based).
    pub offset: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
        }
    }
}

impl Pagination {
    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Self {
        Self {
            limit: limit.unwrap_or(50).min(1000),
            offset: offset.unwrap_or(0),
        }
    }
}

/// Paginated movement query result, in insertion (created_at ascending) order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovementPage {
    pub movements: Vec<StockMovement>,
    /// Total number of movements matching the filter (across all pages).
    pub total: u64,
    pub pagination: Pagination,
    pub has_more: bool,
}
