//! `stockflow-ledger` — the authoritative quantity store and its engine.
//!
//! All stock mutation flows through here: the [`StockLedger`] owns the
//! per-(product, warehouse) quantities and the append-only movement log,
//! the [`AdjustmentEngine`] implements the business operations on top of
//! it, and the [`LowStockMonitor`] observes mutations for reorder alerts.

pub mod catalog;
pub mod engine;
pub mod ledger;
pub mod monitor;
pub mod movement;

pub use catalog::{Catalog, InMemoryCatalog, ProductRecord, WarehouseRecord};
pub use engine::AdjustmentEngine;
pub use ledger::{
    CellPolicy, InMemoryStockLedger, StockChange, StockLedger, TransferApplied, TransferChange,
};
pub use monitor::{AlertSendError, AlertSink, LowStockAlert, LowStockMonitor, NullAlertSink};
pub use movement::{
    CellKey, MovementFilter, MovementPage, MovementType, Pagination, StockLevel, StockMovement,
};
