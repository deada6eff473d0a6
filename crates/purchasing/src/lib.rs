//! `stockflow-purchasing` — purchase-order lifecycle (STOCK_IN producer).

pub mod order;
pub mod service;
pub mod store;

pub use order::{OrderLine, PurchaseOrder, PurchaseOrderId, PurchaseOrderStatus};
pub use service::PurchaseOrderService;
pub use store::{InMemoryPurchaseOrderStore, PurchaseOrderStore};
