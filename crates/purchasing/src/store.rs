//! Purchase order persistence port.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use stockflow_core::{StockError, StockResult};

use crate::order::{PurchaseOrder, PurchaseOrderId};

/// Keyed store for purchase orders.
pub trait PurchaseOrderStore: Send + Sync {
    fn get(&self, id: PurchaseOrderId) -> StockResult<Option<PurchaseOrder>>;

    fn upsert(&self, order: PurchaseOrder) -> StockResult<()>;
}

impl<S> PurchaseOrderStore for Arc<S>
where
    S: PurchaseOrderStore + ?Sized,
{
    fn get(&self, id: PurchaseOrderId) -> StockResult<Option<PurchaseOrder>> {
        (**self).get(id)
    }

    fn upsert(&self, order: PurchaseOrder) -> StockResult<()> {
        (**self).upsert(order)
    }
}

/// In-memory store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryPurchaseOrderStore {
    orders: RwLock<HashMap<PurchaseOrderId, PurchaseOrder>>,
}

impl InMemoryPurchaseOrderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PurchaseOrderStore for InMemoryPurchaseOrderStore {
    fn get(&self, id: PurchaseOrderId) -> StockResult<Option<PurchaseOrder>> {
        let orders = self
            .orders
            .read()
            .map_err(|_| StockError::storage("order store lock poisoned"))?;
        Ok(orders.get(&id).cloned())
    }

    fn upsert(&self, order: PurchaseOrder) -> StockResult<()> {
        let mut orders = self
            .orders
            .write()
            .map_err(|_| StockError::storage("order store lock poisoned"))?;
        orders.insert(order.id(), order);
        Ok(())
    }
}
