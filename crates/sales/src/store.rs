//! Sales order persistence port.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use stockflow_core::{StockError, StockResult};

use crate::order::{SalesOrder, SalesOrderId};

/// Keyed store for sales orders.
pub trait SalesOrderStore: Send + Sync {
    fn get(&self, id: SalesOrderId) -> StockResult<Option<SalesOrder>>;

    fn upsert(&self, order: SalesOrder) -> StockResult<()>;
}

impl<S> SalesOrderStore for Arc<S>
where
    S: SalesOrderStore + ?Sized,
{
    fn get(&self, id: SalesOrderId) -> StockResult<Option<SalesOrder>> {
        (**self).get(id)
    }

    fn upsert(&self, order: SalesOrder) -> StockResult<()> {
        (**self).upsert(order)
    }
}

/// In-memory store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemorySalesOrderStore {
    orders: RwLock<HashMap<SalesOrderId, SalesOrder>>,
}

impl InMemorySalesOrderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SalesOrderStore for InMemorySalesOrderStore {
    fn get(&self, id: SalesOrderId) -> StockResult<Option<SalesOrder>> {
        let orders = self
            .orders
            .read()
            .map_err(|_| StockError::storage("order store lock poisoned"))?;
        Ok(orders.get(&id).cloned())
    }

    fn upsert(&self, order: SalesOrder) -> StockResult<()> {
        let mut orders = self
            .orders
            .write()
            .map_err(|_| StockError::storage("order store lock poisoned"))?;
        orders.insert(order.id(), order);
        Ok(())
    }
}
