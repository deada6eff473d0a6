//! Sales order application service (producer side of the channel).

use tracing::{error, info};

use stockflow_core::{StockError, StockResult};
use stockflow_events::StockEventChannel;

use crate::order::{OrderLine, SalesOrder, SalesOrderId};
use crate::store::SalesOrderStore;

/// Composes the order store with the event channel.
///
/// Confirming an order persists the transition first and publishes one
/// STOCK_OUT event per line afterwards; a failed publish is logged and
/// skipped, so a multi-line order may be partially applied downstream.
pub struct SalesOrderService<St, Ch>
where
    St: SalesOrderStore,
    Ch: StockEventChannel,
{
    store: St,
    channel: Ch,
}

impl<St, Ch> SalesOrderService<St, Ch>
where
    St: SalesOrderStore,
    Ch: StockEventChannel,
{
    pub fn new(store: St, channel: Ch) -> Self {
        Self { store, channel }
    }

    pub fn create(
        &self,
        customer_name: impl Into<String>,
        lines: Vec<OrderLine>,
    ) -> StockResult<SalesOrder> {
        let order = SalesOrder::new(customer_name, lines)?;
        self.store.upsert(order.clone())?;
        info!(order_id = %order.id(), "created sales order");
        Ok(order)
    }

    pub fn get(&self, id: SalesOrderId) -> StockResult<SalesOrder> {
        self.store
            .get(id)?
            .ok_or_else(|| StockError::not_found(format!("sales order not found: {id}")))
    }

    pub fn confirm(&self, id: SalesOrderId) -> StockResult<SalesOrder> {
        let mut order = self.get(id)?;
        let events = order.confirm()?;
        self.store.upsert(order.clone())?;

        for event in &events {
            if let Err(err) = self.channel.publish(event) {
                error!(
                    order_id = %id,
                    event_id = %event.event_id,
                    error = ?err,
                    "failed to publish stock out event"
                );
            }
        }

        info!(order_id = %id, lines = events.len(), "confirmed sales order");
        Ok(order)
    }

    pub fn cancel(&self, id: SalesOrderId) -> StockResult<SalesOrder> {
        let mut order = self.get(id)?;
        order.cancel()?;
        self.store.upsert(order.clone())?;
        info!(order_id = %id, "cancelled sales order");
        Ok(order)
    }
}
