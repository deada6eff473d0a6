//! Purchase order application service (producer side of the channel).

use tracing::{error, info};

use stockflow_core::{StockError, StockResult};
use stockflow_events::StockEventChannel;

use crate::order::{OrderLine, PurchaseOrder, PurchaseOrderId};
use crate::store::PurchaseOrderStore;

/// Composes the order store with the event channel.
///
/// Receiving an order persists the transition first and publishes one
/// STOCK_IN event per line afterwards; a failed publish is logged and
/// skipped, so a multi-line order may be partially applied downstream.
pub struct PurchaseOrderService<St, Ch>
where
    St: PurchaseOrderStore,
    Ch: StockEventChannel,
{
    store: St,
    channel: Ch,
}

impl<St, Ch> PurchaseOrderService<St, Ch>
where
    St: PurchaseOrderStore,
    Ch: StockEventChannel,
{
    pub fn new(store: St, channel: Ch) -> Self {
        Self { store, channel }
    }

    pub fn create(
        &self,
        supplier_name: impl Into<String>,
        lines: Vec<OrderLine>,
    ) -> StockResult<PurchaseOrder> {
        let order = PurchaseOrder::new(supplier_name, lines)?;
        self.store.upsert(order.clone())?;
        info!(order_id = %order.id(), "created purchase order");
        Ok(order)
    }

    pub fn get(&self, id: PurchaseOrderId) -> StockResult<PurchaseOrder> {
        self.store
            .get(id)?
            .ok_or_else(|| StockError::not_found(format!("purchase order not found: {id}")))
    }

    pub fn receive(&self, id: PurchaseOrderId) -> StockResult<PurchaseOrder> {
        let mut order = self.get(id)?;
        let events = order.receive()?;
        self.store.upsert(order.clone())?;

        for event in &events {
            if let Err(err) = self.channel.publish(event) {
                error!(
                    order_id = %id,
                    event_id = %event.event_id,
                    error = ?err,
                    "failed to publish stock in event"
                );
            }
        }

        info!(order_id = %id, lines = events.len(), "received purchase order");
        Ok(order)
    }
}
