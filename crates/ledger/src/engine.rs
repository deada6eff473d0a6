//! Business operations on top of the ledger.
//!
//! The engine validates requests against the catalog, delegates the atomic
//! mutation to the [`StockLedger`], and runs the low-stock check after any
//! operation that can lower a cell's quantity. It serves two kinds of
//! callers with one discipline: direct API calls (adjust, transfer) and the
//! event consumer (inbound/outbound event application).

use tracing::info;

use stockflow_core::{ProductId, ReferenceId, StockError, StockResult, WarehouseId};

use crate::catalog::{Catalog, ProductRecord, WarehouseRecord};
use crate::ledger::{CellPolicy, StockChange, StockLedger, TransferChange};
use crate::monitor::{AlertSink, LowStockMonitor};
use crate::movement::{MovementType, StockLevel};

/// Implements adjust, transfer, and event-driven apply operations.
pub struct AdjustmentEngine<L, C, S>
where
    L: StockLedger,
    C: Catalog,
    S: AlertSink,
{
    ledger: L,
    catalog: C,
    monitor: LowStockMonitor<S>,
}

impl<L, C, S> AdjustmentEngine<L, C, S>
where
    L: StockLedger,
    C: Catalog,
    S: AlertSink,
{
    pub fn new(ledger: L, catalog: C, monitor: LowStockMonitor<S>) -> Self {
        Self {
            ledger,
            catalog,
            monitor,
        }
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    fn product(&self, id: ProductId) -> StockResult<ProductRecord> {
        self.catalog
            .product(id)
            .ok_or_else(|| StockError::not_found(format!("product not found: {id}")))
    }

    fn warehouse(&self, id: WarehouseId) -> StockResult<WarehouseRecord> {
        self.catalog
            .warehouse(id)
            .ok_or_else(|| StockError::not_found(format!("warehouse not found: {id}")))
    }

    /// Apply a signed adjustment to one cell.
    ///
    /// Zero deltas are a no-op: no movement is recorded and no cell is
    /// created. Otherwise one ADJUST movement of `|delta|` commits with the
    /// level change.
    pub fn adjust(
        &self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
        delta: i64,
        reason: Option<String>,
    ) -> StockResult<StockLevel> {
        let product = self.product(product_id)?;
        self.warehouse(warehouse_id)?;

        if delta == 0 {
            return Ok(self
                .ledger
                .level(product_id, warehouse_id)?
                .unwrap_or_else(|| StockLevel::empty(product_id, warehouse_id)));
        }

        let level = self.ledger.apply(StockChange {
            product_id,
            warehouse_id,
            delta,
            movement_type: MovementType::Adjust,
            reference_id: None,
            reason,
            policy: CellPolicy::CreateMissing,
        })?;

        self.monitor.check(&level, &product);

        info!(
            product_id = %product_id,
            warehouse_id = %warehouse_id,
            delta,
            quantity = level.quantity,
            "adjusted stock"
        );
        Ok(level)
    }

    /// Move quantity between two warehouses of one product.
    ///
    /// Both level changes and both movement rows (TRANSFER_OUT at the
    /// source, TRANSFER_IN at the destination, sharing one fresh reference
    /// id) commit as one atomic unit. Returns the destination level.
    pub fn transfer(
        &self,
        product_id: ProductId,
        source_warehouse_id: WarehouseId,
        destination_warehouse_id: WarehouseId,
        quantity: i64,
        reason: Option<String>,
    ) -> StockResult<StockLevel> {
        if source_warehouse_id == destination_warehouse_id {
            return Err(StockError::bad_request(
                "source and destination warehouses must be different",
            ));
        }
        if quantity <= 0 {
            return Err(StockError::bad_request("transfer quantity must be positive"));
        }

        let product = self.product(product_id)?;
        self.warehouse(source_warehouse_id)?;
        self.warehouse(destination_warehouse_id)?;

        let reference_id = ReferenceId::new();
        let applied = self.ledger.apply_transfer(TransferChange {
            product_id,
            source_warehouse_id,
            destination_warehouse_id,
            quantity,
            reference_id,
            reason,
        })?;

        // Only the source can have dropped.
        self.monitor.check(&applied.source, &product);

        info!(
            product_id = %product_id,
            source_warehouse_id = %source_warehouse_id,
            destination_warehouse_id = %destination_warehouse_id,
            quantity,
            reference_id = %reference_id,
            "transferred stock"
        );
        Ok(applied.destination)
    }

    /// Credit a cell from an inbound (purchase receipt) event.
    ///
    /// Used by the consumer side of the event channel; creates the cell on
    /// first receipt.
    pub fn apply_inbound_event(
        &self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
        quantity: i64,
        reference_id: ReferenceId,
    ) -> StockResult<StockLevel> {
        if quantity <= 0 {
            return Err(StockError::bad_request("stock-in quantity must be positive"));
        }
        self.product(product_id)?;
        self.warehouse(warehouse_id)?;

        let level = self.ledger.apply(StockChange {
            product_id,
            warehouse_id,
            delta: quantity,
            movement_type: MovementType::In,
            reference_id: Some(reference_id),
            reason: Some("purchase order received".to_string()),
            policy: CellPolicy::CreateMissing,
        })?;

        info!(
            product_id = %product_id,
            warehouse_id = %warehouse_id,
            quantity,
            quantity_after = level.quantity,
            "stock in"
        );
        Ok(level)
    }

    /// Debit a cell from an outbound (sales confirmation) event.
    ///
    /// Fails `NotFound` when the cell has never existed and
    /// `InsufficientStock` when it is short; the consuming boundary logs
    /// and discards such failures instead of surfacing them to the
    /// producer.
    pub fn apply_outbound_event(
        &self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
        quantity: i64,
        reference_id: ReferenceId,
    ) -> StockResult<StockLevel> {
        if quantity <= 0 {
            return Err(StockError::bad_request("stock-out quantity must be positive"));
        }
        let product = self.product(product_id)?;

        let level = self.ledger.apply(StockChange {
            product_id,
            warehouse_id,
            delta: -quantity,
            movement_type: MovementType::Out,
            reference_id: Some(reference_id),
            reason: Some("sales order confirmed".to_string()),
            policy: CellPolicy::RequireExisting,
        })?;

        self.monitor.check(&level, &product);

        info!(
            product_id = %product_id,
            warehouse_id = %warehouse_id,
            quantity,
            quantity_after = level.quantity,
            "stock out"
        );
        Ok(level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use crate::catalog::InMemoryCatalog;
    use crate::ledger::InMemoryStockLedger;
    use crate::monitor::{AlertSendError, LowStockAlert};
    use crate::movement::{MovementFilter, Pagination};

    #[derive(Debug, Default)]
    struct RecordingSink {
        alerts: Mutex<Vec<LowStockAlert>>,
    }

    impl AlertSink for RecordingSink {
        fn send(&self, alert: LowStockAlert) -> Result<(), AlertSendError> {
            self.alerts.lock().unwrap().push(alert);
            Ok(())
        }
    }

    struct Fixture {
        engine: AdjustmentEngine<
            Arc<InMemoryStockLedger>,
            Arc<InMemoryCatalog>,
            Arc<RecordingSink>,
        >,
        ledger: Arc<InMemoryStockLedger>,
        sink: Arc<RecordingSink>,
        product_id: ProductId,
        warehouse_id: WarehouseId,
        second_warehouse_id: WarehouseId,
    }

    fn fixture(reorder_level: i64) -> Fixture {
        let ledger = Arc::new(InMemoryStockLedger::new());
        let catalog = Arc::new(InMemoryCatalog::new());
        let sink = Arc::new(RecordingSink::default());

        let product_id = ProductId::new();
        let warehouse_id = WarehouseId::new();
        let second_warehouse_id = WarehouseId::new();
        catalog.insert_product(ProductRecord {
            id: product_id,
            sku: "SKU-1".to_string(),
            name: "Widget".to_string(),
            reorder_level,
        });
        catalog.insert_warehouse(WarehouseRecord {
            id: warehouse_id,
            name: "Main".to_string(),
        });
        catalog.insert_warehouse(WarehouseRecord {
            id: second_warehouse_id,
            name: "Overflow".to_string(),
        });

        let engine = AdjustmentEngine::new(
            ledger.clone(),
            catalog,
            LowStockMonitor::new(sink.clone()),
        );

        Fixture {
            engine,
            ledger,
            sink,
            product_id,
            warehouse_id,
            second_warehouse_id,
        }
    }

    fn movement_count(ledger: &InMemoryStockLedger) -> u64 {
        ledger
            .movements(&MovementFilter::default(), Pagination::default())
            .unwrap()
            .total
    }

    #[test]
    fn adjust_credits_and_records_one_adjust_movement() {
        let f = fixture(0);

        let level = f
            .engine
            .adjust(f.product_id, f.warehouse_id, 20, Some("initial count".to_string()))
            .unwrap();
        assert_eq!(level.quantity, 20);

        let page = f
            .ledger
            .movements(&MovementFilter::default(), Pagination::default())
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.movements[0].movement_type, MovementType::Adjust);
        assert_eq!(page.movements[0].quantity, 20);
        assert_eq!(page.movements[0].reason.as_deref(), Some("initial count"));
    }

    #[test]
    fn adjust_below_zero_fails_and_leaves_state_untouched() {
        let f = fixture(0);
        f.engine.adjust(f.product_id, f.warehouse_id, 20, None).unwrap();

        let err = f
            .engine
            .adjust(f.product_id, f.warehouse_id, -25, None)
            .unwrap_err();
        assert!(matches!(err, StockError::InsufficientStock { .. }));

        assert_eq!(f.ledger.quantity(f.product_id, f.warehouse_id).unwrap(), 20);
        assert_eq!(movement_count(&f.ledger), 1);
    }

    #[test]
    fn zero_delta_adjust_records_nothing() {
        let f = fixture(0);

        let level = f.engine.adjust(f.product_id, f.warehouse_id, 0, None).unwrap();
        assert_eq!(level.quantity, 0);
        assert_eq!(movement_count(&f.ledger), 0);
        assert!(f.ledger.level(f.product_id, f.warehouse_id).unwrap().is_none());
    }

    #[test]
    fn adjust_unknown_product_fails_not_found() {
        let f = fixture(0);
        let err = f
            .engine
            .adjust(ProductId::new(), f.warehouse_id, 5, None)
            .unwrap_err();
        assert!(matches!(err, StockError::NotFound(_)));
    }

    #[test]
    fn transfer_moves_stock_and_returns_destination_level() {
        let f = fixture(0);
        f.engine.adjust(f.product_id, f.warehouse_id, 20, None).unwrap();

        let destination = f
            .engine
            .transfer(f.product_id, f.warehouse_id, f.second_warehouse_id, 15, None)
            .unwrap();
        assert_eq!(destination.quantity, 15);
        assert_eq!(f.ledger.quantity(f.product_id, f.warehouse_id).unwrap(), 5);

        let page = f
            .ledger
            .movements(&MovementFilter::default(), Pagination::default())
            .unwrap();
        // Initial adjust plus the two linked transfer rows.
        assert_eq!(page.total, 3);
        let reference = page.movements[1].reference_id;
        assert!(reference.is_some());
        assert_eq!(page.movements[2].reference_id, reference);
        assert_eq!(page.movements[1].movement_type, MovementType::TransferOut);
        assert_eq!(page.movements[2].movement_type, MovementType::TransferIn);
    }

    #[test]
    fn transfer_to_same_warehouse_is_a_bad_request() {
        let f = fixture(0);
        let err = f
            .engine
            .transfer(f.product_id, f.warehouse_id, f.warehouse_id, 5, None)
            .unwrap_err();
        assert!(matches!(err, StockError::BadRequest(_)));
    }

    #[test]
    fn transfer_of_nonpositive_quantity_is_a_bad_request() {
        let f = fixture(0);
        let err = f
            .engine
            .transfer(f.product_id, f.warehouse_id, f.second_warehouse_id, 0, None)
            .unwrap_err();
        assert!(matches!(err, StockError::BadRequest(_)));
    }

    #[test]
    fn transfer_from_untouched_source_fails_not_found() {
        let f = fixture(0);
        let err = f
            .engine
            .transfer(f.product_id, f.warehouse_id, f.second_warehouse_id, 5, None)
            .unwrap_err();
        assert!(matches!(err, StockError::NotFound(_)));
    }

    #[test]
    fn inbound_event_creates_the_cell_with_an_in_movement() {
        let f = fixture(0);
        let reference_id = ReferenceId::new();

        let level = f
            .engine
            .apply_inbound_event(f.product_id, f.warehouse_id, 30, reference_id)
            .unwrap();
        assert_eq!(level.quantity, 30);

        let page = f
            .ledger
            .movements(&MovementFilter::default(), Pagination::default())
            .unwrap();
        assert_eq!(page.movements[0].movement_type, MovementType::In);
        assert_eq!(page.movements[0].reference_id, Some(reference_id));
        assert_eq!(
            page.movements[0].reason.as_deref(),
            Some("purchase order received")
        );
    }

    #[test]
    fn outbound_event_debits_with_an_out_movement() {
        let f = fixture(0);
        f.engine
            .apply_inbound_event(f.product_id, f.warehouse_id, 30, ReferenceId::new())
            .unwrap();

        let reference_id = ReferenceId::new();
        let level = f
            .engine
            .apply_outbound_event(f.product_id, f.warehouse_id, 12, reference_id)
            .unwrap();
        assert_eq!(level.quantity, 18);

        let page = f
            .ledger
            .movements(&MovementFilter::default(), Pagination::default())
            .unwrap();
        assert_eq!(page.movements[1].movement_type, MovementType::Out);
        assert_eq!(page.movements[1].reference_id, Some(reference_id));
        assert_eq!(
            page.movements[1].reason.as_deref(),
            Some("sales order confirmed")
        );
    }

    #[test]
    fn outbound_event_against_missing_cell_fails_not_found() {
        let f = fixture(0);
        let err = f
            .engine
            .apply_outbound_event(f.product_id, f.warehouse_id, 5, ReferenceId::new())
            .unwrap_err();
        assert!(matches!(err, StockError::NotFound(_)));
    }

    #[test]
    fn drop_through_reorder_level_fires_exactly_one_alert() {
        let f = fixture(10);
        f.engine.adjust(f.product_id, f.warehouse_id, 12, None).unwrap();
        assert!(f.sink.alerts.lock().unwrap().is_empty());

        f.engine.adjust(f.product_id, f.warehouse_id, -4, None).unwrap();

        let alerts = f.sink.alerts.lock().unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].current_quantity, 8);
        assert_eq!(alerts[0].reorder_level, 10);
        assert_eq!(alerts[0].warehouse_id, f.warehouse_id);
    }

    #[test]
    fn drop_that_stays_above_reorder_level_fires_nothing() {
        let f = fixture(10);
        f.engine.adjust(f.product_id, f.warehouse_id, 20, None).unwrap();

        f.engine.adjust(f.product_id, f.warehouse_id, -5, None).unwrap();

        assert!(f.sink.alerts.lock().unwrap().is_empty());
    }

    #[test]
    fn transfer_checks_the_source_cell_only() {
        let f = fixture(10);
        f.engine.adjust(f.product_id, f.warehouse_id, 12, None).unwrap();

        // Source drops to 4 (below reorder level), destination rises to 8
        // (also below) — only the source alert fires.
        f.engine
            .transfer(f.product_id, f.warehouse_id, f.second_warehouse_id, 8, None)
            .unwrap();

        let alerts = f.sink.alerts.lock().unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].warehouse_id, f.warehouse_id);
        assert_eq!(alerts[0].current_quantity, 4);
    }
}
