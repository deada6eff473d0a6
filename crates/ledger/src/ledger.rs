//! The authoritative quantity store.
//!
//! A [`StockLedger`] owns the quantity-per-cell table and the append-only
//! movement log. Every mutating operation applies the level change and the
//! movement insert as **one atomic unit** — no intermediate state is
//! externally observable.
//!
//! ## Serialization discipline
//!
//! All reads-then-writes to one cell are serialized; mutations of different
//! cells proceed without contention. An operation touching two cells
//! (transfer) acquires them in `CellKey` order to stay deadlock-free.
//! Every caller — the event consumer and direct engine callers alike —
//! goes through the same ledger and therefore the same discipline.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};

use stockflow_core::{MovementId, ProductId, ReferenceId, StockError, StockResult, WarehouseId};

use crate::movement::{
    CellKey, MovementFilter, MovementPage, MovementType, Pagination, StockLevel, StockMovement,
};

/// How `apply` treats a cell that does not exist yet.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CellPolicy {
    /// Create the cell lazily (first movement creates it).
    CreateMissing,
    /// Fail with `NotFound` when the cell is absent.
    RequireExisting,
}

/// A single-cell mutation: signed delta plus the movement row describing it.
#[derive(Debug, Clone)]
pub struct StockChange {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub delta: i64,
    pub movement_type: MovementType,
    pub reference_id: Option<ReferenceId>,
    pub reason: Option<String>,
    pub policy: CellPolicy,
}

/// A two-cell mutation: debit the source, credit the destination, and
/// append the paired TRANSFER_OUT / TRANSFER_IN rows sharing `reference_id`.
#[derive(Debug, Clone)]
pub struct TransferChange {
    pub product_id: ProductId,
    pub source_warehouse_id: WarehouseId,
    pub destination_warehouse_id: WarehouseId,
    pub quantity: i64,
    pub reference_id: ReferenceId,
    pub reason: Option<String>,
}

/// Both levels as they stand after a committed transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferApplied {
    pub source: StockLevel,
    pub destination: StockLevel,
}

/// Authoritative per-cell quantity store with an append-only movement log.
///
/// Implementations must:
/// - serialize concurrent access per cell (lost updates are not acceptable)
/// - reject any mutation that would drive a quantity negative
/// - commit level change and movement insert atomically
/// - keep movements immutable and queryable in insertion order
pub trait StockLedger: Send + Sync {
    /// Current quantity for a cell; absent cells read as zero (not an error).
    fn quantity(&self, product_id: ProductId, warehouse_id: WarehouseId) -> StockResult<i64>;

    /// The full level record, or `None` when the cell has never been touched.
    fn level(
        &self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
    ) -> StockResult<Option<StockLevel>>;

    /// Atomically apply a signed delta to one cell and append its movement.
    ///
    /// Fails `InsufficientStock` when `current + delta < 0`, leaving the
    /// cell and the log untouched.
    fn apply(&self, change: StockChange) -> StockResult<StockLevel>;

    /// Atomically move quantity between two cells of one product.
    ///
    /// All-or-nothing: a failure at any step leaves neither side mutated
    /// and appends no movement rows.
    fn apply_transfer(&self, transfer: TransferChange) -> StockResult<TransferApplied>;

    /// Append a movement without touching any level (pure append).
    fn record_movement(&self, movement: StockMovement) -> StockResult<()>;

    /// Query movements in insertion order with optional filters.
    fn movements(&self, filter: &MovementFilter, page: Pagination) -> StockResult<MovementPage>;
}

impl<L> StockLedger for Arc<L>
where
    L: StockLedger + ?Sized,
{
    fn quantity(&self, product_id: ProductId, warehouse_id: WarehouseId) -> StockResult<i64> {
        (**self).quantity(product_id, warehouse_id)
    }

    fn level(
        &self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
    ) -> StockResult<Option<StockLevel>> {
        (**self).level(product_id, warehouse_id)
    }

    fn apply(&self, change: StockChange) -> StockResult<StockLevel> {
        (**self).apply(change)
    }

    fn apply_transfer(&self, transfer: TransferChange) -> StockResult<TransferApplied> {
        (**self).apply_transfer(transfer)
    }

    fn record_movement(&self, movement: StockMovement) -> StockResult<()> {
        (**self).record_movement(movement)
    }

    fn movements(&self, filter: &MovementFilter, page: Pagination) -> StockResult<MovementPage> {
        (**self).movements(filter, page)
    }
}

#[derive(Debug)]
struct CellState {
    quantity: i64,
    last_updated: DateTime<Utc>,
}

/// In-memory ledger: a mutex per cell inside a shared map, plus a movement
/// vector whose push order is the insertion order.
///
/// Intended for tests/dev and single-process deployments. The cell map's
/// outer lock is held only to look up or insert a cell slot, never across
/// a mutation, so unrelated cells do not contend.
#[derive(Debug, Default)]
pub struct InMemoryStockLedger {
    cells: RwLock<HashMap<CellKey, Arc<Mutex<CellState>>>>,
    movements: RwLock<Vec<StockMovement>>,
}

impl InMemoryStockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn existing_slot(&self, key: CellKey) -> StockResult<Option<Arc<Mutex<CellState>>>> {
        let cells = self
            .cells
            .read()
            .map_err(|_| StockError::storage("ledger lock poisoned"))?;
        Ok(cells.get(&key).cloned())
    }

    fn slot_or_create(&self, key: CellKey) -> StockResult<Arc<Mutex<CellState>>> {
        if let Some(slot) = self.existing_slot(key)? {
            return Ok(slot);
        }
        let mut cells = self
            .cells
            .write()
            .map_err(|_| StockError::storage("ledger lock poisoned"))?;
        Ok(cells
            .entry(key)
            .or_insert_with(|| {
                Arc::new(Mutex::new(CellState {
                    quantity: 0,
                    last_updated: Utc::now(),
                }))
            })
            .clone())
    }

    fn append(&self, movement: StockMovement) -> StockResult<()> {
        let mut log = self
            .movements
            .write()
            .map_err(|_| StockError::storage("movement log lock poisoned"))?;
        log.push(movement);
        Ok(())
    }

    fn append_pair(&self, first: StockMovement, second: StockMovement) -> StockResult<()> {
        let mut log = self
            .movements
            .write()
            .map_err(|_| StockError::storage("movement log lock poisoned"))?;
        log.push(first);
        log.push(second);
        Ok(())
    }
}

impl StockLedger for InMemoryStockLedger {
    fn quantity(&self, product_id: ProductId, warehouse_id: WarehouseId) -> StockResult<i64> {
        Ok(self
            .level(product_id, warehouse_id)?
            .map_or(0, |level| level.quantity))
    }

    fn level(
        &self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
    ) -> StockResult<Option<StockLevel>> {
        let key = CellKey::new(product_id, warehouse_id);
        let Some(slot) = self.existing_slot(key)? else {
            return Ok(None);
        };
        let cell = slot
            .lock()
            .map_err(|_| StockError::storage("cell lock poisoned"))?;
        Ok(Some(StockLevel {
            product_id,
            warehouse_id,
            quantity: cell.quantity,
            last_updated: cell.last_updated,
        }))
    }

    fn apply(&self, change: StockChange) -> StockResult<StockLevel> {
        let key = CellKey::new(change.product_id, change.warehouse_id);

        let slot = match self.existing_slot(key)? {
            Some(slot) => slot,
            None => match change.policy {
                CellPolicy::RequireExisting => {
                    return Err(StockError::not_found("stock not found"));
                }
                // A debit against a cell that does not exist can never
                // succeed; fail before creating an empty cell.
                CellPolicy::CreateMissing if change.delta < 0 => {
                    return Err(StockError::insufficient_stock(0, change.delta.abs()));
                }
                CellPolicy::CreateMissing => self.slot_or_create(key)?,
            },
        };

        let mut cell = slot
            .lock()
            .map_err(|_| StockError::storage("cell lock poisoned"))?;

        let next = cell.quantity + change.delta;
        if next < 0 {
            return Err(StockError::insufficient_stock(
                cell.quantity,
                change.delta.abs(),
            ));
        }

        let now = Utc::now();
        cell.quantity = next;
        cell.last_updated = now;

        // The movement appends while the cell lock is held: level change
        // and log entry commit as one unit.
        self.append(StockMovement {
            id: MovementId::new(),
            product_id: change.product_id,
            warehouse_id: change.warehouse_id,
            movement_type: change.movement_type,
            quantity: change.delta.abs(),
            reference_id: change.reference_id,
            reason: change.reason,
            created_at: now,
        })?;

        Ok(StockLevel {
            product_id: change.product_id,
            warehouse_id: change.warehouse_id,
            quantity: next,
            last_updated: now,
        })
    }

    fn apply_transfer(&self, transfer: TransferChange) -> StockResult<TransferApplied> {
        // Identical keys would double-lock one mutex below.
        if transfer.source_warehouse_id == transfer.destination_warehouse_id {
            return Err(StockError::bad_request(
                "source and destination warehouses must be different",
            ));
        }
        if transfer.quantity <= 0 {
            return Err(StockError::bad_request("transfer quantity must be positive"));
        }

        let source_key = CellKey::new(transfer.product_id, transfer.source_warehouse_id);
        let destination_key = CellKey::new(transfer.product_id, transfer.destination_warehouse_id);

        let source_slot = self
            .existing_slot(source_key)?
            .ok_or_else(|| StockError::not_found("stock not found in source warehouse"))?;

        // Check availability before touching the destination, so a doomed
        // transfer creates nothing.
        {
            let source = source_slot
                .lock()
                .map_err(|_| StockError::storage("cell lock poisoned"))?;
            if source.quantity < transfer.quantity {
                return Err(StockError::insufficient_stock(
                    source.quantity,
                    transfer.quantity,
                ));
            }
        }

        let destination_slot = self.slot_or_create(destination_key)?;

        // Acquire both cell locks in key order, never in request order.
        let (mut source, mut destination) = if source_key < destination_key {
            let s = source_slot
                .lock()
                .map_err(|_| StockError::storage("cell lock poisoned"))?;
            let d = destination_slot
                .lock()
                .map_err(|_| StockError::storage("cell lock poisoned"))?;
            (s, d)
        } else {
            let d = destination_slot
                .lock()
                .map_err(|_| StockError::storage("cell lock poisoned"))?;
            let s = source_slot
                .lock()
                .map_err(|_| StockError::storage("cell lock poisoned"))?;
            (s, d)
        };

        // Re-check under the locks: the pre-check ran unserialised.
        if source.quantity < transfer.quantity {
            return Err(StockError::insufficient_stock(
                source.quantity,
                transfer.quantity,
            ));
        }

        let now = Utc::now();
        source.quantity -= transfer.quantity;
        source.last_updated = now;
        destination.quantity += transfer.quantity;
        destination.last_updated = now;

        self.append_pair(
            StockMovement {
                id: MovementId::new(),
                product_id: transfer.product_id,
                warehouse_id: transfer.source_warehouse_id,
                movement_type: MovementType::TransferOut,
                quantity: transfer.quantity,
                reference_id: Some(transfer.reference_id),
                reason: transfer.reason.clone(),
                created_at: now,
            },
            StockMovement {
                id: MovementId::new(),
                product_id: transfer.product_id,
                warehouse_id: transfer.destination_warehouse_id,
                movement_type: MovementType::TransferIn,
                quantity: transfer.quantity,
                reference_id: Some(transfer.reference_id),
                reason: transfer.reason,
                created_at: now,
            },
        )?;

        Ok(TransferApplied {
            source: StockLevel {
                product_id: transfer.product_id,
                warehouse_id: transfer.source_warehouse_id,
                quantity: source.quantity,
                last_updated: now,
            },
            destination: StockLevel {
                product_id: transfer.product_id,
                warehouse_id: transfer.destination_warehouse_id,
                quantity: destination.quantity,
                last_updated: now,
            },
        })
    }

    fn record_movement(&self, movement: StockMovement) -> StockResult<()> {
        self.append(movement)
    }

    fn movements(&self, filter: &MovementFilter, page: Pagination) -> StockResult<MovementPage> {
        let log = self
            .movements
            .read()
            .map_err(|_| StockError::storage("movement log lock poisoned"))?;

        let matching: Vec<&StockMovement> = log.iter().filter(|m| filter.matches(m)).collect();
        let total = matching.len() as u64;

        let movements: Vec<StockMovement> = matching
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .cloned()
            .collect();

        let has_more = total > (page.offset as u64 + page.limit as u64);

        Ok(MovementPage {
            movements,
            total,
            pagination: page,
            has_more,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn adjust_change(
        product_id: ProductId,
        warehouse_id: WarehouseId,
        delta: i64,
    ) -> StockChange {
        StockChange {
            product_id,
            warehouse_id,
            delta,
            movement_type: MovementType::Adjust,
            reference_id: None,
            reason: None,
            policy: CellPolicy::CreateMissing,
        }
    }

    #[test]
    fn absent_cell_reads_as_zero() {
        let ledger = InMemoryStockLedger::new();
        let quantity = ledger.quantity(ProductId::new(), WarehouseId::new()).unwrap();
        assert_eq!(quantity, 0);
        assert!(ledger.level(ProductId::new(), WarehouseId::new()).unwrap().is_none());
    }

    #[test]
    fn apply_creates_the_cell_and_appends_one_movement() {
        let ledger = InMemoryStockLedger::new();
        let product_id = ProductId::new();
        let warehouse_id = WarehouseId::new();

        let level = ledger.apply(adjust_change(product_id, warehouse_id, 20)).unwrap();
        assert_eq!(level.quantity, 20);

        let page = ledger
            .movements(&MovementFilter::default(), Pagination::default())
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.movements[0].quantity, 20);
        assert_eq!(page.movements[0].movement_type, MovementType::Adjust);
    }

    #[test]
    fn debit_below_zero_is_rejected_without_side_effects() {
        let ledger = InMemoryStockLedger::new();
        let product_id = ProductId::new();
        let warehouse_id = WarehouseId::new();
        ledger.apply(adjust_change(product_id, warehouse_id, 20)).unwrap();

        let err = ledger
            .apply(adjust_change(product_id, warehouse_id, -25))
            .unwrap_err();
        match err {
            StockError::InsufficientStock {
                available,
                requested,
            } => {
                assert_eq!(available, 20);
                assert_eq!(requested, 25);
            }
            other => panic!("Expected InsufficientStock, got {other:?}"),
        }

        assert_eq!(ledger.quantity(product_id, warehouse_id).unwrap(), 20);
        let page = ledger
            .movements(&MovementFilter::default(), Pagination::default())
            .unwrap();
        assert_eq!(page.total, 1);
    }

    #[test]
    fn debit_against_missing_cell_does_not_create_it() {
        let ledger = InMemoryStockLedger::new();
        let product_id = ProductId::new();
        let warehouse_id = WarehouseId::new();

        let err = ledger
            .apply(adjust_change(product_id, warehouse_id, -1))
            .unwrap_err();
        assert!(matches!(err, StockError::InsufficientStock { .. }));
        assert!(ledger.level(product_id, warehouse_id).unwrap().is_none());
    }

    #[test]
    fn require_existing_fails_on_absent_cell() {
        let ledger = InMemoryStockLedger::new();
        let mut change = adjust_change(ProductId::new(), WarehouseId::new(), 5);
        change.policy = CellPolicy::RequireExisting;

        let err = ledger.apply(change).unwrap_err();
        assert!(matches!(err, StockError::NotFound(_)));
    }

    #[test]
    fn transfer_moves_quantity_and_links_two_movements() {
        let ledger = InMemoryStockLedger::new();
        let product_id = ProductId::new();
        let source = WarehouseId::new();
        let destination = WarehouseId::new();
        ledger.apply(adjust_change(product_id, source, 20)).unwrap();

        let reference_id = ReferenceId::new();
        let applied = ledger
            .apply_transfer(TransferChange {
                product_id,
                source_warehouse_id: source,
                destination_warehouse_id: destination,
                quantity: 15,
                reference_id,
                reason: None,
            })
            .unwrap();

        assert_eq!(applied.source.quantity, 5);
        assert_eq!(applied.destination.quantity, 15);

        let page = ledger
            .movements(&MovementFilter::default(), Pagination::default())
            .unwrap();
        let linked: Vec<&StockMovement> = page
            .movements
            .iter()
            .filter(|m| m.reference_id == Some(reference_id))
            .collect();
        assert_eq!(linked.len(), 2);
        assert_eq!(linked[0].movement_type, MovementType::TransferOut);
        assert_eq!(linked[0].warehouse_id, source);
        assert_eq!(linked[1].movement_type, MovementType::TransferIn);
        assert_eq!(linked[1].warehouse_id, destination);
        assert_eq!(linked[0].quantity, linked[1].quantity);
    }

    #[test]
    fn short_transfer_changes_nothing() {
        let ledger = InMemoryStockLedger::new();
        let product_id = ProductId::new();
        let source = WarehouseId::new();
        let destination = WarehouseId::new();
        ledger.apply(adjust_change(product_id, source, 5)).unwrap();

        let err = ledger
            .apply_transfer(TransferChange {
                product_id,
                source_warehouse_id: source,
                destination_warehouse_id: destination,
                quantity: 10,
                reference_id: ReferenceId::new(),
                reason: None,
            })
            .unwrap_err();
        assert!(matches!(err, StockError::InsufficientStock { .. }));

        assert_eq!(ledger.quantity(product_id, source).unwrap(), 5);
        assert!(ledger.level(product_id, destination).unwrap().is_none());
        let page = ledger
            .movements(&MovementFilter::default(), Pagination::default())
            .unwrap();
        assert_eq!(page.total, 1);
    }

    #[test]
    fn transfer_from_missing_source_fails_not_found() {
        let ledger = InMemoryStockLedger::new();
        let err = ledger
            .apply_transfer(TransferChange {
                product_id: ProductId::new(),
                source_warehouse_id: WarehouseId::new(),
                destination_warehouse_id: WarehouseId::new(),
                quantity: 1,
                reference_id: ReferenceId::new(),
                reason: None,
            })
            .unwrap_err();
        assert!(matches!(err, StockError::NotFound(_)));
    }

    #[test]
    fn movement_query_filters_and_paginates_in_insertion_order() {
        let ledger = InMemoryStockLedger::new();
        let product_id = ProductId::new();
        let other_product = ProductId::new();
        let warehouse_id = WarehouseId::new();

        for _ in 0..3 {
            ledger.apply(adjust_change(product_id, warehouse_id, 1)).unwrap();
        }
        ledger.apply(adjust_change(other_product, warehouse_id, 1)).unwrap();

        let filter = MovementFilter {
            product_id: Some(product_id),
            warehouse_id: None,
        };
        let page = ledger
            .movements(&filter, Pagination::new(Some(2), None))
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.movements.len(), 2);
        assert!(page.has_more);

        let rest = ledger
            .movements(&filter, Pagination::new(Some(2), Some(2)))
            .unwrap();
        assert_eq!(rest.movements.len(), 1);
        assert!(!rest.has_more);

        let all = ledger
            .movements(&MovementFilter::default(), Pagination::default())
            .unwrap();
        let created: Vec<_> = all.movements.iter().map(|m| m.created_at).collect();
        let mut sorted = created.clone();
        sorted.sort();
        assert_eq!(created, sorted);
    }

    #[test]
    fn record_movement_appends_without_touching_levels() {
        let ledger = InMemoryStockLedger::new();
        let product_id = ProductId::new();
        let warehouse_id = WarehouseId::new();

        ledger
            .record_movement(StockMovement {
                id: stockflow_core::MovementId::new(),
                product_id,
                warehouse_id,
                movement_type: MovementType::In,
                quantity: 5,
                reference_id: None,
                reason: None,
                created_at: Utc::now(),
            })
            .unwrap();

        assert!(ledger.level(product_id, warehouse_id).unwrap().is_none());
        let page = ledger
            .movements(&MovementFilter::default(), Pagination::default())
            .unwrap();
        assert_eq!(page.total, 1);
    }

    #[test]
    fn concurrent_adjustments_on_one_cell_never_lose_updates() {
        let ledger = Arc::new(InMemoryStockLedger::new());
        let product_id = ProductId::new();
        let warehouse_id = WarehouseId::new();
        ledger.apply(adjust_change(product_id, warehouse_id, 1000)).unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let ledger = ledger.clone();
            handles.push(thread::spawn(move || {
                let delta = if i % 2 == 0 { 7 } else { -7 };
                let mut applied = 0i64;
                for _ in 0..100 {
                    match ledger.apply(adjust_change(product_id, warehouse_id, delta)) {
                        Ok(level) => {
                            assert!(level.quantity >= 0);
                            applied += delta;
                        }
                        Err(StockError::InsufficientStock { .. }) => {}
                        Err(other) => panic!("unexpected error: {other:?}"),
                    }
                }
                applied
            }));
        }

        let applied_sum: i64 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        let final_quantity = ledger.quantity(product_id, warehouse_id).unwrap();
        assert_eq!(final_quantity, 1000 + applied_sum);
        assert!(final_quantity >= 0);
    }

    #[test]
    fn opposing_concurrent_transfers_do_not_deadlock() {
        let ledger = Arc::new(InMemoryStockLedger::new());
        let product_id = ProductId::new();
        let a = WarehouseId::new();
        let b = WarehouseId::new();
        ledger.apply(adjust_change(product_id, a, 500)).unwrap();
        ledger.apply(adjust_change(product_id, b, 500)).unwrap();

        let forward = {
            let ledger = ledger.clone();
            thread::spawn(move || {
                for _ in 0..200 {
                    let _ = ledger.apply_transfer(TransferChange {
                        product_id,
                        source_warehouse_id: a,
                        destination_warehouse_id: b,
                        quantity: 3,
                        reference_id: ReferenceId::new(),
                        reason: None,
                    });
                }
            })
        };
        let backward = {
            let ledger = ledger.clone();
            thread::spawn(move || {
                for _ in 0..200 {
                    let _ = ledger.apply_transfer(TransferChange {
                        product_id,
                        source_warehouse_id: b,
                        destination_warehouse_id: a,
                        quantity: 3,
                        reference_id: ReferenceId::new(),
                        reason: None,
                    });
                }
            })
        };
        forward.join().unwrap();
        backward.join().unwrap();

        let total = ledger.quantity(product_id, a).unwrap() + ledger.quantity(product_id, b).unwrap();
        assert_eq!(total, 1000);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// The final quantity equals the sum of all successfully-applied
            /// deltas, and no intermediate level is ever negative.
            #[test]
            fn quantity_is_the_sum_of_applied_deltas(deltas in prop::collection::vec(-50i64..50, 1..40)) {
                let ledger = InMemoryStockLedger::new();
                let product_id = ProductId::new();
                let warehouse_id = WarehouseId::new();

                let mut expected = 0i64;
                for delta in deltas {
                    if delta == 0 {
                        continue;
                    }
                    match ledger.apply(adjust_change(product_id, warehouse_id, delta)) {
                        Ok(level) => {
                            prop_assert!(level.quantity >= 0);
                            expected += delta;
                        }
                        Err(StockError::InsufficientStock { .. }) => {
                            prop_assert!(expected + delta < 0);
                        }
                        Err(other) => return Err(TestCaseError::fail(format!("{other:?}"))),
                    }
                }

                prop_assert_eq!(ledger.quantity(product_id, warehouse_id).unwrap(), expected);
            }
        }
    }
}
