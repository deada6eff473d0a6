//! Postgres-backed stock ledger.
//!
//! Per-cell serialization comes from transactional row locks: every
//! mutation runs `SELECT ... FOR UPDATE` on the cell row(s) inside one
//! transaction, and the movement insert commits with the level update.
//! Transfers lock both rows in warehouse-id order so two opposing
//! transfers cannot deadlock.
//!
//! ## Error Mapping
//!
//! | PostgreSQL error code | StockError | Scenario |
//! |-----------------------|------------|----------|
//! | `23505` unique violation | `SerializationConflict` | concurrent first movement created the cell row |
//! | `40001` serialization failure | `SerializationConflict` | concurrent transaction conflict |
//! | other database errors | `Storage` | connection loss, constraint problems, ... |
//!
//! ## Thread Safety
//!
//! `PostgresStockLedger` is `Send + Sync`; the SQLx pool handles
//! connection management. The synchronous [`StockLedger`] trait bridges to
//! async SQLx through the current tokio runtime handle, so calls must come
//! from within a tokio runtime context.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;

use stockflow_core::{MovementId, ProductId, ReferenceId, StockError, StockResult, WarehouseId};
use stockflow_ledger::{
    CellPolicy, MovementFilter, MovementPage, MovementType, Pagination, StockChange, StockLedger,
    StockLevel, StockMovement, TransferApplied, TransferChange,
};

/// Postgres implementation of the stock ledger.
#[derive(Debug, Clone)]
pub struct PostgresStockLedger {
    pool: Arc<PgPool>,
}

impl PostgresStockLedger {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Fetch the level of one cell, `None` when it has never been touched.
    #[instrument(skip(self), fields(product_id = %product_id, warehouse_id = %warehouse_id), err)]
    pub async fn fetch_level(
        &self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
    ) -> StockResult<Option<StockLevel>> {
        let row = sqlx::query(
            r#"
            SELECT quantity, last_updated
            FROM stock_levels
            WHERE product_id = $1 AND warehouse_id = $2
            "#,
        )
        .bind(product_id.as_uuid())
        .bind(warehouse_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_level", e))?;

        match row {
            Some(row) => {
                let quantity: i64 = row
                    .try_get("quantity")
                    .map_err(|e| StockError::storage(format!("failed to read quantity: {e}")))?;
                let last_updated: DateTime<Utc> = row.try_get("last_updated").map_err(|e| {
                    StockError::storage(format!("failed to read last_updated: {e}"))
                })?;
                Ok(Some(StockLevel {
                    product_id,
                    warehouse_id,
                    quantity,
                    last_updated,
                }))
            }
            None => Ok(None),
        }
    }

    /// Apply a single-cell change: lock the row, mutate, append the movement.
    #[instrument(
        skip(self, change),
        fields(
            product_id = %change.product_id,
            warehouse_id = %change.warehouse_id,
            delta = change.delta
        ),
        err
    )]
    pub async fn apply_change(&self, change: StockChange) -> StockResult<StockLevel> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let current = lock_cell(&mut tx, change.product_id, change.warehouse_id).await?;

        let (next, last_updated) = match current {
            Some(quantity) => {
                let next = quantity + change.delta;
                if next < 0 {
                    tx.rollback()
                        .await
                        .map_err(|e| map_sqlx_error("rollback", e))?;
                    return Err(StockError::insufficient_stock(quantity, change.delta.abs()));
                }

                let row = sqlx::query(
                    r#"
                    UPDATE stock_levels
                    SET quantity = $3, last_updated = NOW()
                    WHERE product_id = $1 AND warehouse_id = $2
                    RETURNING last_updated
                    "#,
                )
                .bind(change.product_id.as_uuid())
                .bind(change.warehouse_id.as_uuid())
                .bind(next)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("update_level", e))?;

                let last_updated: DateTime<Utc> = row.try_get("last_updated").map_err(|e| {
                    StockError::storage(format!("failed to read last_updated: {e}"))
                })?;
                (next, last_updated)
            }
            None => {
                match change.policy {
                    CellPolicy::RequireExisting => {
                        tx.rollback()
                            .await
                            .map_err(|e| map_sqlx_error("rollback", e))?;
                        return Err(StockError::not_found("stock not found"));
                    }
                    CellPolicy::CreateMissing if change.delta < 0 => {
                        tx.rollback()
                            .await
                            .map_err(|e| map_sqlx_error("rollback", e))?;
                        return Err(StockError::insufficient_stock(0, change.delta.abs()));
                    }
                    CellPolicy::CreateMissing => {}
                }

                // A concurrent first movement for the same cell trips the
                // primary key; the 23505 mapping turns that into a
                // retriable conflict.
                let row = sqlx::query(
                    r#"
                    INSERT INTO stock_levels (product_id, warehouse_id, quantity, last_updated)
                    VALUES ($1, $2, $3, NOW())
                    RETURNING last_updated
                    "#,
                )
                .bind(change.product_id.as_uuid())
                .bind(change.warehouse_id.as_uuid())
                .bind(change.delta)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("insert_level", e))?;

                let last_updated: DateTime<Utc> = row.try_get("last_updated").map_err(|e| {
                    StockError::storage(format!("failed to read last_updated: {e}"))
                })?;
                (change.delta, last_updated)
            }
        };

        insert_movement(
            &mut tx,
            &StockMovement {
                id: MovementId::new(),
                product_id: change.product_id,
                warehouse_id: change.warehouse_id,
                movement_type: change.movement_type,
                quantity: change.delta.abs(),
                reference_id: change.reference_id,
                reason: change.reason,
                created_at: last_updated,
            },
        )
        .await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(StockLevel {
            product_id: change.product_id,
            warehouse_id: change.warehouse_id,
            quantity: next,
            last_updated,
        })
    }

    /// Apply a transfer: lock both rows in warehouse order, debit, credit,
    /// append the paired movements.
    #[instrument(
        skip(self, transfer),
        fields(
            product_id = %transfer.product_id,
            source = %transfer.source_warehouse_id,
            destination = %transfer.destination_warehouse_id,
            quantity = transfer.quantity
        ),
        err
    )]
    pub async fn apply_transfer_change(
        &self,
        transfer: TransferChange,
    ) -> StockResult<TransferApplied> {
        if transfer.source_warehouse_id == transfer.destination_warehouse_id {
            return Err(StockError::bad_request(
                "source and destination warehouses must be different",
            ));
        }
        if transfer.quantity <= 0 {
            return Err(StockError::bad_request("transfer quantity must be positive"));
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        // Lock whichever of the two rows exist, in warehouse-id order.
        let rows = sqlx::query(
            r#"
            SELECT warehouse_id, quantity
            FROM stock_levels
            WHERE product_id = $1 AND warehouse_id IN ($2, $3)
            ORDER BY warehouse_id
            FOR UPDATE
            "#,
        )
        .bind(transfer.product_id.as_uuid())
        .bind(transfer.source_warehouse_id.as_uuid())
        .bind(transfer.destination_warehouse_id.as_uuid())
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("lock_cells", e))?;

        let mut source_quantity: Option<i64> = None;
        for row in &rows {
            let warehouse: uuid::Uuid = row
                .try_get("warehouse_id")
                .map_err(|e| StockError::storage(format!("failed to read warehouse_id: {e}")))?;
            if warehouse == *transfer.source_warehouse_id.as_uuid() {
                let quantity: i64 = row
                    .try_get("quantity")
                    .map_err(|e| StockError::storage(format!("failed to read quantity: {e}")))?;
                source_quantity = Some(quantity);
            }
        }

        let Some(source_quantity) = source_quantity else {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(StockError::not_found("stock not found in source warehouse"));
        };

        if source_quantity < transfer.quantity {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(StockError::insufficient_stock(
                source_quantity,
                transfer.quantity,
            ));
        }

        let row = sqlx::query(
            r#"
            UPDATE stock_levels
            SET quantity = quantity - $3, last_updated = NOW()
            WHERE product_id = $1 AND warehouse_id = $2
            RETURNING quantity, last_updated
            "#,
        )
        .bind(transfer.product_id.as_uuid())
        .bind(transfer.source_warehouse_id.as_uuid())
        .bind(transfer.quantity)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("debit_source", e))?;

        let source_after: i64 = row
            .try_get("quantity")
            .map_err(|e| StockError::storage(format!("failed to read quantity: {e}")))?;
        let updated_at: DateTime<Utc> = row
            .try_get("last_updated")
            .map_err(|e| StockError::storage(format!("failed to read last_updated: {e}")))?;

        // Upsert keeps a concurrent first movement of the destination cell
        // from failing the transfer.
        let row = sqlx::query(
            r#"
            INSERT INTO stock_levels (product_id, warehouse_id, quantity, last_updated)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (product_id, warehouse_id)
            DO UPDATE SET
                quantity = stock_levels.quantity + EXCLUDED.quantity,
                last_updated = NOW()
            RETURNING quantity, last_updated
            "#,
        )
        .bind(transfer.product_id.as_uuid())
        .bind(transfer.destination_warehouse_id.as_uuid())
        .bind(transfer.quantity)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("credit_destination", e))?;

        let destination_after: i64 = row
            .try_get("quantity")
            .map_err(|e| StockError::storage(format!("failed to read quantity: {e}")))?;

        insert_movement(
            &mut tx,
            &StockMovement {
                id: MovementId::new(),
                product_id: transfer.product_id,
                warehouse_id: transfer.source_warehouse_id,
                movement_type: MovementType::TransferOut,
                quantity: transfer.quantity,
                reference_id: Some(transfer.reference_id),
                reason: transfer.reason.clone(),
                created_at: updated_at,
            },
        )
        .await?;
        insert_movement(
            &mut tx,
            &StockMovement {
                id: MovementId::new(),
                product_id: transfer.product_id,
                warehouse_id: transfer.destination_warehouse_id,
                movement_type: MovementType::TransferIn,
                quantity: transfer.quantity,
                reference_id: Some(transfer.reference_id),
                reason: transfer.reason.clone(),
                created_at: updated_at,
            },
        )
        .await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(TransferApplied {
            source: StockLevel {
                product_id: transfer.product_id,
                warehouse_id: transfer.source_warehouse_id,
                quantity: source_after,
                last_updated: updated_at,
            },
            destination: StockLevel {
                product_id: transfer.product_id,
                warehouse_id: transfer.destination_warehouse_id,
                quantity: destination_after,
                last_updated: updated_at,
            },
        })
    }

    /// Append a movement outside any level mutation.
    pub async fn insert_movement_row(&self, movement: &StockMovement) -> StockResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        insert_movement(&mut tx, movement).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(())
    }

    /// Query movements in insertion order with optional cell filters.
    pub async fn fetch_movements(
        &self,
        filter: &MovementFilter,
        page: Pagination,
    ) -> StockResult<MovementPage> {
        let product_param: Option<uuid::Uuid> = filter.product_id.map(|id| *id.as_uuid());
        let warehouse_param: Option<uuid::Uuid> = filter.warehouse_id.map(|id| *id.as_uuid());

        let count_row = sqlx::query(
            r#"
            SELECT COUNT(*) as total
            FROM stock_movements
            WHERE ($1::uuid IS NULL OR product_id = $1)
                AND ($2::uuid IS NULL OR warehouse_id = $2)
            "#,
        )
        .bind(product_param)
        .bind(warehouse_param)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("count_movements", e))?;

        let total: i64 = count_row
            .try_get("total")
            .map_err(|e| StockError::storage(format!("failed to read count: {e}")))?;

        let rows = sqlx::query(
            r#"
            SELECT id, product_id, warehouse_id, movement_type, quantity,
                   reference_id, reason, created_at
            FROM stock_movements
            WHERE ($1::uuid IS NULL OR product_id = $1)
                AND ($2::uuid IS NULL OR warehouse_id = $2)
            ORDER BY created_at ASC, id ASC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(product_param)
        .bind(warehouse_param)
        .bind(page.limit as i64)
        .bind(page.offset as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("query_movements", e))?;

        let mut movements = Vec::with_capacity(rows.len());
        for row in rows {
            movements.push(movement_from_row(&row)?);
        }

        let has_more = total as u64 > page.offset as u64 + page.limit as u64;

        Ok(MovementPage {
            movements,
            total: total as u64,
            pagination: page,
            has_more,
        })
    }
}

/// Async read-only movement inspection.
///
/// The sync [`StockLedger`] trait serves the engine; async callers (an
/// HTTP layer, reporting jobs) go through this instead of blocking a
/// runtime thread.
#[async_trait::async_trait]
pub trait MovementQuery: Send + Sync {
    async fn query_movements(
        &self,
        filter: MovementFilter,
        page: Pagination,
    ) -> StockResult<MovementPage>;
}

#[async_trait::async_trait]
impl MovementQuery for PostgresStockLedger {
    async fn query_movements(
        &self,
        filter: MovementFilter,
        page: Pagination,
    ) -> StockResult<MovementPage> {
        self.fetch_movements(&filter, page).await
    }
}

/// Lock one cell row, returning its quantity, `None` if the row is absent.
async fn lock_cell(
    tx: &mut Transaction<'_, Postgres>,
    product_id: ProductId,
    warehouse_id: WarehouseId,
) -> StockResult<Option<i64>> {
    let row = sqlx::query(
        r#"
        SELECT quantity
        FROM stock_levels
        WHERE product_id = $1 AND warehouse_id = $2
        FOR UPDATE
        "#,
    )
    .bind(product_id.as_uuid())
    .bind(warehouse_id.as_uuid())
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("lock_cell", e))?;

    match row {
        Some(row) => {
            let quantity: i64 = row
                .try_get("quantity")
                .map_err(|e| StockError::storage(format!("failed to read quantity: {e}")))?;
            Ok(Some(quantity))
        }
        None => Ok(None),
    }
}

async fn insert_movement(
    tx: &mut Transaction<'_, Postgres>,
    movement: &StockMovement,
) -> StockResult<()> {
    sqlx::query(
        r#"
        INSERT INTO stock_movements (
            id, product_id, warehouse_id, movement_type,
            quantity, reference_id, reason, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(movement.id.as_uuid())
    .bind(movement.product_id.as_uuid())
    .bind(movement.warehouse_id.as_uuid())
    .bind(movement.movement_type.as_str())
    .bind(movement.quantity)
    .bind(movement.reference_id.map(|id| *id.as_uuid()))
    .bind(movement.reason.as_deref())
    .bind(movement.created_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_movement", e))?;

    Ok(())
}

fn movement_from_row(row: &sqlx::postgres::PgRow) -> StockResult<StockMovement> {
    let id: uuid::Uuid = row
        .try_get("id")
        .map_err(|e| StockError::storage(format!("failed to read id: {e}")))?;
    let product_id: uuid::Uuid = row
        .try_get("product_id")
        .map_err(|e| StockError::storage(format!("failed to read product_id: {e}")))?;
    let warehouse_id: uuid::Uuid = row
        .try_get("warehouse_id")
        .map_err(|e| StockError::storage(format!("failed to read warehouse_id: {e}")))?;
    let movement_type: String = row
        .try_get("movement_type")
        .map_err(|e| StockError::storage(format!("failed to read movement_type: {e}")))?;
    let quantity: i64 = row
        .try_get("quantity")
        .map_err(|e| StockError::storage(format!("failed to read quantity: {e}")))?;
    let reference_id: Option<uuid::Uuid> = row
        .try_get("reference_id")
        .map_err(|e| StockError::storage(format!("failed to read reference_id: {e}")))?;
    let reason: Option<String> = row
        .try_get("reason")
        .map_err(|e| StockError::storage(format!("failed to read reason: {e}")))?;
    let created_at: DateTime<Utc> = row
        .try_get("created_at")
        .map_err(|e| StockError::storage(format!("failed to read created_at: {e}")))?;

    Ok(StockMovement {
        id: MovementId::from_uuid(id),
        product_id: ProductId::from_uuid(product_id),
        warehouse_id: WarehouseId::from_uuid(warehouse_id),
        movement_type: MovementType::from_str(&movement_type)?,
        quantity,
        reference_id: reference_id.map(ReferenceId::from_uuid),
        reason,
        created_at,
    })
}

/// Map SQLx errors to the domain taxonomy.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StockError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());

            match db_err.code().as_deref() {
                // Unique violation: a concurrent transaction created the row.
                Some("23505") => StockError::conflict(msg),
                // Serialization failure under concurrent load.
                Some("40001") => StockError::conflict(msg),
                _ => StockError::storage(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StockError::storage(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::RowNotFound => {
            StockError::storage(format!("unexpected row not found in {operation}"))
        }
        _ => StockError::storage(format!("sqlx error in {operation}: {err}")),
    }
}

// Implement the synchronous ledger trait.
//
// The trait is synchronous while Postgres operations are async; like every
// caller of this ledger, we rely on running inside a tokio runtime and
// bridge with the runtime handle.

impl StockLedger for PostgresStockLedger {
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
        let handle = runtime_handle()?;
        handle.block_on(self.fetch_level(product_id, warehouse_id))
    }

    fn apply(&self, change: StockChange) -> StockResult<StockLevel> {
        let handle = runtime_handle()?;
        handle.block_on(self.apply_change(change))
    }

    fn apply_transfer(&self, transfer: TransferChange) -> StockResult<TransferApplied> {
        let handle = runtime_handle()?;
        handle.block_on(self.apply_transfer_change(transfer))
    }

    fn record_movement(&self, movement: StockMovement) -> StockResult<()> {
        let handle = runtime_handle()?;
        handle.block_on(self.insert_movement_row(&movement))
    }

    fn movements(&self, filter: &MovementFilter, page: Pagination) -> StockResult<MovementPage> {
        let handle = runtime_handle()?;
        handle.block_on(self.fetch_movements(filter, page))
    }
}

fn runtime_handle() -> StockResult<tokio::runtime::Handle> {
    tokio::runtime::Handle::try_current().map_err(|_| {
        StockError::storage(
            "PostgresStockLedger requires an async runtime (tokio). \
             Ensure you're calling from within a tokio runtime context.",
        )
    })
}
