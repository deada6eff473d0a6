//! Catalog ports: product and warehouse lookups.
//!
//! Catalog CRUD itself is an external collaborator; the engine only needs
//! existence checks and the reorder level, so the port stays minimal.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use stockflow_core::{ProductId, WarehouseId};

/// The slice of a product the ledger core cares about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub id: ProductId,
    pub sku: String,
    pub name: String,
    /// Quantity at or below which a low-stock alert fires.
    pub reorder_level: i64,
}

/// The slice of a warehouse the ledger core cares about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseRecord {
    pub id: WarehouseId,
    pub name: String,
}

/// Read-only catalog lookups.
pub trait Catalog: Send + Sync {
    fn product(&self, id: ProductId) -> Option<ProductRecord>;

    fn warehouse(&self, id: WarehouseId) -> Option<WarehouseRecord>;
}

impl<C> Catalog for Arc<C>
where
    C: Catalog + ?Sized,
{
    fn product(&self, id: ProductId) -> Option<ProductRecord> {
        (**self).product(id)
    }

    fn warehouse(&self, id: WarehouseId) -> Option<WarehouseRecord> {
        (**self).warehouse(id)
    }
}

/// In-memory catalog for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    products: RwLock<HashMap<ProductId, ProductRecord>>,
    warehouses: RwLock<HashMap<WarehouseId, WarehouseRecord>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_product(&self, product: ProductRecord) {
        if let Ok(mut products) = self.products.write() {
            products.insert(product.id, product);
        }
    }

    pub fn insert_warehouse(&self, warehouse: WarehouseRecord) {
        if let Ok(mut warehouses) = self.warehouses.write() {
            warehouses.insert(warehouse.id, warehouse);
        }
    }
}

impl Catalog for InMemoryCatalog {
    fn product(&self, id: ProductId) -> Option<ProductRecord> {
        let products = self.products.read().ok()?;
        products.get(&id).cloned()
    }

    fn warehouse(&self, id: WarehouseId) -> Option<WarehouseRecord> {
        let warehouses = self.warehouses.read().ok()?;
        warehouses.get(&id).cloned()
    }
}
