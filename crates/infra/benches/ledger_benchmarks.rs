use criterion::{Criterion, black_box, criterion_group, criterion_main};

use stockflow_core::{ProductId, ReferenceId, WarehouseId};
use stockflow_ledger::{
    CellPolicy, InMemoryStockLedger, MovementType, StockChange, StockLedger, TransferChange,
};

fn bench_adjust(c: &mut Criterion) {
    let ledger = InMemoryStockLedger::new();
    let product_id = ProductId::new();
    let warehouse_id = WarehouseId::new();

    ledger
        .apply(StockChange {
            product_id,
            warehouse_id,
            delta: 1_000_000,
            movement_type: MovementType::Adjust,
            reference_id: None,
            reason: None,
            policy: CellPolicy::CreateMissing,
        })
        .unwrap();

    c.bench_function("ledger_adjust", |b| {
        b.iter(|| {
            let level = ledger
                .apply(StockChange {
                    product_id,
                    warehouse_id,
                    delta: 1,
                    movement_type: MovementType::Adjust,
                    reference_id: None,
                    reason: None,
                    policy: CellPolicy::CreateMissing,
                })
                .unwrap();
            black_box(level.quantity)
        })
    });
}

fn bench_transfer(c: &mut Criterion) {
    let ledger = InMemoryStockLedger::new();
    let product_id = ProductId::new();
    let source = WarehouseId::new();
    let destination = WarehouseId::new();

    ledger
        .apply(StockChange {
            product_id,
            warehouse_id: source,
            delta: i64::MAX / 2,
            movement_type: MovementType::Adjust,
            reference_id: None,
            reason: None,
            policy: CellPolicy::CreateMissing,
        })
        .unwrap();

    c.bench_function("ledger_transfer", |b| {
        b.iter(|| {
            let applied = ledger
                .apply_transfer(TransferChange {
                    product_id,
                    source_warehouse_id: source,
                    destination_warehouse_id: destination,
                    quantity: 1,
                    reference_id: ReferenceId::new(),
                    reason: None,
                })
                .unwrap();
            black_box(applied.destination.quantity)
        })
    });
}

criterion_group!(benches, bench_adjust, bench_transfer);
criterion_main!(benches);
