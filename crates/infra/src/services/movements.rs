use std::sync::Arc;

use tracing::{info, instrument, warn};

use stockledger_core::{
    LedgerError, LedgerResult, Page, Pagination, ProductId, ReferenceKind, SortOrder, WarehouseId,
};
use stockledger_inventory::{MovementType, Reconciliation, StockMovement};

use crate::store::{LedgerSnapshot, LedgerStore, MovementFilter};

/// Read side of the movement ledger.
#[derive(Clone)]
pub struct MovementService {
    store: Arc<dyn LedgerStore>,
}

impl MovementService {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    pub async fn get(&self, id: i64) -> LedgerResult<StockMovement> {
        self.store
            .get_movement(id)
            .await?
            .ok_or_else(|| LedgerError::not_found(ReferenceKind::StockMovement, id))
    }

    pub async fn list(
        &self,
        filter: &MovementFilter,
        pagination: Pagination,
        order: SortOrder,
    ) -> LedgerResult<Page<StockMovement>> {
        self.store.list_movements(filter, pagination, order).await
    }

    pub async fn list_by_product(
        &self,
        product_id: ProductId,
        pagination: Pagination,
    ) -> LedgerResult<Page<StockMovement>> {
        let filter = MovementFilter {
            product_id: Some(product_id),
            ..Default::default()
        };
        self.list(&filter, pagination, SortOrder::Ascending).await
    }

    pub async fn list_by_warehouse(
        &self,
        warehouse_id: WarehouseId,
        pagination: Pagination,
    ) -> LedgerResult<Page<StockMovement>> {
        let filter = MovementFilter {
            warehouse_id: Some(warehouse_id),
            ..Default::default()
        };
        self.list(&filter, pagination, SortOrder::Ascending).await
    }

    pub async fn list_by_type(
        &self,
        movement_type: MovementType,
        pagination: Pagination,
    ) -> LedgerResult<Page<StockMovement>> {
        let filter = MovementFilter {
            movement_type: Some(movement_type),
            ..Default::default()
        };
        self.list(&filter, pagination, SortOrder::Ascending).await
    }

    /// Movement history of one product in one warehouse, across locations.
    pub async fn product_history(
        &self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
        pagination: Pagination,
        order: SortOrder,
    ) -> LedgerResult<Page<StockMovement>> {
        let filter = MovementFilter {
            product_id: Some(product_id),
            warehouse_id: Some(warehouse_id),
            ..Default::default()
        };
        self.list(&filter, pagination, order).await
    }

    /// Replay the full ledger for `(product, warehouse)` and compare it with the
    /// records it should have produced.
    #[instrument(skip(self), fields(product_id = %product_id, warehouse_id = %warehouse_id))]
    pub async fn reconcile(
        &self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
    ) -> LedgerResult<Reconciliation> {
        let LedgerSnapshot {
            mut movements,
            records,
        } = self.store.ledger_snapshot(product_id, warehouse_id).await?;
        // Ledger order is commit order, which ids follow even when caller
        // timestamps do not.
        movements.sort_by_key(|m| m.id);

        let report = Reconciliation::compute(product_id, warehouse_id, &movements, &records);
        if report.is_consistent() {
            info!(
                movement_count = report.movement_count,
                on_hand = report.record_on_hand,
                "ledger reconciles"
            );
        } else {
            warn!(
                ledger_on_hand = report.ledger_on_hand,
                record_on_hand = report.record_on_hand,
                broken_links = report.broken_links.len(),
                "ledger does not reconcile"
            );
        }
        Ok(report)
    }
}
