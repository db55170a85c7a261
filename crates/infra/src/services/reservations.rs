use std::sync::Arc;

use tracing::{info, instrument};

use stockledger_core::{LedgerResult, OperationContext, RecordKey};
use stockledger_inventory::InventoryRecord;

use crate::store::{LedgerStore, RecordUpdate};

/// Soft holds on available stock. Reservations never write movements and
/// never change on-hand.
#[derive(Clone)]
pub struct ReservationManager {
    store: Arc<dyn LedgerStore>,
}

impl ReservationManager {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self, ctx), fields(key = %key), err)]
    pub async fn reserve(
        &self,
        key: &RecordKey,
        quantity: i64,
        ctx: &OperationContext,
    ) -> LedgerResult<InventoryRecord> {
        let record = self
            .store
            .update_record(key, RecordUpdate::Reserve(quantity), ctx)
            .await?;
        info!(
            reserved = record.quantity_reserved,
            available = record.quantity_available(),
            "stock reserved"
        );
        Ok(record)
    }

    #[instrument(skip(self, ctx), fields(key = %key), err)]
    pub async fn release(
        &self,
        key: &RecordKey,
        quantity: i64,
        ctx: &OperationContext,
    ) -> LedgerResult<InventoryRecord> {
        let record = self
            .store
            .update_record(key, RecordUpdate::Release(quantity), ctx)
            .await?;
        info!(
            reserved = record.quantity_reserved,
            available = record.quantity_available(),
            "reservation released"
        );
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use stockledger_core::{ActorId, ErrorKind, Pagination, ProductId, SortOrder, WarehouseId};
    use stockledger_inventory::{MovementType, StockChange, StockStatus};

    use crate::store::{CommitRequest, InMemoryLedgerStore, MovementFilter};

    fn test_ctx() -> OperationContext {
        OperationContext::new(ActorId::new(), Utc::now())
    }

    async fn test_stocked(on_hand: i64) -> (Arc<InMemoryLedgerStore>, RecordKey) {
        let store = Arc::new(InMemoryLedgerStore::new());
        let key = RecordKey::new(ProductId::new(), WarehouseId::new());
        store
            .commit(CommitRequest::changes(
                test_ctx(),
                vec![StockChange::delta(key, on_hand, MovementType::Receipt)],
            ))
            .await
            .unwrap();
        (store, key)
    }

    #[tokio::test]
    async fn reserve_then_release_writes_no_movements() {
        let (store, key) = test_stocked(10).await;
        let manager = ReservationManager::new(store.clone());
        let ctx = test_ctx();

        let held = manager.reserve(&key, 4, &ctx).await.unwrap();
        assert_eq!(held.quantity_available(), 6);
        let freed = manager.release(&key, 4, &ctx).await.unwrap();
        assert_eq!(freed.quantity_reserved, 0);
        assert_eq!(freed.quantity_on_hand, 10);

        let movements = store
            .list_movements(&MovementFilter::default(), Pagination::default(), SortOrder::Ascending)
            .await
            .unwrap();
        assert_eq!(movements.total, 1);
    }

    #[tokio::test]
    async fn over_reserve_and_over_release_are_rejected() {
        let (store, key) = test_stocked(5).await;
        let manager = ReservationManager::new(store);
        let ctx = test_ctx();

        let err = manager.reserve(&key, 6, &ctx).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientStock);

        manager.reserve(&key, 2, &ctx).await.unwrap();
        let err = manager.release(&key, 3, &ctx).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OverRelease);
    }

    #[tokio::test]
    async fn quarantined_stock_cannot_be_reserved() {
        let (store, key) = test_stocked(5).await;
        let ctx = test_ctx();
        store
            .update_record(&key, RecordUpdate::SetStatus(StockStatus::Quarantined), &ctx)
            .await
            .unwrap();
        let manager = ReservationManager::new(store);

        let err = manager.reserve(&key, 1, &ctx).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidStateTransition);
    }
}
