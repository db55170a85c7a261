use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use stockledger_core::{
    LedgerResult, OperationContext, Page, Pagination, ProductId, RecordKey, WarehouseId,
};
use stockledger_inventory::{InventoryRecord, MovementType, StockChange, StockStatus};

use super::Committed;
use crate::store::{CommitRequest, LedgerStore, RecordFilter, RecordUpdate};

/// Stock totals across every record of one warehouse.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseSummary {
    pub warehouse_id: WarehouseId,
    pub record_count: u64,
    pub total_on_hand: i64,
    pub total_reserved: i64,
    pub total_available: i64,
    /// Number of records per status; statuses with no records are absent.
    pub records_by_status: HashMap<StockStatus, u64>,
}

impl WarehouseSummary {
    fn add(&mut self, record: &InventoryRecord) {
        self.record_count += 1;
        self.total_on_hand = self.total_on_hand.saturating_add(record.quantity_on_hand);
        self.total_reserved = self.total_reserved.saturating_add(record.quantity_reserved);
        self.total_available = self
            .total_available
            .saturating_add(record.quantity_available());
        *self.records_by_status.entry(record.status).or_default() += 1;
    }
}

/// Record reads, status/expiry maintenance and direct ledger entries.
#[derive(Clone)]
pub struct InventoryService {
    store: Arc<dyn LedgerStore>,
    expiry_window_days: u32,
}

impl InventoryService {
    pub fn new(store: Arc<dyn LedgerStore>, expiry_window_days: u32) -> Self {
        Self {
            store,
            expiry_window_days,
        }
    }

    /// Current snapshot; a zero-valued record if the key never moved.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn get_record(&self, key: &RecordKey) -> LedgerResult<InventoryRecord> {
        let record = self.store.get_record(key).await?;
        debug!(
            on_hand = record.quantity_on_hand,
            reserved = record.quantity_reserved,
            "loaded inventory record"
        );
        Ok(record)
    }

    pub async fn list_by_warehouse(
        &self,
        warehouse_id: WarehouseId,
        pagination: Pagination,
    ) -> LedgerResult<Page<InventoryRecord>> {
        self.store
            .list_records(&RecordFilter::by_warehouse(warehouse_id), pagination)
            .await
    }

    pub async fn list_by_product(
        &self,
        product_id: ProductId,
        pagination: Pagination,
    ) -> LedgerResult<Page<InventoryRecord>> {
        self.store
            .list_records(&RecordFilter::by_product(product_id), pagination)
            .await
    }

    #[instrument(skip(self), fields(warehouse_id = %warehouse_id), err)]
    pub async fn warehouse_summary(&self, warehouse_id: WarehouseId) -> LedgerResult<WarehouseSummary> {
        let filter = RecordFilter::by_warehouse(warehouse_id);
        let mut summary = WarehouseSummary {
            warehouse_id,
            ..WarehouseSummary::default()
        };
        let mut offset = 0;
        loop {
            let page = self
                .store
                .list_records(&filter, Pagination::new(Some(Pagination::MAX_LIMIT), Some(offset)))
                .await?;
            let fetched = page.items.len() as u32;
            page.items.iter().for_each(|record| summary.add(record));
            if !page.has_more || fetched == 0 {
                break;
            }
            offset += fetched;
        }
        debug!(
            records = summary.record_count,
            on_hand = summary.total_on_hand,
            "summarized warehouse stock"
        );
        Ok(summary)
    }

    /// Stock on hand expiring within the configured window from `today`,
    /// soonest first.
    pub async fn list_expiring(
        &self,
        warehouse_id: Option<WarehouseId>,
        today: NaiveDate,
        pagination: Pagination,
    ) -> LedgerResult<Page<InventoryRecord>> {
        let cutoff = today
            .checked_add_days(Days::new(u64::from(self.expiry_window_days)))
            .unwrap_or(NaiveDate::MAX);
        let filter = RecordFilter {
            warehouse_id,
            product_id: None,
            expiring_by: Some(cutoff),
        };
        self.store.list_records(&filter, pagination).await
    }

    #[instrument(skip(self, ctx), fields(key = %key, status = %status), err)]
    pub async fn set_status(
        &self,
        key: &RecordKey,
        status: StockStatus,
        ctx: &OperationContext,
    ) -> LedgerResult<InventoryRecord> {
        let record = self
            .store
            .update_record(key, RecordUpdate::SetStatus(status), ctx)
            .await?;
        info!(actor = %ctx.actor, "inventory status changed");
        Ok(record)
    }

    #[instrument(skip(self, ctx), fields(key = %key, expiry_date = ?expiry_date), err)]
    pub async fn set_expiry(
        &self,
        key: &RecordKey,
        expiry_date: Option<NaiveDate>,
        ctx: &OperationContext,
    ) -> LedgerResult<InventoryRecord> {
        let record = self
            .store
            .update_record(key, RecordUpdate::SetExpiry(expiry_date), ctx)
            .await?;
        info!(actor = %ctx.actor, "inventory expiry changed");
        Ok(record)
    }

    /// Apply a signed delta that may not push on-hand below reserved.
    pub async fn apply_delta(
        &self,
        key: RecordKey,
        delta: i64,
        movement_type: MovementType,
        ctx: &OperationContext,
    ) -> LedgerResult<Committed<InventoryRecord>> {
        self.apply(StockChange::delta(key, delta, movement_type), ctx)
            .await
    }

    /// Apply one ledger change outside any workflow document (fulfilment
    /// issues, external corrections). Returns the record after the change.
    #[instrument(
        skip(self, change, ctx),
        fields(key = %change.key, movement_type = %change.movement_type, change = ?change.change),
        err
    )]
    pub async fn apply(
        &self,
        change: StockChange,
        ctx: &OperationContext,
    ) -> LedgerResult<Committed<InventoryRecord>> {
        let key = change.key;
        let outcome = self
            .store
            .commit(CommitRequest::changes(*ctx, vec![change]))
            .await?;

        let record = match outcome.records.into_iter().find(|r| r.key == key) {
            Some(record) => record,
            None => self.store.get_record(&key).await?,
        };
        if let Some(movement) = outcome.movements.first() {
            info!(
                movement_id = movement.id,
                before = movement.quantity_before,
                after = movement.quantity_after,
                "ledger entry appended"
            );
        }
        Ok(Committed {
            value: record,
            movements: outcome.movements,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use stockledger_core::{ActorId, ErrorKind, LocationId};
    use stockledger_inventory::DeltaPolicy;

    use crate::store::InMemoryLedgerStore;

    fn test_service() -> InventoryService {
        InventoryService::new(Arc::new(InMemoryLedgerStore::new()), 30)
    }

    fn test_ctx() -> OperationContext {
        OperationContext::new(ActorId::new(), Utc::now())
    }

    fn test_key() -> RecordKey {
        RecordKey::new(ProductId::new(), WarehouseId::new())
    }

    #[tokio::test]
    async fn issue_below_reserved_is_rejected() {
        let service = test_service();
        let key = test_key();
        let ctx = test_ctx();
        service
            .apply_delta(key, 10, MovementType::Receipt, &ctx)
            .await
            .unwrap();
        service
            .store
            .update_record(&key, RecordUpdate::Reserve(8), &ctx)
            .await
            .unwrap();

        let err = service
            .apply_delta(key, -5, MovementType::Issue, &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientStock);

        let record = service.get_record(&key).await.unwrap();
        assert_eq!(record.quantity_on_hand, 10);
        assert_eq!(record.quantity_reserved, 8);
    }

    #[tokio::test]
    async fn corrective_change_trims_reservation() {
        let service = test_service();
        let key = test_key();
        let ctx = test_ctx();
        service
            .apply_delta(key, 10, MovementType::Receipt, &ctx)
            .await
            .unwrap();
        service
            .store
            .update_record(&key, RecordUpdate::Reserve(8), &ctx)
            .await
            .unwrap();

        let mut change = StockChange::delta(key, -5, MovementType::Adjustment);
        change.policy = DeltaPolicy::Corrective;
        let committed = service.apply(change, &ctx).await.unwrap();
        assert_eq!(committed.value.quantity_on_hand, 5);
        assert_eq!(committed.value.quantity_reserved, 5);
        assert_eq!(committed.movements.len(), 1);
    }

    #[tokio::test]
    async fn status_and_expiry_need_an_existing_record() {
        let service = test_service();
        let key = test_key();
        let ctx = test_ctx();

        let err = service
            .set_status(&key, StockStatus::Quarantined, &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReferenceNotFound);

        service
            .apply_delta(key, 3, MovementType::Receipt, &ctx)
            .await
            .unwrap();
        let record = service
            .set_status(&key, StockStatus::Quarantined, &ctx)
            .await
            .unwrap();
        assert_eq!(record.status, StockStatus::Quarantined);
        assert_eq!(record.quantity_on_hand, 3);
    }

    #[tokio::test]
    async fn warehouse_summary_totals_every_record() {
        let service = test_service();
        let ctx = test_ctx();
        let warehouse = WarehouseId::new();
        let sellable = RecordKey::new(ProductId::new(), warehouse);
        let shelf = RecordKey::at_location(ProductId::new(), warehouse, Some(LocationId::new()));
        let broken = RecordKey::new(ProductId::new(), warehouse);
        let elsewhere = test_key();
        for (key, quantity) in [(sellable, 10), (shelf, 4), (broken, 2), (elsewhere, 50)] {
            service
                .apply_delta(key, quantity, MovementType::Receipt, &ctx)
                .await
                .unwrap();
        }
        service
            .store
            .update_record(&sellable, RecordUpdate::Reserve(3), &ctx)
            .await
            .unwrap();
        service
            .set_status(&broken, StockStatus::Damaged, &ctx)
            .await
            .unwrap();

        let summary = service.warehouse_summary(warehouse).await.unwrap();
        assert_eq!(summary.warehouse_id, warehouse);
        assert_eq!(summary.record_count, 3);
        assert_eq!(summary.total_on_hand, 16);
        assert_eq!(summary.total_reserved, 3);
        assert_eq!(summary.total_available, 13);
        assert_eq!(summary.records_by_status.get(&StockStatus::Available), Some(&2));
        assert_eq!(summary.records_by_status.get(&StockStatus::Damaged), Some(&1));
        assert_eq!(summary.records_by_status.get(&StockStatus::Quarantined), None);

        let empty = service.warehouse_summary(WarehouseId::new()).await.unwrap();
        assert_eq!(empty.record_count, 0);
        assert!(empty.records_by_status.is_empty());
    }

    #[tokio::test]
    async fn expiring_stock_is_listed_soonest_first() {
        let service = test_service();
        let warehouse = WarehouseId::new();
        let ctx = test_ctx();
        let today = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();

        let soon = RecordKey::new(ProductId::new(), warehouse);
        let later = RecordKey::new(ProductId::new(), warehouse);
        let far = RecordKey::new(ProductId::new(), warehouse);
        for (key, offset) in [(later, 20u64), (soon, 2), (far, 90)] {
            service
                .apply_delta(key, 1, MovementType::Receipt, &ctx)
                .await
                .unwrap();
            service
                .set_expiry(&key, today.checked_add_days(Days::new(offset)), &ctx)
                .await
                .unwrap();
        }

        let page = service
            .list_expiring(Some(warehouse), today, Pagination::default())
            .await
            .unwrap();
        let keys: Vec<RecordKey> = page.items.iter().map(|r| r.key).collect();
        assert_eq!(keys, vec![soon, later]);
    }
}
