//! The `LedgerStore` trait and the types a commit is made of.
//!
//! Both stores share `stage_changes`, so quantity rules are applied identically
//! regardless of backend.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockledger_core::{
    ExpectedVersion, ItemId, LedgerError, LedgerResult, OperationContext, Page, Pagination,
    ProductId, RecordKey, SortOrder, WarehouseId,
};
use stockledger_inventory::{
    AppliedChange, InventoryRecord, QuantityChange, StockChange, StockMovement, StockStatus,
};

use super::query::{DocumentFilter, MovementFilter, RecordFilter};
use crate::document::{DocumentKind, WorkflowDocument};

/// Single-record mutation that writes no movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordUpdate {
    Reserve(i64),
    Release(i64),
    SetStatus(StockStatus),
    SetExpiry(Option<NaiveDate>),
}

impl RecordUpdate {
    pub fn operation(&self) -> &'static str {
        match self {
            RecordUpdate::Reserve(_) => "reserve",
            RecordUpdate::Release(_) => "release",
            RecordUpdate::SetStatus(_) => "set_status",
            RecordUpdate::SetExpiry(_) => "set_expiry",
        }
    }

    /// Apply to `record`. Status and expiry changes need a record that exists.
    pub fn apply_to(&self, record: &mut InventoryRecord, ctx: &OperationContext) -> LedgerResult<()> {
        match *self {
            RecordUpdate::Reserve(quantity) => record.reserve(quantity, ctx.occurred_at),
            RecordUpdate::Release(quantity) => record.release(quantity, ctx.occurred_at),
            RecordUpdate::SetStatus(status) => {
                ensure_exists(record)?;
                record.set_status(status, ctx.occurred_at);
                Ok(())
            }
            RecordUpdate::SetExpiry(expiry_date) => {
                ensure_exists(record)?;
                record.set_expiry(expiry_date, ctx.occurred_at);
                Ok(())
            }
        }
    }
}

fn ensure_exists(record: &InventoryRecord) -> LedgerResult<()> {
    if record.exists() {
        Ok(())
    } else {
        Err(LedgerError::not_found(
            stockledger_core::ReferenceKind::InventoryRecord,
            record.key,
        ))
    }
}

/// A workflow document write guarded by an optimistic version check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentWrite {
    pub document: WorkflowDocument,
    pub expected: ExpectedVersion,
}

/// Everything one workflow step must commit atomically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRequest {
    pub context: OperationContext,
    pub changes: Vec<StockChange>,
    pub document: Option<DocumentWrite>,
}

impl CommitRequest {
    /// Ledger changes with no document (direct entries).
    pub fn changes(context: OperationContext, changes: Vec<StockChange>) -> Self {
        Self {
            context,
            changes,
            document: None,
        }
    }

    /// A document at its new version, plus the changes decided with it.
    pub fn document(
        context: OperationContext,
        document: WorkflowDocument,
        changes: Vec<StockChange>,
    ) -> Self {
        let expected = ExpectedVersion::preceding(document.version());
        Self {
            context,
            changes,
            document: Some(DocumentWrite { document, expected }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitOutcome {
    /// Appended movements, in ledger order.
    pub movements: Vec<StockMovement>,
    /// Final state of every record the commit changed.
    pub records: Vec<InventoryRecord>,
}

/// Every movement and record of one product in one warehouse, read at a single
/// point in commit order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerSnapshot {
    /// In ledger (id) order.
    pub movements: Vec<StockMovement>,
    pub records: Vec<InventoryRecord>,
}

/// Persistence boundary for the ledger.
///
/// Implementations guarantee that `commit` is all-or-nothing: record writes,
/// movement appends and the document write are visible together or not at all.
/// Mutations on the same record key serialize; different keys do not block each
/// other beyond the duration of a commit.
#[async_trait::async_trait]
pub trait LedgerStore: Send + Sync {
    /// Current snapshot, or a zero-valued record if the key never moved.
    async fn get_record(&self, key: &RecordKey) -> LedgerResult<InventoryRecord>;

    async fn list_records(
        &self,
        filter: &RecordFilter,
        pagination: Pagination,
    ) -> LedgerResult<Page<InventoryRecord>>;

    /// Reserve/release/status/expiry change on one record, atomically.
    async fn update_record(
        &self,
        key: &RecordKey,
        update: RecordUpdate,
        ctx: &OperationContext,
    ) -> LedgerResult<InventoryRecord>;

    async fn commit(&self, request: CommitRequest) -> LedgerResult<CommitOutcome>;

    /// Movements and records of `(product_id, warehouse_id)` as of one instant;
    /// no commit is ever half visible.
    async fn ledger_snapshot(
        &self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
    ) -> LedgerResult<LedgerSnapshot>;

    async fn load_document(
        &self,
        kind: DocumentKind,
        id: Uuid,
    ) -> LedgerResult<Option<WorkflowDocument>>;

    /// The document of `kind` that owns `item_id`.
    async fn find_document_by_item(
        &self,
        kind: DocumentKind,
        item_id: ItemId,
    ) -> LedgerResult<Option<WorkflowDocument>>;

    /// Documents ordered by creation time.
    async fn list_documents(
        &self,
        filter: &DocumentFilter,
        pagination: Pagination,
    ) -> LedgerResult<Page<WorkflowDocument>>;

    async fn get_movement(&self, id: i64) -> LedgerResult<Option<StockMovement>>;

    /// Movements ordered by `(occurred_at, id)` in the given direction.
    async fn list_movements(
        &self,
        filter: &MovementFilter,
        pagination: Pagination,
        order: SortOrder,
    ) -> LedgerResult<Page<StockMovement>>;

    /// End the store's lifecycle (closes pooled connections).
    async fn close(&self);
}

#[async_trait::async_trait]
impl<S: LedgerStore + ?Sized> LedgerStore for std::sync::Arc<S> {
    async fn get_record(&self, key: &RecordKey) -> LedgerResult<InventoryRecord> {
        (**self).get_record(key).await
    }

    async fn list_records(
        &self,
        filter: &RecordFilter,
        pagination: Pagination,
    ) -> LedgerResult<Page<InventoryRecord>> {
        (**self).list_records(filter, pagination).await
    }

    async fn update_record(
        &self,
        key: &RecordKey,
        update: RecordUpdate,
        ctx: &OperationContext,
    ) -> LedgerResult<InventoryRecord> {
        (**self).update_record(key, update, ctx).await
    }

    async fn commit(&self, request: CommitRequest) -> LedgerResult<CommitOutcome> {
        (**self).commit(request).await
    }

    async fn ledger_snapshot(
        &self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
    ) -> LedgerResult<LedgerSnapshot> {
        (**self).ledger_snapshot(product_id, warehouse_id).await
    }

    async fn load_document(
        &self,
        kind: DocumentKind,
        id: Uuid,
    ) -> LedgerResult<Option<WorkflowDocument>> {
        (**self).load_document(kind, id).await
    }

    async fn find_document_by_item(
        &self,
        kind: DocumentKind,
        item_id: ItemId,
    ) -> LedgerResult<Option<WorkflowDocument>> {
        (**self).find_document_by_item(kind, item_id).await
    }

    async fn list_documents(
        &self,
        filter: &DocumentFilter,
        pagination: Pagination,
    ) -> LedgerResult<Page<WorkflowDocument>> {
        (**self).list_documents(filter, pagination).await
    }

    async fn get_movement(&self, id: i64) -> LedgerResult<Option<StockMovement>> {
        (**self).get_movement(id).await
    }

    async fn list_movements(
        &self,
        filter: &MovementFilter,
        pagination: Pagination,
        order: SortOrder,
    ) -> LedgerResult<Page<StockMovement>> {
        (**self).list_movements(filter, pagination, order).await
    }

    async fn close(&self) {
        (**self).close().await
    }
}

/// Applies `changes` in order to already-loaded copies of their records.
///
/// Returns, per change that moved stock, its index and snapshot. A `SetOnHand`
/// that matches the current on-hand moves nothing and yields no entry. Any
/// failure leaves the caller to discard `records`.
pub(crate) fn stage_changes(
    records: &mut BTreeMap<RecordKey, InventoryRecord>,
    changes: &[StockChange],
    ctx: &OperationContext,
) -> LedgerResult<Vec<(usize, AppliedChange)>> {
    let mut applied = Vec::with_capacity(changes.len());
    for (idx, change) in changes.iter().enumerate() {
        if let QuantityChange::Delta(delta) = change.change {
            if !change.movement_type.accepts(delta) {
                return Err(LedgerError::validation(format!(
                    "{} movement cannot carry a change of {delta}",
                    change.movement_type
                )));
            }
        }

        let record = records
            .entry(change.key)
            .or_insert_with(|| InventoryRecord::empty(change.key));
        let planned = record.plan(change.change, change.policy)?;
        if planned.quantity_change == 0 {
            continue;
        }
        applied.push((idx, record.apply(change.change, change.policy, ctx.occurred_at)?));
    }
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use stockledger_core::{ActorId, ErrorKind};
    use stockledger_inventory::MovementType;

    fn test_ctx() -> OperationContext {
        OperationContext::new(ActorId::new(), Utc::now())
    }

    fn test_key() -> RecordKey {
        RecordKey::new(ProductId::new(), WarehouseId::new())
    }

    #[test]
    fn staging_is_sequential_within_a_batch() {
        let key = test_key();
        let mut records = BTreeMap::new();
        let changes = vec![
            StockChange::delta(key, 10, MovementType::Adjustment),
            StockChange::delta(key, -4, MovementType::Adjustment),
        ];
        let applied = stage_changes(&mut records, &changes, &test_ctx()).unwrap();
        assert_eq!(applied.len(), 2);
        assert_eq!(applied[1].1.quantity_before, 10);
        assert_eq!(records[&key].quantity_on_hand, 6);
    }

    #[test]
    fn staging_fails_on_first_bad_change() {
        let key = test_key();
        let mut records = BTreeMap::new();
        let changes = vec![
            StockChange::delta(key, 10, MovementType::Adjustment),
            StockChange::delta(key, -15, MovementType::Adjustment),
        ];
        let err = stage_changes(&mut records, &changes, &test_ctx()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientStock);
    }

    #[test]
    fn staging_rejects_direction_mismatch() {
        let mut records = BTreeMap::new();
        let changes = vec![StockChange::delta(test_key(), -3, MovementType::Receipt)];
        let err = stage_changes(&mut records, &changes, &test_ctx()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn noop_count_moves_nothing() {
        let key = test_key();
        let mut records = BTreeMap::new();
        let changes = vec![
            StockChange::delta(key, 5, MovementType::Receipt),
            StockChange::set_on_hand(key, 5, MovementType::StocktakeCorrection),
        ];
        let applied = stage_changes(&mut records, &changes, &test_ctx()).unwrap();
        assert_eq!(applied.len(), 1);
        assert_eq!(records[&key].version, 1);
    }

    #[test]
    fn status_update_needs_an_existing_record() {
        let mut record = InventoryRecord::empty(test_key());
        let err = RecordUpdate::SetStatus(StockStatus::Damaged)
            .apply_to(&mut record, &test_ctx())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReferenceNotFound);
    }
}
