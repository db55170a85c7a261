use tracing::{info, instrument};
use uuid::Uuid;

use stockledger_adjustments::{NewStockAdjustment, NewStockAdjustmentItem, StockAdjustment};
use stockledger_core::{AdjustmentId, LedgerResult, OperationContext, Page, Pagination, RecordKey};
use stockledger_inventory::Decision;

use super::{Committed, DocumentPipeline};
use crate::document::DocumentKind;
use crate::store::DocumentFilter;

/// Manual stock corrections, applied only on approval.
#[derive(Clone)]
pub struct AdjustmentService {
    pipeline: DocumentPipeline,
}

impl AdjustmentService {
    pub(crate) fn new(pipeline: DocumentPipeline) -> Self {
        Self { pipeline }
    }

    #[instrument(skip(self, input, ctx), fields(adjustment_number = %input.adjustment_number, reason = input.reason.as_str()), err)]
    pub async fn create(
        &self,
        input: NewStockAdjustment,
        ctx: &OperationContext,
    ) -> LedgerResult<StockAdjustment> {
        let adjustment = StockAdjustment::create(input, ctx)?;
        let adjustment = self.pipeline.create(adjustment, ctx).await?;
        info!(adjustment_id = %adjustment.id_typed(), "stock adjustment created");
        Ok(adjustment)
    }

    /// Add a line, snapshotting the current on-hand at its key. Inventory is
    /// not touched.
    #[instrument(
        skip(self, input, ctx),
        fields(adjustment_id = %id, product_id = %input.product_id, quantity = input.quantity_adjusted),
        err
    )]
    pub async fn add_item(
        &self,
        id: AdjustmentId,
        input: NewStockAdjustmentItem,
        ctx: &OperationContext,
    ) -> LedgerResult<StockAdjustment> {
        let current: StockAdjustment = self.pipeline.load(Uuid::from(id)).await?;
        let key = RecordKey::at_location(input.product_id, current.warehouse_id(), input.location_id);
        let quantity_before = self.pipeline.store().get_record(&key).await?.quantity_on_hand;

        let committed = self
            .pipeline
            .execute(Uuid::from(id), ctx, |adjustment: &StockAdjustment| {
                adjustment
                    .add_item(input.clone(), quantity_before, ctx)
                    .map(Decision::document_only)
            })
            .await?;
        Ok(committed.value)
    }

    /// Approve and apply every line in one commit. If any line would break a
    /// quantity rule nothing is applied and the adjustment stays a draft.
    #[instrument(skip(self, ctx), fields(adjustment_id = %id, approver = %ctx.actor), err)]
    pub async fn approve(
        &self,
        id: AdjustmentId,
        ctx: &OperationContext,
    ) -> LedgerResult<Committed<StockAdjustment>> {
        let committed = self
            .pipeline
            .execute(Uuid::from(id), ctx, |adjustment: &StockAdjustment| {
                adjustment.approve(ctx)
            })
            .await?;
        info!(
            movement_count = committed.movements.len(),
            total_value = ?committed.value.total_value(),
            "stock adjustment approved"
        );
        Ok(committed)
    }

    pub async fn get(&self, id: AdjustmentId) -> LedgerResult<StockAdjustment> {
        self.pipeline.load(Uuid::from(id)).await
    }

    pub async fn list(&self, pagination: Pagination) -> LedgerResult<Page<StockAdjustment>> {
        self.pipeline
            .list(&DocumentFilter::of(DocumentKind::StockAdjustment), pagination)
            .await
    }
}
