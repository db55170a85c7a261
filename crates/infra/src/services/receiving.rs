use tracing::{info, instrument};
use uuid::Uuid;

use stockledger_core::{
    ItemId, LedgerResult, LocationId, OperationContext, Page, Pagination, PurchaseOrderId,
};
use stockledger_inventory::Decision;
use stockledger_purchasing::{
    NewPurchaseOrder, NewPurchaseOrderItem, PurchaseOrder, PurchaseOrderStatus,
};

use super::{Committed, DocumentPipeline};
use crate::document::DocumentKind;
use crate::store::DocumentFilter;

/// Purchase orders from draft to receipt into stock.
#[derive(Clone)]
pub struct ReceivingService {
    pipeline: DocumentPipeline,
}

impl ReceivingService {
    pub(crate) fn new(pipeline: DocumentPipeline) -> Self {
        Self { pipeline }
    }

    #[instrument(skip(self, input, ctx), fields(po_number = %input.po_number, warehouse_id = %input.warehouse_id), err)]
    pub async fn create(
        &self,
        input: NewPurchaseOrder,
        ctx: &OperationContext,
    ) -> LedgerResult<PurchaseOrder> {
        let order = PurchaseOrder::create(input, ctx)?;
        let order = self.pipeline.create(order, ctx).await?;
        info!(purchase_order_id = %order.id_typed(), "purchase order created");
        Ok(order)
    }

    #[instrument(skip(self, input, ctx), fields(purchase_order_id = %id, item_id = %input.item_id), err)]
    pub async fn add_item(
        &self,
        id: PurchaseOrderId,
        input: NewPurchaseOrderItem,
        ctx: &OperationContext,
    ) -> LedgerResult<PurchaseOrder> {
        let committed = self
            .pipeline
            .execute(Uuid::from(id), ctx, |order: &PurchaseOrder| {
                order
                    .add_item(input.clone(), ctx)
                    .map(Decision::document_only)
            })
            .await?;
        Ok(committed.value)
    }

    #[instrument(skip(self, ctx), fields(purchase_order_id = %id), err)]
    pub async fn place_order(
        &self,
        id: PurchaseOrderId,
        ctx: &OperationContext,
    ) -> LedgerResult<PurchaseOrder> {
        let committed = self
            .pipeline
            .execute(Uuid::from(id), ctx, |order: &PurchaseOrder| {
                order.place_order(ctx).map(Decision::document_only)
            })
            .await?;
        info!("purchase order placed");
        Ok(committed.value)
    }

    /// Receive `quantity` of one order line into its warehouse (optionally at
    /// `location_id`). The line is enough to find its order.
    #[instrument(skip(self, ctx), fields(item_id = %item_id, location_id = ?location_id), err)]
    pub async fn receive_item(
        &self,
        item_id: ItemId,
        quantity: i64,
        location_id: Option<LocationId>,
        ctx: &OperationContext,
    ) -> LedgerResult<Committed<PurchaseOrder>> {
        let order_id = self.pipeline.owner_of::<PurchaseOrder>(item_id).await?;
        let committed = self
            .pipeline
            .execute(order_id, ctx, |order: &PurchaseOrder| {
                order.receive_item(item_id, quantity, location_id, ctx)
            })
            .await?;
        info!(
            purchase_order_id = %order_id,
            status = committed.value.status().as_str(),
            "purchase order item received"
        );
        Ok(committed)
    }

    #[instrument(skip(self, ctx), fields(purchase_order_id = %id), err)]
    pub async fn cancel(
        &self,
        id: PurchaseOrderId,
        ctx: &OperationContext,
    ) -> LedgerResult<PurchaseOrder> {
        let committed = self
            .pipeline
            .execute(Uuid::from(id), ctx, |order: &PurchaseOrder| {
                order.cancel(ctx).map(Decision::document_only)
            })
            .await?;
        info!("purchase order cancelled");
        Ok(committed.value)
    }

    #[instrument(skip(self, ctx), fields(purchase_order_id = %id), err)]
    pub async fn close(
        &self,
        id: PurchaseOrderId,
        ctx: &OperationContext,
    ) -> LedgerResult<PurchaseOrder> {
        let committed = self
            .pipeline
            .execute(Uuid::from(id), ctx, |order: &PurchaseOrder| {
                order.close(ctx).map(Decision::document_only)
            })
            .await?;
        info!("purchase order closed");
        Ok(committed.value)
    }

    pub async fn get(&self, id: PurchaseOrderId) -> LedgerResult<PurchaseOrder> {
        self.pipeline.load(Uuid::from(id)).await
    }

    pub async fn list(&self, pagination: Pagination) -> LedgerResult<Page<PurchaseOrder>> {
        self.pipeline
            .list(&DocumentFilter::of(DocumentKind::PurchaseOrder), pagination)
            .await
    }

    pub async fn list_by_status(
        &self,
        status: PurchaseOrderStatus,
        pagination: Pagination,
    ) -> LedgerResult<Page<PurchaseOrder>> {
        let filter = DocumentFilter::of(DocumentKind::PurchaseOrder).with_status(status.as_str());
        self.pipeline.list(&filter, pagination).await
    }
}
