use tracing::{info, instrument};
use uuid::Uuid;

use stockledger_core::{ItemId, LedgerResult, OperationContext, Page, Pagination, TransferId, WarehouseId};
use stockledger_inventory::Decision;
use stockledger_transfers::{NewStockTransfer, NewStockTransferItem, StockTransfer, TransferStatus};

use super::{Committed, DocumentPipeline};
use crate::document::DocumentKind;
use crate::store::DocumentFilter;

/// Warehouse-to-warehouse transfers. Send and receive are separate commits;
/// stock sent but not yet received is on neither warehouse's ledger.
#[derive(Clone)]
pub struct TransferService {
    pipeline: DocumentPipeline,
}

impl TransferService {
    pub(crate) fn new(pipeline: DocumentPipeline) -> Self {
        Self { pipeline }
    }

    #[instrument(
        skip(self, input, ctx),
        fields(
            transfer_number = %input.transfer_number,
            from_warehouse_id = %input.from_warehouse_id,
            to_warehouse_id = %input.to_warehouse_id
        ),
        err
    )]
    pub async fn create(
        &self,
        input: NewStockTransfer,
        ctx: &OperationContext,
    ) -> LedgerResult<StockTransfer> {
        let transfer = StockTransfer::create(input, ctx)?;
        let transfer = self.pipeline.create(transfer, ctx).await?;
        info!(transfer_id = %transfer.id_typed(), "stock transfer created");
        Ok(transfer)
    }

    #[instrument(skip(self, input, ctx), fields(transfer_id = %id, item_id = %input.item_id), err)]
    pub async fn add_item(
        &self,
        id: TransferId,
        input: NewStockTransferItem,
        ctx: &OperationContext,
    ) -> LedgerResult<StockTransfer> {
        let committed = self
            .pipeline
            .execute(Uuid::from(id), ctx, |transfer: &StockTransfer| {
                transfer
                    .add_item(input.clone(), ctx)
                    .map(Decision::document_only)
            })
            .await?;
        Ok(committed.value)
    }

    /// Ship part or all of a line out of the source warehouse.
    #[instrument(skip(self, ctx), fields(item_id = %item_id), err)]
    pub async fn send(
        &self,
        item_id: ItemId,
        quantity: i64,
        ctx: &OperationContext,
    ) -> LedgerResult<Committed<StockTransfer>> {
        let transfer_id = self.pipeline.owner_of::<StockTransfer>(item_id).await?;
        let committed = self
            .pipeline
            .execute(transfer_id, ctx, |transfer: &StockTransfer| {
                transfer.send(item_id, quantity, ctx)
            })
            .await?;
        info!(transfer_id = %transfer_id, "transfer item sent");
        Ok(committed)
    }

    /// Book part or all of a sent line into the destination warehouse.
    #[instrument(skip(self, ctx), fields(item_id = %item_id), err)]
    pub async fn receive(
        &self,
        item_id: ItemId,
        quantity: i64,
        ctx: &OperationContext,
    ) -> LedgerResult<Committed<StockTransfer>> {
        let transfer_id = self.pipeline.owner_of::<StockTransfer>(item_id).await?;
        let committed = self
            .pipeline
            .execute(transfer_id, ctx, |transfer: &StockTransfer| {
                transfer.receive(item_id, quantity, ctx)
            })
            .await?;
        info!(
            transfer_id = %transfer_id,
            status = committed.value.status().as_str(),
            "transfer item received"
        );
        Ok(committed)
    }

    /// Cancel; anything still in transit is booked back into the source.
    #[instrument(skip(self, ctx), fields(transfer_id = %id), err)]
    pub async fn cancel(
        &self,
        id: TransferId,
        ctx: &OperationContext,
    ) -> LedgerResult<Committed<StockTransfer>> {
        let committed = self
            .pipeline
            .execute(Uuid::from(id), ctx, |transfer: &StockTransfer| {
                transfer.cancel(ctx)
            })
            .await?;
        info!(
            returned_lines = committed.movements.len(),
            "stock transfer cancelled"
        );
        Ok(committed)
    }

    pub async fn get(&self, id: TransferId) -> LedgerResult<StockTransfer> {
        self.pipeline.load(Uuid::from(id)).await
    }

    pub async fn list_by_status(
        &self,
        status: TransferStatus,
        pagination: Pagination,
    ) -> LedgerResult<Page<StockTransfer>> {
        let filter = DocumentFilter::of(DocumentKind::StockTransfer).with_status(status.as_str());
        self.pipeline.list(&filter, pagination).await
    }

    /// Transfers leaving or entering `warehouse_id`.
    pub async fn list_by_warehouse(
        &self,
        warehouse_id: WarehouseId,
        pagination: Pagination,
    ) -> LedgerResult<Page<StockTransfer>> {
        let filter = DocumentFilter::of(DocumentKind::StockTransfer).with_warehouse(warehouse_id);
        self.pipeline.list(&filter, pagination).await
    }
}
