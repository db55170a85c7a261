use tracing::{info, instrument, warn};
use uuid::Uuid;

use stockledger_core::{
    ItemId, LedgerResult, OperationContext, Page, Pagination, RecordKey, StocktakeId, WarehouseId,
};
use stockledger_inventory::{Decision, InventoryRecord};
use stockledger_stocktake::{NewStocktake, NewStocktakeItem, Stocktake, StocktakeItem, StocktakeStatus};

use super::{Committed, DocumentPipeline};
use crate::document::DocumentKind;
use crate::store::{DocumentFilter, RecordFilter};

/// Physical counts and their reconciliation into the ledger.
#[derive(Clone)]
pub struct StocktakeService {
    pipeline: DocumentPipeline,
}

impl StocktakeService {
    pub(crate) fn new(pipeline: DocumentPipeline) -> Self {
        Self { pipeline }
    }

    #[instrument(skip(self, input, ctx), fields(stocktake_number = %input.stocktake_number, warehouse_id = %input.warehouse_id), err)]
    pub async fn create(
        &self,
        input: NewStocktake,
        ctx: &OperationContext,
    ) -> LedgerResult<Stocktake> {
        let stocktake = Stocktake::create(input, ctx)?;
        let stocktake = self.pipeline.create(stocktake, ctx).await?;
        info!(stocktake_id = %stocktake.id_typed(), "stocktake opened");
        Ok(stocktake)
    }

    /// Add a line with the current on-hand at its key as system quantity.
    #[instrument(skip(self, input, ctx), fields(stocktake_id = %id, product_id = %input.product_id), err)]
    pub async fn add_item(
        &self,
        id: StocktakeId,
        input: NewStocktakeItem,
        ctx: &OperationContext,
    ) -> LedgerResult<Stocktake> {
        let current: Stocktake = self.pipeline.load(Uuid::from(id)).await?;
        let key = RecordKey::at_location(input.product_id, current.warehouse_id(), input.location_id);
        let system_quantity = self.pipeline.store().get_record(&key).await?.quantity_on_hand;

        let committed = self
            .pipeline
            .execute(Uuid::from(id), ctx, |stocktake: &Stocktake| {
                stocktake
                    .add_item(input.clone(), system_quantity, ctx)
                    .map(Decision::document_only)
            })
            .await?;
        Ok(committed.value)
    }

    /// Add a line for every record in the stocktake's warehouse that is not
    /// already being counted.
    #[instrument(skip(self, ctx), fields(stocktake_id = %id), err)]
    pub async fn populate_from_warehouse(
        &self,
        id: StocktakeId,
        ctx: &OperationContext,
    ) -> LedgerResult<Stocktake> {
        let current: Stocktake = self.pipeline.load(Uuid::from(id)).await?;
        let records = self.warehouse_records(current.warehouse_id()).await?;
        let lines: Vec<(NewStocktakeItem, i64)> = records
            .into_iter()
            .map(|record| {
                (
                    NewStocktakeItem {
                        item_id: ItemId::new(),
                        product_id: record.key.product_id,
                        location_id: record.key.location_id,
                    },
                    record.quantity_on_hand,
                )
            })
            .collect();

        let committed = self
            .pipeline
            .execute(Uuid::from(id), ctx, |stocktake: &Stocktake| {
                let fresh: Vec<(NewStocktakeItem, i64)> = lines
                    .iter()
                    .filter(|(line, _)| !stocktake.covers(line.product_id, line.location_id))
                    .cloned()
                    .collect();
                stocktake
                    .add_items(fresh, ctx)
                    .map(Decision::document_only)
            })
            .await?;
        info!(
            line_count = committed.value.items().len(),
            "stocktake populated from warehouse"
        );
        Ok(committed.value)
    }

    #[instrument(skip(self, notes, ctx), fields(item_id = %item_id), err)]
    pub async fn record_count(
        &self,
        item_id: ItemId,
        counted_quantity: i64,
        notes: Option<String>,
        ctx: &OperationContext,
    ) -> LedgerResult<Stocktake> {
        let stocktake_id = self.pipeline.owner_of::<Stocktake>(item_id).await?;
        let committed = self
            .pipeline
            .execute(stocktake_id, ctx, |stocktake: &Stocktake| {
                stocktake
                    .record_count(item_id, counted_quantity, notes.clone(), ctx)
                    .map(Decision::document_only)
            })
            .await?;
        Ok(committed.value)
    }

    /// Reconcile on-hand to every counted line with a variance, then complete.
    ///
    /// On-hand is forced to the counted figure even if stock moved since the
    /// snapshot; such drift is logged.
    #[instrument(skip(self, ctx), fields(stocktake_id = %id), err)]
    pub async fn finalize(
        &self,
        id: StocktakeId,
        ctx: &OperationContext,
    ) -> LedgerResult<Committed<Stocktake>> {
        let committed = self
            .pipeline
            .execute(Uuid::from(id), ctx, |stocktake: &Stocktake| stocktake.finalize(ctx))
            .await?;

        for item in committed.value.variances() {
            let expected = item.variance.unwrap_or_default();
            let applied = committed
                .movements
                .iter()
                .find(|m| m.reference.is_some_and(|r| r.id == Uuid::from(item.id)))
                .map(|m| m.quantity_change)
                .unwrap_or(0);
            if applied != expected {
                warn!(
                    item_id = %item.id,
                    product_id = %item.product_id,
                    variance = expected,
                    applied,
                    "stock moved between snapshot and finalize"
                );
            }
        }
        info!(
            correction_count = committed.movements.len(),
            "stocktake finalized"
        );
        Ok(committed)
    }

    /// Counted lines whose count differs from the snapshot.
    pub async fn variances(&self, id: StocktakeId) -> LedgerResult<Vec<StocktakeItem>> {
        let stocktake = self.get(id).await?;
        Ok(stocktake.variances().into_iter().cloned().collect())
    }

    pub async fn get(&self, id: StocktakeId) -> LedgerResult<Stocktake> {
        self.pipeline.load(Uuid::from(id)).await
    }

    /// Every stocktake, open or finalized.
    pub async fn list(&self, pagination: Pagination) -> LedgerResult<Page<Stocktake>> {
        self.pipeline
            .list(&DocumentFilter::of(DocumentKind::Stocktake), pagination)
            .await
    }

    /// Stocktakes still open for counting.
    pub async fn list_active(&self, pagination: Pagination) -> LedgerResult<Page<Stocktake>> {
        let filter = DocumentFilter::of(DocumentKind::Stocktake)
            .with_status(StocktakeStatus::Open.as_str());
        self.pipeline.list(&filter, pagination).await
    }

    pub async fn list_by_warehouse(
        &self,
        warehouse_id: WarehouseId,
        pagination: Pagination,
    ) -> LedgerResult<Page<Stocktake>> {
        let filter = DocumentFilter::of(DocumentKind::Stocktake).with_warehouse(warehouse_id);
        self.pipeline.list(&filter, pagination).await
    }

    async fn warehouse_records(&self, warehouse_id: WarehouseId) -> LedgerResult<Vec<InventoryRecord>> {
        let filter = RecordFilter::by_warehouse(warehouse_id);
        let mut records = Vec::new();
        let mut offset = 0;
        loop {
            let page = self
                .pipeline
                .store()
                .list_records(&filter, Pagination::new(Some(Pagination::MAX_LIMIT), Some(offset)))
                .await?;
            let fetched = page.items.len() as u32;
            records.extend(page.items);
            if !page.has_more || fetched == 0 {
                return Ok(records);
            }
            offset += fetched;
        }
    }
}
