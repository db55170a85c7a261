//! Stock transfer aggregate.
//!
//! Sending moves stock out of the source warehouse; it stays in transit until
//! received at the destination. Cancelling returns whatever is still in
//! transit to the source.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{
    ActorId, AggregateRoot, ItemId, LedgerError, LedgerResult, LocationId, OperationContext,
    ProductId, RecordKey, ReferenceKind, TransferId, WarehouseId,
};
use stockledger_inventory::{Decision, MovementType, ReferenceTable, StockChange};

/// Transfer status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    Draft,
    InTransit,
    Completed,
    Cancelled,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Draft => "DRAFT",
            TransferStatus::InTransit => "IN_TRANSIT",
            TransferStatus::Completed => "COMPLETED",
            TransferStatus::Cancelled => "CANCELLED",
        }
    }
}

impl core::str::FromStr for TransferStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DRAFT" => Ok(TransferStatus::Draft),
            "IN_TRANSIT" => Ok(TransferStatus::InTransit),
            "COMPLETED" => Ok(TransferStatus::Completed),
            "CANCELLED" => Ok(TransferStatus::Cancelled),
            other => Err(LedgerError::validation(format!(
                "unknown transfer status '{other}'"
            ))),
        }
    }
}

/// Transfer line. `quantity_received <= quantity_sent <= quantity`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockTransferItem {
    pub id: ItemId,
    pub product_id: ProductId,
    pub quantity: i64,
    pub quantity_sent: i64,
    pub quantity_received: i64,
    pub from_location_id: Option<LocationId>,
    pub to_location_id: Option<LocationId>,
    pub notes: Option<String>,
}

impl StockTransferItem {
    pub fn quantity_unsent(&self) -> i64 {
        self.quantity - self.quantity_sent
    }

    /// Sent but not yet received: stock that is off-ledger.
    pub fn quantity_in_transit(&self) -> i64 {
        self.quantity_sent - self.quantity_received
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewStockTransfer {
    pub id: TransferId,
    pub transfer_number: String,
    pub from_warehouse_id: WarehouseId,
    pub to_warehouse_id: WarehouseId,
    pub transfer_date: NaiveDate,
    pub expected_arrival_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewStockTransferItem {
    pub item_id: ItemId,
    pub product_id: ProductId,
    pub quantity: i64,
    pub from_location_id: Option<LocationId>,
    pub to_location_id: Option<LocationId>,
    pub notes: Option<String>,
}

/// Aggregate root: StockTransfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockTransfer {
    id: TransferId,
    transfer_number: String,
    from_warehouse_id: WarehouseId,
    to_warehouse_id: WarehouseId,
    status: TransferStatus,
    transfer_date: NaiveDate,
    expected_arrival_date: Option<NaiveDate>,
    completed_at: Option<DateTime<Utc>>,
    notes: Option<String>,
    items: Vec<StockTransferItem>,
    created_by: ActorId,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: u64,
}

impl StockTransfer {
    pub fn create(input: NewStockTransfer, ctx: &OperationContext) -> LedgerResult<Self> {
        if input.transfer_number.trim().is_empty() {
            return Err(LedgerError::validation("transfer_number cannot be empty"));
        }
        if input.from_warehouse_id == input.to_warehouse_id {
            return Err(LedgerError::validation(
                "source and destination warehouses must differ",
            ));
        }
        Ok(Self {
            id: input.id,
            transfer_number: input.transfer_number,
            from_warehouse_id: input.from_warehouse_id,
            to_warehouse_id: input.to_warehouse_id,
            status: TransferStatus::Draft,
            transfer_date: input.transfer_date,
            expected_arrival_date: input.expected_arrival_date,
            completed_at: None,
            notes: input.notes,
            items: Vec::new(),
            created_by: ctx.actor,
            created_at: ctx.occurred_at,
            updated_at: ctx.occurred_at,
            version: 1,
        })
    }

    pub fn id_typed(&self) -> TransferId {
        self.id
    }

    pub fn transfer_number(&self) -> &str {
        &self.transfer_number
    }

    pub fn from_warehouse_id(&self) -> WarehouseId {
        self.from_warehouse_id
    }

    pub fn to_warehouse_id(&self) -> WarehouseId {
        self.to_warehouse_id
    }

    pub fn status(&self) -> TransferStatus {
        self.status
    }

    pub fn transfer_date(&self) -> NaiveDate {
        self.transfer_date
    }

    pub fn expected_arrival_date(&self) -> Option<NaiveDate> {
        self.expected_arrival_date
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn items(&self) -> &[StockTransferItem] {
        &self.items
    }

    pub fn item(&self, item_id: ItemId) -> Option<&StockTransferItem> {
        self.items.iter().find(|item| item.id == item_id)
    }

    pub fn created_by(&self) -> ActorId {
        self.created_by
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn source_key(&self, item: &StockTransferItem) -> RecordKey {
        RecordKey::at_location(item.product_id, self.from_warehouse_id, item.from_location_id)
    }

    fn destination_key(&self, item: &StockTransferItem) -> RecordKey {
        RecordKey::at_location(item.product_id, self.to_warehouse_id, item.to_location_id)
    }
}

impl AggregateRoot for StockTransfer {
    type Id = TransferId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl StockTransfer {
    fn ensure_status(&self, allowed: &[TransferStatus], operation: &'static str) -> LedgerResult<()> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(LedgerError::invalid_transition(
                "stock transfer",
                self.status.as_str(),
                operation,
            ))
        }
    }

    fn next(&self, ctx: &OperationContext) -> Self {
        let mut next = self.clone();
        next.version += 1;
        next.updated_at = ctx.occurred_at;
        next
    }

    fn find_item(&self, item_id: ItemId) -> LedgerResult<&StockTransferItem> {
        self.item(item_id)
            .ok_or_else(|| LedgerError::not_found(ReferenceKind::StockTransferItem, item_id))
    }

    pub fn add_item(&self, input: NewStockTransferItem, ctx: &OperationContext) -> LedgerResult<Self> {
        self.ensure_status(&[TransferStatus::Draft], "add item")?;

        if input.quantity <= 0 {
            return Err(LedgerError::invalid_quantity(
                input.quantity,
                "transfer quantity must be positive",
            ));
        }
        if self.item(input.item_id).is_some() {
            return Err(LedgerError::duplicate("stock transfer item", input.item_id.to_string()));
        }

        let mut next = self.next(ctx);
        next.items.push(StockTransferItem {
            id: input.item_id,
            product_id: input.product_id,
            quantity: input.quantity,
            quantity_sent: 0,
            quantity_received: 0,
            from_location_id: input.from_location_id,
            to_location_id: input.to_location_id,
            notes: input.notes,
        });
        Ok(next)
    }

    /// Ship `quantity` of a line out of the source warehouse.
    pub fn send(
        &self,
        item_id: ItemId,
        quantity: i64,
        ctx: &OperationContext,
    ) -> LedgerResult<Decision<Self>> {
        self.ensure_status(&[TransferStatus::Draft, TransferStatus::InTransit], "send")?;
        let item = self.find_item(item_id)?;

        if quantity <= 0 {
            return Err(LedgerError::invalid_quantity(
                quantity,
                "sent quantity must be positive",
            ));
        }
        if quantity > item.quantity_unsent() {
            return Err(LedgerError::invalid_quantity(
                quantity,
                format!(
                    "only {} of {} left to send on item {}",
                    item.quantity_unsent(),
                    item.quantity,
                    item_id
                ),
            ));
        }

        let change = StockChange::delta(self.source_key(item), -quantity, MovementType::TransferOut)
            .with_reference(ReferenceTable::StockTransferItems, item_id)
            .with_reference_number(self.transfer_number.clone());

        let mut next = self.next(ctx);
        for line in next.items.iter_mut().filter(|line| line.id == item_id) {
            line.quantity_sent += quantity;
        }
        next.status = TransferStatus::InTransit;
        Ok(Decision::new(next, vec![change]))
    }

    /// Book `quantity` of a line into the destination warehouse.
    ///
    /// A completed transfer has nothing left in transit, so receiving on it
    /// fails on quantity rather than on status.
    pub fn receive(
        &self,
        item_id: ItemId,
        quantity: i64,
        ctx: &OperationContext,
    ) -> LedgerResult<Decision<Self>> {
        self.ensure_status(
            &[TransferStatus::InTransit, TransferStatus::Completed],
            "receive",
        )?;
        let item = self.find_item(item_id)?;

        if quantity <= 0 {
            return Err(LedgerError::invalid_quantity(
                quantity,
                "received quantity must be positive",
            ));
        }
        if quantity > item.quantity_in_transit() {
            return Err(LedgerError::invalid_quantity(
                quantity,
                format!(
                    "only {} in transit on item {}",
                    item.quantity_in_transit(),
                    item_id
                ),
            ));
        }

        let change =
            StockChange::delta(self.destination_key(item), quantity, MovementType::TransferIn)
                .with_reference(ReferenceTable::StockTransferItems, item_id)
                .with_reference_number(self.transfer_number.clone());

        let mut next = self.next(ctx);
        for line in next.items.iter_mut().filter(|line| line.id == item_id) {
            line.quantity_received += quantity;
        }
        if next
            .items
            .iter()
            .all(|line| line.quantity_received == line.quantity)
        {
            next.status = TransferStatus::Completed;
            next.completed_at = Some(ctx.occurred_at);
        }
        Ok(Decision::new(next, vec![change]))
    }

    /// Cancel the transfer. Stock still in transit is booked back into the
    /// source location it left from.
    pub fn cancel(&self, ctx: &OperationContext) -> LedgerResult<Decision<Self>> {
        self.ensure_status(&[TransferStatus::Draft, TransferStatus::InTransit], "cancel")?;

        let changes = self
            .items
            .iter()
            .filter(|item| item.quantity_in_transit() > 0)
            .map(|item| {
                StockChange::delta(
                    self.source_key(item),
                    item.quantity_in_transit(),
                    MovementType::TransferIn,
                )
                .with_reference(ReferenceTable::StockTransferItems, item.id)
                .with_reference_number(self.transfer_number.clone())
                .with_notes(Some("returned to source on cancellation".to_string()))
            })
            .collect();

        let mut next = self.next(ctx);
        next.status = TransferStatus::Cancelled;
        Ok(Decision::new(next, changes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use stockledger_core::ErrorKind;
    use stockledger_inventory::QuantityChange;

    fn test_ctx() -> OperationContext {
        OperationContext::new(ActorId::new(), Utc::now())
    }

    fn test_transfer() -> StockTransfer {
        StockTransfer::create(
            NewStockTransfer {
                id: TransferId::new(),
                transfer_number: "TR-0001".to_string(),
                from_warehouse_id: WarehouseId::new(),
                to_warehouse_id: WarehouseId::new(),
                transfer_date: NaiveDate::from_ymd_opt(2025, 5, 10).unwrap(),
                expected_arrival_date: None,
                notes: None,
            },
            &test_ctx(),
        )
        .unwrap()
    }

    fn with_item(quantity: i64) -> (StockTransfer, ItemId) {
        let item_id = ItemId::new();
        let transfer = test_transfer()
            .add_item(
                NewStockTransferItem {
                    item_id,
                    product_id: ProductId::new(),
                    quantity,
                    from_location_id: None,
                    to_location_id: Some(LocationId::new()),
                    notes: None,
                },
                &test_ctx(),
            )
            .unwrap();
        (transfer, item_id)
    }

    #[test]
    fn same_warehouse_transfer_is_rejected() {
        let warehouse_id = WarehouseId::new();
        let err = StockTransfer::create(
            NewStockTransfer {
                id: TransferId::new(),
                transfer_number: "TR-0002".to_string(),
                from_warehouse_id: warehouse_id,
                to_warehouse_id: warehouse_id,
                transfer_date: NaiveDate::from_ymd_opt(2025, 5, 10).unwrap(),
                expected_arrival_date: None,
                notes: None,
            },
            &test_ctx(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn send_then_receive_completes_with_one_change_each() {
        let (transfer, item_id) = with_item(20);

        let sent = transfer.send(item_id, 20, &test_ctx()).unwrap();
        assert_eq!(sent.document.status(), TransferStatus::InTransit);
        assert_eq!(sent.changes.len(), 1);
        assert_eq!(sent.changes[0].movement_type, MovementType::TransferOut);
        assert_eq!(sent.changes[0].change, QuantityChange::Delta(-20));
        assert_eq!(sent.changes[0].key.warehouse_id, transfer.from_warehouse_id());

        let received = sent.document.receive(item_id, 20, &test_ctx()).unwrap();
        assert_eq!(received.document.status(), TransferStatus::Completed);
        assert!(received.document.completed_at().is_some());
        assert_eq!(received.changes[0].movement_type, MovementType::TransferIn);
        assert_eq!(received.changes[0].change, QuantityChange::Delta(20));
        assert_eq!(received.changes[0].key.warehouse_id, transfer.to_warehouse_id());
        assert!(received.changes[0].key.location_id.is_some());
    }

    #[test]
    fn receiving_more_than_in_transit_fails() {
        let (transfer, item_id) = with_item(20);
        let sent = transfer.send(item_id, 8, &test_ctx()).unwrap().document;
        let err = sent.receive(item_id, 9, &test_ctx()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidQuantity);
    }

    #[test]
    fn receive_after_completion_is_rejected() {
        let (transfer, item_id) = with_item(5);
        let done = transfer
            .send(item_id, 5, &test_ctx())
            .unwrap()
            .document
            .receive(item_id, 5, &test_ctx())
            .unwrap()
            .document;
        assert_eq!(done.status(), TransferStatus::Completed);
        let err = done.receive(item_id, 1, &test_ctx()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidQuantity);
    }

    #[test]
    fn cannot_receive_in_draft() {
        let (transfer, item_id) = with_item(5);
        let err = transfer.receive(item_id, 1, &test_ctx()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidStateTransition);
    }

    #[test]
    fn sending_more_than_unsent_fails() {
        let (transfer, item_id) = with_item(10);
        let sent = transfer.send(item_id, 7, &test_ctx()).unwrap().document;
        let err = sent.send(item_id, 4, &test_ctx()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidQuantity);
        assert_eq!(sent.item(item_id).unwrap().quantity_sent, 7);
    }

    #[test]
    fn cancel_in_transit_returns_outstanding_to_source() {
        let (transfer, item_id) = with_item(10);
        let partly = transfer
            .send(item_id, 6, &test_ctx())
            .unwrap()
            .document
            .receive(item_id, 2, &test_ctx())
            .unwrap()
            .document;

        let cancelled = partly.cancel(&test_ctx()).unwrap();
        assert_eq!(cancelled.document.status(), TransferStatus::Cancelled);
        assert_eq!(cancelled.changes.len(), 1);
        assert_eq!(cancelled.changes[0].change, QuantityChange::Delta(4));
        assert_eq!(cancelled.changes[0].key.warehouse_id, transfer.from_warehouse_id());
    }

    #[test]
    fn cancel_in_draft_moves_nothing() {
        let (transfer, _) = with_item(10);
        let cancelled = transfer.cancel(&test_ctx()).unwrap();
        assert!(cancelled.changes.is_empty());
        let err = cancelled.document.cancel(&test_ctx()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidStateTransition);
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, ..ProptestConfig::default() })]

        #[test]
        fn prop_net_effect_matches_received(
            quantity in 1i64..100,
            sends in proptest::collection::vec(1i64..40, 1..8),
            receives in proptest::collection::vec(1i64..40, 1..8),
        ) {
            let (mut transfer, item_id) = with_item(quantity);
            let mut out = 0;
            let mut into = 0;
            for q in sends {
                if let Ok(d) = transfer.send(item_id, q, &test_ctx()) {
                    out += q;
                    transfer = d.document;
                }
            }
            for q in receives {
                if let Ok(d) = transfer.receive(item_id, q, &test_ctx()) {
                    into += q;
                    transfer = d.document;
                }
            }
            let item = transfer.item(item_id).unwrap();
            prop_assert_eq!(item.quantity_sent, out);
            prop_assert_eq!(item.quantity_received, into);
            prop_assert!(item.quantity_received <= item.quantity_sent);
            prop_assert!(item.quantity_sent <= item.quantity);
        }
    }
}
