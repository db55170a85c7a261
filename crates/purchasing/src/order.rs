//! Purchase order aggregate.
//!
//! ```text
//! DRAFT -> ORDERED -> PARTIALLY_RECEIVED -> RECEIVED -> CLOSED
//!   |         |
//!   +---------+--> CANCELLED
//! ```
//!
//! Lines are added only while in draft. Each receipt returns the order with
//! its advanced line and the stock change to commit alongside it.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{
    ActorId, AggregateRoot, ItemId, LedgerError, LedgerResult, LocationId, OperationContext,
    ProductId, PurchaseOrderId, RecordKey, ReferenceKind, SupplierId, WarehouseId,
};
use stockledger_inventory::{Decision, MovementType, ReferenceTable, StockChange};

/// Purchase order status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PurchaseOrderStatus {
    Draft,
    Ordered,
    PartiallyReceived,
    Received,
    Closed,
    Cancelled,
}

impl PurchaseOrderStatus {
    pub const ALL: [PurchaseOrderStatus; 6] = [
        PurchaseOrderStatus::Draft,
        PurchaseOrderStatus::Ordered,
        PurchaseOrderStatus::PartiallyReceived,
        PurchaseOrderStatus::Received,
        PurchaseOrderStatus::Closed,
        PurchaseOrderStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PurchaseOrderStatus::Draft => "DRAFT",
            PurchaseOrderStatus::Ordered => "ORDERED",
            PurchaseOrderStatus::PartiallyReceived => "PARTIALLY_RECEIVED",
            PurchaseOrderStatus::Received => "RECEIVED",
            PurchaseOrderStatus::Closed => "CLOSED",
            PurchaseOrderStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PurchaseOrderStatus::Closed | PurchaseOrderStatus::Cancelled
        )
    }
}

impl core::str::FromStr for PurchaseOrderStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PurchaseOrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| LedgerError::validation(format!("unknown purchase order status '{s}'")))
    }
}

/// Purchase order line item.
///
/// Prices are in minor currency units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderItem {
    pub id: ItemId,
    pub product_id: ProductId,
    pub quantity_ordered: i64,
    pub quantity_received: i64,
    pub unit_price: i64,
    pub total_price: i64,
    pub notes: Option<String>,
}

impl PurchaseOrderItem {
    pub fn quantity_outstanding(&self) -> i64 {
        self.quantity_ordered - self.quantity_received
    }

    pub fn is_fully_received(&self) -> bool {
        self.quantity_received == self.quantity_ordered
    }
}

/// Input for `PurchaseOrder::create`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPurchaseOrder {
    pub id: PurchaseOrderId,
    pub po_number: String,
    pub supplier_id: SupplierId,
    /// Warehouse the goods are received into.
    pub warehouse_id: WarehouseId,
    pub order_date: NaiveDate,
    pub expected_delivery_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

/// Input for `PurchaseOrder::add_item`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPurchaseOrderItem {
    pub item_id: ItemId,
    pub product_id: ProductId,
    pub quantity_ordered: i64,
    pub unit_price: i64,
    pub notes: Option<String>,
}

/// Aggregate root: PurchaseOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrder {
    id: PurchaseOrderId,
    po_number: String,
    supplier_id: SupplierId,
    warehouse_id: WarehouseId,
    status: PurchaseOrderStatus,
    order_date: NaiveDate,
    expected_delivery_date: Option<NaiveDate>,
    notes: Option<String>,
    items: Vec<PurchaseOrderItem>,
    created_by: ActorId,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: u64,
}

impl PurchaseOrder {
    pub fn create(input: NewPurchaseOrder, ctx: &OperationContext) -> LedgerResult<Self> {
        if input.po_number.trim().is_empty() {
            return Err(LedgerError::validation("po_number cannot be empty"));
        }
        if let Some(expected) = input.expected_delivery_date {
            if expected < input.order_date {
                return Err(LedgerError::validation(
                    "expected delivery date cannot precede the order date",
                ));
            }
        }

        Ok(Self {
            id: input.id,
            po_number: input.po_number,
            supplier_id: input.supplier_id,
            warehouse_id: input.warehouse_id,
            status: PurchaseOrderStatus::Draft,
            order_date: input.order_date,
            expected_delivery_date: input.expected_delivery_date,
            notes: input.notes,
            items: Vec::new(),
            created_by: ctx.actor,
            created_at: ctx.occurred_at,
            updated_at: ctx.occurred_at,
            version: 1,
        })
    }

    pub fn id_typed(&self) -> PurchaseOrderId {
        self.id
    }

    pub fn po_number(&self) -> &str {
        &self.po_number
    }

    pub fn supplier_id(&self) -> SupplierId {
        self.supplier_id
    }

    pub fn warehouse_id(&self) -> WarehouseId {
        self.warehouse_id
    }

    pub fn status(&self) -> PurchaseOrderStatus {
        self.status
    }

    pub fn order_date(&self) -> NaiveDate {
        self.order_date
    }

    pub fn expected_delivery_date(&self) -> Option<NaiveDate> {
        self.expected_delivery_date
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn items(&self) -> &[PurchaseOrderItem] {
        &self.items
    }

    pub fn item(&self, item_id: ItemId) -> Option<&PurchaseOrderItem> {
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

    /// Sum of line totals, in minor currency units.
    pub fn total_amount(&self) -> i64 {
        self.items.iter().map(|item| item.total_price).sum()
    }
}

impl AggregateRoot for PurchaseOrder {
    type Id = PurchaseOrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl PurchaseOrder {
    fn ensure_status(
        &self,
        allowed: &[PurchaseOrderStatus],
        operation: &'static str,
    ) -> LedgerResult<()> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(LedgerError::invalid_transition(
                "purchase order",
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

    /// Add a line (only allowed in Draft).
    pub fn add_item(&self, input: NewPurchaseOrderItem, ctx: &OperationContext) -> LedgerResult<Self> {
        self.ensure_status(&[PurchaseOrderStatus::Draft], "add item")?;

        if input.quantity_ordered <= 0 {
            return Err(LedgerError::invalid_quantity(
                input.quantity_ordered,
                "ordered quantity must be positive",
            ));
        }
        if input.unit_price < 0 {
            return Err(LedgerError::validation("unit price cannot be negative"));
        }
        if self.item(input.item_id).is_some() {
            return Err(LedgerError::duplicate("purchase order item", input.item_id.to_string()));
        }
        let total_price = input
            .unit_price
            .checked_mul(input.quantity_ordered)
            .ok_or_else(|| LedgerError::validation("line total overflows"))?;

        let mut next = self.next(ctx);
        next.items.push(PurchaseOrderItem {
            id: input.item_id,
            product_id: input.product_id,
            quantity_ordered: input.quantity_ordered,
            quantity_received: 0,
            unit_price: input.unit_price,
            total_price,
            notes: input.notes,
        });
        Ok(next)
    }

    /// Send the order to the supplier.
    pub fn place_order(&self, ctx: &OperationContext) -> LedgerResult<Self> {
        self.ensure_status(&[PurchaseOrderStatus::Draft], "place order")?;
        if self.items.is_empty() {
            return Err(LedgerError::validation(
                "cannot place a purchase order without items",
            ));
        }

        let mut next = self.next(ctx);
        next.status = PurchaseOrderStatus::Ordered;
        Ok(next)
    }

    /// Receive `quantity` of one line into the order's warehouse.
    ///
    /// Returns the updated order and a single RECEIPT change referencing the line.
    pub fn receive_item(
        &self,
        item_id: ItemId,
        quantity: i64,
        location_id: Option<LocationId>,
        ctx: &OperationContext,
    ) -> LedgerResult<Decision<Self>> {
        self.ensure_status(
            &[
                PurchaseOrderStatus::Ordered,
                PurchaseOrderStatus::PartiallyReceived,
            ],
            "receive",
        )?;

        let item = self
            .item(item_id)
            .ok_or_else(|| LedgerError::not_found(ReferenceKind::PurchaseOrderItem, item_id))?;

        if quantity <= 0 {
            return Err(LedgerError::invalid_quantity(
                quantity,
                "received quantity must be positive",
            ));
        }
        if quantity > item.quantity_outstanding() {
            return Err(LedgerError::invalid_quantity(
                quantity,
                format!(
                    "only {} of {} outstanding on item {}",
                    item.quantity_outstanding(),
                    item.quantity_ordered,
                    item_id
                ),
            ));
        }

        let key = RecordKey::at_location(item.product_id, self.warehouse_id, location_id);
        let change = StockChange::delta(key, quantity, MovementType::Receipt)
            .with_reference(ReferenceTable::PurchaseOrderItems, item_id)
            .with_reference_number(self.po_number.clone());

        let mut next = self.next(ctx);
        for line in next.items.iter_mut().filter(|line| line.id == item_id) {
            line.quantity_received += quantity;
        }
        next.status = if next.items.iter().all(PurchaseOrderItem::is_fully_received) {
            PurchaseOrderStatus::Received
        } else {
            PurchaseOrderStatus::PartiallyReceived
        };

        Ok(Decision::new(next, vec![change]))
    }

    pub fn cancel(&self, ctx: &OperationContext) -> LedgerResult<Self> {
        self.ensure_status(
            &[PurchaseOrderStatus::Draft, PurchaseOrderStatus::Ordered],
            "cancel",
        )?;
        let mut next = self.next(ctx);
        next.status = PurchaseOrderStatus::Cancelled;
        Ok(next)
    }

    pub fn close(&self, ctx: &OperationContext) -> LedgerResult<Self> {
        self.ensure_status(&[PurchaseOrderStatus::Received], "close")?;
        let mut next = self.next(ctx);
        next.status = PurchaseOrderStatus::Closed;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use stockledger_core::{ErrorKind, ExpectedVersion};
    use stockledger_inventory::QuantityChange;

    fn test_ctx() -> OperationContext {
        OperationContext::new(ActorId::new(), Utc::now())
    }

    fn test_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 1).unwrap()
    }

    fn test_order() -> PurchaseOrder {
        PurchaseOrder::create(
            NewPurchaseOrder {
                id: PurchaseOrderId::new(),
                po_number: "PO-0001".to_string(),
                supplier_id: SupplierId::new(),
                warehouse_id: WarehouseId::new(),
                order_date: test_date(),
                expected_delivery_date: None,
                notes: None,
            },
            &test_ctx(),
        )
        .unwrap()
    }

    fn with_item(order: &PurchaseOrder, quantity: i64) -> (PurchaseOrder, ItemId) {
        let item_id = ItemId::new();
        let order = order
            .add_item(
                NewPurchaseOrderItem {
                    item_id,
                    product_id: ProductId::new(),
                    quantity_ordered: quantity,
                    unit_price: 250,
                    notes: None,
                },
                &test_ctx(),
            )
            .unwrap();
        (order, item_id)
    }

    fn ordered_with(quantities: &[i64]) -> (PurchaseOrder, Vec<ItemId>) {
        let mut order = test_order();
        let mut ids = Vec::new();
        for q in quantities {
            let (next, id) = with_item(&order, *q);
            order = next;
            ids.push(id);
        }
        (order.place_order(&test_ctx()).unwrap(), ids)
    }

    #[test]
    fn create_starts_in_draft_at_version_one() {
        let order = test_order();
        assert_eq!(order.status(), PurchaseOrderStatus::Draft);
        assert_eq!(order.version(), 1);
        assert_eq!(ExpectedVersion::preceding(order.version()), ExpectedVersion::Absent);
    }

    #[test]
    fn create_rejects_delivery_before_order_date() {
        let err = PurchaseOrder::create(
            NewPurchaseOrder {
                id: PurchaseOrderId::new(),
                po_number: "PO-0002".to_string(),
                supplier_id: SupplierId::new(),
                warehouse_id: WarehouseId::new(),
                order_date: test_date(),
                expected_delivery_date: test_date().pred_opt(),
                notes: None,
            },
            &test_ctx(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn add_item_computes_line_total() {
        let (order, item_id) = with_item(&test_order(), 4);
        let item = order.item(item_id).unwrap();
        assert_eq!(item.total_price, 1_000);
        assert_eq!(order.total_amount(), 1_000);
        assert_eq!(order.version(), 2);
    }

    #[test]
    fn cannot_place_empty_order() {
        let err = test_order().place_order(&test_ctx()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn cannot_receive_before_ordering() {
        let (order, item_id) = with_item(&test_order(), 5);
        let err = order.receive_item(item_id, 1, None, &test_ctx()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidStateTransition);
    }

    #[test]
    fn cannot_add_items_once_ordered() {
        let (order, _) = ordered_with(&[5]);
        let err = order
            .add_item(
                NewPurchaseOrderItem {
                    item_id: ItemId::new(),
                    product_id: ProductId::new(),
                    quantity_ordered: 1,
                    unit_price: 0,
                    notes: None,
                },
                &test_ctx(),
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidStateTransition);
    }

    #[test]
    fn partial_receipt_emits_receipt_and_marks_partially_received() {
        let (order, ids) = ordered_with(&[10, 4]);
        let decision = order.receive_item(ids[0], 6, None, &test_ctx()).unwrap();

        assert_eq!(decision.document.status(), PurchaseOrderStatus::PartiallyReceived);
        assert_eq!(decision.document.item(ids[0]).unwrap().quantity_received, 6);
        assert_eq!(decision.changes.len(), 1);

        let change = &decision.changes[0];
        assert_eq!(change.change, QuantityChange::Delta(6));
        assert_eq!(change.movement_type, MovementType::Receipt);
        assert_eq!(change.key.warehouse_id, order.warehouse_id());
        assert_eq!(change.reference.unwrap().table, ReferenceTable::PurchaseOrderItems);
        assert_eq!(change.reference_number.as_deref(), Some("PO-0001"));
    }

    #[test]
    fn over_receipt_is_rejected_without_clamping() {
        let (order, ids) = ordered_with(&[10]);
        let order = order.receive_item(ids[0], 7, None, &test_ctx()).unwrap().document;
        let err = order.receive_item(ids[0], 4, None, &test_ctx()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidQuantity);
        assert_eq!(order.item(ids[0]).unwrap().quantity_received, 7);
    }

    #[test]
    fn unknown_item_is_reference_not_found() {
        let (order, _) = ordered_with(&[3]);
        let err = order.receive_item(ItemId::new(), 1, None, &test_ctx()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReferenceNotFound);
    }

    #[test]
    fn cancel_only_from_draft_or_ordered() {
        let (order, ids) = ordered_with(&[3]);
        assert_eq!(
            order.cancel(&test_ctx()).unwrap().status(),
            PurchaseOrderStatus::Cancelled
        );
        let received = order.receive_item(ids[0], 1, None, &test_ctx()).unwrap().document;
        assert_eq!(
            received.cancel(&test_ctx()).unwrap_err().kind(),
            ErrorKind::InvalidStateTransition
        );
    }

    #[test]
    fn close_requires_fully_received() {
        let (order, ids) = ordered_with(&[3]);
        assert!(order.close(&test_ctx()).is_err());
        let received = order.receive_item(ids[0], 3, None, &test_ctx()).unwrap().document;
        assert_eq!(received.status(), PurchaseOrderStatus::Received);
        let closed = received.close(&test_ctx()).unwrap();
        assert_eq!(closed.status(), PurchaseOrderStatus::Closed);
        assert!(closed.status().is_terminal());
    }

    #[test]
    fn status_strings_round_trip() {
        for status in PurchaseOrderStatus::ALL {
            assert_eq!(status.as_str().parse::<PurchaseOrderStatus>().unwrap(), status);
        }
        assert!("SHIPPED".parse::<PurchaseOrderStatus>().is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, ..ProptestConfig::default() })]

        #[test]
        fn prop_receiving_exact_remainders_completes_order(
            ordered in proptest::collection::vec(1i64..50, 1..6),
            first_cut in proptest::collection::vec(0u8..=100, 6),
        ) {
            let (mut order, ids) = ordered_with(&ordered);

            // First pass: receive a fraction of each line.
            for (i, id) in ids.iter().enumerate() {
                let part = ordered[i] * i64::from(first_cut[i]) / 100;
                if part > 0 && part < ordered[i] {
                    order = order.receive_item(*id, part, None, &test_ctx()).unwrap().document;
                    prop_assert_eq!(order.status(), PurchaseOrderStatus::PartiallyReceived);
                }
            }

            // Second pass: receive exactly what is left.
            for id in &ids {
                let remaining = order.item(*id).unwrap().quantity_outstanding();
                prop_assert!(order.receive_item(*id, remaining + 1, None, &test_ctx()).is_err());
                order = order.receive_item(*id, remaining, None, &test_ctx()).unwrap().document;
            }

            prop_assert_eq!(order.status(), PurchaseOrderStatus::Received);
            for item in order.items() {
                prop_assert!(item.quantity_received <= item.quantity_ordered);
            }
        }
    }
}
