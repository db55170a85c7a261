//! The append-only stock movement log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockledger_core::{
    ActorId, LedgerError, LocationId, OperationContext, ProductId, RecordKey, WarehouseId,
};

use crate::change::StockChange;
use crate::record::{AppliedChange, InventoryRecord};

/// Why on-hand quantity changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementType {
    Receipt,
    Issue,
    Adjustment,
    TransferOut,
    TransferIn,
    StocktakeCorrection,
}

impl MovementType {
    pub const ALL: [MovementType; 6] = [
        MovementType::Receipt,
        MovementType::Issue,
        MovementType::Adjustment,
        MovementType::TransferOut,
        MovementType::TransferIn,
        MovementType::StocktakeCorrection,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::Receipt => "RECEIPT",
            MovementType::Issue => "ISSUE",
            MovementType::Adjustment => "ADJUSTMENT",
            MovementType::TransferOut => "TRANSFER_OUT",
            MovementType::TransferIn => "TRANSFER_IN",
            MovementType::StocktakeCorrection => "STOCKTAKE_CORRECTION",
        }
    }

    /// Inbound types only add stock, outbound types only remove it.
    pub fn accepts(&self, delta: i64) -> bool {
        match self {
            MovementType::Receipt | MovementType::TransferIn => delta > 0,
            MovementType::Issue | MovementType::TransferOut => delta < 0,
            MovementType::Adjustment | MovementType::StocktakeCorrection => delta != 0,
        }
    }
}

impl core::fmt::Display for MovementType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for MovementType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MovementType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| LedgerError::validation(format!("unknown movement type '{s}'")))
    }
}

/// Table a movement's reference id points into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceTable {
    PurchaseOrderItems,
    StockAdjustmentItems,
    StockTransferItems,
    StocktakeItems,
    /// A document owned by a caller outside the ledger (sales order, RMA, ...).
    External,
}

impl ReferenceTable {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceTable::PurchaseOrderItems => "purchase_order_items",
            ReferenceTable::StockAdjustmentItems => "stock_adjustment_items",
            ReferenceTable::StockTransferItems => "stock_transfer_items",
            ReferenceTable::StocktakeItems => "stocktake_items",
            ReferenceTable::External => "external",
        }
    }
}

impl core::str::FromStr for ReferenceTable {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "purchase_order_items" => Ok(ReferenceTable::PurchaseOrderItems),
            "stock_adjustment_items" => Ok(ReferenceTable::StockAdjustmentItems),
            "stock_transfer_items" => Ok(ReferenceTable::StockTransferItems),
            "stocktake_items" => Ok(ReferenceTable::StocktakeItems),
            "external" => Ok(ReferenceTable::External),
            other => Err(LedgerError::validation(format!("unknown reference table '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MovementReference {
    pub table: ReferenceTable,
    pub id: Uuid,
}

impl MovementReference {
    pub fn new(table: ReferenceTable, id: impl Into<Uuid>) -> Self {
        Self {
            table,
            id: id.into(),
        }
    }
}

/// Immutable record of one on-hand change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    /// Assigned by the store in append order.
    pub id: i64,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub location_id: Option<LocationId>,
    pub movement_type: MovementType,
    pub quantity_before: i64,
    pub quantity_change: i64,
    pub quantity_after: i64,
    pub reference: Option<MovementReference>,
    pub reference_number: Option<String>,
    pub notes: Option<String>,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

impl StockMovement {
    /// Build the movement describing `applied`, as produced by `change`.
    pub fn record(
        id: i64,
        change: &StockChange,
        applied: &AppliedChange,
        ctx: &OperationContext,
    ) -> Self {
        Self {
            id,
            product_id: change.key.product_id,
            warehouse_id: change.key.warehouse_id,
            location_id: change.key.location_id,
            movement_type: change.movement_type,
            quantity_before: applied.quantity_before,
            quantity_change: applied.quantity_change,
            quantity_after: applied.quantity_after,
            reference: change.reference,
            reference_number: change.reference_number.clone(),
            notes: change.notes.clone(),
            actor: ctx.actor,
            occurred_at: ctx.occurred_at,
        }
    }

    pub fn key(&self) -> RecordKey {
        RecordKey::at_location(self.product_id, self.warehouse_id, self.location_id)
    }

    pub fn is_balanced(&self) -> bool {
        self.quantity_before + self.quantity_change == self.quantity_after
    }
}

/// Sum of `quantity_change` over the given movements.
pub fn replay_on_hand<'a>(movements: impl IntoIterator<Item = &'a StockMovement>) -> i64 {
    movements.into_iter().map(|m| m.quantity_change).sum()
}

/// Comparison of replayed ledger history against current record state for one
/// `(product, warehouse)` pair, across all of its locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub movement_count: u64,
    pub ledger_on_hand: i64,
    pub record_on_hand: i64,
    /// Movements whose before/after does not follow the previous movement at the same key.
    pub broken_links: Vec<i64>,
}

impl Reconciliation {
    /// `movements` must be in ledger order.
    pub fn compute(
        product_id: ProductId,
        warehouse_id: WarehouseId,
        movements: &[StockMovement],
        records: &[InventoryRecord],
    ) -> Self {
        let mut last_after: std::collections::HashMap<RecordKey, i64> =
            std::collections::HashMap::new();
        let mut broken_links = Vec::new();
        let mut movement_count = 0;

        let relevant = movements
            .iter()
            .filter(|m| m.product_id == product_id && m.warehouse_id == warehouse_id);
        for movement in relevant {
            movement_count += 1;
            let previous = last_after.get(&movement.key()).copied().unwrap_or(0);
            if previous != movement.quantity_before || !movement.is_balanced() {
                broken_links.push(movement.id);
            }
            last_after.insert(movement.key(), movement.quantity_after);
        }

        Self {
            product_id,
            warehouse_id,
            movement_count,
            ledger_on_hand: replay_on_hand(
                movements
                    .iter()
                    .filter(|m| m.product_id == product_id && m.warehouse_id == warehouse_id),
            ),
            record_on_hand: records
                .iter()
                .filter(|r| r.key.is_within(product_id, warehouse_id))
                .map(|r| r.quantity_on_hand)
                .sum(),
            broken_links,
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.ledger_on_hand == self.record_on_hand && self.broken_links.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{DeltaPolicy, QuantityChange};
    use proptest::prelude::*;

    fn test_ctx() -> OperationContext {
        OperationContext::new(ActorId::new(), Utc::now())
    }

    fn test_key() -> RecordKey {
        RecordKey::new(ProductId::new(), WarehouseId::new())
    }

    /// Apply deltas to a record and log a movement for every accepted one.
    fn run_ledger(key: RecordKey, deltas: &[i64]) -> (InventoryRecord, Vec<StockMovement>) {
        let ctx = test_ctx();
        let mut record = InventoryRecord::empty(key);
        let mut movements = Vec::new();
        for delta in deltas {
            let change = StockChange::delta(key, *delta, MovementType::Adjustment);
            if let Ok(applied) = record.apply(change.change, DeltaPolicy::Strict, ctx.occurred_at) {
                let id = movements.len() as i64 + 1;
                movements.push(StockMovement::record(id, &change, &applied, &ctx));
            }
        }
        (record, movements)
    }

    #[test]
    fn movement_type_round_trips_through_str() {
        for t in MovementType::ALL {
            assert_eq!(t.as_str().parse::<MovementType>().unwrap(), t);
        }
        assert!("SHRINKAGE".parse::<MovementType>().is_err());
    }

    #[test]
    fn direction_checks_follow_movement_type() {
        assert!(MovementType::Receipt.accepts(5));
        assert!(!MovementType::Receipt.accepts(-5));
        assert!(MovementType::Issue.accepts(-1));
        assert!(!MovementType::TransferOut.accepts(3));
        assert!(MovementType::Adjustment.accepts(-3));
        assert!(!MovementType::Adjustment.accepts(0));
    }

    #[test]
    fn record_copies_snapshot_and_context() {
        let ctx = test_ctx();
        let key = test_key();
        let change = StockChange::delta(key, 12, MovementType::Receipt)
            .with_reference(ReferenceTable::External, Uuid::now_v7())
            .with_reference_number("GRN-1");
        let mut record = InventoryRecord::empty(key);
        let applied = record
            .apply(QuantityChange::Delta(12), DeltaPolicy::Strict, ctx.occurred_at)
            .unwrap();
        let movement = StockMovement::record(7, &change, &applied, &ctx);
        assert_eq!(movement.id, 7);
        assert_eq!(movement.key(), key);
        assert_eq!(movement.quantity_after, 12);
        assert_eq!(movement.actor, ctx.actor);
        assert_eq!(movement.reference_number.as_deref(), Some("GRN-1"));
        assert!(movement.is_balanced());
    }

    #[test]
    fn reconciliation_flags_tampered_history() {
        let key = test_key();
        let (record, mut movements) = run_ledger(key, &[10, -3, 5]);
        let report =
            Reconciliation::compute(key.product_id, key.warehouse_id, &movements, &[record.clone()]);
        assert!(report.is_consistent());
        assert_eq!(report.movement_count, 3);

        movements[1].quantity_before = 99;
        let report =
            Reconciliation::compute(key.product_id, key.warehouse_id, &movements, &[record]);
        assert_eq!(report.broken_links, vec![movements[1].id]);
        assert!(!report.is_consistent());
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, ..ProptestConfig::default() })]

        #[test]
        fn prop_replay_reproduces_on_hand(deltas in proptest::collection::vec(-40i64..=60, 0..80)) {
            let key = test_key();
            let (record, movements) = run_ledger(key, &deltas);
            prop_assert_eq!(replay_on_hand(&movements), record.quantity_on_hand);
            prop_assert!(movements.iter().all(StockMovement::is_balanced));
            let report = Reconciliation::compute(key.product_id, key.warehouse_id, &movements, &[record]);
            prop_assert!(report.is_consistent());
        }
    }
}
