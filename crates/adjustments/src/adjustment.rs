//! Stock adjustment aggregate: a draft list of signed corrections that is
//! applied in full on approval.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{
    ActorId, AdjustmentId, AggregateRoot, ItemId, LedgerError, LedgerResult, LocationId,
    OperationContext, ProductId, RecordKey, WarehouseId,
};
use stockledger_inventory::{Decision, MovementType, ReferenceTable, StockChange};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdjustmentStatus {
    Draft,
    Approved,
}

impl AdjustmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdjustmentStatus::Draft => "DRAFT",
            AdjustmentStatus::Approved => "APPROVED",
        }
    }
}

impl core::str::FromStr for AdjustmentStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DRAFT" => Ok(AdjustmentStatus::Draft),
            "APPROVED" => Ok(AdjustmentStatus::Approved),
            other => Err(LedgerError::validation(format!(
                "unknown adjustment status '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdjustmentReason {
    Damage,
    Loss,
    Found,
    Expiry,
    Correction,
    Other,
}

impl AdjustmentReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdjustmentReason::Damage => "DAMAGE",
            AdjustmentReason::Loss => "LOSS",
            AdjustmentReason::Found => "FOUND",
            AdjustmentReason::Expiry => "EXPIRY",
            AdjustmentReason::Correction => "CORRECTION",
            AdjustmentReason::Other => "OTHER",
        }
    }
}

impl core::str::FromStr for AdjustmentReason {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DAMAGE" => Ok(AdjustmentReason::Damage),
            "LOSS" => Ok(AdjustmentReason::Loss),
            "FOUND" => Ok(AdjustmentReason::Found),
            "EXPIRY" => Ok(AdjustmentReason::Expiry),
            "CORRECTION" => Ok(AdjustmentReason::Correction),
            "OTHER" => Ok(AdjustmentReason::Other),
            other => Err(LedgerError::validation(format!(
                "unknown adjustment reason '{other}'"
            ))),
        }
    }
}

/// One line of an adjustment. `quantity_before` is the on-hand seen when the
/// line was added; the movement written at approval records the actual value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAdjustmentItem {
    pub id: ItemId,
    pub product_id: ProductId,
    pub location_id: Option<LocationId>,
    pub quantity_before: i64,
    pub quantity_adjusted: i64,
    /// Unit cost in minor currency units.
    pub cost_price: i64,
    pub reason: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewStockAdjustment {
    pub id: AdjustmentId,
    pub adjustment_number: String,
    pub warehouse_id: WarehouseId,
    pub adjustment_date: NaiveDate,
    pub reason: AdjustmentReason,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewStockAdjustmentItem {
    pub item_id: ItemId,
    pub product_id: ProductId,
    pub location_id: Option<LocationId>,
    pub quantity_adjusted: i64,
    pub cost_price: i64,
    pub reason: Option<String>,
    pub notes: Option<String>,
}

/// Aggregate root: StockAdjustment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAdjustment {
    id: AdjustmentId,
    adjustment_number: String,
    warehouse_id: WarehouseId,
    adjustment_date: NaiveDate,
    reason: AdjustmentReason,
    status: AdjustmentStatus,
    notes: Option<String>,
    items: Vec<StockAdjustmentItem>,
    created_by: ActorId,
    approved_by: Option<ActorId>,
    approved_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: u64,
}

impl StockAdjustment {
    pub fn create(input: NewStockAdjustment, ctx: &OperationContext) -> LedgerResult<Self> {
        if input.adjustment_number.trim().is_empty() {
            return Err(LedgerError::validation("adjustment_number cannot be empty"));
        }
        Ok(Self {
            id: input.id,
            adjustment_number: input.adjustment_number,
            warehouse_id: input.warehouse_id,
            adjustment_date: input.adjustment_date,
            reason: input.reason,
            status: AdjustmentStatus::Draft,
            notes: input.notes,
            items: Vec::new(),
            created_by: ctx.actor,
            approved_by: None,
            approved_at: None,
            created_at: ctx.occurred_at,
            updated_at: ctx.occurred_at,
            version: 1,
        })
    }

    pub fn id_typed(&self) -> AdjustmentId {
        self.id
    }

    pub fn adjustment_number(&self) -> &str {
        &self.adjustment_number
    }

    pub fn warehouse_id(&self) -> WarehouseId {
        self.warehouse_id
    }

    pub fn adjustment_date(&self) -> NaiveDate {
        self.adjustment_date
    }

    pub fn reason(&self) -> AdjustmentReason {
        self.reason
    }

    pub fn status(&self) -> AdjustmentStatus {
        self.status
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn items(&self) -> &[StockAdjustmentItem] {
        &self.items
    }

    pub fn created_by(&self) -> ActorId {
        self.created_by
    }

    pub fn approved_by(&self) -> Option<ActorId> {
        self.approved_by
    }

    pub fn approved_at(&self) -> Option<DateTime<Utc>> {
        self.approved_at
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Signed value of all adjusted quantities at cost, in minor currency units.
    /// `None` if it does not fit in an `i64`; `add_item` rejects such lines.
    pub fn total_value(&self) -> Option<i64> {
        checked_total(&self.items)
    }

    fn record_key(&self, item: &StockAdjustmentItem) -> RecordKey {
        RecordKey::at_location(item.product_id, self.warehouse_id, item.location_id)
    }
}

fn checked_total(items: &[StockAdjustmentItem]) -> Option<i64> {
    items.iter().try_fold(0i64, |total, item| {
        item.quantity_adjusted
            .checked_mul(item.cost_price)
            .and_then(|value| total.checked_add(value))
    })
}

impl AggregateRoot for StockAdjustment {
    type Id = AdjustmentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl StockAdjustment {
    fn ensure_draft(&self, operation: &'static str) -> LedgerResult<()> {
        if self.status != AdjustmentStatus::Draft {
            return Err(LedgerError::invalid_transition(
                "stock adjustment",
                self.status.as_str(),
                operation,
            ));
        }
        Ok(())
    }

    fn next(&self, ctx: &OperationContext) -> Self {
        let mut next = self.clone();
        next.version += 1;
        next.updated_at = ctx.occurred_at;
        next
    }

    /// Add a line. `quantity_before` is the current on-hand at the line's key;
    /// inventory is not touched until approval.
    pub fn add_item(
        &self,
        input: NewStockAdjustmentItem,
        quantity_before: i64,
        ctx: &OperationContext,
    ) -> LedgerResult<Self> {
        self.ensure_draft("add item")?;

        if input.quantity_adjusted == 0 {
            return Err(LedgerError::invalid_quantity(
                0,
                "adjusted quantity cannot be zero",
            ));
        }
        if input.cost_price < 0 {
            return Err(LedgerError::validation("cost price cannot be negative"));
        }
        if self.items.iter().any(|item| item.id == input.item_id) {
            return Err(LedgerError::duplicate("stock adjustment item", input.item_id.to_string()));
        }
        let line_value = input
            .quantity_adjusted
            .checked_mul(input.cost_price)
            .ok_or_else(|| {
                LedgerError::invalid_quantity(input.quantity_adjusted, "line value overflows")
            })?;
        checked_total(&self.items)
            .and_then(|total| total.checked_add(line_value))
            .ok_or_else(|| {
                LedgerError::invalid_quantity(input.quantity_adjusted, "adjustment value overflows")
            })?;

        let mut next = self.next(ctx);
        next.items.push(StockAdjustmentItem {
            id: input.item_id,
            product_id: input.product_id,
            location_id: input.location_id,
            quantity_before,
            quantity_adjusted: input.quantity_adjusted,
            cost_price: input.cost_price,
            reason: input.reason,
            notes: input.notes,
        });
        Ok(next)
    }

    /// Approve and apply every line. The approver is the context actor.
    pub fn approve(&self, ctx: &OperationContext) -> LedgerResult<Decision<Self>> {
        self.ensure_draft("approve")?;
        if self.items.is_empty() {
            return Err(LedgerError::validation(
                "cannot approve a stock adjustment without items",
            ));
        }

        let changes = self
            .items
            .iter()
            .map(|item| {
                StockChange::delta(
                    self.record_key(item),
                    item.quantity_adjusted,
                    MovementType::Adjustment,
                )
                .with_reference(ReferenceTable::StockAdjustmentItems, item.id)
                .with_reference_number(self.adjustment_number.clone())
                .with_notes(item.reason.clone().or_else(|| Some(self.reason.as_str().to_string())))
            })
            .collect();

        let mut next = self.next(ctx);
        next.status = AdjustmentStatus::Approved;
        next.approved_by = Some(ctx.actor);
        next.approved_at = Some(ctx.occurred_at);
        Ok(Decision::new(next, changes))
    }
}
