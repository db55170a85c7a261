//! Stocktake aggregate and its counted lines.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{
    ActorId, AggregateRoot, ItemId, LedgerError, LedgerResult, LocationId, OperationContext,
    ProductId, RecordKey, ReferenceKind, StocktakeId, WarehouseId,
};
use stockledger_inventory::{Decision, MovementType, ReferenceTable, StockChange};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StocktakeStatus {
    Open,
    Completed,
}

impl StocktakeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StocktakeStatus::Open => "OPEN",
            StocktakeStatus::Completed => "COMPLETED",
        }
    }
}

impl core::str::FromStr for StocktakeStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OPEN" => Ok(StocktakeStatus::Open),
            "COMPLETED" => Ok(StocktakeStatus::Completed),
            other => Err(LedgerError::validation(format!(
                "unknown stocktake status '{other}'"
            ))),
        }
    }
}

/// One counted line. `system_quantity` is frozen when the line is added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StocktakeItem {
    pub id: ItemId,
    pub product_id: ProductId,
    pub location_id: Option<LocationId>,
    pub system_quantity: i64,
    pub counted_quantity: Option<i64>,
    pub variance: Option<i64>,
    pub counted_by: Option<ActorId>,
    pub counted_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

impl StocktakeItem {
    pub fn is_counted(&self) -> bool {
        self.counted_quantity.is_some()
    }

    pub fn has_variance(&self) -> bool {
        self.variance.is_some_and(|v| v != 0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewStocktake {
    pub id: StocktakeId,
    pub stocktake_number: String,
    pub warehouse_id: WarehouseId,
    pub start_date: NaiveDate,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewStocktakeItem {
    pub item_id: ItemId,
    pub product_id: ProductId,
    pub location_id: Option<LocationId>,
}

/// Aggregate root: Stocktake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stocktake {
    id: StocktakeId,
    stocktake_number: String,
    warehouse_id: WarehouseId,
    status: StocktakeStatus,
    start_date: NaiveDate,
    end_date: Option<NaiveDate>,
    notes: Option<String>,
    items: Vec<StocktakeItem>,
    created_by: ActorId,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: u64,
}

impl Stocktake {
    pub fn create(input: NewStocktake, ctx: &OperationContext) -> LedgerResult<Self> {
        if input.stocktake_number.trim().is_empty() {
            return Err(LedgerError::validation("stocktake_number cannot be empty"));
        }
        Ok(Self {
            id: input.id,
            stocktake_number: input.stocktake_number,
            warehouse_id: input.warehouse_id,
            status: StocktakeStatus::Open,
            start_date: input.start_date,
            end_date: None,
            notes: input.notes,
            items: Vec::new(),
            created_by: ctx.actor,
            created_at: ctx.occurred_at,
            updated_at: ctx.occurred_at,
            version: 1,
        })
    }

    pub fn id_typed(&self) -> StocktakeId {
        self.id
    }

    pub fn stocktake_number(&self) -> &str {
        &self.stocktake_number
    }

    pub fn warehouse_id(&self) -> WarehouseId {
        self.warehouse_id
    }

    pub fn status(&self) -> StocktakeStatus {
        self.status
    }

    pub fn start_date(&self) -> NaiveDate {
        self.start_date
    }

    pub fn end_date(&self) -> Option<NaiveDate> {
        self.end_date
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn items(&self) -> &[StocktakeItem] {
        &self.items
    }

    pub fn item(&self, item_id: ItemId) -> Option<&StocktakeItem> {
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

    /// Whether a line already exists for this product at this location.
    pub fn covers(&self, product_id: ProductId, location_id: Option<LocationId>) -> bool {
        self.items
            .iter()
            .any(|item| item.product_id == product_id && item.location_id == location_id)
    }

    /// Counted lines whose count differs from the snapshot.
    pub fn variances(&self) -> Vec<&StocktakeItem> {
        self.items.iter().filter(|item| item.has_variance()).collect()
    }

    pub fn record_key(&self, item: &StocktakeItem) -> RecordKey {
        RecordKey::at_location(item.product_id, self.warehouse_id, item.location_id)
    }
}

impl AggregateRoot for Stocktake {
    type Id = StocktakeId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl Stocktake {
    fn ensure_open(&self, operation: &'static str) -> LedgerResult<()> {
        if self.status != StocktakeStatus::Open {
            return Err(LedgerError::invalid_transition(
                "stocktake",
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

    /// Add a line with the current system quantity at its key.
    pub fn add_item(
        &self,
        input: NewStocktakeItem,
        system_quantity: i64,
        ctx: &OperationContext,
    ) -> LedgerResult<Self> {
        self.add_items(vec![(input, system_quantity)], ctx)
    }

    /// Add several lines at once; duplicates of existing lines are rejected.
    pub fn add_items(
        &self,
        inputs: Vec<(NewStocktakeItem, i64)>,
        ctx: &OperationContext,
    ) -> LedgerResult<Self> {
        self.ensure_open("add item")?;

        let mut next = self.next(ctx);
        for (input, system_quantity) in inputs {
            if system_quantity < 0 {
                return Err(LedgerError::invalid_quantity(
                    system_quantity,
                    "system quantity cannot be negative",
                ));
            }
            if next.covers(input.product_id, input.location_id) {
                return Err(LedgerError::validation(format!(
                    "stocktake already counts product {} at this location",
                    input.product_id
                )));
            }
            if next.item(input.item_id).is_some() {
                return Err(LedgerError::duplicate("stocktake item", input.item_id.to_string()));
            }
            next.items.push(StocktakeItem {
                id: input.item_id,
                product_id: input.product_id,
                location_id: input.location_id,
                system_quantity,
                counted_quantity: None,
                variance: None,
                counted_by: None,
                counted_at: None,
                notes: None,
            });
        }
        Ok(next)
    }

    /// Record (or re-record) a physical count. No inventory is touched.
    pub fn record_count(
        &self,
        item_id: ItemId,
        counted_quantity: i64,
        notes: Option<String>,
        ctx: &OperationContext,
    ) -> LedgerResult<Self> {
        self.ensure_open("record count")?;
        if self.item(item_id).is_none() {
            return Err(LedgerError::not_found(ReferenceKind::StocktakeItem, item_id));
        }
        if counted_quantity < 0 {
            return Err(LedgerError::invalid_quantity(
                counted_quantity,
                "counted quantity cannot be negative",
            ));
        }

        let mut next = self.next(ctx);
        for item in next.items.iter_mut().filter(|item| item.id == item_id) {
            item.counted_quantity = Some(counted_quantity);
            item.variance = Some(counted_quantity - item.system_quantity);
            item.counted_by = Some(ctx.actor);
            item.counted_at = Some(ctx.occurred_at);
            if notes.is_some() {
                item.notes = notes.clone();
            }
        }
        Ok(next)
    }

    /// Complete the count, forcing on-hand to the counted quantity for every
    /// line with a nonzero variance. Uncounted lines are left alone.
    pub fn finalize(&self, ctx: &OperationContext) -> LedgerResult<Decision<Self>> {
        self.ensure_open("finalize")?;

        let changes = self
            .variances()
            .into_iter()
            .filter_map(|item| {
                let counted = item.counted_quantity?;
                Some(
                    StockChange::set_on_hand(
                        self.record_key(item),
                        counted,
                        MovementType::StocktakeCorrection,
                    )
                    .with_reference(ReferenceTable::StocktakeItems, item.id)
                    .with_reference_number(self.stocktake_number.clone())
                    .with_notes(item.notes.clone()),
                )
            })
            .collect();

        let mut next = self.next(ctx);
        next.status = StocktakeStatus::Completed;
        next.end_date = Some(ctx.occurred_at.date_naive());
        Ok(Decision::new(next, changes))
    }
}
