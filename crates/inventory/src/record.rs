//! Inventory records and the quantity rules every ledger mutation goes through.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{LedgerError, LedgerResult, RecordKey};

/// Lifecycle status of stock held in a record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StockStatus {
    #[default]
    Available,
    Quarantined,
    Expired,
    Damaged,
}

impl StockStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StockStatus::Available => "AVAILABLE",
            StockStatus::Quarantined => "QUARANTINED",
            StockStatus::Expired => "EXPIRED",
            StockStatus::Damaged => "DAMAGED",
        }
    }
}

impl core::fmt::Display for StockStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for StockStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AVAILABLE" => Ok(StockStatus::Available),
            "QUARANTINED" => Ok(StockStatus::Quarantined),
            "EXPIRED" => Ok(StockStatus::Expired),
            "DAMAGED" => Ok(StockStatus::Damaged),
            other => Err(LedgerError::validation(format!("unknown stock status '{other}'"))),
        }
    }
}

/// How a change is expressed against on-hand quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "quantity", rename_all = "snake_case")]
pub enum QuantityChange {
    /// Signed delta added to on-hand.
    Delta(i64),
    /// Force on-hand to an absolute value (physical count).
    SetOnHand(i64),
}

/// Which rule guards the reserved portion when on-hand goes down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaPolicy {
    /// On-hand may never fall below reserved.
    #[default]
    Strict,
    /// On-hand may fall below reserved; reserved is trimmed to the new on-hand.
    /// Only reconciliation paths (stocktake finalize) use this.
    Corrective,
}

/// Before/after snapshot of one accepted change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedChange {
    pub quantity_before: i64,
    pub quantity_change: i64,
    pub quantity_after: i64,
    /// Reserved quantity dropped because a corrective change left less on hand.
    pub reservation_trimmed: i64,
}

/// Current quantity state for one `(product, warehouse[, location])`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRecord {
    pub key: RecordKey,
    pub quantity_on_hand: i64,
    pub quantity_reserved: i64,
    pub status: StockStatus,
    pub expiry_date: Option<NaiveDate>,
    /// Number of accepted writes; 0 means the record has never been persisted.
    pub version: u64,
    pub updated_at: Option<DateTime<Utc>>,
}

impl InventoryRecord {
    /// Zero-valued record returned for keys that have never moved.
    pub fn empty(key: RecordKey) -> Self {
        Self {
            key,
            quantity_on_hand: 0,
            quantity_reserved: 0,
            status: StockStatus::Available,
            expiry_date: None,
            version: 0,
            updated_at: None,
        }
    }

    pub fn quantity_available(&self) -> i64 {
        self.quantity_on_hand - self.quantity_reserved
    }

    pub fn exists(&self) -> bool {
        self.version > 0
    }

    /// Validate `change` against the current state without mutating it.
    pub fn plan(&self, change: QuantityChange, policy: DeltaPolicy) -> LedgerResult<AppliedChange> {
        let before = self.quantity_on_hand;
        let (delta, after) = match change {
            QuantityChange::Delta(0) => {
                return Err(LedgerError::invalid_quantity(0, "delta cannot be zero"));
            }
            QuantityChange::Delta(delta) => {
                let after = before
                    .checked_add(delta)
                    .ok_or_else(|| LedgerError::invalid_quantity(delta, "quantity overflow"))?;
                (delta, after)
            }
            QuantityChange::SetOnHand(target) if target < 0 => {
                return Err(LedgerError::invalid_quantity(
                    target,
                    "on-hand quantity cannot be negative",
                ));
            }
            QuantityChange::SetOnHand(target) => (target - before, target),
        };

        if after < 0 {
            return Err(LedgerError::insufficient_stock(
                self.key,
                -delta,
                before,
            ));
        }

        let mut trimmed = 0;
        if after < self.quantity_reserved {
            match policy {
                DeltaPolicy::Strict => {
                    return Err(LedgerError::insufficient_stock(
                        self.key,
                        -delta,
                        self.quantity_available(),
                    ));
                }
                DeltaPolicy::Corrective => trimmed = self.quantity_reserved - after,
            }
        }

        Ok(AppliedChange {
            quantity_before: before,
            quantity_change: delta,
            quantity_after: after,
            reservation_trimmed: trimmed,
        })
    }

    /// Validate and apply `change`, returning the before/after snapshot.
    pub fn apply(
        &mut self,
        change: QuantityChange,
        policy: DeltaPolicy,
        at: DateTime<Utc>,
    ) -> LedgerResult<AppliedChange> {
        let applied = self.plan(change, policy)?;
        if applied.reservation_trimmed > 0 {
            tracing::warn!(
                key = %self.key,
                trimmed = applied.reservation_trimmed,
                on_hand = applied.quantity_after,
                "corrective change left less on hand than reserved; trimming reservation"
            );
            self.quantity_reserved -= applied.reservation_trimmed;
        }
        self.quantity_on_hand = applied.quantity_after;
        self.touch(at);
        Ok(applied)
    }

    pub fn set_status(&mut self, status: StockStatus, at: DateTime<Utc>) {
        self.status = status;
        self.touch(at);
    }

    pub fn set_expiry(&mut self, expiry_date: Option<NaiveDate>, at: DateTime<Utc>) {
        self.expiry_date = expiry_date;
        self.touch(at);
    }

    /// Whether the stock expires on or before `cutoff` and there is stock to lose.
    pub fn expires_by(&self, cutoff: NaiveDate) -> bool {
        self.quantity_on_hand > 0 && self.expiry_date.is_some_and(|d| d <= cutoff)
    }

    pub(crate) fn touch(&mut self, at: DateTime<Utc>) {
        self.version += 1;
        self.updated_at = Some(at);
    }
}
