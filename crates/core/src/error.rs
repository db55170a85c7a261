//! Ledger error model.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::id::RecordKey;

/// Result type used across the ledger.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// What kind of thing a `ReferenceNotFound` error points at.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    Product,
    Warehouse,
    Location,
    Supplier,
    InventoryRecord,
    PurchaseOrder,
    PurchaseOrderItem,
    StockAdjustment,
    StockAdjustmentItem,
    StockTransfer,
    StockTransferItem,
    Stocktake,
    StocktakeItem,
    StockMovement,
}

impl ReferenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceKind::Product => "product",
            ReferenceKind::Warehouse => "warehouse",
            ReferenceKind::Location => "location",
            ReferenceKind::Supplier => "supplier",
            ReferenceKind::InventoryRecord => "inventory_record",
            ReferenceKind::PurchaseOrder => "purchase_order",
            ReferenceKind::PurchaseOrderItem => "purchase_order_item",
            ReferenceKind::StockAdjustment => "stock_adjustment",
            ReferenceKind::StockAdjustmentItem => "stock_adjustment_item",
            ReferenceKind::StockTransfer => "stock_transfer",
            ReferenceKind::StockTransferItem => "stock_transfer_item",
            ReferenceKind::Stocktake => "stocktake",
            ReferenceKind::StocktakeItem => "stocktake_item",
            ReferenceKind::StockMovement => "stock_movement",
        }
    }
}

impl core::fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable, machine-readable error code.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InsufficientStock,
    OverRelease,
    InvalidQuantity,
    InvalidStateTransition,
    ReferenceNotFound,
    StorageFault,
    Validation,
    Conflict,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InsufficientStock => "insufficient_stock",
            ErrorKind::OverRelease => "over_release",
            ErrorKind::InvalidQuantity => "invalid_quantity",
            ErrorKind::InvalidStateTransition => "invalid_state_transition",
            ErrorKind::ReferenceNotFound => "reference_not_found",
            ErrorKind::StorageFault => "storage_fault",
            ErrorKind::Validation => "validation",
            ErrorKind::Conflict => "conflict",
        }
    }
}

/// Ledger-level error.
///
/// Business-rule variants are terminal for the call that produced them and
/// carry the identifiers and quantities needed to act on them. Only
/// `StorageFault` and a stale-version `Conflict` are retryable; a `Duplicate`
/// shares the `Conflict` kind but fails the same way on every attempt.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The operation would drive available (or on-hand) quantity negative.
    #[error("insufficient stock at {key}: requested {requested}, available {available}")]
    InsufficientStock {
        key: RecordKey,
        requested: i64,
        available: i64,
    },

    /// Releasing more than is currently reserved.
    #[error("cannot release {requested} at {key}: only {reserved} reserved")]
    OverRelease {
        key: RecordKey,
        requested: i64,
        reserved: i64,
    },

    /// Non-positive quantity, or one exceeding a workflow bound.
    #[error("invalid quantity {requested}: {reason}")]
    InvalidQuantity { requested: i64, reason: String },

    /// Operation attempted outside its legal state.
    #[error("{entity} cannot {operation} while {state}")]
    InvalidStateTransition {
        entity: &'static str,
        state: String,
        operation: &'static str,
    },

    /// Unknown product/warehouse/location/workflow id.
    #[error("{kind} {id} not found")]
    ReferenceNotFound { kind: ReferenceKind, id: String },

    /// Malformed input that is not a quantity problem.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A workflow document changed underneath the operation (stale version).
    #[error("conflict: {0}")]
    Conflict(String),

    /// A unique id or document number is already taken.
    #[error("{what} '{value}' already in use")]
    Duplicate { what: String, value: String },

    /// Underlying persistence failure; nothing was committed.
    #[error("storage fault during {operation}: {message}")]
    StorageFault { operation: String, message: String },
}

impl LedgerError {
    pub fn insufficient_stock(key: RecordKey, requested: i64, available: i64) -> Self {
        Self::InsufficientStock {
            key,
            requested,
            available,
        }
    }

    pub fn over_release(key: RecordKey, requested: i64, reserved: i64) -> Self {
        Self::OverRelease {
            key,
            requested,
            reserved,
        }
    }

    pub fn invalid_quantity(requested: i64, reason: impl Into<String>) -> Self {
        Self::InvalidQuantity {
            requested,
            reason: reason.into(),
        }
    }

    pub fn invalid_transition(
        entity: &'static str,
        state: impl Into<String>,
        operation: &'static str,
    ) -> Self {
        Self::InvalidStateTransition {
            entity,
            state: state.into(),
            operation,
        }
    }

    pub fn not_found(kind: ReferenceKind, id: impl ToString) -> Self {
        Self::ReferenceNotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn duplicate(what: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Duplicate {
            what: what.into(),
            value: value.into(),
        }
    }

    pub fn storage(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StorageFault {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::InsufficientStock { .. } => ErrorKind::InsufficientStock,
            LedgerError::OverRelease { .. } => ErrorKind::OverRelease,
            LedgerError::InvalidQuantity { .. } => ErrorKind::InvalidQuantity,
            LedgerError::InvalidStateTransition { .. } => ErrorKind::InvalidStateTransition,
            LedgerError::ReferenceNotFound { .. } => ErrorKind::ReferenceNotFound,
            LedgerError::Validation(_) => ErrorKind::Validation,
            LedgerError::Conflict(_) | LedgerError::Duplicate { .. } => ErrorKind::Conflict,
            LedgerError::StorageFault { .. } => ErrorKind::StorageFault,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::StorageFault { .. } | LedgerError::Conflict(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{ProductId, WarehouseId};

    #[test]
    fn insufficient_stock_message_carries_key_and_quantities() {
        let key = RecordKey::new(ProductId::new(), WarehouseId::new());
        let err = LedgerError::insufficient_stock(key, 7, 3);
        let msg = err.to_string();
        assert!(msg.contains(&key.product_id.to_string()));
        assert!(msg.contains("requested 7"));
        assert!(msg.contains("available 3"));
        assert_eq!(err.kind().as_str(), "insufficient_stock");
    }

    #[test]
    fn only_storage_faults_and_conflicts_are_retryable() {
        assert!(LedgerError::storage("commit", "connection reset").is_retryable());
        assert!(LedgerError::conflict("stale version").is_retryable());
        assert!(!LedgerError::invalid_quantity(0, "must be positive").is_retryable());
        let taken = LedgerError::duplicate("stocktake number", "ST-1");
        assert_eq!(taken.kind(), ErrorKind::Conflict);
        assert!(!taken.is_retryable());
        assert!(!LedgerError::invalid_transition("stock adjustment", "approved", "approve")
            .is_retryable());
    }

    #[test]
    fn error_kind_serializes_as_snake_case() {
        let json = serde_json::to_string(&ErrorKind::InvalidStateTransition).unwrap();
        assert_eq!(json, "\"invalid_state_transition\"");
    }
}
