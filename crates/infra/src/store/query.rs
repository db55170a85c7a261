//! Read-side filters for records, movements and documents.
//!
//! All list queries are paginated with `Pagination` (default 50, capped at 1000).

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use stockledger_core::{LocationId, ProductId, WarehouseId};
use stockledger_inventory::{InventoryRecord, MovementType, StockMovement};

use crate::document::{DocumentKind, WorkflowDocument};

/// Filter for inventory record listings.
///
/// Records that have never been written are never listed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFilter {
    pub warehouse_id: Option<WarehouseId>,
    pub product_id: Option<ProductId>,
    /// Only stock on hand that expires on or before this date.
    pub expiring_by: Option<NaiveDate>,
}

impl RecordFilter {
    pub fn by_warehouse(warehouse_id: WarehouseId) -> Self {
        Self {
            warehouse_id: Some(warehouse_id),
            ..Default::default()
        }
    }

    pub fn by_product(product_id: ProductId) -> Self {
        Self {
            product_id: Some(product_id),
            ..Default::default()
        }
    }

    pub fn matches(&self, record: &InventoryRecord) -> bool {
        record.exists()
            && self.warehouse_id.is_none_or(|w| record.key.warehouse_id == w)
            && self.product_id.is_none_or(|p| record.key.product_id == p)
            && self.expiring_by.is_none_or(|cutoff| record.expires_by(cutoff))
    }
}

/// Filter for movement listings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementFilter {
    pub product_id: Option<ProductId>,
    pub warehouse_id: Option<WarehouseId>,
    pub location_id: Option<LocationId>,
    pub movement_type: Option<MovementType>,
}

impl MovementFilter {
    pub fn matches(&self, movement: &StockMovement) -> bool {
        self.product_id.is_none_or(|p| movement.product_id == p)
            && self.warehouse_id.is_none_or(|w| movement.warehouse_id == w)
            && self.location_id.is_none_or(|l| movement.location_id == Some(l))
            && self.movement_type.is_none_or(|t| movement.movement_type == t)
    }
}

/// Filter for workflow document listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentFilter {
    pub kind: DocumentKind,
    /// Status string as stored (`DRAFT`, `IN_TRANSIT`, ...).
    pub status: Option<String>,
    /// Matches either side of a transfer.
    pub warehouse_id: Option<WarehouseId>,
}

impl DocumentFilter {
    pub fn of(kind: DocumentKind) -> Self {
        Self {
            kind,
            status: None,
            warehouse_id: None,
        }
    }

    pub fn with_status(mut self, status: &str) -> Self {
        self.status = Some(status.to_string());
        self
    }

    pub fn with_warehouse(mut self, warehouse_id: WarehouseId) -> Self {
        self.warehouse_id = Some(warehouse_id);
        self
    }

    pub fn matches(&self, document: &WorkflowDocument) -> bool {
        document.kind() == self.kind
            && self.status.as_deref().is_none_or(|s| document.status() == s)
            && self.warehouse_id.is_none_or(|w| document.touches_warehouse(w))
    }
}
