//! Type-erased workflow documents, as persisted by a `LedgerStore`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockledger_adjustments::StockAdjustment;
use stockledger_core::{AggregateRoot, ItemId, ReferenceKind, SupplierId, WarehouseId};
use stockledger_purchasing::PurchaseOrder;
use stockledger_stocktake::Stocktake;
use stockledger_transfers::StockTransfer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    PurchaseOrder,
    StockAdjustment,
    StockTransfer,
    Stocktake,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::PurchaseOrder => "purchase_order",
            DocumentKind::StockAdjustment => "stock_adjustment",
            DocumentKind::StockTransfer => "stock_transfer",
            DocumentKind::Stocktake => "stocktake",
        }
    }

    /// Table holding documents of this kind.
    pub fn table(&self) -> &'static str {
        match self {
            DocumentKind::PurchaseOrder => "purchase_orders",
            DocumentKind::StockAdjustment => "stock_adjustments",
            DocumentKind::StockTransfer => "stock_transfers",
            DocumentKind::Stocktake => "stocktakes",
        }
    }

    pub fn reference_kind(&self) -> ReferenceKind {
        match self {
            DocumentKind::PurchaseOrder => ReferenceKind::PurchaseOrder,
            DocumentKind::StockAdjustment => ReferenceKind::StockAdjustment,
            DocumentKind::StockTransfer => ReferenceKind::StockTransfer,
            DocumentKind::Stocktake => ReferenceKind::Stocktake,
        }
    }

    pub fn item_reference_kind(&self) -> ReferenceKind {
        match self {
            DocumentKind::PurchaseOrder => ReferenceKind::PurchaseOrderItem,
            DocumentKind::StockAdjustment => ReferenceKind::StockAdjustmentItem,
            DocumentKind::StockTransfer => ReferenceKind::StockTransferItem,
            DocumentKind::Stocktake => ReferenceKind::StocktakeItem,
        }
    }
}

impl core::fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Any workflow document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum WorkflowDocument {
    PurchaseOrder(PurchaseOrder),
    StockAdjustment(StockAdjustment),
    StockTransfer(StockTransfer),
    Stocktake(Stocktake),
}

impl WorkflowDocument {
    pub fn kind(&self) -> DocumentKind {
        match self {
            WorkflowDocument::PurchaseOrder(_) => DocumentKind::PurchaseOrder,
            WorkflowDocument::StockAdjustment(_) => DocumentKind::StockAdjustment,
            WorkflowDocument::StockTransfer(_) => DocumentKind::StockTransfer,
            WorkflowDocument::Stocktake(_) => DocumentKind::Stocktake,
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            WorkflowDocument::PurchaseOrder(d) => d.id_typed().into(),
            WorkflowDocument::StockAdjustment(d) => d.id_typed().into(),
            WorkflowDocument::StockTransfer(d) => d.id_typed().into(),
            WorkflowDocument::Stocktake(d) => d.id_typed().into(),
        }
    }

    pub fn version(&self) -> u64 {
        match self {
            WorkflowDocument::PurchaseOrder(d) => d.version(),
            WorkflowDocument::StockAdjustment(d) => d.version(),
            WorkflowDocument::StockTransfer(d) => d.version(),
            WorkflowDocument::Stocktake(d) => d.version(),
        }
    }

    /// Human-facing document number (PO number, adjustment number, ...).
    pub fn number(&self) -> &str {
        match self {
            WorkflowDocument::PurchaseOrder(d) => d.po_number(),
            WorkflowDocument::StockAdjustment(d) => d.adjustment_number(),
            WorkflowDocument::StockTransfer(d) => d.transfer_number(),
            WorkflowDocument::Stocktake(d) => d.stocktake_number(),
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            WorkflowDocument::PurchaseOrder(d) => d.status().as_str(),
            WorkflowDocument::StockAdjustment(d) => d.status().as_str(),
            WorkflowDocument::StockTransfer(d) => d.status().as_str(),
            WorkflowDocument::Stocktake(d) => d.status().as_str(),
        }
    }

    /// The document's own warehouse (the source warehouse for transfers).
    pub fn warehouse_id(&self) -> WarehouseId {
        match self {
            WorkflowDocument::PurchaseOrder(d) => d.warehouse_id(),
            WorkflowDocument::StockAdjustment(d) => d.warehouse_id(),
            WorkflowDocument::StockTransfer(d) => d.from_warehouse_id(),
            WorkflowDocument::Stocktake(d) => d.warehouse_id(),
        }
    }

    /// Destination warehouse of a transfer.
    pub fn counterpart_warehouse_id(&self) -> Option<WarehouseId> {
        match self {
            WorkflowDocument::StockTransfer(d) => Some(d.to_warehouse_id()),
            _ => None,
        }
    }

    pub fn supplier_id(&self) -> Option<SupplierId> {
        match self {
            WorkflowDocument::PurchaseOrder(d) => Some(d.supplier_id()),
            _ => None,
        }
    }

    pub fn touches_warehouse(&self, warehouse_id: WarehouseId) -> bool {
        self.warehouse_id() == warehouse_id || self.counterpart_warehouse_id() == Some(warehouse_id)
    }

    pub fn item_ids(&self) -> Vec<ItemId> {
        match self {
            WorkflowDocument::PurchaseOrder(d) => d.items().iter().map(|i| i.id).collect(),
            WorkflowDocument::StockAdjustment(d) => d.items().iter().map(|i| i.id).collect(),
            WorkflowDocument::StockTransfer(d) => d.items().iter().map(|i| i.id).collect(),
            WorkflowDocument::Stocktake(d) => d.items().iter().map(|i| i.id).collect(),
        }
    }

    pub fn contains_item(&self, item_id: ItemId) -> bool {
        self.item_ids().contains(&item_id)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            WorkflowDocument::PurchaseOrder(d) => d.created_at(),
            WorkflowDocument::StockAdjustment(d) => d.created_at(),
            WorkflowDocument::StockTransfer(d) => d.created_at(),
            WorkflowDocument::Stocktake(d) => d.created_at(),
        }
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        match self {
            WorkflowDocument::PurchaseOrder(d) => d.updated_at(),
            WorkflowDocument::StockAdjustment(d) => d.updated_at(),
            WorkflowDocument::StockTransfer(d) => d.updated_at(),
            WorkflowDocument::Stocktake(d) => d.updated_at(),
        }
    }

    /// The inner document as JSON, without the kind tag.
    pub fn body(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            WorkflowDocument::PurchaseOrder(d) => serde_json::to_value(d),
            WorkflowDocument::StockAdjustment(d) => serde_json::to_value(d),
            WorkflowDocument::StockTransfer(d) => serde_json::to_value(d),
            WorkflowDocument::Stocktake(d) => serde_json::to_value(d),
        }
    }

    pub fn from_body(kind: DocumentKind, body: serde_json::Value) -> serde_json::Result<Self> {
        Ok(match kind {
            DocumentKind::PurchaseOrder => WorkflowDocument::PurchaseOrder(serde_json::from_value(body)?),
            DocumentKind::StockAdjustment => {
                WorkflowDocument::StockAdjustment(serde_json::from_value(body)?)
            }
            DocumentKind::StockTransfer => WorkflowDocument::StockTransfer(serde_json::from_value(body)?),
            DocumentKind::Stocktake => WorkflowDocument::Stocktake(serde_json::from_value(body)?),
        })
    }
}

/// Typed access to one `WorkflowDocument` variant.
pub trait LedgerDocument: AggregateRoot + Clone + Send + Sync + Sized + 'static {
    const KIND: DocumentKind;

    fn into_document(self) -> WorkflowDocument;

    fn from_document(document: WorkflowDocument) -> Option<Self>;
}

macro_rules! impl_ledger_document {
    ($t:ty, $variant:ident) => {
        impl LedgerDocument for $t {
            const KIND: DocumentKind = DocumentKind::$variant;

            fn into_document(self) -> WorkflowDocument {
                WorkflowDocument::$variant(self)
            }

            fn from_document(document: WorkflowDocument) -> Option<Self> {
                match document {
                    WorkflowDocument::$variant(d) => Some(d),
                    _ => None,
                }
            }
        }
    };
}

impl_ledger_document!(PurchaseOrder, PurchaseOrder);
impl_ledger_document!(StockAdjustment, StockAdjustment);
impl_ledger_document!(StockTransfer, StockTransfer);
impl_ledger_document!(Stocktake, Stocktake);
