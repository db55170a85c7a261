//! `stockledger-core` — shared building blocks for the stock ledger.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the record key, the error taxonomy, optimistic versioning and
//! the caller-supplied operation context.

pub mod aggregate;
pub mod context;
pub mod error;
pub mod id;
pub mod page;

pub use aggregate::{AggregateRoot, ExpectedVersion};
pub use context::OperationContext;
pub use error::{ErrorKind, LedgerError, LedgerResult, ReferenceKind};
pub use id::{
    ActorId, AdjustmentId, ItemId, LocationId, ProductId, PurchaseOrderId, RecordKey, StocktakeId,
    SupplierId, TransferId, WarehouseId,
};
pub use page::{Page, Pagination, SortOrder};
