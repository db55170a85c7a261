//! Purchasing domain module (purchase orders and goods receiving).
//!
//! This crate contains business rules for purchase orders, implemented purely as
//! deterministic domain logic (no IO, no storage). Receiving returns the ledger
//! changes the infrastructure layer must commit with the updated order.

pub mod order;

pub use order::{
    NewPurchaseOrder, NewPurchaseOrderItem, PurchaseOrder, PurchaseOrderItem, PurchaseOrderStatus,
};
