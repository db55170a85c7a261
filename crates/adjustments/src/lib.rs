//! Stock adjustment domain module.
//!
//! Manual on-hand corrections (damage, loss, found stock) gated by approval.
//! Approval is all-or-nothing: it returns one change per item and the
//! infrastructure layer commits them in a single transaction.

pub mod adjustment;

pub use adjustment::{
    AdjustmentReason, AdjustmentStatus, NewStockAdjustment, NewStockAdjustmentItem,
    StockAdjustment, StockAdjustmentItem,
};
