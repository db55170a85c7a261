//! Inventory ledger domain: records, reservations and the movement log.
//!
//! This crate contains the quantity rules shared by every workflow, implemented
//! purely as deterministic domain logic (no IO, no storage).

pub mod change;
pub mod movement;
pub mod record;
pub mod reservation;

pub use change::{Decision, StockChange};
pub use movement::{
    MovementReference, MovementType, Reconciliation, ReferenceTable, StockMovement, replay_on_hand,
};
pub use record::{AppliedChange, DeltaPolicy, InventoryRecord, QuantityChange, StockStatus};
