//! Intended ledger changes produced by workflow decisions.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockledger_core::RecordKey;

use crate::movement::{MovementReference, MovementType, ReferenceTable};
use crate::record::{DeltaPolicy, QuantityChange};

/// One on-hand change a workflow wants applied, plus what its movement should say.
///
/// Workflows never touch records; the store applies these in one transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockChange {
    pub key: RecordKey,
    pub change: QuantityChange,
    pub policy: DeltaPolicy,
    pub movement_type: MovementType,
    pub reference: Option<MovementReference>,
    pub reference_number: Option<String>,
    pub notes: Option<String>,
}

impl StockChange {
    pub fn delta(key: RecordKey, delta: i64, movement_type: MovementType) -> Self {
        Self {
            key,
            change: QuantityChange::Delta(delta),
            policy: DeltaPolicy::Strict,
            movement_type,
            reference: None,
            reference_number: None,
            notes: None,
        }
    }

    /// Force on-hand to `quantity`, trimming reservations if needed.
    pub fn set_on_hand(key: RecordKey, quantity: i64, movement_type: MovementType) -> Self {
        Self {
            key,
            change: QuantityChange::SetOnHand(quantity),
            policy: DeltaPolicy::Corrective,
            movement_type,
            reference: None,
            reference_number: None,
            notes: None,
        }
    }

    pub fn with_reference(mut self, table: ReferenceTable, id: impl Into<Uuid>) -> Self {
        self.reference = Some(MovementReference::new(table, id));
        self
    }

    pub fn with_reference_number(mut self, number: impl Into<String>) -> Self {
        self.reference_number = Some(number.into());
        self
    }

    pub fn with_notes(mut self, notes: Option<String>) -> Self {
        self.notes = notes;
        self
    }
}

/// Outcome of a workflow step: the next document state and the ledger changes
/// that must commit with it.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision<D> {
    pub document: D,
    pub changes: Vec<StockChange>,
}

impl<D> Decision<D> {
    pub fn new(document: D, changes: Vec<StockChange>) -> Self {
        Self { document, changes }
    }

    /// A step that only changes the document.
    pub fn document_only(document: D) -> Self {
        Self {
            document,
            changes: Vec::new(),
        }
    }
}
