//! Caller-supplied clock and actor for mutating operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::ActorId;

/// Who performed an operation and when.
///
/// The ledger never reads the wall clock itself; every timestamp on a
/// movement or document comes from here.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationContext {
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

impl OperationContext {
    pub fn new(actor: ActorId, occurred_at: DateTime<Utc>) -> Self {
        Self { actor, occurred_at }
    }
}
