//! Soft holds on available stock.
//!
//! Reservations change only `quantity_reserved`; they never write a movement.

use chrono::{DateTime, Utc};

use stockledger_core::{LedgerError, LedgerResult};

use crate::record::{InventoryRecord, StockStatus};

impl InventoryRecord {
    /// Hold `quantity` of the available stock.
    pub fn reserve(&mut self, quantity: i64, at: DateTime<Utc>) -> LedgerResult<()> {
        ensure_positive(quantity)?;
        if self.status != StockStatus::Available {
            return Err(LedgerError::invalid_transition(
                "inventory record",
                self.status.as_str(),
                "reserve",
            ));
        }
        let available = self.quantity_available();
        if quantity > available {
            return Err(LedgerError::insufficient_stock(self.key, quantity, available));
        }
        self.quantity_reserved += quantity;
        self.touch(at);
        Ok(())
    }

    /// Give back `quantity` previously reserved.
    pub fn release(&mut self, quantity: i64, at: DateTime<Utc>) -> LedgerResult<()> {
        ensure_positive(quantity)?;
        if quantity > self.quantity_reserved {
            return Err(LedgerError::over_release(
                self.key,
                quantity,
                self.quantity_reserved,
            ));
        }
        self.quantity_reserved -= quantity;
        self.touch(at);
        Ok(())
    }
}

fn ensure_positive(quantity: i64) -> LedgerResult<()> {
    if quantity <= 0 {
        return Err(LedgerError::invalid_quantity(
            quantity,
            "reservation quantity must be positive",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use stockledger_core::{ErrorKind, ProductId, RecordKey, WarehouseId};

    fn test_record(on_hand: i64) -> InventoryRecord {
        let mut record = InventoryRecord::empty(RecordKey::new(ProductId::new(), WarehouseId::new()));
        record.quantity_on_hand = on_hand;
        record.version = 1;
        record
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn reserve_more_than_available_fails() {
        let mut record = test_record(10);
        record.reserve(8, test_time()).unwrap();
        let err = record.reserve(3, test_time()).unwrap_err();
        match err {
            LedgerError::InsufficientStock {
                requested,
                available,
                ..
            } => {
                assert_eq!(requested, 3);
                assert_eq!(available, 2);
            }
            other => panic!("expected InsufficientStock, got {other:?}"),
        }
        assert_eq!(record.quantity_reserved, 8);
    }

    #[test]
    fn release_more_than_reserved_fails() {
        let mut record = test_record(10);
        record.reserve(4, test_time()).unwrap();
        let err = record.release(5, test_time()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OverRelease);
        assert_eq!(record.quantity_reserved, 4);
    }

    #[test]
    fn non_positive_quantities_are_rejected() {
        let mut record = test_record(10);
        assert_eq!(
            record.reserve(0, test_time()).unwrap_err().kind(),
            ErrorKind::InvalidQuantity
        );
        assert_eq!(
            record.release(-1, test_time()).unwrap_err().kind(),
            ErrorKind::InvalidQuantity
        );
    }

    #[test]
    fn quarantined_stock_cannot_be_reserved() {
        let mut record = test_record(10);
        record.set_status(StockStatus::Quarantined, test_time());
        let err = record.reserve(1, test_time()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidStateTransition);
    }

    #[test]
    fn reservations_leave_on_hand_alone() {
        let mut record = test_record(10);
        record.reserve(7, test_time()).unwrap();
        assert_eq!(record.quantity_on_hand, 10);
        assert_eq!(record.quantity_available(), 3);
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, ..ProptestConfig::default() })]

        #[test]
        fn prop_reserve_then_release_nets_zero(on_hand in 1i64..1_000, held in 0i64..500, q in 1i64..1_000) {
            let mut record = test_record(on_hand);
            let held = held.min(on_hand);
            if held > 0 {
                record.reserve(held, test_time()).unwrap();
            }
            let before = record.quantity_reserved;
            let available = record.quantity_available();
            if available == 0 {
                return Ok(());
            }
            let q = 1 + (q - 1) % available;

            record.reserve(q, test_time()).unwrap();
            record.release(q, test_time()).unwrap();
            prop_assert_eq!(record.quantity_reserved, before);
            prop_assert!(record.quantity_available() >= 0);
        }
    }
}
