use transit_core::{PaymentEntry, PaymentMethod};
use transit_shared::format_cents;

/// Collects discrete payments against the amount owed for a reservation.
///
/// `remaining()` is always derived from the current entries, so adding and
/// then removing the same entry restores it exactly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaymentLedger {
    total_owed_cents: i64,
    entries: Vec<PaymentEntry>,
}

impl PaymentLedger {
    pub fn new(total_owed_cents: i64) -> Self {
        Self {
            total_owed_cents,
            entries: Vec::new(),
        }
    }

    pub fn total_owed(&self) -> i64 {
        self.total_owed_cents
    }

    pub fn collected(&self) -> i64 {
        self.entries.iter().map(|e| e.amount_cents).sum()
    }

    /// Never negative
    pub fn remaining(&self) -> i64 {
        (self.total_owed_cents - self.collected()).max(0)
    }

    pub fn entries(&self) -> &[PaymentEntry] {
        &self.entries
    }

    /// Record a payment. Rejected without touching the ledger when the amount
    /// is not positive or exceeds the remaining balance.
    pub fn add_payment(&mut self, method: PaymentMethod, amount_cents: i64) -> Result<i64, LedgerError> {
        if amount_cents <= 0 {
            return Err(LedgerError::NonPositiveAmount { amount_cents });
        }

        let remaining = self.remaining();
        if amount_cents > remaining {
            return Err(LedgerError::ExceedsRemaining {
                amount_cents,
                remaining_cents: remaining,
            });
        }

        self.entries.push(PaymentEntry::new(method, amount_cents));
        Ok(self.remaining())
    }

    pub fn remove_payment(&mut self, index: usize) -> Result<PaymentEntry, LedgerError> {
        if index >= self.entries.len() {
            return Err(LedgerError::IndexOutOfRange {
                index,
                len: self.entries.len(),
            });
        }
        Ok(self.entries.remove(index))
    }

    /// Whether a commit may go ahead. With no explicit entries a single
    /// full-amount payment is synthesized at commit time, so that case is
    /// always committable.
    pub fn can_commit(&self, collect_payment: bool) -> bool {
        !collect_payment || self.entries.is_empty() || self.collected() == self.total_owed_cents
    }

    /// The payment list that goes out with the commit request.
    ///
    /// - collection disabled: no payments (deferred booking)
    /// - no explicit entries: one entry for the full total with `default_method`
    /// - explicit entries: they must add up to the total exactly
    pub fn finalize(
        &self,
        collect_payment: bool,
        default_method: PaymentMethod,
    ) -> Result<Vec<PaymentEntry>, LedgerError> {
        if !collect_payment {
            return Ok(Vec::new());
        }

        if self.entries.is_empty() {
            if self.total_owed_cents == 0 {
                return Ok(Vec::new());
            }
            return Ok(vec![PaymentEntry::new(default_method, self.total_owed_cents)]);
        }

        let collected = self.collected();
        if collected != self.total_owed_cents {
            return Err(LedgerError::Mismatch {
                total_owed_cents: self.total_owed_cents,
                collected_cents: collected,
            });
        }

        Ok(self.entries.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("Payment amount must be greater than zero (got {})", format_cents(*amount_cents))]
    NonPositiveAmount { amount_cents: i64 },

    #[error(
        "Payment of {} exceeds the remaining balance of {}",
        format_cents(*amount_cents),
        format_cents(*remaining_cents)
    )]
    ExceedsRemaining {
        amount_cents: i64,
        remaining_cents: i64,
    },

    #[error("No payment at position {index} ({len} recorded)")]
    IndexOutOfRange { index: usize, len: usize },

    #[error(
        "Payments total {} but the reservation owes {}",
        format_cents(*collected_cents),
        format_cents(*total_owed_cents)
    )]
    Mismatch {
        total_owed_cents: i64,
        collected_cents: i64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_then_remove_restores_remaining() {
        let mut ledger = PaymentLedger::new(5000);
        ledger.add_payment(PaymentMethod::Cash, 1000).unwrap();
        let before = ledger.remaining();

        ledger.add_payment(PaymentMethod::Transfer, 1500).unwrap();
        assert_eq!(ledger.remaining(), 2500);

        let removed = ledger.remove_payment(1).unwrap();
        assert_eq!(removed, PaymentEntry::new(PaymentMethod::Transfer, 1500));
        assert_eq!(ledger.remaining(), before);
    }

    #[test]
    fn test_over_remaining_is_a_noop() {
        let mut ledger = PaymentLedger::new(5000);
        ledger.add_payment(PaymentMethod::Cash, 3000).unwrap();

        let err = ledger.add_payment(PaymentMethod::Transfer, 3000).unwrap_err();
        assert_eq!(
            err,
            LedgerError::ExceedsRemaining {
                amount_cents: 3000,
                remaining_cents: 2000
            }
        );
        assert_eq!(err.to_string(), "Payment of 30.00 exceeds the remaining balance of 20.00");
        assert_eq!(ledger.entries().len(), 1);
        assert_eq!(ledger.remaining(), 2000);
    }

    #[test]
    fn test_non_positive_amount_rejected() {
        let mut ledger = PaymentLedger::new(5000);
        assert!(matches!(
            ledger.add_payment(PaymentMethod::Cash, 0),
            Err(LedgerError::NonPositiveAmount { amount_cents: 0 })
        ));
        assert!(ledger.add_payment(PaymentMethod::Cash, -100).is_err());
        assert!(ledger.entries().is_empty());
    }

    #[test]
    fn test_remove_out_of_range() {
        let mut ledger = PaymentLedger::new(5000);
        assert_eq!(
            ledger.remove_payment(0),
            Err(LedgerError::IndexOutOfRange { index: 0, len: 0 })
        );
    }

    #[test]
    fn test_implicit_full_payment_synthesized() {
        let ledger = PaymentLedger::new(2000);
        assert!(ledger.can_commit(true));

        let payments = ledger.finalize(true, PaymentMethod::Cash).unwrap();
        assert_eq!(payments, vec![PaymentEntry::new(PaymentMethod::Cash, 2000)]);
    }

    #[test]
    fn test_partial_payments_block_commit() {
        let mut ledger = PaymentLedger::new(5000);
        ledger.add_payment(PaymentMethod::Cash, 3000).unwrap();

        assert!(!ledger.can_commit(true));
        let err = ledger.finalize(true, PaymentMethod::Cash).unwrap_err();
        assert_eq!(err.to_string(), "Payments total 30.00 but the reservation owes 50.00");

        // deferred bookings skip reconciliation
        assert!(ledger.can_commit(false));
        assert!(ledger.finalize(false, PaymentMethod::Cash).unwrap().is_empty());
    }

    #[test]
    fn test_exact_split_is_committable() {
        let mut ledger = PaymentLedger::new(5000);
        ledger.add_payment(PaymentMethod::Cash, 3000).unwrap();
        ledger.add_payment(PaymentMethod::Transfer, 2000).unwrap();

        assert_eq!(ledger.remaining(), 0);
        assert!(ledger.can_commit(true));
        assert_eq!(ledger.finalize(true, PaymentMethod::Cash).unwrap().len(), 2);
    }
}
