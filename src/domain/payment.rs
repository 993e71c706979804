use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{EntryId, InvoiceId, MoneyError, MoneyValue, SettlementMethod};

pub type PaymentId = Uuid;
pub type AllocationId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentDirection {
    /// Money going out (to a supplier).
    Payment,
    /// Money coming in (from a customer/agent).
    Receipt,
}

impl PaymentDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentDirection::Payment => "payment",
            PaymentDirection::Receipt => "receipt",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "payment" => Some(PaymentDirection::Payment),
            "receipt" => Some(PaymentDirection::Receipt),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub direction: PaymentDirection,
    pub settlement_method: SettlementMethod,
    pub amount: MoneyValue,
    pub conversion_ratio: Decimal,
    /// Deferred payments are recorded without an immediate settlement entry.
    pub deferred: bool,
    pub journal_entry_id: Option<EntryId>,
    pub received_at: DateTime<Utc>,
}

impl Payment {
    pub fn new(
        direction: PaymentDirection,
        settlement_method: SettlementMethod,
        amount: MoneyValue,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            direction,
            settlement_method,
            amount,
            conversion_ratio: Decimal::ONE,
            deferred: false,
            journal_entry_id: None,
            received_at,
        }
    }

    pub fn with_conversion_ratio(mut self, ratio: Decimal) -> Self {
        self.conversion_ratio = ratio;
        self
    }

    pub fn deferred(mut self) -> Self {
        self.deferred = true;
        self
    }

    /// Unallocated = amount - sum of allocations against this payment.
    pub fn unallocated(&self, allocated: &MoneyValue) -> Result<MoneyValue, MoneyError> {
        self.amount.sub(allocated)
    }
}

/// Assignment of part or all of a payment's amount to a specific invoice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceAllocation {
    pub id: AllocationId,
    pub invoice_id: InvoiceId,
    pub payment_id: PaymentId,
    /// Allocated amount, in the invoice's currency.
    pub amount: MoneyValue,
    /// Caller-supplied ratio when payment and invoice currencies differ.
    /// The allocator never infers one.
    pub conversion_ratio: Option<Decimal>,
    pub created_at: DateTime<Utc>,
}

impl InvoiceAllocation {
    pub fn new(invoice_id: InvoiceId, payment_id: PaymentId, amount: MoneyValue) -> Self {
        Self {
            id: Uuid::new_v4(),
            invoice_id,
            payment_id,
            amount,
            conversion_ratio: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_conversion_ratio(mut self, ratio: Decimal) -> Self {
        self.conversion_ratio = Some(ratio);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Currency;
    use rust_decimal_macros::dec;

    #[test]
    fn test_payment_defaults() {
        let payment = Payment::new(
            PaymentDirection::Receipt,
            SettlementMethod::Cash,
            MoneyValue::new(dec!(300), Currency::Sar),
            Utc::now(),
        );
        assert!(!payment.deferred);
        assert_eq!(payment.conversion_ratio, Decimal::ONE);
        assert!(payment.journal_entry_id.is_none());
    }

    #[test]
    fn test_unallocated() {
        let payment = Payment::new(
            PaymentDirection::Receipt,
            SettlementMethod::BankTransfer,
            MoneyValue::new(dec!(300), Currency::Sar),
            Utc::now(),
        );
        let allocated = MoneyValue::new(dec!(120), Currency::Sar);
        assert_eq!(
            payment.unallocated(&allocated).unwrap().amount,
            dec!(180)
        );
    }

    #[test]
    fn test_direction_roundtrip() {
        for d in [PaymentDirection::Payment, PaymentDirection::Receipt] {
            assert_eq!(PaymentDirection::from_str(d.as_str()), Some(d));
        }
    }
}
