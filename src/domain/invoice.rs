use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Currency, EntryId, MoneyError, MoneyValue};

pub type InvoiceId = Uuid;
pub type CounterpartyId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceDirection {
    /// Issued to a customer/agent.
    Sale,
    /// Received from a supplier.
    Purchase,
}

impl InvoiceDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceDirection::Sale => "sale",
            InvoiceDirection::Purchase => "purchase",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "sale" => Some(InvoiceDirection::Sale),
            "purchase" => Some(InvoiceDirection::Purchase),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Posted,
    PartiallyPaid,
    Paid,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Posted => "posted",
            InvoiceStatus::PartiallyPaid => "partially_paid",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(InvoiceStatus::Draft),
            "posted" => Some(InvoiceStatus::Posted),
            "partially_paid" => Some(InvoiceStatus::PartiallyPaid),
            "paid" => Some(InvoiceStatus::Paid),
            "cancelled" => Some(InvoiceStatus::Cancelled),
            _ => None,
        }
    }

    /// Whether payments can still be allocated against the invoice.
    pub fn accepts_allocations(&self) -> bool {
        matches!(self, InvoiceStatus::Posted | InvoiceStatus::PartiallyPaid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentTerms {
    Immediate,
    Deferred,
}

impl PaymentTerms {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentTerms::Immediate => "immediate",
            PaymentTerms::Deferred => "deferred",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "immediate" => Some(PaymentTerms::Immediate),
            "deferred" => Some(PaymentTerms::Deferred),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,
    pub direction: InvoiceDirection,
    /// Opaque reference into the identity/party collaborator.
    pub counterparty_id: CounterpartyId,
    pub currency: Currency,
    /// Ratio into the ledger's reporting context, recorded as issued.
    pub conversion_ratio: Decimal,
    pub total: MoneyValue,
    pub payment_terms: PaymentTerms,
    pub due_date: Option<DateTime<Utc>>,
    pub status: InvoiceStatus,
    /// The journal entry posted for this invoice, once posted.
    pub journal_entry_id: Option<EntryId>,
    pub issued_at: DateTime<Utc>,
}

impl Invoice {
    pub fn new(
        direction: InvoiceDirection,
        counterparty_id: CounterpartyId,
        total: MoneyValue,
        payment_terms: PaymentTerms,
        issued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            direction,
            counterparty_id,
            currency: total.currency,
            conversion_ratio: Decimal::ONE,
            total,
            payment_terms,
            due_date: None,
            status: InvoiceStatus::Draft,
            journal_entry_id: None,
            issued_at,
        }
    }

    pub fn with_due_date(mut self, due_date: DateTime<Utc>) -> Self {
        self.due_date = Some(due_date);
        self
    }

    pub fn with_conversion_ratio(mut self, ratio: Decimal) -> Self {
        self.conversion_ratio = ratio;
        self
    }

    /// Remaining = total - allocated. Never negative for a well-formed
    /// allocation set.
    pub fn remaining(&self, allocated: &MoneyValue) -> Result<MoneyValue, MoneyError> {
        self.total.sub(allocated)
    }

    pub fn is_overdue(&self, as_of: DateTime<Utc>) -> bool {
        self.status.accepts_allocations()
            && self.due_date.is_some_and(|due| due < as_of)
    }
}

/// Recompute an invoice's status from its remaining amount. Only meaningful
/// for invoices that have been posted; drafts and cancelled invoices keep
/// their status.
pub fn status_for_remaining(total: &MoneyValue, remaining: &MoneyValue) -> InvoiceStatus {
    if remaining.is_zero() {
        InvoiceStatus::Paid
    } else if remaining.amount < total.amount {
        InvoiceStatus::PartiallyPaid
    } else {
        InvoiceStatus::Posted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn sar(amount: Decimal) -> MoneyValue {
        MoneyValue::new(amount, Currency::Sar)
    }

    fn sample_invoice(total: MoneyValue) -> Invoice {
        Invoice::new(
            InvoiceDirection::Sale,
            Uuid::new_v4(),
            total,
            PaymentTerms::Deferred,
            Utc::now(),
        )
    }

    #[test]
    fn test_new_invoice_is_draft() {
        let invoice = sample_invoice(sar(dec!(500)));
        assert_eq!(invoice.status, InvoiceStatus::Draft);
        assert_eq!(invoice.currency, Currency::Sar);
        assert!(invoice.journal_entry_id.is_none());
    }

    #[test]
    fn test_remaining_arithmetic() {
        let invoice = sample_invoice(sar(dec!(500)));
        let remaining = invoice.remaining(&sar(dec!(300))).unwrap();
        assert_eq!(remaining, sar(dec!(200)));
    }

    #[test]
    fn test_remaining_rejects_foreign_currency() {
        let invoice = sample_invoice(sar(dec!(500)));
        let allocated = MoneyValue::new(dec!(300), Currency::Yer);
        assert!(invoice.remaining(&allocated).is_err());
    }

    #[test]
    fn test_status_for_remaining() {
        let total = sar(dec!(500));
        assert_eq!(
            status_for_remaining(&total, &sar(dec!(500))),
            InvoiceStatus::Posted
        );
        assert_eq!(
            status_for_remaining(&total, &sar(dec!(200))),
            InvoiceStatus::PartiallyPaid
        );
        assert_eq!(
            status_for_remaining(&total, &sar(dec!(0))),
            InvoiceStatus::Paid
        );
    }

    #[test]
    fn test_accepts_allocations() {
        assert!(InvoiceStatus::Posted.accepts_allocations());
        assert!(InvoiceStatus::PartiallyPaid.accepts_allocations());
        assert!(!InvoiceStatus::Draft.accepts_allocations());
        assert!(!InvoiceStatus::Paid.accepts_allocations());
        assert!(!InvoiceStatus::Cancelled.accepts_allocations());
    }

    #[test]
    fn test_overdue_needs_open_status_and_past_due_date() {
        let now = Utc::now();
        let mut invoice =
            sample_invoice(sar(dec!(100))).with_due_date(now - Duration::days(3));
        assert!(!invoice.is_overdue(now), "drafts are never overdue");

        invoice.status = InvoiceStatus::Posted;
        assert!(invoice.is_overdue(now));

        invoice.status = InvoiceStatus::Paid;
        assert!(!invoice.is_overdue(now));

        invoice.status = InvoiceStatus::Posted;
        invoice.due_date = Some(now + Duration::days(3));
        assert!(!invoice.is_overdue(now));
    }
}
