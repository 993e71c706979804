use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::domain::{
    status_for_remaining, AllocationId, DomainEvent, Invoice, InvoiceAllocation, InvoiceId,
    InvoiceStatus, MoneyValue, Payment, PaymentId,
};
use crate::storage::Repository;

use super::{CoreError, UnitOfWork};

/// Allocates payments and receipts against invoices, keeps invoice status
/// in step with the allocated total, and never lets an invoice or payment
/// be allocated past its amount.
#[derive(Clone)]
pub struct InvoicePaymentAllocator {
    repo: Repository,
}

impl InvoicePaymentAllocator {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    /// Allocate `amount` (in the invoice currency) of a payment against an
    /// invoice. When the payment is in a different currency, the caller
    /// must supply the ratio from payment currency to invoice currency;
    /// the allocator never infers one.
    pub async fn allocate(
        &self,
        uow: &mut UnitOfWork,
        payment_id: PaymentId,
        invoice_id: InvoiceId,
        amount: MoneyValue,
        ratio: Option<Decimal>,
    ) -> Result<InvoiceAllocation, CoreError> {
        let invoice = self.require_invoice(uow, invoice_id).await?;
        let payment = self.require_payment(uow, payment_id).await?;

        if !invoice.status.accepts_allocations() {
            return Err(CoreError::InvoiceClosed {
                id: invoice.id,
                status: invoice.status,
            });
        }
        if !amount.is_positive() {
            return Err(CoreError::Validation(
                "allocation amount must be positive".into(),
            ));
        }
        if amount.currency != invoice.currency {
            return Err(CoreError::CurrencyMismatch {
                left: amount.currency,
                right: invoice.currency,
            });
        }

        let cross_currency = payment.amount.currency != invoice.currency;
        if cross_currency && ratio.is_none() {
            return Err(CoreError::CurrencyMismatch {
                left: payment.amount.currency,
                right: invoice.currency,
            });
        }
        if let Some(r) = ratio {
            if r <= Decimal::ZERO {
                return Err(CoreError::Validation(
                    "conversion ratio must be positive".into(),
                ));
            }
        }

        let remaining = self.invoice_remaining(uow, &invoice).await?;

        // Payment headroom, expressed in the invoice currency. Rounded
        // down so an allocation at the cap, converted back, still fits
        // within the payment's unallocated amount.
        let unallocated = self.payment_unallocated(uow, &payment).await?;
        let payment_headroom = if cross_currency {
            unallocated.convert_floor(invoice.currency, ratio.unwrap_or(Decimal::ONE))
        } else {
            unallocated
        };

        let available = if remaining.amount <= payment_headroom.amount {
            remaining
        } else {
            payment_headroom
        };
        if amount.amount > available.amount {
            return Err(CoreError::OverAllocation {
                requested: amount,
                available,
            });
        }

        let mut allocation = InvoiceAllocation::new(invoice.id, payment.id, amount);
        if cross_currency {
            // Ratio checked present above.
            allocation = allocation.with_conversion_ratio(ratio.unwrap_or(Decimal::ONE));
        }
        self.repo.insert_allocation(uow.conn(), &allocation).await?;

        self.refresh_invoice_status(uow, &invoice).await?;

        uow.defer_event(DomainEvent::PaymentAllocated {
            payment_id: payment.id,
            invoice_id: invoice.id,
            amount,
        });

        Ok(allocation)
    }

    /// Remove an allocation and recompute the invoice status. Callers that
    /// posted a compensating ledger reversal run it in the same unit of
    /// work, so both take effect together or not at all.
    pub async fn deallocate(
        &self,
        uow: &mut UnitOfWork,
        allocation_id: AllocationId,
    ) -> Result<(), CoreError> {
        let allocation = self
            .repo
            .get_allocation(uow.conn(), allocation_id)
            .await?
            .ok_or(CoreError::AllocationNotFound(allocation_id))?;

        self.repo.delete_allocation(uow.conn(), allocation_id).await?;

        let invoice = self.require_invoice(uow, allocation.invoice_id).await?;
        if invoice.status != InvoiceStatus::Cancelled && invoice.status != InvoiceStatus::Draft {
            self.refresh_invoice_status(uow, &invoice).await?;
        }
        Ok(())
    }

    /// Invoices past their due date that still carry a balance. Buffers an
    /// `InvoiceBecameOverdue` event per invoice found.
    pub async fn sweep_overdue(
        &self,
        uow: &mut UnitOfWork,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<Invoice>, CoreError> {
        // The query narrows to candidates; the domain predicate decides.
        let overdue: Vec<Invoice> = self
            .repo
            .find_overdue(uow.conn(), as_of)
            .await?
            .into_iter()
            .filter(|invoice| invoice.is_overdue(as_of))
            .collect();
        for invoice in &overdue {
            if let Some(due) = invoice.due_date {
                uow.defer_event(DomainEvent::InvoiceBecameOverdue {
                    invoice_id: invoice.id,
                    due_date: due,
                });
            }
        }
        Ok(overdue)
    }

    /// Remaining amount on an invoice, against last-committed state.
    pub async fn remaining(&self, invoice_id: InvoiceId) -> Result<MoneyValue, CoreError> {
        let mut conn = self.repo.conn().await?;
        let invoice = self
            .repo
            .get_invoice(&mut conn, invoice_id)
            .await?
            .ok_or(CoreError::InvoiceNotFound(invoice_id))?;
        let allocated = self.repo.allocated_for_invoice(&mut conn, invoice_id).await?;
        Ok(invoice
            .remaining(&MoneyValue::new(allocated, invoice.currency))?)
    }

    /// Unallocated amount of a payment, against last-committed state.
    pub async fn unallocated(&self, payment_id: PaymentId) -> Result<MoneyValue, CoreError> {
        let mut conn = self.repo.conn().await?;
        let payment = self
            .repo
            .get_payment(&mut conn, payment_id)
            .await?
            .ok_or(CoreError::PaymentNotFound(payment_id))?;
        let allocated = self
            .repo
            .allocated_for_payment(&mut conn, payment_id, payment.amount.currency)
            .await?;
        Ok(payment.unallocated(&MoneyValue::new(allocated, payment.amount.currency))?)
    }

    async fn invoice_remaining(
        &self,
        uow: &mut UnitOfWork,
        invoice: &Invoice,
    ) -> Result<MoneyValue, CoreError> {
        let allocated = self
            .repo
            .allocated_for_invoice(uow.conn(), invoice.id)
            .await?;
        Ok(invoice.remaining(&MoneyValue::new(allocated, invoice.currency))?)
    }

    async fn payment_unallocated(
        &self,
        uow: &mut UnitOfWork,
        payment: &Payment,
    ) -> Result<MoneyValue, CoreError> {
        let allocated = self
            .repo
            .allocated_for_payment(uow.conn(), payment.id, payment.amount.currency)
            .await?;
        Ok(payment.unallocated(&MoneyValue::new(allocated, payment.amount.currency))?)
    }

    async fn refresh_invoice_status(
        &self,
        uow: &mut UnitOfWork,
        invoice: &Invoice,
    ) -> Result<(), CoreError> {
        let remaining = self.invoice_remaining(uow, invoice).await?;
        let status = status_for_remaining(&invoice.total, &remaining);
        self.repo
            .update_invoice_status(uow.conn(), invoice.id, status)
            .await?;
        Ok(())
    }

    async fn require_invoice(
        &self,
        uow: &mut UnitOfWork,
        invoice_id: InvoiceId,
    ) -> Result<Invoice, CoreError> {
        self.repo
            .get_invoice(uow.conn(), invoice_id)
            .await?
            .ok_or(CoreError::InvoiceNotFound(invoice_id))
    }

    async fn require_payment(
        &self,
        uow: &mut UnitOfWork,
        payment_id: PaymentId,
    ) -> Result<Payment, CoreError> {
        self.repo
            .get_payment(uow.conn(), payment_id)
            .await?
            .ok_or(CoreError::PaymentNotFound(payment_id))
    }
}
