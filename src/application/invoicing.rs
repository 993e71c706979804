use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::domain::{
    system_codes, CounterpartyId, EntryType, Invoice, InvoiceDirection, InvoiceId, InvoiceStatus,
    JournalEntry, MoneyValue, NewLine, Payment, PaymentDirection, PaymentTerms, SettlementMethod,
};
use crate::storage::Repository;

use super::{CoreError, LedgerEngine, NewEntry, UnitOfWork};

#[derive(Debug, Clone)]
pub struct NewInvoice {
    pub direction: InvoiceDirection,
    pub counterparty_id: CounterpartyId,
    pub total: MoneyValue,
    pub payment_terms: PaymentTerms,
    pub due_date: Option<DateTime<Utc>>,
    pub conversion_ratio: Option<Decimal>,
    pub issued_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub direction: PaymentDirection,
    pub settlement_method: SettlementMethod,
    pub amount: MoneyValue,
    pub conversion_ratio: Option<Decimal>,
    pub deferred: bool,
    pub received_at: DateTime<Utc>,
}

/// Creates invoices and payments and posts their ledger side. An invoice
/// becomes `Posted` only together with its journal entry, inside one unit
/// of work.
#[derive(Clone)]
pub struct InvoiceWorkflow {
    repo: Repository,
    ledger: LedgerEngine,
}

impl InvoiceWorkflow {
    pub fn new(repo: Repository, ledger: LedgerEngine) -> Self {
        Self { repo, ledger }
    }

    /// Record a draft invoice. Drafts have no ledger effect.
    pub async fn create_draft(
        &self,
        uow: &mut UnitOfWork,
        new: NewInvoice,
    ) -> Result<Invoice, CoreError> {
        if !new.total.is_positive() {
            return Err(CoreError::Validation(
                "invoice total must be positive".into(),
            ));
        }

        let mut invoice = Invoice::new(
            new.direction,
            new.counterparty_id,
            new.total,
            new.payment_terms,
            new.issued_at,
        );
        if let Some(due) = new.due_date {
            invoice = invoice.with_due_date(due);
        }
        if let Some(ratio) = new.conversion_ratio {
            if ratio <= Decimal::ZERO {
                return Err(CoreError::Validation(
                    "conversion ratio must be positive".into(),
                ));
            }
            invoice = invoice.with_conversion_ratio(ratio);
        }

        self.repo.insert_invoice(uow.conn(), &invoice).await?;
        Ok(invoice)
    }

    /// Post a draft invoice: build the balanced entry for its direction
    /// (sale: receivable against revenue; purchase: cost against payable),
    /// link it, and flip the status - all in the caller's unit of work.
    pub async fn post_invoice(
        &self,
        uow: &mut UnitOfWork,
        invoice_id: InvoiceId,
        posted_at: DateTime<Utc>,
    ) -> Result<(Invoice, JournalEntry), CoreError> {
        let mut invoice = self.require_invoice(uow, invoice_id).await?;
        if invoice.status != InvoiceStatus::Draft {
            return Err(CoreError::InvoiceClosed {
                id: invoice.id,
                status: invoice.status,
            });
        }

        let (debit_code, credit_code) = match invoice.direction {
            InvoiceDirection::Sale => {
                (system_codes::ACCOUNTS_RECEIVABLE, system_codes::SALES_REVENUE)
            }
            InvoiceDirection::Purchase => {
                (system_codes::SERVICE_COST, system_codes::ACCOUNTS_PAYABLE)
            }
        };
        let debit_account = self.ledger.account_by_code(uow, debit_code).await?;
        let credit_account = self.ledger.account_by_code(uow, credit_code).await?;

        let entry = self
            .ledger
            .post_entry(
                uow,
                NewEntry {
                    entry_type: EntryType::InvoicePosting,
                    currency: invoice.currency,
                    description: Some(format!(
                        "{} invoice {}",
                        invoice.direction.as_str(),
                        invoice.id
                    )),
                    settlement_method: None,
                    posted_at,
                    lines: vec![
                        NewLine::debit(debit_account.id, invoice.total),
                        NewLine::credit(credit_account.id, invoice.total),
                    ],
                },
            )
            .await?;

        self.repo
            .link_invoice_entry(uow.conn(), invoice.id, entry.id, InvoiceStatus::Posted)
            .await?;
        invoice.journal_entry_id = Some(entry.id);
        invoice.status = InvoiceStatus::Posted;
        Ok((invoice, entry))
    }

    /// Cancel an invoice. Drafts just flip; a posted invoice with no
    /// allocations gets its entry reversed in the same unit of work. Once
    /// payments are allocated the invoice is closed to cancellation.
    pub async fn cancel_invoice(
        &self,
        uow: &mut UnitOfWork,
        invoice_id: InvoiceId,
    ) -> Result<Invoice, CoreError> {
        let mut invoice = self.require_invoice(uow, invoice_id).await?;

        match invoice.status {
            InvoiceStatus::Draft => {}
            InvoiceStatus::Posted => {
                let allocated = self
                    .repo
                    .allocated_for_invoice(uow.conn(), invoice.id)
                    .await?;
                if !allocated.is_zero() {
                    return Err(CoreError::InvoiceClosed {
                        id: invoice.id,
                        status: invoice.status,
                    });
                }
                if let Some(entry_id) = invoice.journal_entry_id {
                    self.ledger.reverse_entry(uow, entry_id).await?;
                }
            }
            status => {
                return Err(CoreError::InvoiceClosed {
                    id: invoice.id,
                    status,
                });
            }
        }

        self.repo
            .update_invoice_status(uow.conn(), invoice.id, InvoiceStatus::Cancelled)
            .await?;
        invoice.status = InvoiceStatus::Cancelled;
        Ok(invoice)
    }

    /// Record a payment or receipt. Unless deferred, the settlement entry
    /// is posted immediately: receipts debit cash/bank and credit the
    /// receivable; payments debit the payable and credit cash/bank.
    pub async fn record_payment(
        &self,
        uow: &mut UnitOfWork,
        new: NewPayment,
    ) -> Result<Payment, CoreError> {
        if !new.amount.is_positive() {
            return Err(CoreError::Validation(
                "payment amount must be positive".into(),
            ));
        }

        let mut payment = Payment::new(
            new.direction,
            new.settlement_method,
            new.amount,
            new.received_at,
        );
        if let Some(ratio) = new.conversion_ratio {
            if ratio <= Decimal::ZERO {
                return Err(CoreError::Validation(
                    "conversion ratio must be positive".into(),
                ));
            }
            payment = payment.with_conversion_ratio(ratio);
        }
        if new.deferred {
            payment = payment.deferred();
        }

        self.repo.insert_payment(uow.conn(), &payment).await?;

        if !payment.deferred {
            let settlement_code = match payment.settlement_method {
                SettlementMethod::Cash => system_codes::CASH,
                SettlementMethod::BankTransfer | SettlementMethod::Card => system_codes::BANK,
            };
            let settlement_account = self.ledger.account_by_code(uow, settlement_code).await?;

            let (debit_line, credit_line) = match payment.direction {
                PaymentDirection::Receipt => {
                    let receivable = self
                        .ledger
                        .account_by_code(uow, system_codes::ACCOUNTS_RECEIVABLE)
                        .await?;
                    (
                        NewLine::debit(settlement_account.id, payment.amount),
                        NewLine::credit(receivable.id, payment.amount),
                    )
                }
                PaymentDirection::Payment => {
                    let payable = self
                        .ledger
                        .account_by_code(uow, system_codes::ACCOUNTS_PAYABLE)
                        .await?;
                    (
                        NewLine::debit(payable.id, payment.amount),
                        NewLine::credit(settlement_account.id, payment.amount),
                    )
                }
            };

            let entry = self
                .ledger
                .post_entry(
                    uow,
                    NewEntry {
                        entry_type: EntryType::PaymentPosting,
                        currency: payment.amount.currency,
                        description: Some(format!(
                            "{} via {}",
                            payment.direction.as_str(),
                            payment.settlement_method.as_str()
                        )),
                        settlement_method: Some(payment.settlement_method),
                        posted_at: payment.received_at,
                        lines: vec![debit_line, credit_line],
                    },
                )
                .await?;

            self.repo
                .link_payment_entry(uow.conn(), payment.id, entry.id)
                .await?;
            payment.journal_entry_id = Some(entry.id);
        }

        Ok(payment)
    }

    pub async fn get_invoice(&self, invoice_id: InvoiceId) -> Result<Invoice, CoreError> {
        let mut conn = self.repo.conn().await?;
        self.repo
            .get_invoice(&mut conn, invoice_id)
            .await?
            .ok_or(CoreError::InvoiceNotFound(invoice_id))
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
}
