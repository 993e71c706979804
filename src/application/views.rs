use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{
    Account, AccountId, CustomerId, Invoice, InvoiceDirection, InvoiceId, InvoiceStatus, MoneyValue,
    ServiceId, ServiceStatus, ServiceType,
};
use crate::storage::{Repository, StatementLine};

use super::CoreError;

/// One invoice with its allocation arithmetic, for sales/purchase reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceSummary {
    pub invoice: Invoice,
    pub allocated: MoneyValue,
    pub remaining: MoneyValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSummary {
    pub id: ServiceId,
    pub service_type: ServiceType,
    pub customer_id: CustomerId,
    pub status: ServiceStatus,
    pub cost: MoneyValue,
    pub sale: MoneyValue,
    pub sale_invoice_id: Option<InvoiceId>,
    pub purchase_invoice_id: Option<InvoiceId>,
    pub created_at: DateTime<Utc>,
}

/// Read-only projections over committed state, for reporting consumers.
/// These never open a unit of work, so long-running report reads don't
/// block writers.
#[derive(Clone)]
pub struct QueryViews {
    repo: Repository,
}

impl QueryViews {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    /// The full chart of accounts, ordered by code.
    pub async fn chart_of_accounts(&self) -> Result<Vec<Account>, CoreError> {
        let mut conn = self.repo.conn().await?;
        Ok(self.repo.list_accounts(&mut conn).await?)
    }

    /// Entry lines on an account with their entry context, ordered by
    /// posting time.
    pub async fn account_statement(
        &self,
        account_id: AccountId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<StatementLine>, CoreError> {
        let mut conn = self.repo.conn().await?;
        if self.repo.get_account(&mut conn, account_id).await?.is_none() {
            return Err(CoreError::UnknownAccount(account_id.to_string()));
        }
        Ok(self
            .repo
            .statement_lines(&mut conn, account_id, from, to)
            .await?)
    }

    /// Invoices in a period with allocated and remaining amounts.
    pub async fn sales_view(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        direction: Option<InvoiceDirection>,
        status: Option<InvoiceStatus>,
    ) -> Result<Vec<InvoiceSummary>, CoreError> {
        let mut conn = self.repo.conn().await?;
        let invoices = self
            .repo
            .list_invoices(&mut conn, direction, status, Some(from), Some(to))
            .await?;

        let mut summaries = Vec::with_capacity(invoices.len());
        for invoice in invoices {
            let allocated = MoneyValue::new(
                self.repo.allocated_for_invoice(&mut conn, invoice.id).await?,
                invoice.currency,
            );
            let remaining = invoice.remaining(&allocated)?;
            summaries.push(InvoiceSummary {
                invoice,
                allocated,
                remaining,
            });
        }
        Ok(summaries)
    }

    pub async fn services_by_status(
        &self,
        service_type: Option<ServiceType>,
        status: Option<ServiceStatus>,
    ) -> Result<Vec<ServiceSummary>, CoreError> {
        let mut conn = self.repo.conn().await?;
        let services = self.repo.list_services(&mut conn, service_type, status).await?;

        Ok(services
            .into_iter()
            .map(|s| ServiceSummary {
                id: s.id,
                service_type: s.service_type(),
                customer_id: s.customer_id,
                status: s.status,
                cost: s.cost,
                sale: s.sale,
                sale_invoice_id: s.sale_invoice_id,
                purchase_invoice_id: s.purchase_invoice_id,
                created_at: s.created_at,
            })
            .collect())
    }
}
