use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::pool::PoolConnection;
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::domain::{
    Account, AccountId, AccountKind, AllocationId, Currency, Direction, EntryId, EntryLine,
    EntryType, Invoice, InvoiceAllocation, InvoiceDirection, InvoiceId, InvoiceStatus,
    JournalEntry, MoneyValue, Payment, PaymentDirection, PaymentId, PaymentTerms, ServiceDetails,
    ServiceId, ServiceRecord, ServiceStatus, ServiceStatusAudit, ServiceType, SettlementMethod,
};

use super::{MIGRATION_001_LEDGER, MIGRATION_002_WORKFLOWS};

/// One entry line with its owning entry's context, as returned by the
/// account statement view.
#[derive(Debug, Clone)]
pub struct StatementLine {
    pub entry_id: EntryId,
    pub entry_type: EntryType,
    pub description: Option<String>,
    pub posted_at: DateTime<Utc>,
    pub direction: Direction,
    pub amount: MoneyValue,
}

/// Repository for persisting and querying the core record sets.
///
/// Every record method takes an explicit `&mut SqliteConnection`, so the
/// same method works inside a coordinator transaction or on a plain pooled
/// connection for snapshot reads.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a SQLite database at the given path.
    /// Creates the database file if it doesn't exist.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(MIGRATION_001_LEDGER)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;

        sqlx::raw_sql(MIGRATION_002_WORKFLOWS)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 002")?;

        Ok(())
    }

    /// Initialize a new database (connect + migrate).
    pub async fn init(database_url: &str) -> Result<Self> {
        let repo = Self::connect(database_url).await?;
        repo.migrate().await?;
        Ok(repo)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Acquire a pooled connection for reads outside a unit of work.
    /// Such reads observe the last-committed state only.
    pub async fn conn(&self) -> Result<PoolConnection<Sqlite>> {
        self.pool
            .acquire()
            .await
            .context("Failed to acquire connection")
    }

    // ========================
    // Account operations
    // ========================

    pub async fn insert_account(
        &self,
        conn: &mut SqliteConnection,
        account: &Account,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO accounts (id, code, name, kind, is_system, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(account.id.to_string())
        .bind(&account.code)
        .bind(&account.name)
        .bind(account.kind.as_str())
        .bind(account.is_system)
        .bind(account.created_at.to_rfc3339())
        .execute(&mut *conn)
        .await
        .context("Failed to save account")?;
        Ok(())
    }

    pub async fn get_account(
        &self,
        conn: &mut SqliteConnection,
        id: AccountId,
    ) -> Result<Option<Account>> {
        let row = sqlx::query(
            "SELECT id, code, name, kind, is_system, created_at FROM accounts WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to fetch account")?;

        row.as_ref().map(Self::row_to_account).transpose()
    }

    pub async fn get_account_by_code(
        &self,
        conn: &mut SqliteConnection,
        code: &str,
    ) -> Result<Option<Account>> {
        let row = sqlx::query(
            "SELECT id, code, name, kind, is_system, created_at FROM accounts WHERE code = ?",
        )
        .bind(code)
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to fetch account by code")?;

        row.as_ref().map(Self::row_to_account).transpose()
    }

    pub async fn list_accounts(&self, conn: &mut SqliteConnection) -> Result<Vec<Account>> {
        let rows = sqlx::query(
            "SELECT id, code, name, kind, is_system, created_at FROM accounts ORDER BY code",
        )
        .fetch_all(&mut *conn)
        .await
        .context("Failed to list accounts")?;

        rows.iter().map(Self::row_to_account).collect()
    }

    pub async fn update_account_name(
        &self,
        conn: &mut SqliteConnection,
        id: AccountId,
        name: &str,
    ) -> Result<()> {
        sqlx::query("UPDATE accounts SET name = ? WHERE id = ?")
            .bind(name)
            .bind(id.to_string())
            .execute(&mut *conn)
            .await
            .context("Failed to rename account")?;
        Ok(())
    }

    pub async fn delete_account(&self, conn: &mut SqliteConnection, id: AccountId) -> Result<()> {
        sqlx::query("DELETE FROM account_balances WHERE account_id = ?")
            .bind(id.to_string())
            .execute(&mut *conn)
            .await
            .context("Failed to delete account balances")?;
        sqlx::query("DELETE FROM accounts WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *conn)
            .await
            .context("Failed to delete account")?;
        Ok(())
    }

    pub async fn count_lines_for_account(
        &self,
        conn: &mut SqliteConnection,
        id: AccountId,
    ) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM entry_lines WHERE account_id = ?")
            .bind(id.to_string())
            .fetch_one(&mut *conn)
            .await
            .context("Failed to count entry lines")?;
        Ok(row.get("count"))
    }

    // ========================
    // Balance snapshots
    // ========================

    /// Apply a signed delta to the cached (account, currency) snapshot.
    pub async fn bump_cached_balance(
        &self,
        conn: &mut SqliteConnection,
        account_id: AccountId,
        currency: Currency,
        delta: Decimal,
    ) -> Result<()> {
        let current = self
            .get_cached_balance(&mut *conn, account_id, currency)
            .await?;
        let next = current + delta;
        sqlx::query(
            r#"
            INSERT INTO account_balances (account_id, currency, balance)
            VALUES (?, ?, ?)
            ON CONFLICT (account_id, currency) DO UPDATE SET balance = excluded.balance
            "#,
        )
        .bind(account_id.to_string())
        .bind(currency.as_str())
        .bind(next.to_string())
        .execute(&mut *conn)
        .await
        .context("Failed to update cached balance")?;
        Ok(())
    }

    pub async fn get_cached_balance(
        &self,
        conn: &mut SqliteConnection,
        account_id: AccountId,
        currency: Currency,
    ) -> Result<Decimal> {
        let row = sqlx::query(
            "SELECT balance FROM account_balances WHERE account_id = ? AND currency = ?",
        )
        .bind(account_id.to_string())
        .bind(currency.as_str())
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to fetch cached balance")?;

        match row {
            Some(row) => parse_decimal(&row.get::<String, _>("balance")),
            None => Ok(Decimal::ZERO),
        }
    }

    /// Recompute the signed sum of posted lines on an account in one
    /// currency, optionally up to a point in time. Summation happens on
    /// exact decimals, not in SQL.
    pub async fn recompute_balance(
        &self,
        conn: &mut SqliteConnection,
        account_id: AccountId,
        currency: Currency,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<Decimal> {
        let mut query = String::from(
            r#"
            SELECT l.direction, l.amount
            FROM entry_lines l
            JOIN journal_entries e ON e.id = l.entry_id
            WHERE l.account_id = ? AND l.currency = ?
            "#,
        );
        if as_of.is_some() {
            query.push_str(" AND e.posted_at <= ?");
        }

        let mut sql_query = sqlx::query(&query)
            .bind(account_id.to_string())
            .bind(currency.as_str());
        let as_of_str = as_of.map(|dt| dt.to_rfc3339());
        if let Some(ref s) = as_of_str {
            sql_query = sql_query.bind(s);
        }

        let rows = sql_query
            .fetch_all(&mut *conn)
            .await
            .context("Failed to recompute balance")?;

        let mut total = Decimal::ZERO;
        for row in rows {
            let amount = parse_decimal(&row.get::<String, _>("amount"))?;
            match parse_direction(&row.get::<String, _>("direction"))? {
                Direction::Debit => total += amount,
                Direction::Credit => total -= amount,
            }
        }
        Ok(total)
    }

    // ========================
    // Journal operations
    // ========================

    /// Persist an entry and its lines. Caller is responsible for having
    /// validated the double-entry invariant first.
    pub async fn insert_entry(
        &self,
        conn: &mut SqliteConnection,
        entry: &JournalEntry,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO journal_entries (id, entry_type, description, currency, settlement_method, posted_at, reverses)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.id.to_string())
        .bind(entry.entry_type.as_str())
        .bind(&entry.description)
        .bind(entry.currency.as_str())
        .bind(entry.settlement_method.map(|m| m.as_str()))
        .bind(entry.posted_at.to_rfc3339())
        .bind(entry.reverses.map(|id| id.to_string()))
        .execute(&mut *conn)
        .await
        .context("Failed to save journal entry")?;

        for line in &entry.lines {
            sqlx::query(
                r#"
                INSERT INTO entry_lines (id, entry_id, account_id, direction, amount, currency, conversion_ratio, line_no)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(line.id.to_string())
            .bind(line.entry_id.to_string())
            .bind(line.account_id.to_string())
            .bind(line.direction.as_str())
            .bind(line.amount.amount.to_string())
            .bind(line.amount.currency.as_str())
            .bind(line.conversion_ratio.map(|r| r.to_string()))
            .bind(line.line_no)
            .execute(&mut *conn)
            .await
            .context("Failed to save entry line")?;
        }

        Ok(())
    }

    pub async fn get_entry(
        &self,
        conn: &mut SqliteConnection,
        id: EntryId,
    ) -> Result<Option<JournalEntry>> {
        let row = sqlx::query(
            r#"
            SELECT id, entry_type, description, currency, settlement_method, posted_at, reverses
            FROM journal_entries
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to fetch journal entry")?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut entry = Self::row_to_entry_header(&row)?;

        let line_rows = sqlx::query(
            r#"
            SELECT id, entry_id, account_id, direction, amount, currency, conversion_ratio, line_no
            FROM entry_lines
            WHERE entry_id = ?
            ORDER BY line_no
            "#,
        )
        .bind(id.to_string())
        .fetch_all(&mut *conn)
        .await
        .context("Failed to fetch entry lines")?;

        entry.lines = line_rows
            .iter()
            .map(Self::row_to_line)
            .collect::<Result<_>>()?;
        Ok(Some(entry))
    }

    /// Entry lines for one account with their entry context, ordered by
    /// posting time. Backs the account statement view.
    pub async fn statement_lines(
        &self,
        conn: &mut SqliteConnection,
        account_id: AccountId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<StatementLine>> {
        let rows = sqlx::query(
            r#"
            SELECT e.id as entry_id, e.entry_type, e.description, e.posted_at,
                   l.direction, l.amount, l.currency
            FROM entry_lines l
            JOIN journal_entries e ON e.id = l.entry_id
            WHERE l.account_id = ? AND e.posted_at >= ? AND e.posted_at <= ?
            ORDER BY e.posted_at, l.line_no
            "#,
        )
        .bind(account_id.to_string())
        .bind(from.to_rfc3339())
        .bind(to.to_rfc3339())
        .fetch_all(&mut *conn)
        .await
        .context("Failed to fetch statement lines")?;

        rows.iter()
            .map(|row| {
                Ok(StatementLine {
                    entry_id: parse_uuid(&row.get::<String, _>("entry_id"))?,
                    entry_type: parse_entry_type(&row.get::<String, _>("entry_type"))?,
                    description: row.get("description"),
                    posted_at: parse_datetime(&row.get::<String, _>("posted_at"))?,
                    direction: parse_direction(&row.get::<String, _>("direction"))?,
                    amount: MoneyValue::new(
                        parse_decimal(&row.get::<String, _>("amount"))?,
                        parse_currency(&row.get::<String, _>("currency"))?,
                    ),
                })
            })
            .collect()
    }

    // ========================
    // Invoice operations
    // ========================

    pub async fn insert_invoice(
        &self,
        conn: &mut SqliteConnection,
        invoice: &Invoice,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO invoices (id, direction, counterparty_id, currency, conversion_ratio, total, payment_terms, due_date, status, journal_entry_id, issued_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(invoice.id.to_string())
        .bind(invoice.direction.as_str())
        .bind(invoice.counterparty_id.to_string())
        .bind(invoice.currency.as_str())
        .bind(invoice.conversion_ratio.to_string())
        .bind(invoice.total.amount.to_string())
        .bind(invoice.payment_terms.as_str())
        .bind(invoice.due_date.map(|dt| dt.to_rfc3339()))
        .bind(invoice.status.as_str())
        .bind(invoice.journal_entry_id.map(|id| id.to_string()))
        .bind(invoice.issued_at.to_rfc3339())
        .execute(&mut *conn)
        .await
        .context("Failed to save invoice")?;
        Ok(())
    }

    pub async fn get_invoice(
        &self,
        conn: &mut SqliteConnection,
        id: InvoiceId,
    ) -> Result<Option<Invoice>> {
        let row = sqlx::query(
            r#"
            SELECT id, direction, counterparty_id, currency, conversion_ratio, total, payment_terms, due_date, status, journal_entry_id, issued_at
            FROM invoices
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to fetch invoice")?;

        row.as_ref().map(Self::row_to_invoice).transpose()
    }

    pub async fn update_invoice_status(
        &self,
        conn: &mut SqliteConnection,
        id: InvoiceId,
        status: InvoiceStatus,
    ) -> Result<()> {
        sqlx::query("UPDATE invoices SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id.to_string())
            .execute(&mut *conn)
            .await
            .context("Failed to update invoice status")?;
        Ok(())
    }

    pub async fn link_invoice_entry(
        &self,
        conn: &mut SqliteConnection,
        id: InvoiceId,
        entry_id: EntryId,
        status: InvoiceStatus,
    ) -> Result<()> {
        sqlx::query("UPDATE invoices SET journal_entry_id = ?, status = ? WHERE id = ?")
            .bind(entry_id.to_string())
            .bind(status.as_str())
            .bind(id.to_string())
            .execute(&mut *conn)
            .await
            .context("Failed to link invoice entry")?;
        Ok(())
    }

    pub async fn list_invoices(
        &self,
        conn: &mut SqliteConnection,
        direction: Option<InvoiceDirection>,
        status: Option<InvoiceStatus>,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<Invoice>> {
        let mut query = String::from(
            "SELECT id, direction, counterparty_id, currency, conversion_ratio, total, payment_terms, due_date, status, journal_entry_id, issued_at FROM invoices WHERE 1=1",
        );
        if direction.is_some() {
            query.push_str(" AND direction = ?");
        }
        if status.is_some() {
            query.push_str(" AND status = ?");
        }
        if from.is_some() {
            query.push_str(" AND issued_at >= ?");
        }
        if to.is_some() {
            query.push_str(" AND issued_at <= ?");
        }
        query.push_str(" ORDER BY issued_at");

        let from_str = from.map(|dt| dt.to_rfc3339());
        let to_str = to.map(|dt| dt.to_rfc3339());

        let mut sql_query = sqlx::query(&query);
        if let Some(d) = direction {
            sql_query = sql_query.bind(d.as_str());
        }
        if let Some(s) = status {
            sql_query = sql_query.bind(s.as_str());
        }
        if let Some(ref f) = from_str {
            sql_query = sql_query.bind(f);
        }
        if let Some(ref t) = to_str {
            sql_query = sql_query.bind(t);
        }

        let rows = sql_query
            .fetch_all(&mut *conn)
            .await
            .context("Failed to list invoices")?;

        rows.iter().map(Self::row_to_invoice).collect()
    }

    /// Posted or partially paid invoices whose due date has passed.
    pub async fn find_overdue(
        &self,
        conn: &mut SqliteConnection,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<Invoice>> {
        let rows = sqlx::query(
            r#"
            SELECT id, direction, counterparty_id, currency, conversion_ratio, total, payment_terms, due_date, status, journal_entry_id, issued_at
            FROM invoices
            WHERE status IN ('posted', 'partially_paid') AND due_date IS NOT NULL AND due_date < ?
            ORDER BY due_date
            "#,
        )
        .bind(as_of.to_rfc3339())
        .fetch_all(&mut *conn)
        .await
        .context("Failed to find overdue invoices")?;

        rows.iter().map(Self::row_to_invoice).collect()
    }

    // ========================
    // Payment operations
    // ========================

    pub async fn insert_payment(
        &self,
        conn: &mut SqliteConnection,
        payment: &Payment,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO payments (id, direction, settlement_method, amount, currency, conversion_ratio, deferred, journal_entry_id, received_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(payment.id.to_string())
        .bind(payment.direction.as_str())
        .bind(payment.settlement_method.as_str())
        .bind(payment.amount.amount.to_string())
        .bind(payment.amount.currency.as_str())
        .bind(payment.conversion_ratio.to_string())
        .bind(payment.deferred)
        .bind(payment.journal_entry_id.map(|id| id.to_string()))
        .bind(payment.received_at.to_rfc3339())
        .execute(&mut *conn)
        .await
        .context("Failed to save payment")?;
        Ok(())
    }

    pub async fn get_payment(
        &self,
        conn: &mut SqliteConnection,
        id: PaymentId,
    ) -> Result<Option<Payment>> {
        let row = sqlx::query(
            r#"
            SELECT id, direction, settlement_method, amount, currency, conversion_ratio, deferred, journal_entry_id, received_at
            FROM payments
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to fetch payment")?;

        row.as_ref().map(Self::row_to_payment).transpose()
    }

    pub async fn link_payment_entry(
        &self,
        conn: &mut SqliteConnection,
        id: PaymentId,
        entry_id: EntryId,
    ) -> Result<()> {
        sqlx::query("UPDATE payments SET journal_entry_id = ? WHERE id = ?")
            .bind(entry_id.to_string())
            .bind(id.to_string())
            .execute(&mut *conn)
            .await
            .context("Failed to link payment entry")?;
        Ok(())
    }

    // ========================
    // Allocation operations
    // ========================

    pub async fn insert_allocation(
        &self,
        conn: &mut SqliteConnection,
        allocation: &InvoiceAllocation,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO invoice_allocations (id, invoice_id, payment_id, amount, currency, conversion_ratio, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(allocation.id.to_string())
        .bind(allocation.invoice_id.to_string())
        .bind(allocation.payment_id.to_string())
        .bind(allocation.amount.amount.to_string())
        .bind(allocation.amount.currency.as_str())
        .bind(allocation.conversion_ratio.map(|r| r.to_string()))
        .bind(allocation.created_at.to_rfc3339())
        .execute(&mut *conn)
        .await
        .context("Failed to save allocation")?;
        Ok(())
    }

    pub async fn get_allocation(
        &self,
        conn: &mut SqliteConnection,
        id: AllocationId,
    ) -> Result<Option<InvoiceAllocation>> {
        let row = sqlx::query(
            r#"
            SELECT id, invoice_id, payment_id, amount, currency, conversion_ratio, created_at
            FROM invoice_allocations
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to fetch allocation")?;

        row.as_ref().map(Self::row_to_allocation).transpose()
    }

    pub async fn delete_allocation(
        &self,
        conn: &mut SqliteConnection,
        id: AllocationId,
    ) -> Result<()> {
        sqlx::query("DELETE FROM invoice_allocations WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *conn)
            .await
            .context("Failed to delete allocation")?;
        Ok(())
    }

    /// Sum of allocated amounts against an invoice, in the invoice currency.
    pub async fn allocated_for_invoice(
        &self,
        conn: &mut SqliteConnection,
        invoice_id: InvoiceId,
    ) -> Result<Decimal> {
        let rows = sqlx::query("SELECT amount FROM invoice_allocations WHERE invoice_id = ?")
            .bind(invoice_id.to_string())
            .fetch_all(&mut *conn)
            .await
            .context("Failed to sum invoice allocations")?;

        sum_amounts(&rows)
    }

    /// Sum of a payment's allocations, expressed in the payment currency.
    /// Cross-currency allocations contribute their amount divided by the
    /// recorded ratio at full precision; rounding happens only where the
    /// sum is rendered as money, never while accumulating.
    pub async fn allocated_for_payment(
        &self,
        conn: &mut SqliteConnection,
        payment_id: PaymentId,
        payment_currency: Currency,
    ) -> Result<Decimal> {
        let rows = sqlx::query(
            "SELECT amount, currency, conversion_ratio FROM invoice_allocations WHERE payment_id = ?",
        )
        .bind(payment_id.to_string())
        .fetch_all(&mut *conn)
        .await
        .context("Failed to sum payment allocations")?;

        let mut total = Decimal::ZERO;
        for row in rows {
            let amount = parse_decimal(&row.get::<String, _>("amount"))?;
            let currency = parse_currency(&row.get::<String, _>("currency"))?;
            if currency == payment_currency {
                total += amount;
            } else {
                let ratio_str: Option<String> = row.get("conversion_ratio");
                let ratio = ratio_str
                    .as_deref()
                    .map(parse_decimal)
                    .transpose()?
                    .context("Cross-currency allocation without ratio")?;
                total += amount / ratio;
            }
        }
        Ok(total)
    }

    // ========================
    // Service operations
    // ========================

    pub async fn insert_service(
        &self,
        conn: &mut SqliteConnection,
        service: &ServiceRecord,
    ) -> Result<()> {
        let details_json =
            serde_json::to_string(&service.details).context("Failed to encode service details")?;

        sqlx::query(
            r#"
            INSERT INTO services (id, service_type, customer_id, sale_invoice_id, purchase_invoice_id, cost, cost_currency, sale, sale_currency, status, details, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(service.id.to_string())
        .bind(service.service_type().as_str())
        .bind(service.customer_id.to_string())
        .bind(service.sale_invoice_id.map(|id| id.to_string()))
        .bind(service.purchase_invoice_id.map(|id| id.to_string()))
        .bind(service.cost.amount.to_string())
        .bind(service.cost.currency.as_str())
        .bind(service.sale.amount.to_string())
        .bind(service.sale.currency.as_str())
        .bind(service.status.as_str())
        .bind(&details_json)
        .bind(service.created_at.to_rfc3339())
        .execute(&mut *conn)
        .await
        .context("Failed to save service")?;
        Ok(())
    }

    pub async fn get_service(
        &self,
        conn: &mut SqliteConnection,
        id: ServiceId,
    ) -> Result<Option<ServiceRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, service_type, customer_id, sale_invoice_id, purchase_invoice_id, cost, cost_currency, sale, sale_currency, status, details, created_at
            FROM services
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to fetch service")?;

        row.as_ref().map(Self::row_to_service).transpose()
    }

    pub async fn update_service_status(
        &self,
        conn: &mut SqliteConnection,
        id: ServiceId,
        status: ServiceStatus,
    ) -> Result<()> {
        sqlx::query("UPDATE services SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id.to_string())
            .execute(&mut *conn)
            .await
            .context("Failed to update service status")?;
        Ok(())
    }

    pub async fn link_service_purchase_invoice(
        &self,
        conn: &mut SqliteConnection,
        id: ServiceId,
        invoice_id: InvoiceId,
    ) -> Result<()> {
        sqlx::query("UPDATE services SET purchase_invoice_id = ? WHERE id = ?")
            .bind(invoice_id.to_string())
            .bind(id.to_string())
            .execute(&mut *conn)
            .await
            .context("Failed to link purchase invoice")?;
        Ok(())
    }

    pub async fn link_service_sale_invoice(
        &self,
        conn: &mut SqliteConnection,
        id: ServiceId,
        invoice_id: InvoiceId,
    ) -> Result<()> {
        sqlx::query("UPDATE services SET sale_invoice_id = ? WHERE id = ?")
            .bind(invoice_id.to_string())
            .bind(id.to_string())
            .execute(&mut *conn)
            .await
            .context("Failed to link sale invoice")?;
        Ok(())
    }

    pub async fn list_services(
        &self,
        conn: &mut SqliteConnection,
        service_type: Option<ServiceType>,
        status: Option<ServiceStatus>,
    ) -> Result<Vec<ServiceRecord>> {
        let mut query = String::from(
            "SELECT id, service_type, customer_id, sale_invoice_id, purchase_invoice_id, cost, cost_currency, sale, sale_currency, status, details, created_at FROM services WHERE 1=1",
        );
        if service_type.is_some() {
            query.push_str(" AND service_type = ?");
        }
        if status.is_some() {
            query.push_str(" AND status = ?");
        }
        query.push_str(" ORDER BY created_at");

        let mut sql_query = sqlx::query(&query);
        if let Some(t) = service_type {
            sql_query = sql_query.bind(t.as_str());
        }
        if let Some(s) = status {
            sql_query = sql_query.bind(s.as_str());
        }

        let rows = sql_query
            .fetch_all(&mut *conn)
            .await
            .context("Failed to list services")?;

        rows.iter().map(Self::row_to_service).collect()
    }

    // ========================
    // Audit operations
    // ========================

    pub async fn insert_audit(
        &self,
        conn: &mut SqliteConnection,
        audit: &ServiceStatusAudit,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO service_status_audits (id, service_id, previous_status, new_status, changed_at, note)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(audit.id.to_string())
        .bind(audit.service_id.to_string())
        .bind(audit.previous_status.map(|s| s.as_str()))
        .bind(audit.new_status.as_str())
        .bind(audit.changed_at.to_rfc3339())
        .bind(&audit.note)
        .execute(&mut *conn)
        .await
        .context("Failed to save status audit")?;
        Ok(())
    }

    pub async fn list_audits_for_service(
        &self,
        conn: &mut SqliteConnection,
        service_id: ServiceId,
    ) -> Result<Vec<ServiceStatusAudit>> {
        let rows = sqlx::query(
            r#"
            SELECT id, service_id, previous_status, new_status, changed_at, note
            FROM service_status_audits
            WHERE service_id = ?
            ORDER BY changed_at, id
            "#,
        )
        .bind(service_id.to_string())
        .fetch_all(&mut *conn)
        .await
        .context("Failed to list status audits")?;

        rows.iter().map(Self::row_to_audit).collect()
    }

    // ========================
    // Row converters
    // ========================

    fn row_to_account(row: &sqlx::sqlite::SqliteRow) -> Result<Account> {
        let kind_str: String = row.get("kind");
        Ok(Account {
            id: parse_uuid(&row.get::<String, _>("id"))?,
            code: row.get("code"),
            name: row.get("name"),
            kind: AccountKind::from_str(&kind_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid account kind: {}", kind_str))?,
            is_system: row.get::<i32, _>("is_system") != 0,
            created_at: parse_datetime(&row.get::<String, _>("created_at"))?,
        })
    }

    fn row_to_entry_header(row: &sqlx::sqlite::SqliteRow) -> Result<JournalEntry> {
        let settlement_str: Option<String> = row.get("settlement_method");
        let reverses_str: Option<String> = row.get("reverses");
        Ok(JournalEntry {
            id: parse_uuid(&row.get::<String, _>("id"))?,
            entry_type: parse_entry_type(&row.get::<String, _>("entry_type"))?,
            description: row.get("description"),
            currency: parse_currency(&row.get::<String, _>("currency"))?,
            settlement_method: settlement_str
                .as_deref()
                .map(|s| {
                    SettlementMethod::from_str(s)
                        .ok_or_else(|| anyhow::anyhow!("Invalid settlement method: {}", s))
                })
                .transpose()?,
            posted_at: parse_datetime(&row.get::<String, _>("posted_at"))?,
            reverses: reverses_str.as_deref().map(parse_uuid).transpose()?,
            lines: Vec::new(),
        })
    }

    fn row_to_line(row: &sqlx::sqlite::SqliteRow) -> Result<EntryLine> {
        let ratio_str: Option<String> = row.get("conversion_ratio");
        Ok(EntryLine {
            id: parse_uuid(&row.get::<String, _>("id"))?,
            entry_id: parse_uuid(&row.get::<String, _>("entry_id"))?,
            account_id: parse_uuid(&row.get::<String, _>("account_id"))?,
            direction: parse_direction(&row.get::<String, _>("direction"))?,
            amount: MoneyValue::new(
                parse_decimal(&row.get::<String, _>("amount"))?,
                parse_currency(&row.get::<String, _>("currency"))?,
            ),
            conversion_ratio: ratio_str.as_deref().map(parse_decimal).transpose()?,
            line_no: row.get("line_no"),
        })
    }

    fn row_to_invoice(row: &sqlx::sqlite::SqliteRow) -> Result<Invoice> {
        let direction_str: String = row.get("direction");
        let terms_str: String = row.get("payment_terms");
        let status_str: String = row.get("status");
        let due_str: Option<String> = row.get("due_date");
        let entry_str: Option<String> = row.get("journal_entry_id");
        let currency = parse_currency(&row.get::<String, _>("currency"))?;

        Ok(Invoice {
            id: parse_uuid(&row.get::<String, _>("id"))?,
            direction: InvoiceDirection::from_str(&direction_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid invoice direction: {}", direction_str))?,
            counterparty_id: parse_uuid(&row.get::<String, _>("counterparty_id"))?,
            currency,
            conversion_ratio: parse_decimal(&row.get::<String, _>("conversion_ratio"))?,
            total: MoneyValue::new(parse_decimal(&row.get::<String, _>("total"))?, currency),
            payment_terms: PaymentTerms::from_str(&terms_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid payment terms: {}", terms_str))?,
            due_date: due_str.as_deref().map(parse_datetime).transpose()?,
            status: InvoiceStatus::from_str(&status_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid invoice status: {}", status_str))?,
            journal_entry_id: entry_str.as_deref().map(parse_uuid).transpose()?,
            issued_at: parse_datetime(&row.get::<String, _>("issued_at"))?,
        })
    }

    fn row_to_payment(row: &sqlx::sqlite::SqliteRow) -> Result<Payment> {
        let direction_str: String = row.get("direction");
        let settlement_str: String = row.get("settlement_method");
        let entry_str: Option<String> = row.get("journal_entry_id");

        Ok(Payment {
            id: parse_uuid(&row.get::<String, _>("id"))?,
            direction: PaymentDirection::from_str(&direction_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid payment direction: {}", direction_str))?,
            settlement_method: SettlementMethod::from_str(&settlement_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid settlement method: {}", settlement_str))?,
            amount: MoneyValue::new(
                parse_decimal(&row.get::<String, _>("amount"))?,
                parse_currency(&row.get::<String, _>("currency"))?,
            ),
            conversion_ratio: parse_decimal(&row.get::<String, _>("conversion_ratio"))?,
            deferred: row.get::<i32, _>("deferred") != 0,
            journal_entry_id: entry_str.as_deref().map(parse_uuid).transpose()?,
            received_at: parse_datetime(&row.get::<String, _>("received_at"))?,
        })
    }

    fn row_to_allocation(row: &sqlx::sqlite::SqliteRow) -> Result<InvoiceAllocation> {
        let ratio_str: Option<String> = row.get("conversion_ratio");
        Ok(InvoiceAllocation {
            id: parse_uuid(&row.get::<String, _>("id"))?,
            invoice_id: parse_uuid(&row.get::<String, _>("invoice_id"))?,
            payment_id: parse_uuid(&row.get::<String, _>("payment_id"))?,
            amount: MoneyValue::new(
                parse_decimal(&row.get::<String, _>("amount"))?,
                parse_currency(&row.get::<String, _>("currency"))?,
            ),
            conversion_ratio: ratio_str.as_deref().map(parse_decimal).transpose()?,
            created_at: parse_datetime(&row.get::<String, _>("created_at"))?,
        })
    }

    fn row_to_service(row: &sqlx::sqlite::SqliteRow) -> Result<ServiceRecord> {
        let status_str: String = row.get("status");
        let details_json: String = row.get("details");
        let sale_invoice_str: Option<String> = row.get("sale_invoice_id");
        let purchase_invoice_str: Option<String> = row.get("purchase_invoice_id");
        let details: ServiceDetails =
            serde_json::from_str(&details_json).context("Invalid service details")?;

        Ok(ServiceRecord {
            id: parse_uuid(&row.get::<String, _>("id"))?,
            customer_id: parse_uuid(&row.get::<String, _>("customer_id"))?,
            sale_invoice_id: sale_invoice_str.as_deref().map(parse_uuid).transpose()?,
            purchase_invoice_id: purchase_invoice_str
                .as_deref()
                .map(parse_uuid)
                .transpose()?,
            cost: MoneyValue::new(
                parse_decimal(&row.get::<String, _>("cost"))?,
                parse_currency(&row.get::<String, _>("cost_currency"))?,
            ),
            sale: MoneyValue::new(
                parse_decimal(&row.get::<String, _>("sale"))?,
                parse_currency(&row.get::<String, _>("sale_currency"))?,
            ),
            status: ServiceStatus::from_str(&status_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid service status: {}", status_str))?,
            details,
            created_at: parse_datetime(&row.get::<String, _>("created_at"))?,
        })
    }

    fn row_to_audit(row: &sqlx::sqlite::SqliteRow) -> Result<ServiceStatusAudit> {
        let previous_str: Option<String> = row.get("previous_status");
        let new_str: String = row.get("new_status");

        Ok(ServiceStatusAudit {
            id: parse_uuid(&row.get::<String, _>("id"))?,
            service_id: parse_uuid(&row.get::<String, _>("service_id"))?,
            previous_status: previous_str
                .as_deref()
                .map(|s| {
                    ServiceStatus::from_str(s)
                        .ok_or_else(|| anyhow::anyhow!("Invalid service status: {}", s))
                })
                .transpose()?,
            new_status: ServiceStatus::from_str(&new_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid service status: {}", new_str))?,
            changed_at: parse_datetime(&row.get::<String, _>("changed_at"))?,
            note: row.get("note"),
        })
    }
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).context("Invalid id")
}

fn parse_decimal(s: &str) -> Result<Decimal> {
    Decimal::from_str(s).with_context(|| format!("Invalid decimal: {}", s))
}

fn parse_currency(s: &str) -> Result<Currency> {
    Currency::from_str(s).map_err(|e| anyhow::anyhow!(e))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .context("Invalid timestamp")?
        .with_timezone(&Utc))
}

fn parse_direction(s: &str) -> Result<Direction> {
    Direction::from_str(s).ok_or_else(|| anyhow::anyhow!("Invalid direction: {}", s))
}

fn parse_entry_type(s: &str) -> Result<EntryType> {
    EntryType::from_str(s).ok_or_else(|| anyhow::anyhow!("Invalid entry type: {}", s))
}

fn sum_amounts(rows: &[sqlx::sqlite::SqliteRow]) -> Result<Decimal> {
    let mut total = Decimal::ZERO;
    for row in rows {
        total += parse_decimal(&row.get::<String, _>("amount"))?;
    }
    Ok(total)
}
