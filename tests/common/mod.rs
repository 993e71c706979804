// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use tempfile::TempDir;

use qayd::application::{
    InvoicePaymentAllocator, InvoiceWorkflow, LedgerEngine, QueryViews, ServiceLifecycle,
    TransactionCoordinator,
};
use qayd::domain::{
    Currency, InvoiceDirection, MemorySink, MoneyValue, OtherDetails, PaymentTerms, ServiceDetails,
};
use qayd::Repository;

/// Everything a test needs, wired against one tempfile-backed database.
pub struct TestCore {
    pub repo: Repository,
    pub coordinator: TransactionCoordinator,
    pub ledger: LedgerEngine,
    pub invoices: InvoiceWorkflow,
    pub allocator: InvoicePaymentAllocator,
    pub lifecycle: ServiceLifecycle,
    pub views: QueryViews,
    pub sink: Arc<MemorySink>,
}

/// Create a fresh core with the system chart seeded.
pub async fn test_core() -> Result<(TestCore, TempDir)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    let db_url = format!("sqlite:{}?mode=rwc", db_path.to_str().unwrap());

    let repo = Repository::init(&db_url).await?;
    let sink = Arc::new(MemorySink::new());
    let coordinator = TransactionCoordinator::with_sink(&repo, sink.clone());
    let ledger = LedgerEngine::new(repo.clone());
    let invoices = InvoiceWorkflow::new(repo.clone(), ledger.clone());
    let allocator = InvoicePaymentAllocator::new(repo.clone());
    let lifecycle = ServiceLifecycle::new(repo.clone());
    let views = QueryViews::new(repo.clone());

    let mut uow = coordinator.begin().await?;
    ledger.seed_system_accounts(&mut uow).await?;
    uow.commit().await?;

    Ok((
        TestCore {
            repo,
            coordinator,
            ledger,
            invoices,
            allocator,
            lifecycle,
            views,
            sink,
        },
        temp_dir,
    ))
}

/// Helper to parse a date string into DateTime<Utc>
pub fn parse_date(date_str: &str) -> DateTime<Utc> {
    NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        .and_utc()
}

pub fn sar(amount: Decimal) -> MoneyValue {
    MoneyValue::new(amount, Currency::Sar)
}

pub fn yer(amount: Decimal) -> MoneyValue {
    MoneyValue::new(amount, Currency::Yer)
}

pub fn usd(amount: Decimal) -> MoneyValue {
    MoneyValue::new(amount, Currency::Usd)
}

/// Look up a seeded account id by code, against committed state.
pub async fn account_id(core: &TestCore, code: &str) -> Result<uuid::Uuid> {
    let mut conn = core.repo.conn().await?;
    let account = core
        .repo
        .get_account_by_code(&mut conn, code)
        .await?
        .unwrap_or_else(|| panic!("account {} not seeded", code));
    Ok(account.id)
}

/// A draft sale invoice in SAR with the given total.
pub fn draft_sale(total: MoneyValue) -> qayd::application::NewInvoice {
    qayd::application::NewInvoice {
        direction: InvoiceDirection::Sale,
        counterparty_id: uuid::Uuid::new_v4(),
        total,
        payment_terms: PaymentTerms::Deferred,
        due_date: None,
        conversion_ratio: None,
        issued_at: Utc::now(),
    }
}

/// A generic "other" service detail payload.
pub fn other_details(summary: &str) -> ServiceDetails {
    ServiceDetails::Other(OtherDetails {
        summary: summary.to_string(),
    })
}
