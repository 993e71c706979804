mod repository;

pub use repository::*;

/// SQL migration for the chart of accounts and journal
pub const MIGRATION_001_LEDGER: &str = include_str!("migrations/001_ledger.sql");

/// SQL migration for invoices, payments and services
pub const MIGRATION_002_WORKFLOWS: &str = include_str!("migrations/002_workflows.sql");
