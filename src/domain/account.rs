use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type AccountId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    /// Cash, bank, receivables - resources the business owns
    Asset,
    /// Payables, loans - obligations the business owes
    Liability,
    /// Owner capital and retained results
    Equity,
    /// Sales of services
    Revenue,
    /// Cost of purchased services and operating costs
    Expense,
}

impl AccountKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountKind::Asset => "asset",
            AccountKind::Liability => "liability",
            AccountKind::Equity => "equity",
            AccountKind::Revenue => "revenue",
            AccountKind::Expense => "expense",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "asset" => Some(AccountKind::Asset),
            "liability" => Some(AccountKind::Liability),
            "equity" => Some(AccountKind::Equity),
            "revenue" => Some(AccountKind::Revenue),
            "expense" => Some(AccountKind::Expense),
            _ => None,
        }
    }
}

impl std::fmt::Display for AccountKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    /// Human-facing code, unique across the chart (e.g. "1100").
    pub code: String,
    pub name: String,
    pub kind: AccountKind,
    /// Seeded at initialization; protected from deletion and re-coding.
    pub is_system: bool,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn new(code: impl Into<String>, name: impl Into<String>, kind: AccountKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            code: code.into(),
            name: name.into(),
            kind,
            is_system: false,
            created_at: Utc::now(),
        }
    }

    pub fn system(code: impl Into<String>, name: impl Into<String>, kind: AccountKind) -> Self {
        let mut account = Self::new(code, name, kind);
        account.is_system = true;
        account
    }
}

/// Codes of the protected accounts seeded at initialization.
pub mod system_codes {
    pub const CASH: &str = "1000";
    pub const BANK: &str = "1010";
    pub const ACCOUNTS_RECEIVABLE: &str = "1100";
    pub const ACCOUNTS_PAYABLE: &str = "2100";
    pub const SALES_REVENUE: &str = "4100";
    pub const SERVICE_COST: &str = "5100";
}

/// The seed chart created once during initialization.
pub fn system_chart() -> Vec<Account> {
    vec![
        Account::system(system_codes::CASH, "Cash", AccountKind::Asset),
        Account::system(system_codes::BANK, "Bank", AccountKind::Asset),
        Account::system(
            system_codes::ACCOUNTS_RECEIVABLE,
            "Accounts Receivable",
            AccountKind::Asset,
        ),
        Account::system(
            system_codes::ACCOUNTS_PAYABLE,
            "Accounts Payable",
            AccountKind::Liability,
        ),
        Account::system(
            system_codes::SALES_REVENUE,
            "Sales Revenue",
            AccountKind::Revenue,
        ),
        Account::system(
            system_codes::SERVICE_COST,
            "Cost of Services",
            AccountKind::Expense,
        ),
    ]
}
