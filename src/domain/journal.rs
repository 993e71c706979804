use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{AccountId, Currency, MoneyValue};

pub type EntryId = Uuid;
pub type LineId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    InvoicePosting,
    PaymentPosting,
    Adjustment,
    Reversal,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::InvoicePosting => "invoice_posting",
            EntryType::PaymentPosting => "payment_posting",
            EntryType::Adjustment => "adjustment",
            EntryType::Reversal => "reversal",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "invoice_posting" => Some(EntryType::InvoicePosting),
            "payment_posting" => Some(EntryType::PaymentPosting),
            "adjustment" => Some(EntryType::Adjustment),
            "reversal" => Some(EntryType::Reversal),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Debit,
    Credit,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Debit => "debit",
            Direction::Credit => "credit",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "debit" => Some(Direction::Debit),
            "credit" => Some(Direction::Credit),
            _ => None,
        }
    }

    pub fn flipped(&self) -> Direction {
        match self {
            Direction::Debit => Direction::Credit,
            Direction::Credit => Direction::Debit,
        }
    }
}

/// How a payment was settled. Carried on payment-posting entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementMethod {
    Cash,
    BankTransfer,
    Card,
}

impl SettlementMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementMethod::Cash => "cash",
            SettlementMethod::BankTransfer => "bank_transfer",
            SettlementMethod::Card => "card",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "cash" => Some(SettlementMethod::Cash),
            "bank_transfer" => Some(SettlementMethod::BankTransfer),
            "card" => Some(SettlementMethod::Card),
            _ => None,
        }
    }
}

/// One account-amount-direction record within a journal entry.
/// Immutable once the owning entry is committed; corrections are made by
/// posting a reversing entry, never by mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryLine {
    pub id: LineId,
    pub entry_id: EntryId,
    pub account_id: AccountId,
    pub direction: Direction,
    pub amount: MoneyValue,
    /// Ratio into the entry currency when the line currency differs.
    pub conversion_ratio: Option<Decimal>,
    /// Position within the owning entry.
    pub line_no: i64,
}

/// An atomic, balanced set of entry lines representing one transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: EntryId,
    pub entry_type: EntryType,
    pub description: Option<String>,
    pub currency: Currency,
    pub settlement_method: Option<SettlementMethod>,
    pub posted_at: DateTime<Utc>,
    /// If this entry is a reversal, points to the original entry.
    pub reverses: Option<EntryId>,
    pub lines: Vec<EntryLine>,
}

/// A line as submitted for posting, before ids are assigned.
#[derive(Debug, Clone)]
pub struct NewLine {
    pub account_id: AccountId,
    pub direction: Direction,
    pub amount: MoneyValue,
    pub conversion_ratio: Option<Decimal>,
}

impl NewLine {
    pub fn debit(account_id: AccountId, amount: MoneyValue) -> Self {
        Self {
            account_id,
            direction: Direction::Debit,
            amount,
            conversion_ratio: None,
        }
    }

    pub fn credit(account_id: AccountId, amount: MoneyValue) -> Self {
        Self {
            account_id,
            direction: Direction::Credit,
            amount,
            conversion_ratio: None,
        }
    }

    pub fn with_ratio(mut self, ratio: Decimal) -> Self {
        self.conversion_ratio = Some(ratio);
        self
    }
}

/// Express a line in the entry currency, applying its ratio when the
/// currencies differ. A differing currency without a ratio is rejected.
pub fn line_in_entry_currency(
    line: &NewLine,
    entry_currency: Currency,
) -> Result<MoneyValue, BalanceError> {
    if line.amount.currency == entry_currency {
        return Ok(line.amount);
    }
    match line.conversion_ratio {
        Some(ratio) => Ok(line.amount.convert(entry_currency, ratio)),
        None => Err(BalanceError::MissingRatio {
            line_currency: line.amount.currency,
            entry_currency,
        }),
    }
}

/// Validate the double-entry invariant for a proposed set of lines:
/// at least two lines, positive amounts, and sum(debits) == sum(credits)
/// in the entry currency. Equality is exact at fixed-point precision.
pub fn validate_balanced(entry_currency: Currency, lines: &[NewLine]) -> Result<(), BalanceError> {
    if lines.len() < 2 {
        return Err(BalanceError::TooFewLines(lines.len()));
    }

    let mut debits = Decimal::ZERO;
    let mut credits = Decimal::ZERO;

    for line in lines {
        if !line.amount.is_positive() {
            return Err(BalanceError::NonPositiveAmount(line.amount));
        }
        let converted = line_in_entry_currency(line, entry_currency)?;
        match line.direction {
            Direction::Debit => debits += converted.amount,
            Direction::Credit => credits += converted.amount,
        }
    }

    if debits != credits {
        return Err(BalanceError::Unbalanced {
            debits: MoneyValue::new(debits, entry_currency),
            credits: MoneyValue::new(credits, entry_currency),
        });
    }

    Ok(())
}

/// Signed contribution of a line to its account's balance in the line's
/// own currency: debits increase, credits decrease.
pub fn signed_amount(direction: Direction, amount: &MoneyValue) -> MoneyValue {
    match direction {
        Direction::Debit => *amount,
        Direction::Credit => amount.neg(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BalanceError {
    TooFewLines(usize),
    NonPositiveAmount(MoneyValue),
    MissingRatio {
        line_currency: Currency,
        entry_currency: Currency,
    },
    Unbalanced {
        debits: MoneyValue,
        credits: MoneyValue,
    },
}

impl std::fmt::Display for BalanceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BalanceError::TooFewLines(n) => {
                write!(f, "a journal entry needs at least 2 lines, got {}", n)
            }
            BalanceError::NonPositiveAmount(amount) => {
                write!(f, "line amounts must be positive, got {}", amount)
            }
            BalanceError::MissingRatio {
                line_currency,
                entry_currency,
            } => write!(
                f,
                "line in {} needs a conversion ratio into entry currency {}",
                line_currency, entry_currency
            ),
            BalanceError::Unbalanced { debits, credits } => {
                write!(f, "entry does not balance: debits {} vs credits {}", debits, credits)
            }
        }
    }
}

impl std::error::Error for BalanceError {}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sar(amount: Decimal) -> MoneyValue {
        MoneyValue::new(amount, Currency::Sar)
    }

    #[test]
    fn test_balanced_entry_passes() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let lines = vec![
            NewLine::debit(a, sar(dec!(100))),
            NewLine::credit(b, sar(dec!(100))),
        ];
        assert!(validate_balanced(Currency::Sar, &lines).is_ok());
    }

    #[test]
    fn test_unbalanced_entry_fails() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let lines = vec![
            NewLine::debit(a, sar(dec!(100))),
            NewLine::credit(b, sar(dec!(99.99))),
        ];
        assert!(matches!(
            validate_balanced(Currency::Sar, &lines),
            Err(BalanceError::Unbalanced { .. })
        ));
    }

    #[test]
    fn test_single_line_rejected() {
        let lines = vec![NewLine::debit(Uuid::new_v4(), sar(dec!(100)))];
        assert_eq!(
            validate_balanced(Currency::Sar, &lines),
            Err(BalanceError::TooFewLines(1))
        );
    }

    #[test]
    fn test_non_positive_amount_rejected() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let lines = vec![
            NewLine::debit(a, sar(dec!(0))),
            NewLine::credit(b, sar(dec!(0))),
        ];
        assert!(matches!(
            validate_balanced(Currency::Sar, &lines),
            Err(BalanceError::NonPositiveAmount(_))
        ));
    }

    #[test]
    fn test_cross_currency_line_needs_ratio() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let lines = vec![
            NewLine::debit(a, MoneyValue::new(dec!(100), Currency::Usd)),
            NewLine::credit(b, sar(dec!(375))),
        ];
        assert!(matches!(
            validate_balanced(Currency::Sar, &lines),
            Err(BalanceError::MissingRatio { .. })
        ));
    }

    #[test]
    fn test_cross_currency_balances_after_conversion() {
        // 100 USD at 3.75 = 375 SAR against a 375 SAR credit
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let lines = vec![
            NewLine::debit(a, MoneyValue::new(dec!(100), Currency::Usd)).with_ratio(dec!(3.75)),
            NewLine::credit(b, sar(dec!(375))),
        ];
        assert!(validate_balanced(Currency::Sar, &lines).is_ok());
    }

    #[test]
    fn test_multi_line_split_balances() {
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let lines = vec![
            NewLine::debit(a, sar(dec!(70))),
            NewLine::debit(b, sar(dec!(30))),
            NewLine::credit(c, sar(dec!(100))),
        ];
        assert!(validate_balanced(Currency::Sar, &lines).is_ok());
    }

    #[test]
    fn test_signed_amount() {
        let m = sar(dec!(50));
        assert_eq!(signed_amount(Direction::Debit, &m).amount, dec!(50));
        assert_eq!(signed_amount(Direction::Credit, &m).amount, dec!(-50));
    }

    #[test]
    fn test_direction_flip() {
        assert_eq!(Direction::Debit.flipped(), Direction::Credit);
        assert_eq!(Direction::Credit.flipped(), Direction::Debit);
    }
}
