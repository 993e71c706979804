use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{
    signed_amount, system_chart, validate_balanced, Account, AccountId, AccountKind, Currency,
    EntryId, EntryLine, EntryType, JournalEntry, MoneyValue, NewLine, SettlementMethod,
};
use crate::storage::Repository;

use super::{CoreError, UnitOfWork};

/// An entry as submitted for posting.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub entry_type: EntryType,
    pub currency: Currency,
    pub description: Option<String>,
    pub settlement_method: Option<SettlementMethod>,
    pub posted_at: DateTime<Utc>,
    pub lines: Vec<NewLine>,
}

/// Owns all mutation of accounts, journal entries and entry lines, and
/// keeps the cached per-currency balance snapshots in step with the lines
/// it posts. All writes happen inside the caller's unit of work.
#[derive(Clone)]
pub struct LedgerEngine {
    repo: Repository,
}

impl LedgerEngine {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    // ========================
    // Chart of accounts
    // ========================

    /// Create the protected system chart. Safe to call on every startup;
    /// codes that already exist are left alone.
    pub async fn seed_system_accounts(&self, uow: &mut UnitOfWork) -> Result<(), CoreError> {
        for account in system_chart() {
            if self
                .repo
                .get_account_by_code(uow.conn(), &account.code)
                .await?
                .is_none()
            {
                self.repo.insert_account(uow.conn(), &account).await?;
            }
        }
        Ok(())
    }

    pub async fn create_account(
        &self,
        uow: &mut UnitOfWork,
        code: &str,
        name: &str,
        kind: AccountKind,
    ) -> Result<Account, CoreError> {
        if code.trim().is_empty() || name.trim().is_empty() {
            return Err(CoreError::Validation(
                "account code and name must not be empty".into(),
            ));
        }
        if self
            .repo
            .get_account_by_code(uow.conn(), code)
            .await?
            .is_some()
        {
            return Err(CoreError::DuplicateCode(code.to_string()));
        }

        let account = Account::new(code, name, kind);
        self.repo.insert_account(uow.conn(), &account).await?;
        Ok(account)
    }

    pub async fn rename_account(
        &self,
        uow: &mut UnitOfWork,
        id: AccountId,
        name: &str,
    ) -> Result<Account, CoreError> {
        let mut account = self.require_account(uow, id).await?;
        if account.is_system {
            return Err(CoreError::ProtectedAccount(account.code));
        }
        self.repo.update_account_name(uow.conn(), id, name).await?;
        account.name = name.to_string();
        Ok(account)
    }

    pub async fn delete_account(&self, uow: &mut UnitOfWork, id: AccountId) -> Result<(), CoreError> {
        let account = self.require_account(uow, id).await?;
        if account.is_system {
            return Err(CoreError::ProtectedAccount(account.code));
        }
        if self.repo.count_lines_for_account(uow.conn(), id).await? > 0 {
            return Err(CoreError::AccountInUse(account.code));
        }
        self.repo.delete_account(uow.conn(), id).await?;
        Ok(())
    }

    pub async fn account_by_code(&self, uow: &mut UnitOfWork, code: &str) -> Result<Account, CoreError> {
        self.repo
            .get_account_by_code(uow.conn(), code)
            .await?
            .ok_or_else(|| CoreError::UnknownAccount(code.to_string()))
    }

    async fn require_account(
        &self,
        uow: &mut UnitOfWork,
        id: AccountId,
    ) -> Result<Account, CoreError> {
        self.repo
            .get_account(uow.conn(), id)
            .await?
            .ok_or_else(|| CoreError::UnknownAccount(id.to_string()))
    }

    // ========================
    // Posting
    // ========================

    /// Validate and persist a balanced journal entry, then bump the cached
    /// snapshot of every touched (account, currency) pair. Fails without
    /// any mutation when an account is unknown or the lines don't balance.
    pub async fn post_entry(
        &self,
        uow: &mut UnitOfWork,
        new: NewEntry,
    ) -> Result<JournalEntry, CoreError> {
        self.post_entry_internal(uow, new, None).await
    }

    /// Post a new entry with every line of `entry_id` flipped, same
    /// amounts and ratios. The original entry is never touched; the net
    /// effect of the pair on every account is zero.
    pub async fn reverse_entry(
        &self,
        uow: &mut UnitOfWork,
        entry_id: EntryId,
    ) -> Result<JournalEntry, CoreError> {
        let original = self
            .repo
            .get_entry(uow.conn(), entry_id)
            .await?
            .ok_or(CoreError::EntryNotFound(entry_id))?;

        let lines = original
            .lines
            .iter()
            .map(|line| NewLine {
                account_id: line.account_id,
                direction: line.direction.flipped(),
                amount: line.amount,
                conversion_ratio: line.conversion_ratio,
            })
            .collect();

        let new = NewEntry {
            entry_type: EntryType::Reversal,
            currency: original.currency,
            description: Some(format!(
                "Reversal of: {}",
                original.description.as_deref().unwrap_or("(no description)")
            )),
            settlement_method: original.settlement_method,
            posted_at: Utc::now(),
            lines,
        };
        self.post_entry_internal(uow, new, Some(entry_id)).await
    }

    async fn post_entry_internal(
        &self,
        uow: &mut UnitOfWork,
        new: NewEntry,
        reverses: Option<EntryId>,
    ) -> Result<JournalEntry, CoreError> {
        for line in &new.lines {
            if self
                .repo
                .get_account(uow.conn(), line.account_id)
                .await?
                .is_none()
            {
                return Err(CoreError::UnknownAccount(line.account_id.to_string()));
            }
        }

        validate_balanced(new.currency, &new.lines)?;

        let entry_id = Uuid::new_v4();
        let lines: Vec<EntryLine> = new
            .lines
            .iter()
            .enumerate()
            .map(|(i, line)| EntryLine {
                id: Uuid::new_v4(),
                entry_id,
                account_id: line.account_id,
                direction: line.direction,
                amount: line.amount,
                conversion_ratio: line.conversion_ratio,
                line_no: i as i64,
            })
            .collect();

        let entry = JournalEntry {
            id: entry_id,
            entry_type: new.entry_type,
            description: new.description,
            currency: new.currency,
            settlement_method: new.settlement_method,
            posted_at: new.posted_at,
            reverses,
            lines,
        };

        self.repo.insert_entry(uow.conn(), &entry).await?;

        for line in &entry.lines {
            let delta = signed_amount(line.direction, &line.amount);
            self.repo
                .bump_cached_balance(uow.conn(), line.account_id, delta.currency, delta.amount)
                .await?;
        }

        Ok(entry)
    }

    pub async fn get_entry(&self, entry_id: EntryId) -> Result<JournalEntry, CoreError> {
        let mut conn = self.repo.conn().await?;
        self.repo
            .get_entry(&mut conn, entry_id)
            .await?
            .ok_or(CoreError::EntryNotFound(entry_id))
    }

    // ========================
    // Balances
    // ========================

    /// Cached snapshot of an account's balance in one currency, against
    /// last-committed state.
    pub async fn account_balance(
        &self,
        account_id: AccountId,
        currency: Currency,
    ) -> Result<MoneyValue, CoreError> {
        let mut conn = self.repo.conn().await?;
        if self.repo.get_account(&mut conn, account_id).await?.is_none() {
            return Err(CoreError::UnknownAccount(account_id.to_string()));
        }
        let balance = self
            .repo
            .get_cached_balance(&mut conn, account_id, currency)
            .await?;
        Ok(MoneyValue::new(balance, currency))
    }

    /// Recompute the balance from entry lines up to `as_of`. For
    /// `as_of = now` this equals the cached snapshot.
    pub async fn account_balance_as_of(
        &self,
        account_id: AccountId,
        currency: Currency,
        as_of: DateTime<Utc>,
    ) -> Result<MoneyValue, CoreError> {
        let mut conn = self.repo.conn().await?;
        if self.repo.get_account(&mut conn, account_id).await?.is_none() {
            return Err(CoreError::UnknownAccount(account_id.to_string()));
        }
        let balance = self
            .repo
            .recompute_balance(&mut conn, account_id, currency, Some(as_of))
            .await?;
        Ok(MoneyValue::new(balance, currency))
    }
}
