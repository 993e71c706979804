use thiserror::Error;

use crate::domain::{
    AllocationId, BalanceError, Currency, EntryId, InvoiceId, InvoiceStatus, MoneyError,
    MoneyValue, PaymentId, ServiceId, TransitionError,
};

/// The five failure categories callers can dispatch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    InvariantViolation,
    NotFound,
    ConcurrencyConflict,
    Persistence,
}

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Currency mismatch: {left} vs {right}")]
    CurrencyMismatch { left: Currency, right: Currency },

    #[error("Entry does not balance: debits {debits} vs credits {credits}")]
    Unbalanced {
        debits: MoneyValue,
        credits: MoneyValue,
    },

    #[error("Unknown account: {0}")]
    UnknownAccount(String),

    #[error("Account code already exists: {0}")]
    DuplicateCode(String),

    #[error("Account {0} is a system account and cannot be changed")]
    ProtectedAccount(String),

    #[error("Account {0} has posted entry lines and cannot be deleted")]
    AccountInUse(String),

    #[error("Journal entry not found: {0}")]
    EntryNotFound(EntryId),

    #[error("Invoice not found: {0}")]
    InvoiceNotFound(InvoiceId),

    #[error("Payment not found: {0}")]
    PaymentNotFound(PaymentId),

    #[error("Allocation not found: {0}")]
    AllocationNotFound(AllocationId),

    #[error("Service not found: {0}")]
    ServiceNotFound(ServiceId),

    #[error("Allocation of {requested} exceeds available {available}")]
    OverAllocation {
        requested: MoneyValue,
        available: MoneyValue,
    },

    #[error("Invoice {id} does not accept this operation in status {status:?}")]
    InvoiceClosed {
        id: InvoiceId,
        status: InvoiceStatus,
    },

    #[error("{0}")]
    InvalidTransition(TransitionError),

    #[error("Could not acquire the write section, another operation is in flight")]
    ConcurrencyConflict,

    #[error("Storage error: {0}")]
    Persistence(#[from] anyhow::Error),
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Validation(_) | CoreError::CurrencyMismatch { .. } => ErrorKind::Validation,
            CoreError::Unbalanced { .. }
            | CoreError::DuplicateCode(_)
            | CoreError::ProtectedAccount(_)
            | CoreError::AccountInUse(_)
            | CoreError::OverAllocation { .. }
            | CoreError::InvoiceClosed { .. }
            | CoreError::InvalidTransition(_) => ErrorKind::InvariantViolation,
            CoreError::UnknownAccount(_)
            | CoreError::EntryNotFound(_)
            | CoreError::InvoiceNotFound(_)
            | CoreError::PaymentNotFound(_)
            | CoreError::AllocationNotFound(_)
            | CoreError::ServiceNotFound(_) => ErrorKind::NotFound,
            CoreError::ConcurrencyConflict => ErrorKind::ConcurrencyConflict,
            CoreError::Persistence(_) => ErrorKind::Persistence,
        }
    }
}

impl From<MoneyError> for CoreError {
    fn from(err: MoneyError) -> Self {
        match err {
            MoneyError::CurrencyMismatch { left, right } => {
                CoreError::CurrencyMismatch { left, right }
            }
            MoneyError::UnknownCurrency(s) => CoreError::Validation(format!("unknown currency: {}", s)),
        }
    }
}

impl From<BalanceError> for CoreError {
    fn from(err: BalanceError) -> Self {
        match err {
            BalanceError::Unbalanced { debits, credits } => {
                CoreError::Unbalanced { debits, credits }
            }
            other => CoreError::Validation(other.to_string()),
        }
    }
}

impl From<TransitionError> for CoreError {
    fn from(err: TransitionError) -> Self {
        CoreError::InvalidTransition(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ServiceEvent, ServiceStatus};
    use uuid::Uuid;

    #[test]
    fn test_kind_classification() {
        assert_eq!(
            CoreError::Validation("x".into()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            CoreError::ProtectedAccount("1000".into()).kind(),
            ErrorKind::InvariantViolation
        );
        assert_eq!(
            CoreError::InvoiceNotFound(Uuid::new_v4()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            CoreError::ConcurrencyConflict.kind(),
            ErrorKind::ConcurrencyConflict
        );
    }

    #[test]
    fn test_transition_error_maps_to_invariant_violation() {
        let err: CoreError = TransitionError {
            current: ServiceStatus::Delivered,
            event: ServiceEvent::Cancel,
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::InvariantViolation);
    }
}
