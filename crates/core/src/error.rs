//! Domain error model for the ledger.

use thiserror::Error;

use crate::money::Money;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Coarse classification of a [`DomainError`], used by callers that map
/// failures onto transport status codes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Invalid,
    Forbidden,
    Conflict,
}

/// Deterministic business failure.
///
/// Every variant is recoverable and reported back to the caller. Storage
/// failures are not represented here; they live with the store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Referenced account/journal/budget/fiscal year does not exist.
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("journal is unbalanced (debit: {debit}, credit: {credit})")]
    Unbalanced { debit: Money, credit: Money },

    /// Both or neither of debit/credit set, negative amount, or too few lines.
    #[error("invalid journal line: {0}")]
    InvalidLine(String),

    /// Line references a header or inactive account.
    #[error("account {0} does not accept postings")]
    AccountNotPostable(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Maker and checker are the same user.
    #[error("journal creator cannot review their own journal")]
    SelfReview,

    #[error("cannot {operation} a journal in status {status}")]
    InvalidTransition {
        operation: &'static str,
        status: String,
    },

    #[error("account {0} has child accounts")]
    HasChildren(String),

    #[error("account {0} is referenced by journal lines")]
    HasTransactions(String),

    #[error("an active budget already exists for this account, period and scope")]
    BudgetAlreadyExists,

    #[error("account {code} has category {category}; budgets require an expense account")]
    InvalidAccountCategory { code: String, category: String },

    #[error("fiscal year {0} is closed")]
    FiscalYearClosed(String),

    /// Journal number collided with a concurrently allocated one.
    #[error("journal number {0} is already taken")]
    DuplicateSequence(String),

    #[error("account code {0} already exists")]
    DuplicateCode(String),

    #[error("validation failed: {0}")]
    Validation(String),

    /// Stale version or other optimistic concurrency failure.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        Self::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    pub fn invalid_line(msg: impl Into<String>) -> Self {
        Self::InvalidLine(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn invalid_transition(operation: &'static str, status: impl ToString) -> Self {
        Self::InvalidTransition {
            operation,
            status: status.to_string(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Forbidden(_) | Self::SelfReview => ErrorKind::Forbidden,
            Self::InvalidTransition { .. }
            | Self::HasChildren(_)
            | Self::HasTransactions(_)
            | Self::BudgetAlreadyExists
            | Self::FiscalYearClosed(_)
            | Self::DuplicateSequence(_)
            | Self::DuplicateCode(_)
            | Self::Conflict(_) => ErrorKind::Conflict,
            Self::Unbalanced { .. }
            | Self::InvalidLine(_)
            | Self::AccountNotPostable(_)
            | Self::InvalidAccountCategory { .. }
            | Self::Validation(_) => ErrorKind::Invalid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_review_is_a_forbidden_failure() {
        assert_eq!(DomainError::SelfReview.kind(), ErrorKind::Forbidden);
        assert_eq!(
            DomainError::forbidden("not the creator").kind(),
            ErrorKind::Forbidden
        );
    }

    #[test]
    fn messages_carry_context() {
        let err = DomainError::Unbalanced {
            debit: Money::new(500_000),
            credit: Money::new(400_000),
        };
        assert_eq!(
            err.to_string(),
            "journal is unbalanced (debit: 500000, credit: 400000)"
        );

        let err = DomainError::invalid_transition("post", "draft");
        assert_eq!(err.to_string(), "cannot post a journal in status draft");
    }
}
