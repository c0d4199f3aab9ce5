use fundledger_auth::AuthzError;
use fundledger_core::{DomainError, ErrorKind};
use thiserror::Error;

use crate::store::StoreError;

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Error returned by every ledger service.
///
/// Constraint failures reported by the store are folded into their domain
/// counterparts; only backend and decoding failures stay as `Storage`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Unauthorized(#[from] AuthzError),

    #[error("storage failure: {0}")]
    Storage(StoreError),
}

impl LedgerError {
    /// The domain error, if this is one.
    pub fn domain(&self) -> Option<&DomainError> {
        match self {
            LedgerError::Domain(err) => Some(err),
            _ => None,
        }
    }

    /// `None` for storage failures, which have no caller-facing class.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            LedgerError::Domain(err) => Some(err.kind()),
            LedgerError::Unauthorized(_) => Some(ErrorKind::Forbidden),
            LedgerError::Storage(_) => None,
        }
    }
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        let domain = match err {
            StoreError::NotFound { entity, key } => DomainError::NotFound { entity, key },
            StoreError::DuplicateCode(code) => DomainError::DuplicateCode(code),
            StoreError::DuplicateNumber(number) => DomainError::DuplicateSequence(number),
            StoreError::DuplicateBudget => DomainError::BudgetAlreadyExists,
            StoreError::HasChildren(code) => DomainError::HasChildren(code),
            StoreError::HasTransactions(code) => DomainError::HasTransactions(code),
            StoreError::FiscalYearClosed(name) => DomainError::FiscalYearClosed(name),
            StoreError::Concurrency(msg) | StoreError::InUse(msg) => DomainError::Conflict(msg),
            other => return LedgerError::Storage(other),
        };
        LedgerError::Domain(domain)
    }
}
