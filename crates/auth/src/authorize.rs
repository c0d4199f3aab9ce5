use thiserror::Error;

use crate::{Permission, Principal};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: missing permission '{0}'")]
    Forbidden(String),
}

/// Check a principal against one required permission.
///
/// Pure policy: no IO, no business rules. Segregation of duties and status
/// gating are enforced by the ledger itself after this passes.
pub fn authorize(principal: &Principal, required: &Permission) -> Result<(), AuthzError> {
    if principal.has(required) {
        Ok(())
    } else {
        Err(AuthzError::Forbidden(required.as_str().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fundledger_core::UserId;

    #[test]
    fn wildcard_grants_everything() {
        let principal = Principal::superuser(UserId::new());
        assert!(authorize(&principal, &Permission::JOURNAL_UNPOST).is_ok());
    }

    #[test]
    fn posting_does_not_imply_unposting() {
        let principal = Principal::new(UserId::new(), [Permission::JOURNAL_POST]);
        assert!(authorize(&principal, &Permission::JOURNAL_POST).is_ok());
        assert_eq!(
            authorize(&principal, &Permission::JOURNAL_UNPOST),
            Err(AuthzError::Forbidden("ledger.journal.unpost".to_string()))
        );
    }

    #[test]
    fn permissions_serialize_as_plain_strings() {
        let principal = Principal::new(UserId::new(), [Permission::JOURNAL_REVIEW]);
        let json = serde_json::to_value(&principal).unwrap();
        assert_eq!(json["permissions"][0], "ledger.journal.review");
    }
}
