use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Permission identifier (e.g. "ledger.journal.post").
///
/// `"*"` grants every permission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub const WILDCARD: Permission = Permission(Cow::Borrowed("*"));

    pub const ACCOUNTS_MANAGE: Permission = Permission(Cow::Borrowed("ledger.accounts.manage"));
    pub const JOURNAL_WRITE: Permission = Permission(Cow::Borrowed("ledger.journal.write"));
    pub const JOURNAL_REVIEW: Permission = Permission(Cow::Borrowed("ledger.journal.review"));
    pub const JOURNAL_POST: Permission = Permission(Cow::Borrowed("ledger.journal.post"));
    /// Reversing a posting; grant separately from [`Permission::JOURNAL_POST`].
    pub const JOURNAL_UNPOST: Permission = Permission(Cow::Borrowed("ledger.journal.unpost"));
    pub const BUDGETS_MANAGE: Permission = Permission(Cow::Borrowed("ledger.budgets.manage"));
    pub const FISCAL_YEARS_MANAGE: Permission =
        Permission(Cow::Borrowed("ledger.fiscal_years.manage"));
    pub const DIMENSIONS_MANAGE: Permission = Permission(Cow::Borrowed("ledger.dimensions.manage"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.as_str() == "*"
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
