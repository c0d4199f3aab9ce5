//! Filters and read-side row shapes shared by every store implementation.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use fundledger_accounting::{
    Account, AccountCategory, AccountType, Budget, BudgetScope, Journal, JournalLine,
    JournalStatus, LineDimensions,
};
use fundledger_core::{
    AccountId, BranchId, DonorId, FiscalYearId, FundId, JournalId, Money, Period, ProgramId,
};

/// Optional report slicing. `None` members match everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReportScope {
    #[serde(default)]
    pub branch_id: Option<BranchId>,
    #[serde(default)]
    pub fund_id: Option<FundId>,
    #[serde(default)]
    pub program_id: Option<ProgramId>,
    #[serde(default)]
    pub donor_id: Option<DonorId>,
}

impl ReportScope {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn branch(branch_id: BranchId) -> Self {
        Self {
            branch_id: Some(branch_id),
            ..Self::default()
        }
    }

    pub fn matches(&self, branch_id: BranchId, dimensions: &LineDimensions) -> bool {
        fn member<T: PartialEq>(filter: Option<T>, value: Option<T>) -> bool {
            filter.is_none() || filter == value
        }
        self.branch_id.is_none_or(|b| b == branch_id)
            && member(self.fund_id, dimensions.fund_id)
            && member(self.program_id, dimensions.program_id)
            && member(self.donor_id, dimensions.donor_id)
    }
}

impl From<BudgetScope> for ReportScope {
    fn from(scope: BudgetScope) -> Self {
        Self {
            branch_id: scope.branch_id,
            fund_id: scope.fund_id,
            program_id: scope.program_id,
            donor_id: None,
        }
    }
}

/// Σdebit and Σcredit over a set of posted lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineTotals {
    pub debit: Money,
    pub credit: Money,
}

impl LineTotals {
    pub fn add_line(&mut self, line: &JournalLine) {
        self.debit += line.debit;
        self.credit += line.credit;
    }

    pub fn is_zero(&self) -> bool {
        self.debit.is_zero() && self.credit.is_zero()
    }
}

/// One posted journal line with the journal context needed for ledgers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostedLine {
    pub journal_id: JournalId,
    pub journal_number: String,
    pub journal_date: NaiveDate,
    pub journal_created_at: DateTime<Utc>,
    pub line_no: u32,
    pub account_id: AccountId,
    pub description: String,
    pub debit: Money,
    pub credit: Money,
    pub dimensions: LineDimensions,
}

impl PostedLine {
    pub fn from_journal(journal: &Journal, line: &JournalLine) -> Self {
        Self {
            journal_id: journal.id,
            journal_number: journal.number.clone(),
            journal_date: journal.date,
            journal_created_at: journal.created_at,
            line_no: line.line_no,
            account_id: line.account_id,
            description: line
                .description
                .clone()
                .unwrap_or_else(|| journal.description.clone()),
            debit: line.debit,
            credit: line.credit,
            dimensions: line.dimensions,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountFilter {
    #[serde(default)]
    pub category: Option<AccountCategory>,
    #[serde(default)]
    pub account_type: Option<AccountType>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub is_detail: Option<bool>,
    /// Case-insensitive match on code or name.
    #[serde(default)]
    pub search: Option<String>,
}

impl AccountFilter {
    pub fn detail() -> Self {
        Self {
            is_detail: Some(true),
            ..Self::default()
        }
    }

    pub fn matches(&self, account: &Account) -> bool {
        self.category.is_none_or(|c| c == account.category)
            && self.account_type.is_none_or(|t| t == account.account_type)
            && self.is_active.is_none_or(|a| a == account.is_active)
            && self.is_detail.is_none_or(|d| d == account.is_detail)
            && self.search.as_deref().is_none_or(|needle| {
                let needle = needle.to_lowercase();
                account.code.to_lowercase().contains(&needle)
                    || account.name.to_lowercase().contains(&needle)
            })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalFilter {
    #[serde(default)]
    pub status: Option<JournalStatus>,
    #[serde(default)]
    pub branch_id: Option<BranchId>,
    #[serde(default)]
    pub date_from: Option<NaiveDate>,
    #[serde(default)]
    pub date_to: Option<NaiveDate>,
    /// Case-insensitive match on number or description.
    #[serde(default)]
    pub search: Option<String>,
}

impl JournalFilter {
    pub fn matches(&self, journal: &Journal) -> bool {
        self.status.is_none_or(|s| s == journal.status)
            && self.branch_id.is_none_or(|b| b == journal.branch_id)
            && self.date_from.is_none_or(|d| journal.date >= d)
            && self.date_to.is_none_or(|d| journal.date <= d)
            && self.search.as_deref().is_none_or(|needle| {
                let needle = needle.to_lowercase();
                journal.number.to_lowercase().contains(&needle)
                    || journal.description.to_lowercase().contains(&needle)
            })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetFilter {
    #[serde(default)]
    pub fiscal_year_id: Option<FiscalYearId>,
    #[serde(default)]
    pub period: Option<Period>,
    #[serde(default)]
    pub branch_id: Option<BranchId>,
    #[serde(default)]
    pub account_id: Option<AccountId>,
    #[serde(default)]
    pub active_only: bool,
}

impl BudgetFilter {
    pub fn matches(&self, budget: &Budget) -> bool {
        self.fiscal_year_id.is_none_or(|f| f == budget.fiscal_year_id)
            && self.period.is_none_or(|p| p == budget.period)
            && self.branch_id.is_none_or(|b| Some(b) == budget.scope.branch_id)
            && self.account_id.is_none_or(|a| a == budget.account_id)
            && (!self.active_only || budget.is_active)
    }
}

/// Whether a journal save must find the fiscal year around its date open.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum YearCheck {
    Skip,
    /// Fail with `FiscalYearClosed` when a closed fiscal year contains the
    /// journal date, checked in the same write as the save.
    RequireOpen,
}

/// Whether a journal save rewrites its lines.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LineWrite {
    Keep,
    /// Delete every stored line and insert the journal's current lines.
    Replace,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_members_are_independent() {
        let branch = BranchId::new();
        let fund = FundId::new();
        let tagged = LineDimensions {
            fund_id: Some(fund),
            ..LineDimensions::default()
        };

        assert!(ReportScope::all().matches(branch, &LineDimensions::default()));
        assert!(ReportScope::branch(branch).matches(branch, &tagged));
        assert!(!ReportScope::branch(BranchId::new()).matches(branch, &tagged));

        let by_fund = ReportScope {
            fund_id: Some(fund),
            ..ReportScope::default()
        };
        assert!(by_fund.matches(branch, &tagged));
        assert!(!by_fund.matches(branch, &LineDimensions::default()));
    }
}
