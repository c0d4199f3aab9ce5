use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use fundledger_accounting::{
    Account, Budget, Donor, FiscalYear, Fund, Journal, Program, SequenceKey,
};
use fundledger_core::{
    AccountId, BranchId, BudgetId, DateRange, ExpectedVersion, FiscalYearId, JournalId, Page,
    PageWindow,
};
use fundledger_events::EventEnvelope;

use super::query::{
    AccountFilter, BudgetFilter, JournalFilter, LineTotals, LineWrite, PostedLine, ReportScope,
    YearCheck,
};

/// One entry of a journal's append-only transition log, payload erased to JSON.
pub type StoredJournalEvent = EventEnvelope<serde_json::Value>;

/// Persistence failure.
///
/// Constraint violations carry enough context to become a domain error at
/// the service boundary; `Backend` is the connection-loss class and is
/// propagated unchanged.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    /// Stored version differs from the expected one.
    #[error("concurrent modification: {0}")]
    Concurrency(String),

    #[error("duplicate code: {0}")]
    DuplicateCode(String),

    #[error("duplicate journal number: {0}")]
    DuplicateNumber(String),

    #[error("an active budget already exists for this key")]
    DuplicateBudget,

    #[error("account {0} has child accounts")]
    HasChildren(String),

    #[error("account {0} is referenced by journal lines")]
    HasTransactions(String),

    /// Row is referenced by something other than children or lines.
    #[error("{0} is still referenced")]
    InUse(String),

    /// The write touches a closed fiscal year.
    #[error("fiscal year {0} is closed")]
    FiscalYearClosed(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    /// A stored row could not be decoded into a domain value.
    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        Self::NotFound {
            entity,
            key: key.to_string(),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Durable state of the ledger.
///
/// Every method that writes more than one row is atomic: either all of it
/// is visible afterwards or none of it is. Reads of posted data only ever
/// see journals whose `is_posted` flag is set.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    // Chart of accounts.

    /// Insert a batch of accounts; fails as a whole on any duplicate code.
    async fn insert_accounts(&self, accounts: &[Account]) -> Result<(), StoreError>;

    async fn update_account(&self, account: &Account) -> Result<(), StoreError>;

    /// Delete an account that has no children, no journal lines and no budgets.
    async fn delete_account(&self, id: AccountId) -> Result<(), StoreError>;

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>, StoreError>;

    async fn get_account_by_code(&self, code: &str) -> Result<Option<Account>, StoreError>;

    /// Accounts for the given ids; unknown ids are absent from the map.
    async fn get_accounts(
        &self,
        ids: &[AccountId],
    ) -> Result<HashMap<AccountId, Account>, StoreError>;

    /// Matching accounts ordered by code.
    async fn list_accounts(&self, filter: &AccountFilter) -> Result<Vec<Account>, StoreError>;

    async fn page_accounts(
        &self,
        filter: &AccountFilter,
        window: PageWindow,
    ) -> Result<Page<Account>, StoreError>;

    // Journals.

    /// The sequence value the next journal of `key` would take (starts at 1).
    /// Nothing is reserved; [`LedgerStore::insert_journal`] claims it.
    async fn peek_sequence(&self, key: &SequenceKey) -> Result<u32, StoreError>;

    /// Insert a new journal with its lines and creation event, claiming the
    /// sequence value encoded in its number in the same write.
    /// `DuplicateNumber` when that value is no longer the next free one.
    async fn insert_journal(
        &self,
        journal: &Journal,
        events: &[StoredJournalEvent],
    ) -> Result<(), StoreError>;

    /// Overwrite a journal row if the stored version still equals `expected`.
    async fn save_journal(
        &self,
        journal: &Journal,
        expected: ExpectedVersion,
        lines: LineWrite,
        year: YearCheck,
        events: &[StoredJournalEvent],
    ) -> Result<(), StoreError>;

    /// Remove a journal and its lines; the event log is kept.
    async fn delete_journal(
        &self,
        id: JournalId,
        expected: ExpectedVersion,
        events: &[StoredJournalEvent],
    ) -> Result<(), StoreError>;

    async fn get_journal(&self, id: JournalId) -> Result<Option<Journal>, StoreError>;

    /// Matching journals, newest date first, then newest creation first.
    async fn page_journals(
        &self,
        filter: &JournalFilter,
        window: PageWindow,
    ) -> Result<Page<Journal>, StoreError>;

    /// Transition log of one journal in sequence order.
    async fn journal_events(&self, id: JournalId) -> Result<Vec<StoredJournalEvent>, StoreError>;

    // Posted read side.

    async fn posted_totals(
        &self,
        account_id: AccountId,
        range: DateRange,
        scope: &ReportScope,
    ) -> Result<LineTotals, StoreError>;

    /// Totals for every account with at least one matching posted line.
    async fn posted_totals_by_account(
        &self,
        range: DateRange,
        scope: &ReportScope,
    ) -> Result<HashMap<AccountId, LineTotals>, StoreError>;

    /// Posted lines of one account ordered by journal date, journal creation
    /// time, then line number.
    async fn posted_lines(
        &self,
        account_id: AccountId,
        range: DateRange,
        scope: &ReportScope,
    ) -> Result<Vec<PostedLine>, StoreError>;

    // Fiscal years.

    async fn insert_fiscal_year(&self, fiscal_year: &FiscalYear) -> Result<(), StoreError>;

    async fn update_fiscal_year(&self, fiscal_year: &FiscalYear) -> Result<(), StoreError>;

    async fn get_fiscal_year(&self, id: FiscalYearId) -> Result<Option<FiscalYear>, StoreError>;

    /// All fiscal years ordered by start date.
    async fn list_fiscal_years(&self) -> Result<Vec<FiscalYear>, StoreError>;

    /// Mark one fiscal year current and clear the flag everywhere else.
    async fn set_current_fiscal_year(&self, id: FiscalYearId) -> Result<(), StoreError>;

    // Budgets.

    // Budget writes fail with `FiscalYearClosed` when the budget's fiscal
    // year is closed at the time of the write.

    /// Insert a budget; `DuplicateBudget` if an active row has the same key.
    async fn insert_budget(&self, budget: &Budget) -> Result<(), StoreError>;

    async fn update_budget(&self, budget: &Budget) -> Result<(), StoreError>;

    async fn delete_budget(&self, id: BudgetId) -> Result<(), StoreError>;

    async fn get_budget(&self, id: BudgetId) -> Result<Option<Budget>, StoreError>;

    /// Matching budgets ordered by period, then creation time.
    async fn list_budgets(&self, filter: &BudgetFilter) -> Result<Vec<Budget>, StoreError>;

    async fn page_budgets(
        &self,
        filter: &BudgetFilter,
        window: PageWindow,
    ) -> Result<Page<Budget>, StoreError>;

    // Dimensions.

    async fn insert_fund(&self, fund: &Fund) -> Result<(), StoreError>;

    async fn list_funds(&self) -> Result<Vec<Fund>, StoreError>;

    async fn insert_program(&self, program: &Program) -> Result<(), StoreError>;

    async fn list_programs(&self) -> Result<Vec<Program>, StoreError>;

    async fn insert_donor(&self, donor: &Donor) -> Result<(), StoreError>;

    async fn list_donors(&self) -> Result<Vec<Donor>, StoreError>;
}

/// Branch directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    pub id: BranchId,
    pub code: String,
    pub name: String,
}

/// Read-only lookup of branches, owned outside the ledger.
#[async_trait]
pub trait BranchDirectory: Send + Sync {
    async fn branch(&self, id: BranchId) -> Result<Option<Branch>, StoreError>;
}
