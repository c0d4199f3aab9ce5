use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::NaiveDate;

use fundledger_accounting::{
    Account, Budget, Donor, FiscalYear, Fund, Journal, Program, SequenceKey, parse_number,
};
use fundledger_core::{
    AccountId, BranchId, BudgetId, DateRange, DonorId, ExpectedVersion, FiscalYearId, FundId,
    JournalId, Page, PageWindow, ProgramId,
};

use super::query::{
    AccountFilter, BudgetFilter, JournalFilter, LineTotals, LineWrite, PostedLine, ReportScope,
    YearCheck,
};
use super::r#trait::{Branch, BranchDirectory, LedgerStore, StoreError, StoredJournalEvent};

#[derive(Debug, Default)]
struct State {
    accounts: HashMap<AccountId, Account>,
    journals: HashMap<JournalId, Journal>,
    journal_events: HashMap<JournalId, Vec<StoredJournalEvent>>,
    sequences: HashMap<String, u32>,
    fiscal_years: HashMap<FiscalYearId, FiscalYear>,
    budgets: HashMap<BudgetId, Budget>,
    funds: HashMap<FundId, Fund>,
    programs: HashMap<ProgramId, Program>,
    donors: HashMap<DonorId, Donor>,
    branches: HashMap<BranchId, Branch>,
}

impl State {
    fn posted(&self) -> impl Iterator<Item = &Journal> {
        self.journals.values().filter(|j| j.is_posted)
    }

    fn ensure_year_open(&self, id: FiscalYearId) -> Result<(), StoreError> {
        let year = self
            .fiscal_years
            .get(&id)
            .ok_or_else(|| StoreError::not_found("fiscal year", id))?;
        if year.is_closed {
            return Err(StoreError::FiscalYearClosed(year.name.clone()));
        }
        Ok(())
    }

    fn ensure_open_on(&self, date: NaiveDate) -> Result<(), StoreError> {
        match self
            .fiscal_years
            .values()
            .find(|fy| fy.is_closed && fy.contains(date))
        {
            Some(year) => Err(StoreError::FiscalYearClosed(year.name.clone())),
            None => Ok(()),
        }
    }

    fn active_budget_clash(&self, budget: &Budget) -> bool {
        budget.is_active
            && self
                .budgets
                .values()
                .any(|b| b.id != budget.id && b.is_active && b.key() == budget.key())
    }
}

/// In-memory ledger store.
///
/// A single lock guards all state, so every multi-row write is atomic.
/// Intended for tests and embedding.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    state: RwLock<State>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a branch in the directory side of this store.
    pub fn insert_branch(&self, branch: Branch) -> Result<(), StoreError> {
        self.write()?.branches.insert(branch.id, branch);
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, StoreError> {
        self.state
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, StoreError> {
        self.state
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }
}

fn append_events(state: &mut State, id: JournalId, events: &[StoredJournalEvent]) {
    state
        .journal_events
        .entry(id)
        .or_default()
        .extend(events.iter().cloned());
}

fn check_version(stored: &Journal, expected: ExpectedVersion) -> Result<(), StoreError> {
    if expected.matches(stored.version) {
        Ok(())
    } else {
        Err(StoreError::Concurrency(format!(
            "journal {} is at version {}, expected {expected:?}",
            stored.id, stored.version
        )))
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn insert_accounts(&self, accounts: &[Account]) -> Result<(), StoreError> {
        let mut state = self.write()?;
        let mut codes: Vec<&str> = state.accounts.values().map(|a| a.code.as_str()).collect();
        for account in accounts {
            if codes.contains(&account.code.as_str()) {
                return Err(StoreError::DuplicateCode(account.code.clone()));
            }
            codes.push(&account.code);
        }
        for account in accounts {
            state.accounts.insert(account.id, account.clone());
        }
        Ok(())
    }

    async fn update_account(&self, account: &Account) -> Result<(), StoreError> {
        let mut state = self.write()?;
        let stored = state
            .accounts
            .get_mut(&account.id)
            .ok_or_else(|| StoreError::not_found("account", account.id))?;
        *stored = account.clone();
        Ok(())
    }

    async fn delete_account(&self, id: AccountId) -> Result<(), StoreError> {
        let mut state = self.write()?;
        let code = state
            .accounts
            .get(&id)
            .map(|a| a.code.clone())
            .ok_or_else(|| StoreError::not_found("account", id))?;

        if state.accounts.values().any(|a| a.parent_id == Some(id)) {
            return Err(StoreError::HasChildren(code));
        }
        let referenced = state
            .journals
            .values()
            .flat_map(|j| j.lines.iter())
            .any(|l| l.account_id == id);
        if referenced {
            return Err(StoreError::HasTransactions(code));
        }
        if state.budgets.values().any(|b| b.account_id == id) {
            return Err(StoreError::InUse(format!("account {code}")));
        }

        state.accounts.remove(&id);
        Ok(())
    }

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        Ok(self.read()?.accounts.get(&id).cloned())
    }

    async fn get_account_by_code(&self, code: &str) -> Result<Option<Account>, StoreError> {
        Ok(self
            .read()?
            .accounts
            .values()
            .find(|a| a.code == code)
            .cloned())
    }

    async fn get_accounts(
        &self,
        ids: &[AccountId],
    ) -> Result<HashMap<AccountId, Account>, StoreError> {
        let state = self.read()?;
        Ok(ids
            .iter()
            .filter_map(|id| state.accounts.get(id).map(|a| (*id, a.clone())))
            .collect())
    }

    async fn list_accounts(&self, filter: &AccountFilter) -> Result<Vec<Account>, StoreError> {
        let state = self.read()?;
        let mut accounts: Vec<Account> = state
            .accounts
            .values()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        accounts.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(accounts)
    }

    async fn page_accounts(
        &self,
        filter: &AccountFilter,
        window: PageWindow,
    ) -> Result<Page<Account>, StoreError> {
        Ok(window.slice(self.list_accounts(filter).await?))
    }

    async fn peek_sequence(&self, key: &SequenceKey) -> Result<u32, StoreError> {
        let state = self.read()?;
        Ok(state.sequences.get(key.as_str()).copied().unwrap_or(0) + 1)
    }

    async fn insert_journal(
        &self,
        journal: &Journal,
        events: &[StoredJournalEvent],
    ) -> Result<(), StoreError> {
        let (key, sequence) = parse_number(&journal.number)
            .ok_or_else(|| StoreError::Corrupt(format!("journal number {}", journal.number)))?;

        let mut state = self.write()?;
        if state.journals.contains_key(&journal.id) {
            return Err(StoreError::Concurrency(format!(
                "journal {} already exists",
                journal.id
            )));
        }
        let last = state.sequences.get(key.as_str()).copied().unwrap_or(0);
        if sequence != last + 1 || state.journals.values().any(|j| j.number == journal.number) {
            return Err(StoreError::DuplicateNumber(journal.number.clone()));
        }
        state.sequences.insert(key.as_str().to_string(), sequence);
        state.journals.insert(journal.id, journal.clone());
        append_events(&mut state, journal.id, events);
        Ok(())
    }

    async fn save_journal(
        &self,
        journal: &Journal,
        expected: ExpectedVersion,
        lines: LineWrite,
        year: YearCheck,
        events: &[StoredJournalEvent],
    ) -> Result<(), StoreError> {
        let mut state = self.write()?;
        let stored = state
            .journals
            .get(&journal.id)
            .ok_or_else(|| StoreError::not_found("journal", journal.id))?;
        check_version(stored, expected)?;
        if year == YearCheck::RequireOpen {
            state.ensure_open_on(journal.date)?;
        }

        let mut next = journal.clone();
        if lines == LineWrite::Keep {
            next.lines = stored.lines.clone();
        }
        state.journals.insert(journal.id, next);
        append_events(&mut state, journal.id, events);
        Ok(())
    }

    async fn delete_journal(
        &self,
        id: JournalId,
        expected: ExpectedVersion,
        events: &[StoredJournalEvent],
    ) -> Result<(), StoreError> {
        let mut state = self.write()?;
        let stored = state
            .journals
            .get(&id)
            .ok_or_else(|| StoreError::not_found("journal", id))?;
        check_version(stored, expected)?;
        state.journals.remove(&id);
        append_events(&mut state, id, events);
        Ok(())
    }

    async fn get_journal(&self, id: JournalId) -> Result<Option<Journal>, StoreError> {
        Ok(self.read()?.journals.get(&id).cloned())
    }

    async fn page_journals(
        &self,
        filter: &JournalFilter,
        window: PageWindow,
    ) -> Result<Page<Journal>, StoreError> {
        let state = self.read()?;
        let mut journals: Vec<Journal> = state
            .journals
            .values()
            .filter(|j| filter.matches(j))
            .cloned()
            .collect();
        journals.sort_by(|a, b| {
            b.date
                .cmp(&a.date)
                .then(b.created_at.cmp(&a.created_at))
                .then(b.id.cmp(&a.id))
        });
        Ok(window.slice(journals))
    }

    async fn journal_events(&self, id: JournalId) -> Result<Vec<StoredJournalEvent>, StoreError> {
        let mut events = self
            .read()?
            .journal_events
            .get(&id)
            .cloned()
            .unwrap_or_default();
        events.sort_by_key(|e| e.sequence_number());
        Ok(events)
    }

    async fn posted_totals(
        &self,
        account_id: AccountId,
        range: DateRange,
        scope: &ReportScope,
    ) -> Result<LineTotals, StoreError> {
        let state = self.read()?;
        let mut totals = LineTotals::default();
        for journal in state.posted().filter(|j| range.contains(j.date)) {
            for line in journal
                .lines
                .iter()
                .filter(|l| l.account_id == account_id)
                .filter(|l| scope.matches(journal.branch_id, &l.dimensions))
            {
                totals.add_line(line);
            }
        }
        Ok(totals)
    }

    async fn posted_totals_by_account(
        &self,
        range: DateRange,
        scope: &ReportScope,
    ) -> Result<HashMap<AccountId, LineTotals>, StoreError> {
        let state = self.read()?;
        let mut totals: HashMap<AccountId, LineTotals> = HashMap::new();
        for journal in state.posted().filter(|j| range.contains(j.date)) {
            for line in journal
                .lines
                .iter()
                .filter(|l| scope.matches(journal.branch_id, &l.dimensions))
            {
                totals.entry(line.account_id).or_default().add_line(line);
            }
        }
        Ok(totals)
    }

    async fn posted_lines(
        &self,
        account_id: AccountId,
        range: DateRange,
        scope: &ReportScope,
    ) -> Result<Vec<PostedLine>, StoreError> {
        let state = self.read()?;
        let mut lines: Vec<PostedLine> = state
            .posted()
            .filter(|j| range.contains(j.date))
            .flat_map(|journal| {
                journal
                    .lines
                    .iter()
                    .filter(move |l| {
                        l.account_id == account_id
                            && scope.matches(journal.branch_id, &l.dimensions)
                    })
                    .map(move |l| PostedLine::from_journal(journal, l))
            })
            .collect();
        lines.sort_by(|a, b| {
            a.journal_date
                .cmp(&b.journal_date)
                .then(a.journal_created_at.cmp(&b.journal_created_at))
                .then(a.journal_id.cmp(&b.journal_id))
                .then(a.line_no.cmp(&b.line_no))
        });
        Ok(lines)
    }

    async fn insert_fiscal_year(&self, fiscal_year: &FiscalYear) -> Result<(), StoreError> {
        self.write()?
            .fiscal_years
            .insert(fiscal_year.id, fiscal_year.clone());
        Ok(())
    }

    async fn update_fiscal_year(&self, fiscal_year: &FiscalYear) -> Result<(), StoreError> {
        let mut state = self.write()?;
        let stored = state
            .fiscal_years
            .get_mut(&fiscal_year.id)
            .ok_or_else(|| StoreError::not_found("fiscal year", fiscal_year.id))?;
        *stored = fiscal_year.clone();
        Ok(())
    }

    async fn get_fiscal_year(&self, id: FiscalYearId) -> Result<Option<FiscalYear>, StoreError> {
        Ok(self.read()?.fiscal_years.get(&id).cloned())
    }

    async fn list_fiscal_years(&self) -> Result<Vec<FiscalYear>, StoreError> {
        let mut years: Vec<FiscalYear> = self.read()?.fiscal_years.values().cloned().collect();
        years.sort_by_key(|fy| fy.start_date);
        Ok(years)
    }

    async fn set_current_fiscal_year(&self, id: FiscalYearId) -> Result<(), StoreError> {
        let mut state = self.write()?;
        if !state.fiscal_years.contains_key(&id) {
            return Err(StoreError::not_found("fiscal year", id));
        }
        for fiscal_year in state.fiscal_years.values_mut() {
            fiscal_year.is_current = fiscal_year.id == id;
        }
        Ok(())
    }

    async fn insert_budget(&self, budget: &Budget) -> Result<(), StoreError> {
        let mut state = self.write()?;
        state.ensure_year_open(budget.fiscal_year_id)?;
        if state.active_budget_clash(budget) {
            return Err(StoreError::DuplicateBudget);
        }
        state.budgets.insert(budget.id, budget.clone());
        Ok(())
    }

    async fn update_budget(&self, budget: &Budget) -> Result<(), StoreError> {
        let mut state = self.write()?;
        let fiscal_year_id = state
            .budgets
            .get(&budget.id)
            .map(|stored| stored.fiscal_year_id)
            .ok_or_else(|| StoreError::not_found("budget", budget.id))?;
        state.ensure_year_open(fiscal_year_id)?;
        if state.active_budget_clash(budget) {
            return Err(StoreError::DuplicateBudget);
        }
        state.budgets.insert(budget.id, budget.clone());
        Ok(())
    }

    async fn delete_budget(&self, id: BudgetId) -> Result<(), StoreError> {
        let mut state = self.write()?;
        let fiscal_year_id = state
            .budgets
            .get(&id)
            .map(|stored| stored.fiscal_year_id)
            .ok_or_else(|| StoreError::not_found("budget", id))?;
        state.ensure_year_open(fiscal_year_id)?;
        state.budgets.remove(&id);
        Ok(())
    }

    async fn get_budget(&self, id: BudgetId) -> Result<Option<Budget>, StoreError> {
        Ok(self.read()?.budgets.get(&id).cloned())
    }

    async fn list_budgets(&self, filter: &BudgetFilter) -> Result<Vec<Budget>, StoreError> {
        let mut budgets: Vec<Budget> = self
            .read()?
            .budgets
            .values()
            .filter(|b| filter.matches(b))
            .cloned()
            .collect();
        budgets.sort_by(|a, b| {
            a.period
                .cmp(&b.period)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
        Ok(budgets)
    }

    async fn page_budgets(
        &self,
        filter: &BudgetFilter,
        window: PageWindow,
    ) -> Result<Page<Budget>, StoreError> {
        Ok(window.slice(self.list_budgets(filter).await?))
    }

    async fn insert_fund(&self, fund: &Fund) -> Result<(), StoreError> {
        let mut state = self.write()?;
        if state.funds.values().any(|f| f.code == fund.code) {
            return Err(StoreError::DuplicateCode(fund.code.clone()));
        }
        state.funds.insert(fund.id, fund.clone());
        Ok(())
    }

    async fn list_funds(&self) -> Result<Vec<Fund>, StoreError> {
        let mut funds: Vec<Fund> = self.read()?.funds.values().cloned().collect();
        funds.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(funds)
    }

    async fn insert_program(&self, program: &Program) -> Result<(), StoreError> {
        let mut state = self.write()?;
        if state.programs.values().any(|p| p.code == program.code) {
            return Err(StoreError::DuplicateCode(program.code.clone()));
        }
        state.programs.insert(program.id, program.clone());
        Ok(())
    }

    async fn list_programs(&self) -> Result<Vec<Program>, StoreError> {
        let mut programs: Vec<Program> = self.read()?.programs.values().cloned().collect();
        programs.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(programs)
    }

    async fn insert_donor(&self, donor: &Donor) -> Result<(), StoreError> {
        let mut state = self.write()?;
        if state.donors.values().any(|d| d.code == donor.code) {
            return Err(StoreError::DuplicateCode(donor.code.clone()));
        }
        state.donors.insert(donor.id, donor.clone());
        Ok(())
    }

    async fn list_donors(&self) -> Result<Vec<Donor>, StoreError> {
        let mut donors: Vec<Donor> = self.read()?.donors.values().cloned().collect();
        donors.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(donors)
    }
}

#[async_trait]
impl BranchDirectory for InMemoryLedgerStore {
    async fn branch(&self, id: BranchId) -> Result<Option<Branch>, StoreError> {
        Ok(self.read()?.branches.get(&id).cloned())
    }
}
