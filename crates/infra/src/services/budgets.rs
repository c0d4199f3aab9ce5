//! Budget allocations and fiscal-year management.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tracing::{info, instrument};

use fundledger_accounting::{Budget, BudgetUpdate, FiscalYear, NewBudget};
use fundledger_auth::{Permission, Principal, authorize};
use fundledger_core::{BudgetId, DomainError, FiscalYearId, Page, PageRequest};

use crate::config::LedgerConfig;
use crate::error::LedgerResult;
use crate::store::{BudgetFilter, LedgerStore};

#[derive(Debug)]
pub struct BudgetService<S> {
    store: Arc<S>,
    config: Arc<LedgerConfig>,
}

impl<S> Clone for BudgetService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: Arc::clone(&self.config),
        }
    }
}

impl<S: LedgerStore> BudgetService<S> {
    pub fn new(store: Arc<S>, config: Arc<LedgerConfig>) -> Self {
        Self { store, config }
    }

    /// Allocate an amount to an expense account for one period.
    #[instrument(
        skip(self, principal, new),
        fields(account_id = %new.account_id, period = %new.period),
        err
    )]
    pub async fn create_budget(
        &self,
        principal: &Principal,
        new: NewBudget,
    ) -> LedgerResult<Budget> {
        authorize(principal, &Permission::BUDGETS_MANAGE)?;

        let fiscal_year = self.get_fiscal_year(new.fiscal_year_id).await?;
        let account = self
            .store
            .get_account(new.account_id)
            .await?
            .ok_or_else(|| DomainError::not_found("account", new.account_id))?;
        let budget = Budget::create(new, &fiscal_year, &account, Utc::now())?;
        self.store.insert_budget(&budget).await?;

        info!(budget_id = %budget.id, amount = %budget.amount, "budget created");
        Ok(budget)
    }

    #[instrument(skip(self, principal, update), fields(budget_id = %id), err)]
    pub async fn update_budget(
        &self,
        principal: &Principal,
        id: BudgetId,
        update: BudgetUpdate,
    ) -> LedgerResult<Budget> {
        authorize(principal, &Permission::BUDGETS_MANAGE)?;

        let mut budget = self.get_budget(id).await?;
        let fiscal_year = self.get_fiscal_year(budget.fiscal_year_id).await?;
        budget.apply_update(update, &fiscal_year, Utc::now())?;
        self.store.update_budget(&budget).await?;
        Ok(budget)
    }

    #[instrument(skip(self, principal), fields(budget_id = %id), err)]
    pub async fn delete_budget(&self, principal: &Principal, id: BudgetId) -> LedgerResult<()> {
        authorize(principal, &Permission::BUDGETS_MANAGE)?;

        // The store re-checks the year inside the delete.
        let budget = self.get_budget(id).await?;
        self.get_fiscal_year(budget.fiscal_year_id)
            .await?
            .ensure_open()?;
        self.store.delete_budget(id).await?;
        Ok(())
    }

    pub async fn get_budget(&self, id: BudgetId) -> LedgerResult<Budget> {
        Ok(self
            .store
            .get_budget(id)
            .await?
            .ok_or_else(|| DomainError::not_found("budget", id))?)
    }

    /// Filtered page of budgets ordered by period, then creation.
    #[instrument(skip(self), err)]
    pub async fn list_budgets(
        &self,
        filter: &BudgetFilter,
        request: &PageRequest,
    ) -> LedgerResult<Page<Budget>> {
        let window = request.window(self.config.page_limits);
        Ok(self.store.page_budgets(filter, window).await?)
    }

    /// Open a new fiscal year. Years may not overlap.
    #[instrument(skip(self, principal), err)]
    pub async fn create_fiscal_year(
        &self,
        principal: &Principal,
        name: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> LedgerResult<FiscalYear> {
        authorize(principal, &Permission::FISCAL_YEARS_MANAGE)?;

        let fiscal_year = FiscalYear::new(name, start_date, end_date, Utc::now())?;
        let existing = self.store.list_fiscal_years().await?;
        if let Some(other) = existing
            .iter()
            .find(|fy| fy.start_date <= end_date && start_date <= fy.end_date)
        {
            return Err(DomainError::validation(format!(
                "fiscal year {} overlaps {}",
                fiscal_year.name, other.name
            ))
            .into());
        }

        self.store.insert_fiscal_year(&fiscal_year).await?;
        Ok(fiscal_year)
    }

    #[instrument(skip(self, principal), fields(fiscal_year_id = %id), err)]
    pub async fn set_current_fiscal_year(
        &self,
        principal: &Principal,
        id: FiscalYearId,
    ) -> LedgerResult<FiscalYear> {
        authorize(principal, &Permission::FISCAL_YEARS_MANAGE)?;

        let fiscal_year = self.get_fiscal_year(id).await?;
        fiscal_year.ensure_open()?;
        self.store.set_current_fiscal_year(id).await?;
        self.get_fiscal_year(id).await
    }

    /// Close a fiscal year. Its budgets become immutable and journals dated
    /// inside it can no longer be posted or unposted.
    #[instrument(skip(self, principal), fields(fiscal_year_id = %id), err)]
    pub async fn close_fiscal_year(
        &self,
        principal: &Principal,
        id: FiscalYearId,
    ) -> LedgerResult<FiscalYear> {
        authorize(principal, &Permission::FISCAL_YEARS_MANAGE)?;

        let mut fiscal_year = self.get_fiscal_year(id).await?;
        fiscal_year.close(principal.user_id, Utc::now())?;
        self.store.update_fiscal_year(&fiscal_year).await?;

        info!(name = %fiscal_year.name, "fiscal year closed");
        Ok(fiscal_year)
    }

    pub async fn get_fiscal_year(&self, id: FiscalYearId) -> LedgerResult<FiscalYear> {
        Ok(self
            .store
            .get_fiscal_year(id)
            .await?
            .ok_or_else(|| DomainError::not_found("fiscal year", id))?)
    }

    pub async fn list_fiscal_years(&self) -> LedgerResult<Vec<FiscalYear>> {
        Ok(self.store.list_fiscal_years().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LedgerError;
    use crate::store::{InMemoryLedgerStore, StoreError};
    use fundledger_accounting::{Account, AccountCategory, AccountType, BudgetScope, NewAccount};
    use fundledger_core::{AccountId, BranchId, Money, Period, UserId};

    struct Harness {
        budgets: BudgetService<InMemoryLedgerStore>,
        store: Arc<InMemoryLedgerStore>,
        admin: Principal,
        fiscal_year: FiscalYear,
        salaries: Account,
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn detail(code: &str, category: AccountCategory) -> Account {
        Account::create(
            AccountId::new(),
            NewAccount::new(code, code, AccountType::Detail, category),
            None,
            Utc::now(),
        )
        .unwrap()
    }

    async fn harness() -> Harness {
        let store = Arc::new(InMemoryLedgerStore::new());
        let budgets = BudgetService::new(Arc::clone(&store), Arc::new(LedgerConfig::default()));
        let admin = Principal::superuser(UserId::new());
        let fiscal_year = budgets
            .create_fiscal_year(&admin, "FY2024", date(2024, 1, 1), date(2024, 12, 31))
            .await
            .unwrap();
        let salaries = detail("5100", AccountCategory::Expense);
        store.insert_accounts(&[salaries.clone()]).await.unwrap();
        Harness {
            budgets,
            store,
            admin,
            fiscal_year,
            salaries,
        }
    }

    fn allocation(h: &Harness, month: u32, amount: i64) -> NewBudget {
        NewBudget {
            fiscal_year_id: h.fiscal_year.id,
            account_id: h.salaries.id,
            period: Period::new(2024, month).unwrap(),
            amount: Money::new(amount),
            scope: BudgetScope::default(),
            description: None,
        }
    }

    #[tokio::test]
    async fn second_active_budget_for_same_key_is_rejected() {
        let h = harness().await;
        h.budgets
            .create_budget(&h.admin, allocation(&h, 1, 1_000))
            .await
            .unwrap();

        let err = h
            .budgets
            .create_budget(&h.admin, allocation(&h, 1, 2_000))
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::Domain(DomainError::BudgetAlreadyExists));

        let mut scoped = allocation(&h, 1, 2_000);
        scoped.scope.branch_id = Some(BranchId::new());
        assert!(h.budgets.create_budget(&h.admin, scoped).await.is_ok());
    }

    #[tokio::test]
    async fn budgets_require_expense_accounts() {
        let h = harness().await;
        let cash = detail("1100", AccountCategory::Asset);
        h.store.insert_accounts(&[cash.clone()]).await.unwrap();

        let mut new = allocation(&h, 2, 500);
        new.account_id = cash.id;
        let err = h.budgets.create_budget(&h.admin, new).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Domain(DomainError::InvalidAccountCategory { .. })
        ));

        let mut missing = allocation(&h, 2, 500);
        missing.account_id = AccountId::new();
        let err = h.budgets.create_budget(&h.admin, missing).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Domain(DomainError::NotFound { entity: "account", .. })
        ));
    }

    #[tokio::test]
    async fn closed_year_freezes_its_budgets() {
        let h = harness().await;
        let budget = h
            .budgets
            .create_budget(&h.admin, allocation(&h, 3, 800))
            .await
            .unwrap();
        h.budgets
            .close_fiscal_year(&h.admin, h.fiscal_year.id)
            .await
            .unwrap();

        let closed = DomainError::FiscalYearClosed("FY2024".into());
        let err = h
            .budgets
            .update_budget(
                &h.admin,
                budget.id,
                BudgetUpdate {
                    amount: Some(Money::new(900)),
                    ..BudgetUpdate::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::Domain(closed.clone()));

        let err = h
            .budgets
            .delete_budget(&h.admin, budget.id)
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::Domain(closed.clone()));

        let err = h
            .budgets
            .create_budget(&h.admin, allocation(&h, 4, 100))
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::Domain(closed));
    }

    #[tokio::test]
    async fn budget_edits_prepared_before_a_close_are_rejected_by_the_store() {
        let h = harness().await;
        let budget = h
            .budgets
            .create_budget(&h.admin, allocation(&h, 6, 800))
            .await
            .unwrap();

        // Validated against the year while it was still open.
        let mut stale = budget.clone();
        stale
            .apply_update(
                BudgetUpdate {
                    amount: Some(Money::new(5_000)),
                    ..BudgetUpdate::default()
                },
                &h.fiscal_year,
                Utc::now(),
            )
            .unwrap();
        h.budgets
            .close_fiscal_year(&h.admin, h.fiscal_year.id)
            .await
            .unwrap();

        let closed = StoreError::FiscalYearClosed("FY2024".into());
        assert_eq!(h.store.update_budget(&stale).await.unwrap_err(), closed);
        assert_eq!(h.store.delete_budget(budget.id).await.unwrap_err(), closed);
        assert_eq!(h.budgets.get_budget(budget.id).await.unwrap(), budget);
    }

    #[tokio::test]
    async fn creating_a_budget_in_a_closed_year_is_a_conflict() {
        let h = harness().await;
        h.budgets
            .close_fiscal_year(&h.admin, h.fiscal_year.id)
            .await
            .unwrap();

        let err = h
            .budgets
            .create_budget(&h.admin, allocation(&h, 7, 400))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            LedgerError::Domain(DomainError::FiscalYearClosed("FY2024".into()))
        );
        assert_eq!(err.kind(), Some(fundledger_core::ErrorKind::Conflict));

        let stored = h
            .budgets
            .list_budgets(&BudgetFilter::default(), &PageRequest::default())
            .await
            .unwrap();
        assert_eq!(stored.total, 0);

        // Built from the snapshot taken while the year was open.
        let budget =
            Budget::create(allocation(&h, 7, 400), &h.fiscal_year, &h.salaries, Utc::now()).unwrap();
        assert_eq!(
            h.store.insert_budget(&budget).await.unwrap_err(),
            StoreError::FiscalYearClosed("FY2024".into())
        );
    }

    #[tokio::test]
    async fn deactivated_budget_frees_its_key() {
        let h = harness().await;
        let budget = h
            .budgets
            .create_budget(&h.admin, allocation(&h, 5, 800))
            .await
            .unwrap();
        h.budgets
            .update_budget(
                &h.admin,
                budget.id,
                BudgetUpdate {
                    is_active: Some(false),
                    ..BudgetUpdate::default()
                },
            )
            .await
            .unwrap();

        assert!(h
            .budgets
            .create_budget(&h.admin, allocation(&h, 5, 1_200))
            .await
            .is_ok());

        let active = h
            .budgets
            .list_budgets(
                &BudgetFilter {
                    active_only: true,
                    ..BudgetFilter::default()
                },
                &PageRequest::default(),
            )
            .await
            .unwrap();
        assert_eq!(active.total, 1);
        assert_eq!(active.items[0].amount, Money::new(1_200));
    }

    #[tokio::test]
    async fn fiscal_years_cannot_overlap_and_one_is_current() {
        let h = harness().await;
        let err = h
            .budgets
            .create_fiscal_year(&h.admin, "FY2024b", date(2024, 7, 1), date(2025, 6, 30))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Domain(DomainError::Validation(_))
        ));

        let next = h
            .budgets
            .create_fiscal_year(&h.admin, "FY2025", date(2025, 1, 1), date(2025, 12, 31))
            .await
            .unwrap();
        h.budgets
            .set_current_fiscal_year(&h.admin, h.fiscal_year.id)
            .await
            .unwrap();
        let current = h
            .budgets
            .set_current_fiscal_year(&h.admin, next.id)
            .await
            .unwrap();
        assert!(current.is_current);

        let years = h.budgets.list_fiscal_years().await.unwrap();
        assert_eq!(years.iter().filter(|fy| fy.is_current).count(), 1);
    }
}
