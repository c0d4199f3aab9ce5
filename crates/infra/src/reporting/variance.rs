use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::instrument;

use fundledger_accounting::{ActualWindow, BudgetScope, Variance};
use fundledger_core::{AccountId, BranchId, BudgetId, DomainError, FiscalYearId, Period};

use crate::config::LedgerConfig;
use crate::error::LedgerResult;
use crate::store::{BudgetFilter, LedgerStore, ReportScope};

/// Selects the budgets of one fiscal year to compare against actual spend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VarianceQuery {
    pub fiscal_year_id: FiscalYearId,
    #[serde(default)]
    pub period: Option<Period>,
    #[serde(default)]
    pub branch_id: Option<BranchId>,
    #[serde(default)]
    pub account_id: Option<AccountId>,
}

impl VarianceQuery {
    pub fn fiscal_year(fiscal_year_id: FiscalYearId) -> Self {
        Self {
            fiscal_year_id,
            period: None,
            branch_id: None,
            account_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetVarianceLine {
    pub budget_id: BudgetId,
    pub account_id: AccountId,
    pub account_code: String,
    pub account_name: String,
    pub period: Period,
    #[serde(flatten)]
    pub scope: BudgetScope,
    #[serde(flatten)]
    pub variance: Variance,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetVarianceReport {
    pub fiscal_year_id: FiscalYearId,
    pub window: ActualWindow,
    pub lines: Vec<BudgetVarianceLine>,
    pub summary: Variance,
}

/// Compares active budget allocations with posted expense activity.
#[derive(Debug)]
pub struct BudgetVarianceEngine<S> {
    store: Arc<S>,
    config: Arc<LedgerConfig>,
}

impl<S> Clone for BudgetVarianceEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: Arc::clone(&self.config),
        }
    }
}

impl<S: LedgerStore> BudgetVarianceEngine<S> {
    pub fn new(store: Arc<S>, config: Arc<LedgerConfig>) -> Self {
        Self { store, config }
    }

    /// Actual spend is Σdebit − Σcredit of posted lines on the budgeted
    /// account inside the configured window, sliced by the budget's scope.
    #[instrument(skip(self, query), fields(fiscal_year_id = %query.fiscal_year_id), err)]
    pub async fn budget_vs_actual(&self, query: &VarianceQuery) -> LedgerResult<BudgetVarianceReport> {
        let fiscal_year = self
            .store
            .get_fiscal_year(query.fiscal_year_id)
            .await?
            .ok_or_else(|| DomainError::not_found("fiscal year", query.fiscal_year_id))?;

        let budgets = self
            .store
            .list_budgets(&BudgetFilter {
                fiscal_year_id: Some(query.fiscal_year_id),
                period: query.period,
                branch_id: query.branch_id,
                account_id: query.account_id,
                active_only: true,
            })
            .await?;

        let account_ids: Vec<AccountId> = budgets.iter().map(|b| b.account_id).collect();
        let accounts = self.store.get_accounts(&account_ids).await?;

        let window = self.config.budget_actual_window;
        let mut lines = Vec::with_capacity(budgets.len());
        for budget in budgets {
            let account = accounts
                .get(&budget.account_id)
                .ok_or_else(|| DomainError::not_found("account", budget.account_id))?;
            let totals = self
                .store
                .posted_totals(
                    budget.account_id,
                    window.range(&fiscal_year, budget.period),
                    &ReportScope::from(budget.scope),
                )
                .await?;

            lines.push(BudgetVarianceLine {
                budget_id: budget.id,
                account_id: budget.account_id,
                account_code: account.code.clone(),
                account_name: account.name.clone(),
                period: budget.period,
                scope: budget.scope,
                variance: Variance::compute(budget.amount, totals.debit - totals.credit),
            });
        }

        let summary = Variance::total(lines.iter().map(|l| &l.variance));
        Ok(BudgetVarianceReport {
            fiscal_year_id: fiscal_year.id,
            window,
            lines,
            summary,
        })
    }
}
