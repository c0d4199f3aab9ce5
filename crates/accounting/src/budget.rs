//! Fiscal years, budget allocations and variance arithmetic.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use fundledger_core::{
    AccountId, BranchId, BudgetId, DateRange, DomainError, DomainResult, Entity, FiscalYearId,
    FundId, Money, Period, ProgramId, UserId,
};

use crate::account::{Account, AccountCategory};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiscalYear {
    pub id: FiscalYearId,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub is_current: bool,
    pub is_closed: bool,
    pub closed_at: Option<DateTime<Utc>>,
    pub closed_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

impl Entity for FiscalYear {
    type Id = FiscalYearId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl FiscalYear {
    pub fn new(
        name: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let name = name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("fiscal year name is required"));
        }
        if end_date < start_date {
            return Err(DomainError::validation(format!(
                "fiscal year {name} ends before it starts"
            )));
        }
        Ok(Self {
            id: FiscalYearId::new(),
            name: name.to_string(),
            start_date,
            end_date,
            is_current: false,
            is_closed: false,
            closed_at: None,
            closed_by: None,
            created_at: now,
        })
    }

    pub fn range(&self) -> DateRange {
        DateRange::between(self.start_date, self.end_date)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.range().contains(date)
    }

    pub fn ensure_open(&self) -> DomainResult<()> {
        if self.is_closed {
            return Err(DomainError::FiscalYearClosed(self.name.clone()));
        }
        Ok(())
    }

    pub fn close(&mut self, actor: UserId, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_open()?;
        self.is_closed = true;
        self.is_current = false;
        self.closed_at = Some(now);
        self.closed_by = Some(actor);
        Ok(())
    }
}

/// Optional slicing of a budget (and of its actual spend).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BudgetScope {
    #[serde(default)]
    pub branch_id: Option<BranchId>,
    #[serde(default)]
    pub fund_id: Option<FundId>,
    #[serde(default)]
    pub program_id: Option<ProgramId>,
}

/// Uniqueness key: at most one active budget per key. Absent scope members
/// match only other absent members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BudgetKey {
    pub account_id: AccountId,
    pub period: Period,
    pub scope: BudgetScope,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Budget {
    pub id: BudgetId,
    pub fiscal_year_id: FiscalYearId,
    pub account_id: AccountId,
    pub period: Period,
    pub amount: Money,
    #[serde(flatten)]
    pub scope: BudgetScope,
    pub description: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity for Budget {
    type Id = BudgetId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBudget {
    pub fiscal_year_id: FiscalYearId,
    pub account_id: AccountId,
    pub period: Period,
    pub amount: Money,
    #[serde(flatten)]
    pub scope: BudgetScope,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetUpdate {
    #[serde(default)]
    pub amount: Option<Money>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

impl Budget {
    /// Build a budget after the fiscal year and account were resolved.
    /// Uniqueness of the key is checked by the store.
    pub fn create(
        new: NewBudget,
        fiscal_year: &FiscalYear,
        account: &Account,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        fiscal_year.ensure_open()?;
        if account.category != AccountCategory::Expense {
            return Err(DomainError::InvalidAccountCategory {
                code: account.code.clone(),
                category: account.category.to_string(),
            });
        }
        ensure_amount(new.amount)?;
        let period_range = new.period.range();
        if !fiscal_year.contains(new.period.first_day()) && !fiscal_year.contains(period_range.end)
        {
            return Err(DomainError::validation(format!(
                "period {} lies outside fiscal year {}",
                new.period, fiscal_year.name
            )));
        }

        Ok(Self {
            id: BudgetId::new(),
            fiscal_year_id: fiscal_year.id,
            account_id: account.id,
            period: new.period,
            amount: new.amount,
            scope: new.scope,
            description: new
                .description
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty()),
            is_active: true,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn key(&self) -> BudgetKey {
        BudgetKey {
            account_id: self.account_id,
            period: self.period,
            scope: self.scope,
        }
    }

    pub fn apply_update(
        &mut self,
        update: BudgetUpdate,
        fiscal_year: &FiscalYear,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        fiscal_year.ensure_open()?;
        if let Some(amount) = update.amount {
            ensure_amount(amount)?;
            self.amount = amount;
        }
        if let Some(description) = update.description {
            let description = description.trim().to_string();
            self.description = (!description.is_empty()).then_some(description);
        }
        if let Some(is_active) = update.is_active {
            self.is_active = is_active;
        }
        self.updated_at = now;
        Ok(())
    }
}

fn ensure_amount(amount: Money) -> DomainResult<()> {
    if amount.is_negative() {
        return Err(DomainError::validation("budget amount cannot be negative"));
    }
    Ok(())
}

/// Window over which a budget's actual spend is accumulated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActualWindow {
    /// Fiscal year start through the end of the budget period.
    #[default]
    YearToDate,
    /// The budget period only.
    Period,
}

impl ActualWindow {
    pub fn range(self, fiscal_year: &FiscalYear, period: Period) -> DateRange {
        match self {
            ActualWindow::YearToDate => DateRange::between(fiscal_year.start_date, period.last_day()),
            ActualWindow::Period => period.range(),
        }
    }
}

impl core::str::FromStr for ActualWindow {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "year_to_date" | "ytd" => Ok(ActualWindow::YearToDate),
            "period" => Ok(ActualWindow::Period),
            other => Err(DomainError::validation(format!(
                "unknown budget actual window: {other}"
            ))),
        }
    }
}

/// Budget against actual for one allocation or a total.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Variance {
    pub budget: Money,
    pub actual: Money,
    pub variance: Money,
    /// `variance / budget * 100`, 0 for a zero budget.
    pub variance_pct: f64,
}

impl Variance {
    pub fn compute(budget: Money, actual: Money) -> Self {
        let variance = budget - actual;
        Self {
            budget,
            actual,
            variance,
            variance_pct: variance.percent_of(budget),
        }
    }

    /// Totals over several lines, with the percentage recomputed on the sums.
    pub fn total<'a>(lines: impl IntoIterator<Item = &'a Variance>) -> Self {
        let (budget, actual) = lines
            .into_iter()
            .fold((Money::ZERO, Money::ZERO), |(b, a), line| {
                (b + line.budget, a + line.actual)
            });
        Self::compute(budget, actual)
    }
}
