//! Trial balance, balance sheet, income statement and general ledger.
//!
//! Every report is assembled from posted lines only. Statement sections use
//! the category's natural sign (assets and expenses positive when debit,
//! the rest positive when credit), so a contra account shows negative.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use fundledger_accounting::{Account, AccountCategory, NormalBalance};
use fundledger_core::{AccountId, DateRange, DomainError, JournalId, Money, day_before};

use crate::config::LedgerConfig;
use crate::error::LedgerResult;
use crate::reporting::BalanceEngine;
use crate::store::{AccountFilter, LedgerStore, LineTotals, ReportScope};

/// Code of the synthetic equity line carrying current-year earnings.
pub const NET_INCOME_CODE: &str = "NET_INCOME";
pub const NET_INCOME_NAME: &str = "Net Income (Current Year)";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialBalanceLine {
    pub account_id: AccountId,
    pub code: String,
    pub name: String,
    pub category: AccountCategory,
    pub debit: Money,
    pub credit: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialBalance {
    pub as_of: NaiveDate,
    pub lines: Vec<TrialBalanceLine>,
    pub total_debit: Money,
    pub total_credit: Money,
    pub difference: Money,
    pub is_balanced: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementLine {
    /// `None` for synthetic lines such as current-year net income.
    pub account_id: Option<AccountId>,
    pub code: String,
    pub name: String,
    pub amount: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementSection {
    pub category: AccountCategory,
    pub lines: Vec<StatementLine>,
    pub total: Money,
}

impl StatementSection {
    fn new(category: AccountCategory, lines: Vec<StatementLine>) -> Self {
        let total = lines.iter().map(|l| l.amount).sum();
        Self {
            category,
            lines,
            total,
        }
    }

    fn push(&mut self, line: StatementLine) {
        self.total += line.amount;
        self.lines.push(line);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSheet {
    pub as_of: NaiveDate,
    pub assets: StatementSection,
    pub liabilities: StatementSection,
    /// Includes the net income line.
    pub equity: StatementSection,
    pub net_income: Money,
    pub total_liabilities_and_equity: Money,
    pub is_balanced: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomeStatement {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub revenue: StatementSection,
    pub expenses: StatementSection,
    pub net_income: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneralLedgerEntry {
    pub journal_id: JournalId,
    pub journal_number: String,
    pub date: NaiveDate,
    pub description: String,
    pub debit: Money,
    pub credit: Money,
    /// Balance after this entry, on the account's normal side.
    pub balance: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneralLedger {
    pub account_id: AccountId,
    pub code: String,
    pub name: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub opening_balance: Money,
    pub entries: Vec<GeneralLedgerEntry>,
    pub total_debit: Money,
    pub total_credit: Money,
    pub closing_balance: Money,
}

/// Builds financial statements from the posted ledger.
#[derive(Debug)]
pub struct StatementGenerator<S> {
    store: Arc<S>,
    balances: BalanceEngine<S>,
    config: Arc<LedgerConfig>,
}

impl<S> Clone for StatementGenerator<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            balances: self.balances.clone(),
            config: Arc::clone(&self.config),
        }
    }
}

impl<S: LedgerStore> StatementGenerator<S> {
    pub fn new(store: Arc<S>, config: Arc<LedgerConfig>) -> Self {
        Self {
            balances: BalanceEngine::new(Arc::clone(&store)),
            store,
            config,
        }
    }

    /// Every detail account with a non-zero balance as of `as_of`, placed in
    /// the column of its normal side (the other one when negative).
    #[instrument(skip(self, scope), err)]
    pub async fn trial_balance(
        &self,
        as_of: NaiveDate,
        scope: &ReportScope,
    ) -> LedgerResult<TrialBalance> {
        let (accounts, totals) = self.detail_totals(DateRange::up_to(as_of), scope).await?;

        let mut lines = Vec::new();
        let (mut total_debit, mut total_credit) = (Money::ZERO, Money::ZERO);
        for account in accounts {
            let Some(t) = totals.get(&account.id) else {
                continue;
            };
            let balance = account.signed_balance(t.debit, t.credit);
            if balance.is_zero() {
                continue;
            }
            let on_debit_side =
                (account.normal_balance == NormalBalance::Debit) == balance.is_positive();
            let (debit, credit) = if on_debit_side {
                (balance.abs(), Money::ZERO)
            } else {
                (Money::ZERO, balance.abs())
            };
            total_debit += debit;
            total_credit += credit;
            lines.push(TrialBalanceLine {
                account_id: account.id,
                code: account.code,
                name: account.name,
                category: account.category,
                debit,
                credit,
            });
        }

        let difference = total_debit - total_credit;
        Ok(TrialBalance {
            as_of,
            lines,
            total_debit,
            total_credit,
            difference,
            is_balanced: difference.is_zero(),
        })
    }

    /// Assets, liabilities and equity as of `as_of`, with current-year net
    /// income carried as a synthetic equity line.
    #[instrument(skip(self, scope), err)]
    pub async fn balance_sheet(
        &self,
        as_of: NaiveDate,
        scope: &ReportScope,
    ) -> LedgerResult<BalanceSheet> {
        let (accounts, totals) = self.detail_totals(DateRange::up_to(as_of), scope).await?;
        let mut sections = sections_by_category(&accounts, &totals);

        let year_start = self.fiscal_year_start(as_of)?;
        let net_income = self.net_income(DateRange::between(year_start, as_of), scope).await?;

        let assets = sections.remove(&AccountCategory::Asset).unwrap_or_default();
        let liabilities = sections.remove(&AccountCategory::Liability).unwrap_or_default();
        let mut equity = StatementSection::new(
            AccountCategory::Equity,
            sections.remove(&AccountCategory::Equity).unwrap_or_default(),
        );
        equity.push(StatementLine {
            account_id: None,
            code: NET_INCOME_CODE.to_string(),
            name: NET_INCOME_NAME.to_string(),
            amount: net_income,
        });
        let assets = StatementSection::new(AccountCategory::Asset, assets);
        let liabilities = StatementSection::new(AccountCategory::Liability, liabilities);

        let total_liabilities_and_equity = liabilities.total + equity.total;
        Ok(BalanceSheet {
            as_of,
            is_balanced: assets.total == total_liabilities_and_equity,
            assets,
            liabilities,
            equity,
            net_income,
            total_liabilities_and_equity,
        })
    }

    /// Revenue and expenses over `start..=end`.
    #[instrument(skip(self, scope), err)]
    pub async fn income_statement(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        scope: &ReportScope,
    ) -> LedgerResult<IncomeStatement> {
        ensure_ordered(start, end)?;
        let (accounts, totals) = self.detail_totals(DateRange::between(start, end), scope).await?;
        let mut sections = sections_by_category(&accounts, &totals);

        let revenue = StatementSection::new(
            AccountCategory::Revenue,
            sections.remove(&AccountCategory::Revenue).unwrap_or_default(),
        );
        let expenses = StatementSection::new(
            AccountCategory::Expense,
            sections.remove(&AccountCategory::Expense).unwrap_or_default(),
        );
        Ok(IncomeStatement {
            start,
            end,
            net_income: revenue.total - expenses.total,
            revenue,
            expenses,
        })
    }

    /// Posted activity of one account over `start..=end` with a running
    /// balance carried forward from the day before `start`.
    #[instrument(skip(self, scope), err)]
    pub async fn general_ledger(
        &self,
        account_id: AccountId,
        start: NaiveDate,
        end: NaiveDate,
        scope: &ReportScope,
    ) -> LedgerResult<GeneralLedger> {
        ensure_ordered(start, end)?;
        let account = self
            .store
            .get_account(account_id)
            .await?
            .ok_or_else(|| DomainError::not_found("account", account_id))?;

        let opening_balance = if start == NaiveDate::MIN {
            Money::ZERO
        } else {
            self.balances
                .balance_of(&account, DateRange::up_to(day_before(start)), scope)
                .await?
        };

        let posted = self
            .store
            .posted_lines(account_id, DateRange::between(start, end), scope)
            .await?;

        let mut balance = opening_balance;
        let mut totals = LineTotals::default();
        let entries = posted
            .into_iter()
            .map(|line| {
                totals.debit += line.debit;
                totals.credit += line.credit;
                balance += account.signed_balance(line.debit, line.credit);
                GeneralLedgerEntry {
                    journal_id: line.journal_id,
                    journal_number: line.journal_number,
                    date: line.journal_date,
                    description: line.description,
                    debit: line.debit,
                    credit: line.credit,
                    balance,
                }
            })
            .collect();

        Ok(GeneralLedger {
            account_id: account.id,
            code: account.code,
            name: account.name,
            start,
            end,
            opening_balance,
            entries,
            total_debit: totals.debit,
            total_credit: totals.credit,
            closing_balance: balance,
        })
    }

    /// Revenue minus expense over `range`.
    async fn net_income(&self, range: DateRange, scope: &ReportScope) -> LedgerResult<Money> {
        let (accounts, totals) = self.detail_totals(range, scope).await?;
        let net = accounts
            .iter()
            .filter_map(|account| {
                let t = totals.get(&account.id)?;
                match account.category {
                    AccountCategory::Revenue => Some(natural_amount(account, t)),
                    AccountCategory::Expense => Some(-natural_amount(account, t)),
                    _ => None,
                }
            })
            .sum();
        Ok(net)
    }

    /// Detail accounts (active or not) in code order with their posted
    /// totals over `range`.
    async fn detail_totals(
        &self,
        range: DateRange,
        scope: &ReportScope,
    ) -> LedgerResult<(Vec<Account>, HashMap<AccountId, LineTotals>)> {
        let accounts = self.store.list_accounts(&AccountFilter::detail()).await?;
        let totals = if range.is_empty() {
            HashMap::new()
        } else {
            self.store.posted_totals_by_account(range, scope).await?
        };
        Ok((accounts, totals))
    }

    /// First day of the fiscal year containing `date`.
    fn fiscal_year_start(&self, date: NaiveDate) -> LedgerResult<NaiveDate> {
        let month = self.config.fiscal_year_start_month;
        let year = if date.month() >= month {
            date.year()
        } else {
            date.year() - 1
        };
        NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(|| {
            DomainError::validation(format!("invalid fiscal year start month {month}")).into()
        })
    }
}

fn ensure_ordered(start: NaiveDate, end: NaiveDate) -> LedgerResult<()> {
    if end < start {
        return Err(DomainError::validation(format!(
            "report range ends ({end}) before it starts ({start})"
        ))
        .into());
    }
    Ok(())
}

fn natural_amount(account: &Account, totals: &LineTotals) -> Money {
    account
        .category
        .default_normal_balance()
        .signed(totals.debit, totals.credit)
}

/// Non-zero statement lines grouped by category, in account code order.
fn sections_by_category(
    accounts: &[Account],
    totals: &HashMap<AccountId, LineTotals>,
) -> HashMap<AccountCategory, Vec<StatementLine>> {
    let mut sections: HashMap<AccountCategory, Vec<StatementLine>> = HashMap::new();
    for account in accounts {
        let Some(t) = totals.get(&account.id) else {
            continue;
        };
        let amount = natural_amount(account, t);
        if amount.is_zero() {
            continue;
        }
        sections.entry(account.category).or_default().push(StatementLine {
            account_id: Some(account.id),
            code: account.code.clone(),
            name: account.name.clone(),
            amount,
        });
    }
    sections
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Ledger, date};
    use fundledger_accounting::LineInput;

    fn generator(ledger: &Ledger) -> StatementGenerator<crate::store::InMemoryLedgerStore> {
        StatementGenerator::new(Arc::clone(&ledger.store), Arc::clone(&ledger.config))
    }

    #[tokio::test]
    async fn trial_balance_puts_balances_on_normal_side() {
        let ledger = Ledger::new().await;
        ledger.post(ledger.simple(date(2025, 1, 5), "1100", "3100", 100_000)).await;
        ledger.post(ledger.simple(date(2025, 1, 6), "1200", "4100", 40_000)).await;
        ledger.post(ledger.simple(date(2025, 1, 7), "5100", "1100", 15_000)).await;

        let tb = generator(&ledger)
            .trial_balance(date(2025, 1, 31), &ReportScope::all())
            .await
            .unwrap();

        let codes: Vec<_> = tb.lines.iter().map(|l| l.code.as_str()).collect();
        assert_eq!(codes, ["1100", "1200", "3100", "4100", "5100"]);
        let cash = &tb.lines[0];
        assert_eq!((cash.debit, cash.credit), (Money::new(85_000), Money::ZERO));
        let equity = &tb.lines[2];
        assert_eq!((equity.debit, equity.credit), (Money::ZERO, Money::new(100_000)));
        assert_eq!(tb.total_debit, Money::new(140_000));
        assert!(tb.is_balanced);
        assert_eq!(tb.difference, Money::ZERO);
    }

    #[tokio::test]
    async fn overdrawn_account_flips_column() {
        let ledger = Ledger::new().await;
        ledger.post(ledger.simple(date(2025, 2, 1), "5100", "1100", 3_000)).await;

        let tb = generator(&ledger)
            .trial_balance(date(2025, 2, 28), &ReportScope::all())
            .await
            .unwrap();
        let cash = tb.lines.iter().find(|l| l.code == "1100").unwrap();
        assert_eq!((cash.debit, cash.credit), (Money::ZERO, Money::new(3_000)));
        assert!(tb.is_balanced);
    }

    #[tokio::test]
    async fn balance_sheet_carries_net_income() {
        let ledger = Ledger::new().await;
        ledger.post(ledger.simple(date(2024, 12, 1), "1100", "3100", 50_000)).await;
        ledger.post(ledger.simple(date(2025, 3, 1), "1100", "4100", 20_000)).await;
        ledger.post(ledger.simple(date(2025, 3, 2), "5200", "2100", 4_000)).await;

        let sheet = generator(&ledger)
            .balance_sheet(date(2025, 3, 31), &ReportScope::all())
            .await
            .unwrap();

        assert_eq!(sheet.assets.total, Money::new(70_000));
        assert_eq!(sheet.liabilities.total, Money::new(4_000));
        assert_eq!(sheet.net_income, Money::new(16_000));
        let last = sheet.equity.lines.last().unwrap();
        assert_eq!(last.code, NET_INCOME_CODE);
        assert_eq!(last.account_id, None);
        assert_eq!(sheet.equity.total, Money::new(66_000));
        assert!(sheet.is_balanced);
    }

    #[tokio::test]
    async fn net_income_follows_configured_year_start() {
        let config = LedgerConfig {
            fiscal_year_start_month: 7,
            ..LedgerConfig::default()
        };
        let ledger = Ledger::with_config(config).await;
        ledger.post(ledger.simple(date(2025, 6, 30), "1100", "4100", 1_000)).await;
        ledger.post(ledger.simple(date(2025, 7, 1), "1100", "4100", 250)).await;

        let sheet = generator(&ledger)
            .balance_sheet(date(2025, 8, 1), &ReportScope::all())
            .await
            .unwrap();
        assert_eq!(sheet.net_income, Money::new(250));
    }

    #[tokio::test]
    async fn income_statement_nets_revenue_and_expense() {
        let ledger = Ledger::new().await;
        ledger.post(ledger.simple(date(2025, 4, 1), "1100", "4100", 9_000)).await;
        ledger.post(ledger.simple(date(2025, 4, 2), "5100", "1100", 2_500)).await;
        ledger.post(ledger.simple(date(2025, 4, 3), "5200", "1100", 500)).await;
        ledger.post(ledger.simple(date(2025, 5, 1), "5100", "1100", 7_000)).await;

        let statement = generator(&ledger)
            .income_statement(date(2025, 4, 1), date(2025, 4, 30), &ReportScope::all())
            .await
            .unwrap();
        assert_eq!(statement.revenue.total, Money::new(9_000));
        assert_eq!(statement.expenses.total, Money::new(3_000));
        assert_eq!(statement.expenses.lines.len(), 2);
        assert_eq!(statement.net_income, Money::new(6_000));
    }

    #[tokio::test]
    async fn inverted_report_range_is_rejected() {
        let ledger = Ledger::new().await;
        let err = generator(&ledger)
            .income_statement(date(2025, 4, 30), date(2025, 4, 1), &ReportScope::all())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), Some(fundledger_core::ErrorKind::Invalid));
    }

    #[tokio::test]
    async fn general_ledger_runs_from_opening_balance() {
        let ledger = Ledger::new().await;
        ledger.post(ledger.simple(date(2025, 1, 15), "1100", "3100", 10_000)).await;
        ledger.post(ledger.simple(date(2025, 2, 3), "1100", "4100", 2_000)).await;
        ledger
            .post(ledger.draft(
                date(2025, 2, 10),
                vec![
                    LineInput::debit(ledger.account("5100"), 1_500),
                    LineInput::debit(ledger.account("5200"), 500),
                    LineInput::credit(ledger.account("1100"), 2_000),
                ],
            ))
            .await;
        ledger.post(ledger.simple(date(2025, 3, 1), "1100", "4100", 999)).await;

        let gl = generator(&ledger)
            .general_ledger(
                ledger.account("1100"),
                date(2025, 2, 1),
                date(2025, 2, 28),
                &ReportScope::all(),
            )
            .await
            .unwrap();

        assert_eq!(gl.opening_balance, Money::new(10_000));
        let running: Vec<_> = gl.entries.iter().map(|e| e.balance).collect();
        assert_eq!(running, [Money::new(12_000), Money::new(10_000)]);
        assert_eq!(gl.total_debit, Money::new(2_000));
        assert_eq!(gl.total_credit, Money::new(2_000));
        assert_eq!(gl.closing_balance, Money::new(10_000));
        assert_eq!(gl.entries[0].date, date(2025, 2, 3));
    }
}
