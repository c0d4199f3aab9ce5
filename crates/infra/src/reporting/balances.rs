use std::sync::Arc;

use chrono::NaiveDate;
use tracing::instrument;

use fundledger_accounting::Account;
use fundledger_core::{AccountId, DateRange, DomainError, Money};

use crate::error::LedgerResult;
use crate::store::{LedgerStore, LineTotals, ReportScope};

/// Point-in-time and period balances computed from posted lines.
#[derive(Debug)]
pub struct BalanceEngine<S> {
    store: Arc<S>,
}

impl<S> Clone for BalanceEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: LedgerStore> BalanceEngine<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Balance of every posted line dated on or before `as_of`, positive on
    /// the account's normal side.
    #[instrument(skip(self, scope), err)]
    pub async fn account_balance(
        &self,
        account_id: AccountId,
        as_of: NaiveDate,
        scope: &ReportScope,
    ) -> LedgerResult<Money> {
        let account = self.account(account_id).await?;
        self.balance_of(&account, DateRange::up_to(as_of), scope)
            .await
    }

    /// Net movement over `start..=end`, signed like [`Self::account_balance`].
    /// An inverted range yields zero.
    #[instrument(skip(self, scope), err)]
    pub async fn period_balance(
        &self,
        account_id: AccountId,
        start: NaiveDate,
        end: NaiveDate,
        scope: &ReportScope,
    ) -> LedgerResult<Money> {
        let account = self.account(account_id).await?;
        self.balance_of(&account, DateRange::between(start, end), scope)
            .await
    }

    /// Raw debit and credit totals over `range`.
    #[instrument(skip(self, scope), err)]
    pub async fn movement(
        &self,
        account_id: AccountId,
        range: DateRange,
        scope: &ReportScope,
    ) -> LedgerResult<LineTotals> {
        self.account(account_id).await?;
        if range.is_empty() {
            return Ok(LineTotals::default());
        }
        Ok(self.store.posted_totals(account_id, range, scope).await?)
    }

    pub(crate) async fn balance_of(
        &self,
        account: &Account,
        range: DateRange,
        scope: &ReportScope,
    ) -> LedgerResult<Money> {
        if range.is_empty() {
            return Ok(Money::ZERO);
        }
        let totals = self.store.posted_totals(account.id, range, scope).await?;
        Ok(account.signed_balance(totals.debit, totals.credit))
    }

    async fn account(&self, id: AccountId) -> LedgerResult<Account> {
        self.store
            .get_account(id)
            .await?
            .ok_or_else(|| DomainError::not_found("account", id).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LedgerError;
    use crate::testing::{Ledger, date};
    use fundledger_core::ErrorKind;
    use proptest::prelude::*;

    #[tokio::test]
    async fn balances_are_signed_by_normal_side() {
        let ledger = Ledger::new().await;
        ledger.post(ledger.simple(date(2025, 1, 10), "1100", "4100", 50_000)).await;
        ledger.post(ledger.simple(date(2025, 1, 20), "5100", "1100", 20_000)).await;

        let engine = BalanceEngine::new(Arc::clone(&ledger.store));
        let all = ReportScope::all();
        let as_of = date(2025, 1, 31);

        let cash = engine.account_balance(ledger.account("1100"), as_of, &all).await.unwrap();
        let tuition = engine.account_balance(ledger.account("4100"), as_of, &all).await.unwrap();
        let salaries = engine.account_balance(ledger.account("5100"), as_of, &all).await.unwrap();
        assert_eq!(cash, Money::new(30_000));
        assert_eq!(tuition, Money::new(50_000));
        assert_eq!(salaries, Money::new(20_000));

        let movement = engine
            .movement(ledger.account("1100"), DateRange::up_to(as_of), &all)
            .await
            .unwrap();
        assert_eq!(movement.debit, Money::new(50_000));
        assert_eq!(movement.credit, Money::new(20_000));
    }

    #[tokio::test]
    async fn unposted_journals_do_not_count() {
        let ledger = Ledger::new().await;
        ledger.approved(ledger.simple(date(2025, 2, 1), "1100", "4100", 1_000)).await;

        let engine = BalanceEngine::new(Arc::clone(&ledger.store));
        let balance = engine
            .account_balance(ledger.account("1100"), date(2025, 12, 31), &ReportScope::all())
            .await
            .unwrap();
        assert_eq!(balance, Money::ZERO);
    }

    #[tokio::test]
    async fn inverted_period_is_zero() {
        let ledger = Ledger::new().await;
        ledger.post(ledger.simple(date(2025, 3, 5), "1100", "4100", 700)).await;

        let engine = BalanceEngine::new(Arc::clone(&ledger.store));
        let balance = engine
            .period_balance(
                ledger.account("1100"),
                date(2025, 3, 31),
                date(2025, 3, 1),
                &ReportScope::all(),
            )
            .await
            .unwrap();
        assert_eq!(balance, Money::ZERO);
    }

    #[tokio::test]
    async fn branch_scope_filters_lines() {
        let ledger = Ledger::new().await;
        ledger.post(ledger.simple(date(2025, 4, 1), "1100", "4100", 900)).await;

        let engine = BalanceEngine::new(Arc::clone(&ledger.store));
        let cash = ledger.account("1100");
        let as_of = date(2025, 4, 30);
        let own = engine
            .account_balance(cash, as_of, &ReportScope::branch(ledger.branch_id))
            .await
            .unwrap();
        let other = engine
            .account_balance(cash, as_of, &ReportScope::branch(fundledger_core::BranchId::new()))
            .await
            .unwrap();
        assert_eq!(own, Money::new(900));
        assert_eq!(other, Money::ZERO);
    }

    #[tokio::test]
    async fn unknown_account_is_not_found() {
        let ledger = Ledger::new().await;
        let engine = BalanceEngine::new(Arc::clone(&ledger.store));
        let err = engine
            .account_balance(AccountId::new(), date(2025, 1, 1), &ReportScope::all())
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Domain(_)));
        assert_eq!(err.kind(), Some(ErrorKind::NotFound));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn closing_minus_opening_is_period_movement(
            entries in prop::collection::vec((1u32..=28, 1i64..10_000, any::<bool>()), 1..8),
            t1 in 1u32..=27,
            gap in 1u32..=27,
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            runtime.block_on(async {
                let ledger = Ledger::new().await;
                for (day, amount, inflow) in &entries {
                    let (debit, credit) = if *inflow { ("1100", "4100") } else { ("5100", "1100") };
                    ledger.post(ledger.simple(date(2025, 6, *day), debit, credit, *amount)).await;
                }

                let engine = BalanceEngine::new(Arc::clone(&ledger.store));
                let all = ReportScope::all();
                let cash = ledger.account("1100");
                let t2 = (t1 + gap).min(28);
                let opening = engine.account_balance(cash, date(2025, 6, t1), &all).await.unwrap();
                let closing = engine.account_balance(cash, date(2025, 6, t2), &all).await.unwrap();
                let movement = engine
                    .period_balance(cash, date(2025, 6, t1 + 1), date(2025, 6, t2), &all)
                    .await
                    .unwrap();
                prop_assert_eq!(closing - opening, movement);
                Ok(())
            })?;
        }
    }
}
