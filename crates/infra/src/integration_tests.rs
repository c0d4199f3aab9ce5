//! End-to-end tests over the in-memory store.
//!
//! Tests: service → store → balance engine / statements
//!
//! Verifies:
//! - Journals stay balanced and follow the review workflow
//! - Only posted lines reach balances and statements
//! - Reports agree with each other regardless of posting order

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use proptest::prelude::*;

    use fundledger_accounting::{
        AccountCategory, AccountType, BudgetScope, JournalStatus, LineInput, NewAccount, NewBudget,
        ParentRef, ReviewAction,
    };
    use fundledger_core::{DomainError, ErrorKind, Money, PageRequest};

    use crate::error::LedgerError;
    use crate::reporting::{BalanceEngine, BudgetVarianceEngine, StatementGenerator, VarianceQuery};
    use crate::store::{JournalFilter, LedgerStore, ReportScope};
    use crate::testing::{Ledger, date};

    #[tokio::test]
    async fn scenario_a_posted_tuition_reaches_balances_and_trial_balance() {
        let ledger = Ledger::new().await;
        let journal = ledger
            .post(ledger.simple(date(2025, 1, 15), "1100", "4100", 500_000))
            .await;
        assert_eq!(journal.status, JournalStatus::Posted);
        assert!(journal.is_posted);

        let today = Utc::now().date_naive();
        let balances = BalanceEngine::new(Arc::clone(&ledger.store));
        let all = ReportScope::all();
        assert_eq!(
            balances.account_balance(ledger.account("1100"), today, &all).await.unwrap(),
            Money::new(500_000)
        );
        assert_eq!(
            balances.account_balance(ledger.account("4100"), today, &all).await.unwrap(),
            Money::new(500_000)
        );

        let statements = StatementGenerator::new(Arc::clone(&ledger.store), Arc::clone(&ledger.config));
        let tb = statements.trial_balance(today, &all).await.unwrap();
        assert_eq!(tb.lines.len(), 2);
        assert_eq!(tb.lines[0].debit, Money::new(500_000));
        assert_eq!(tb.lines[1].credit, Money::new(500_000));
        assert!(tb.is_balanced);
    }

    #[tokio::test]
    async fn scenario_b_unbalanced_journal_is_not_persisted() {
        let ledger = Ledger::new().await;
        let draft = ledger.draft(
            date(2025, 1, 15),
            vec![
                LineInput::debit(ledger.account("1100"), 500_000),
                LineInput::credit(ledger.account("4100"), 400_000),
            ],
        );

        let err = ledger.journals.create(&ledger.maker, draft).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Domain(DomainError::Unbalanced { .. })
        ));

        let page = ledger
            .journals
            .list(&JournalFilter::default(), &PageRequest::default())
            .await
            .unwrap();
        assert_eq!(page.total, 0);
    }

    #[tokio::test]
    async fn scenario_c_budget_variance_for_january() {
        let ledger = Ledger::new().await;
        let fy = ledger
            .budgets
            .create_fiscal_year(&ledger.admin, "FY2025", date(2025, 1, 1), date(2025, 12, 31))
            .await
            .unwrap();
        ledger
            .budgets
            .create_budget(
                &ledger.admin,
                NewBudget {
                    fiscal_year_id: fy.id,
                    account_id: ledger.account("5100"),
                    period: "2025-01".parse().unwrap(),
                    amount: Money::new(1_000_000),
                    scope: BudgetScope::default(),
                    description: Some("Staff salaries".into()),
                },
            )
            .await
            .unwrap();
        ledger
            .post(ledger.simple(date(2025, 1, 20), "5100", "1100", 300_000))
            .await;

        let engine = BudgetVarianceEngine::new(Arc::clone(&ledger.store), Arc::clone(&ledger.config));
        let report = engine
            .budget_vs_actual(&VarianceQuery {
                period: Some("2025-01".parse().unwrap()),
                ..VarianceQuery::fiscal_year(fy.id)
            })
            .await
            .unwrap();

        let line = &report.lines[0].variance;
        assert_eq!(line.actual, Money::new(300_000));
        assert_eq!(line.variance, Money::new(700_000));
        assert!((line.variance_pct - 70.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn scenario_d_header_account_is_not_postable() {
        let ledger = Ledger::new().await;
        let draft = ledger.simple(date(2025, 1, 15), "1000", "4100", 100);
        let err = ledger.journals.create(&ledger.maker, draft).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Domain(DomainError::AccountNotPostable(_))
        ));
    }

    #[tokio::test]
    async fn self_review_is_always_rejected() {
        let ledger = Ledger::new().await;
        let journal = ledger
            .journals
            .create(&ledger.admin, ledger.simple(date(2025, 1, 2), "1100", "4100", 10))
            .await
            .unwrap();
        ledger
            .journals
            .submit_for_review(&ledger.admin, journal.id)
            .await
            .unwrap();

        for action in [ReviewAction::Approve, ReviewAction::Reject] {
            let err = ledger
                .journals
                .review(&ledger.admin, journal.id, action, None)
                .await
                .unwrap_err();
            assert_eq!(err, LedgerError::Domain(DomainError::SelfReview));
        }
    }

    #[tokio::test]
    async fn double_post_is_an_invalid_transition() {
        let ledger = Ledger::new().await;
        let journal = ledger
            .post(ledger.simple(date(2025, 1, 3), "1100", "4100", 250))
            .await;

        let err = ledger
            .journals
            .post(&ledger.checker, journal.id, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Domain(DomainError::InvalidTransition { operation: "post", .. })
        ));
    }

    #[tokio::test]
    async fn unpost_then_post_restores_the_same_statements() {
        let ledger = Ledger::new().await;
        ledger
            .post(ledger.simple(date(2025, 1, 3), "1100", "3100", 9_000))
            .await;
        let journal = ledger
            .post(ledger.simple(date(2025, 1, 4), "5200", "1100", 1_250))
            .await;

        let statements = StatementGenerator::new(Arc::clone(&ledger.store), Arc::clone(&ledger.config));
        let as_of = date(2025, 1, 31);
        let before = statements.trial_balance(as_of, &ReportScope::all()).await.unwrap();

        let unposted = ledger.journals.unpost(&ledger.checker, journal.id).await.unwrap();
        assert!(!unposted.is_posted);
        let during = statements.trial_balance(as_of, &ReportScope::all()).await.unwrap();
        assert_ne!(during, before);
        assert!(during.is_balanced);

        ledger
            .journals
            .post(&ledger.checker, journal.id, Utc::now())
            .await
            .unwrap();
        let after = statements.trial_balance(as_of, &ReportScope::all()).await.unwrap();
        assert_eq!(after, before);
    }

    #[tokio::test]
    async fn failed_import_leaves_the_chart_untouched() {
        let ledger = Ledger::new().await;
        let before = ledger.chart.tree().await.unwrap();

        let rows = vec![
            NewAccount::new("6000", "Programs", AccountType::Header, AccountCategory::Expense),
            NewAccount::new(
                "6100",
                "Field trips",
                AccountType::IncomeExpenseDetail,
                AccountCategory::Expense,
            )
            .with_parent(ParentRef::Code("6000".into())),
            // Clashes with the existing chart.
            NewAccount::new("1100", "Petty cash", AccountType::Detail, AccountCategory::Asset),
        ];
        let err = ledger.chart.bulk_import(&ledger.admin, rows).await.unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::Conflict));

        assert_eq!(ledger.chart.tree().await.unwrap(), before);
        assert!(ledger.store.get_account_by_code("6000").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn accounts_in_use_cannot_be_deleted() {
        let ledger = Ledger::new().await;

        let err = ledger
            .chart
            .delete(&ledger.admin, ledger.account("1000"))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Domain(DomainError::HasChildren(_))));

        // Any journal line counts, posted or not.
        ledger
            .journals
            .create(&ledger.maker, ledger.simple(date(2025, 1, 9), "1200", "4100", 5))
            .await
            .unwrap();
        let err = ledger
            .chart
            .delete(&ledger.admin, ledger.account("1200"))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Domain(DomainError::HasTransactions(_))));

        let fy = ledger
            .budgets
            .create_fiscal_year(&ledger.admin, "FY2025", date(2025, 1, 1), date(2025, 12, 31))
            .await
            .unwrap();
        ledger
            .budgets
            .create_budget(
                &ledger.admin,
                NewBudget {
                    fiscal_year_id: fy.id,
                    account_id: ledger.account("5200"),
                    period: "2025-03".parse().unwrap(),
                    amount: Money::new(1),
                    scope: BudgetScope::default(),
                    description: None,
                },
            )
            .await
            .unwrap();
        let err = ledger
            .chart
            .delete(&ledger.admin, ledger.account("5200"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::Conflict));

        ledger
            .chart
            .delete(&ledger.admin, ledger.account("2100"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn balance_sheet_and_income_statement_agree() {
        let ledger = Ledger::new().await;
        ledger.post(ledger.simple(date(2025, 1, 1), "1100", "3100", 80_000)).await;
        ledger.post(ledger.simple(date(2025, 2, 1), "1200", "4100", 30_000)).await;
        ledger.post(ledger.simple(date(2025, 2, 2), "5100", "2100", 12_000)).await;
        ledger.post(ledger.simple(date(2025, 2, 3), "5200", "1100", 3_000)).await;

        let statements = StatementGenerator::new(Arc::clone(&ledger.store), Arc::clone(&ledger.config));
        let all = ReportScope::all();
        let sheet = statements.balance_sheet(date(2025, 2, 28), &all).await.unwrap();
        let income = statements
            .income_statement(date(2025, 1, 1), date(2025, 2, 28), &all)
            .await
            .unwrap();

        assert_eq!(sheet.net_income, income.net_income);
        assert_eq!(income.net_income, Money::new(15_000));
        assert!(sheet.is_balanced);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(12))]

        #[test]
        fn trial_balance_is_order_independent(
            entries in prop::collection::vec(
                (
                    prop::sample::select(vec!["1100", "1200", "5100", "5200"]),
                    prop::sample::select(vec!["2100", "3100", "4100"]),
                    1i64..50_000,
                    1u32..=28,
                ),
                1..10,
            ),
            seed in any::<u64>(),
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            runtime.block_on(async {
                let mut shuffled = entries.clone();
                let len = shuffled.len();
                shuffled.rotate_left((seed % len as u64) as usize);
                shuffled.reverse();

                let mut reports = Vec::new();
                for order in [&entries, &shuffled] {
                    let ledger = Ledger::new().await;
                    for (debit, credit, amount, day) in order {
                        ledger.post(ledger.simple(date(2025, 3, *day), debit, credit, *amount)).await;
                    }
                    let statements =
                        StatementGenerator::new(Arc::clone(&ledger.store), Arc::clone(&ledger.config));
                    let tb = statements
                        .trial_balance(date(2025, 3, 31), &ReportScope::all())
                        .await
                        .unwrap();
                    prop_assert!(tb.is_balanced);
                    let totals: Vec<_> = tb
                        .lines
                        .iter()
                        .map(|l| (l.code.clone(), l.debit, l.credit))
                        .collect();
                    reports.push((totals, tb.total_debit));
                }
                prop_assert_eq!(&reports[0], &reports[1]);
                Ok(())
            })?;
        }
    }
}
