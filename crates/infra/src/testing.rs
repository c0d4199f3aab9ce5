//! Shared fixture for service and report tests: an in-memory ledger with a
//! small school chart of accounts and helpers that drive journals through
//! the full maker/checker lifecycle.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};

use fundledger_accounting::{
    AccountCategory, AccountType, Journal, LineInput, NewAccount, ParentRef, ReviewAction,
};
use fundledger_auth::{Permission, Principal};
use fundledger_core::{AccountId, BranchId, UserId};

use crate::config::LedgerConfig;
use crate::services::{BudgetService, ChartOfAccounts, JournalDraft, JournalService};
use crate::store::{Branch, InMemoryLedgerStore};

pub(crate) struct Ledger {
    pub store: Arc<InMemoryLedgerStore>,
    pub config: Arc<LedgerConfig>,
    pub chart: ChartOfAccounts<InMemoryLedgerStore>,
    pub journals: JournalService<InMemoryLedgerStore, InMemoryLedgerStore>,
    pub budgets: BudgetService<InMemoryLedgerStore>,
    pub branch_id: BranchId,
    pub maker: Principal,
    pub checker: Principal,
    pub admin: Principal,
    accounts: HashMap<&'static str, AccountId>,
}

/// Codes of the fixture chart: (code, parent, type, category).
const CHART: &[(&str, Option<&str>, AccountType, AccountCategory)] = &[
    ("1000", None, AccountType::Header, AccountCategory::Asset),
    ("1100", Some("1000"), AccountType::Detail, AccountCategory::Asset),
    ("1200", Some("1000"), AccountType::Detail, AccountCategory::Asset),
    ("2000", None, AccountType::Header, AccountCategory::Liability),
    ("2100", Some("2000"), AccountType::Detail, AccountCategory::Liability),
    ("3000", None, AccountType::Header, AccountCategory::Equity),
    ("3100", Some("3000"), AccountType::RetainedEarnings, AccountCategory::Equity),
    ("4000", None, AccountType::Header, AccountCategory::Revenue),
    ("4100", Some("4000"), AccountType::IncomeExpenseDetail, AccountCategory::Revenue),
    ("5000", None, AccountType::Header, AccountCategory::Expense),
    ("5100", Some("5000"), AccountType::IncomeExpenseDetail, AccountCategory::Expense),
    ("5200", Some("5000"), AccountType::IncomeExpenseDetail, AccountCategory::Expense),
];

pub(crate) fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

impl Ledger {
    pub async fn new() -> Self {
        Self::with_config(LedgerConfig::default()).await
    }

    pub async fn with_config(config: LedgerConfig) -> Self {
        let store = Arc::new(InMemoryLedgerStore::new());
        let config = Arc::new(config);
        let branch_id = BranchId::new();
        store
            .insert_branch(Branch {
                id: branch_id,
                code: "HQ".into(),
                name: "Head Office".into(),
            })
            .unwrap();

        let chart = ChartOfAccounts::new(Arc::clone(&store), Arc::clone(&config));
        let admin = Principal::superuser(UserId::new());
        let rows = CHART
            .iter()
            .map(|(code, parent, account_type, category)| {
                let row = NewAccount::new(*code, format!("Account {code}"), *account_type, *category);
                match parent {
                    Some(parent) => row.with_parent(ParentRef::Code(parent.to_string())),
                    None => row,
                }
            })
            .collect();
        let imported = chart.bulk_import(&admin, rows).await.unwrap();
        let accounts = CHART
            .iter()
            .map(|(code, ..)| {
                let id = imported.iter().find(|a| a.code == *code).unwrap().id;
                (*code, id)
            })
            .collect();

        Self {
            journals: JournalService::new(
                Arc::clone(&store),
                Arc::clone(&store),
                Arc::clone(&config),
            ),
            budgets: BudgetService::new(Arc::clone(&store), Arc::clone(&config)),
            chart,
            store,
            config,
            branch_id,
            maker: Principal::new(UserId::new(), [Permission::JOURNAL_WRITE]),
            checker: Principal::new(
                UserId::new(),
                [
                    Permission::JOURNAL_REVIEW,
                    Permission::JOURNAL_POST,
                    Permission::JOURNAL_UNPOST,
                ],
            ),
            admin,
            accounts,
        }
    }

    pub fn account(&self, code: &str) -> AccountId {
        self.accounts[code]
    }

    pub fn draft(&self, date: NaiveDate, lines: Vec<LineInput>) -> JournalDraft {
        JournalDraft {
            branch_id: self.branch_id,
            date,
            description: format!("Entry of {date}"),
            reference: None,
            lines,
        }
    }

    /// Two-line entry debiting one account and crediting another.
    pub fn simple(&self, date: NaiveDate, debit: &str, credit: &str, amount: i64) -> JournalDraft {
        self.draft(
            date,
            vec![
                LineInput::debit(self.account(debit), amount),
                LineInput::credit(self.account(credit), amount),
            ],
        )
    }

    /// Create, submit and approve a journal.
    pub async fn approved(&self, draft: JournalDraft) -> Journal {
        let journal = self.journals.create(&self.maker, draft).await.unwrap();
        self.journals
            .submit_for_review(&self.maker, journal.id)
            .await
            .unwrap();
        self.journals
            .review(&self.checker, journal.id, ReviewAction::Approve, None)
            .await
            .unwrap()
    }

    /// Drive a journal all the way to `posted`.
    pub async fn post(&self, draft: JournalDraft) -> Journal {
        let journal = self.approved(draft).await;
        self.journals
            .post(&self.checker, journal.id, Utc::now())
            .await
            .unwrap()
    }
}
