//! Accounting domain: chart of accounts, journals, fiscal years and budgets.
//!
//! Pure domain logic only: no IO, no persistence. Services in
//! `fundledger-infra` load state, run these rules, and store the result.

pub mod account;
pub mod budget;
pub mod dimension;
pub mod import;
pub mod journal;
pub mod numbering;

pub use account::{
    Account, AccountCategory, AccountNode, AccountType, AccountUpdate, NewAccount, NormalBalance,
    ParentRef, build_tree,
};
pub use budget::{
    ActualWindow, Budget, BudgetKey, BudgetScope, BudgetUpdate, FiscalYear, NewBudget, Variance,
};
pub use dimension::{Donor, DonorKind, Fund, FundRestriction, Program};
pub use import::{LegacyAccountRow, from_legacy_rows, plan_import};
pub use journal::{
    CreateJournal, DeleteJournal, Journal, JournalCommand, JournalEvent, JournalLine,
    JournalStatus, LineDimensions, LineInput, PostJournal, ReviewAction, ReviewJournal,
    SubmitJournal, UnpostJournal, UpdateJournal, ValidatedLines,
};
pub use numbering::{SequenceKey, parse_number};
