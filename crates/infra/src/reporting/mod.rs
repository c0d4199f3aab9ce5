//! Read-side reports over posted journal lines.
//!
//! Nothing here writes: every report is a pure aggregation of the store's
//! posted-line queries and tolerates read-committed snapshots.

pub mod balances;
pub mod statements;
pub mod variance;

pub use balances::BalanceEngine;
pub use statements::{
    BalanceSheet, GeneralLedger, GeneralLedgerEntry, IncomeStatement, NET_INCOME_CODE,
    NET_INCOME_NAME, StatementGenerator, StatementLine, StatementSection, TrialBalance,
    TrialBalanceLine,
};
pub use variance::{BudgetVarianceEngine, BudgetVarianceLine, BudgetVarianceReport, VarianceQuery};
