//! Ledger infrastructure: persistence, write-side services, reports and
//! runtime configuration.
//!
//! Domain rules live in `fundledger-accounting`; this crate loads state
//! through a [`store::LedgerStore`], applies those rules on behalf of an
//! authorized [`fundledger_auth::Principal`], and writes the result back
//! atomically.

pub mod config;
pub mod error;
pub mod reporting;
pub mod services;
pub mod store;

#[cfg(test)]
mod integration_tests;
#[cfg(test)]
mod testing;

pub use config::{ConfigError, LedgerConfig};
pub use error::{LedgerError, LedgerResult};
pub use reporting::{BalanceEngine, BudgetVarianceEngine, StatementGenerator};
pub use services::{BudgetService, ChartOfAccounts, DimensionService, JournalService};
pub use store::{BranchDirectory, InMemoryLedgerStore, LedgerStore, PostgresLedgerStore, StoreError};
