//! Write-side ledger services.
//!
//! Each service authorizes the acting principal, runs the domain rules from
//! `fundledger-accounting`, and persists through a [`LedgerStore`].
//!
//! [`LedgerStore`]: crate::store::LedgerStore

pub mod accounts;
pub mod budgets;
pub mod dimensions;
pub mod journals;

pub use accounts::ChartOfAccounts;
pub use budgets::BudgetService;
pub use dimensions::DimensionService;
pub use journals::{JournalChanges, JournalDraft, JournalService};
