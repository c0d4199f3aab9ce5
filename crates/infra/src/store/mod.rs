//! Ledger persistence boundary.
//!
//! Services talk to [`LedgerStore`]; the in-memory implementation backs
//! tests and embedding, the Postgres one production.

pub mod in_memory;
pub mod postgres;
pub mod query;
pub mod r#trait;

pub use in_memory::InMemoryLedgerStore;
pub use postgres::PostgresLedgerStore;
pub use query::{
    AccountFilter, BudgetFilter, JournalFilter, LineTotals, LineWrite, PostedLine, ReportScope,
    YearCheck,
};
pub use r#trait::{Branch, BranchDirectory, LedgerStore, StoreError, StoredJournalEvent};
