//! `fundledger-core`: ledger building blocks.
//!
//! Pure domain primitives shared by every crate: identifiers, money,
//! calendar periods, pagination, the domain error taxonomy and the
//! aggregate traits. No infrastructure concerns live here.

pub mod aggregate;
pub mod entity;
pub mod error;
pub mod id;
pub mod money;
pub mod page;
pub mod period;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use entity::Entity;
pub use error::{DomainError, DomainResult, ErrorKind};
pub use id::{
    AccountId, BranchId, BudgetId, DonorId, FiscalYearId, FundId, JournalId, JournalLineId,
    ProgramId, ProjectId, UserId,
};
pub use money::Money;
pub use page::{Page, PageLimits, PageRequest, PageWindow, Sort, SortDirection};
pub use period::{DateRange, Period, day_before};
