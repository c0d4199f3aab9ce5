//! `fundledger-auth`: the acting-user boundary consumed by ledger services.
//!
//! Authentication and role resolution happen upstream. This crate only
//! carries the already-resolved identity and permission set, and answers
//! "may this principal perform that operation".

pub mod authorize;
pub mod permissions;
pub mod principal;

pub use authorize::{AuthzError, authorize};
pub use permissions::Permission;
pub use principal::Principal;
