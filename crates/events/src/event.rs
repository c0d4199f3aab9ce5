use chrono::{DateTime, Utc};

use fundledger_core::UserId;

/// A transition fact.
///
/// Events are immutable, versioned for schema evolution, and only ever
/// appended.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name (e.g. "ledger.journal.posted").
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32;

    /// Business time of the transition.
    fn occurred_at(&self) -> DateTime<Utc>;

    /// Who performed the transition.
    fn actor(&self) -> UserId;
}
