//! `fundledger-events`: transition records for the append-only audit log.
//!
//! Ledger rows hold current state; every accepted transition is also kept
//! as an immutable [`EventEnvelope`] so a journal's history can be replayed.

pub mod envelope;
pub mod event;

pub use envelope::EventEnvelope;
pub use event::Event;
