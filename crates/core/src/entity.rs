//! Entity trait: identity that survives state changes.

/// Implemented by ledger records addressed by id (accounts, budgets, fiscal
/// years, dimension tags).
pub trait Entity {
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;
}
