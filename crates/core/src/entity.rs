//! Entity trait: identity that survives state changes.

/// Entity marker + minimal interface.
///
/// Entities that are not aggregate roots (stock movements, for example) are
/// still told apart by id even when every other field is equal.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn entity_id(&self) -> &Self::Id;
}
