//! IC states

use serde::{Deserialize, Serialize};

/// State of one feedback slot
///
/// Slots only move forward through this lattice. `RecomputeHandler` is a
/// transient state entered while a monomorphic or polymorphic site
/// re-validates the handler for a shape it already knows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IcState {
    /// Never executed
    #[default]
    Uninitialized,
    /// Executed once; nothing cached yet
    Premonomorphic,
    /// One shape cached
    Monomorphic,
    /// Re-validating a cached handler
    RecomputeHandler,
    /// Up to the configured number of shapes cached
    Polymorphic,
    /// Gave up tracking shapes; uses the stub cache
    Megamorphic,
    /// Every access goes to the runtime
    Generic,
}

impl IcState {
    /// Single character used in IC traces
    pub fn mark(self) -> char {
        match self {
            IcState::Uninitialized => '0',
            IcState::Premonomorphic => '.',
            IcState::Monomorphic => '1',
            IcState::RecomputeHandler => '^',
            IcState::Polymorphic => 'P',
            IcState::Megamorphic => 'N',
            IcState::Generic => 'G',
        }
    }

    /// Position in the lattice. `Monomorphic` and `RecomputeHandler`
    /// share a level.
    pub fn level(self) -> u8 {
        match self {
            IcState::Uninitialized => 0,
            IcState::Premonomorphic => 1,
            IcState::Monomorphic | IcState::RecomputeHandler => 2,
            IcState::Polymorphic => 3,
            IcState::Megamorphic => 4,
            IcState::Generic => 5,
        }
    }

    /// Whether the slot remembers specific shapes
    pub fn is_shape_specific(self) -> bool {
        matches!(
            self,
            IcState::Monomorphic | IcState::RecomputeHandler | IcState::Polymorphic
        )
    }
}

impl std::fmt::Display for IcState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.mark())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marks() {
        let marks: String = [
            IcState::Uninitialized,
            IcState::Premonomorphic,
            IcState::Monomorphic,
            IcState::RecomputeHandler,
            IcState::Polymorphic,
            IcState::Megamorphic,
            IcState::Generic,
        ]
        .iter()
        .map(|s| s.mark())
        .collect();
        assert_eq!(marks, "0.1^PNG");
    }

    #[test]
    fn test_levels_are_monotonic() {
        assert!(IcState::Premonomorphic.level() < IcState::Monomorphic.level());
        assert_eq!(IcState::Monomorphic.level(), IcState::RecomputeHandler.level());
        assert!(IcState::Polymorphic.level() < IcState::Megamorphic.level());
    }
}
