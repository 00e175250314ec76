//! Basis-t: the revision of the graph store.
//!
//! Every mutation of a [`GraphStore`](crate::GraphStore) advances its
//! revision by one, so a value read at one basis can be compared against
//! the store it came from.

use serde::{Deserialize, Serialize};

/// A point in the life of a graph store.
///
/// Revisions only grow; a higher revision means a later state.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default, Serialize, Deserialize)]
pub struct Revision(u64);

impl Revision {
    /// The revision of a store nothing has been merged into.
    pub const INITIAL: Self = Self(0);

    #[inline]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// The revision following this one.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    #[inline]
    pub const fn is_newer_than(self, other: Self) -> bool {
        self.0 > other.0
    }
}
