//! Releasable entities and ownership.

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a synced entity, used as the owner
/// back-reference in the ownership tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityToken(u64);

impl EntityToken {
    /// Allocates a fresh token.
    pub(crate) fn next() -> Self {
        Self(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// How far a release reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReleaseMode {
    /// Release only the entity's own listeners.
    #[default]
    Shallow,
    /// Also release every descendant still owned by the entity,
    /// depth-first: child collections, then child models.
    Cascade,
}

/// An entity holding remote listeners that can be released.
///
/// Ownership trees are assumed to be acyclic; cycles are not detected.
pub trait Releasable: Send + Sync {
    /// The entity's identity.
    fn token(&self) -> EntityToken;

    /// The token of the entity currently owning this one, if any.
    fn owner(&self) -> Option<EntityToken>;

    /// Releases listeners. Releasing a detached entity is a no-op.
    fn release_with(&self, mode: ReleaseMode);

    /// Releases this entity's own listeners.
    fn release(&self) {
        self.release_with(ReleaseMode::Shallow);
    }

    /// Releases this entity and everything it still owns.
    fn release_cascade(&self) {
        self.release_with(ReleaseMode::Cascade);
    }
}

/// Releases (with cascade) each child whose owner is still `owner`.
/// Children that were re-parented are left alone.
pub(crate) fn release_owned<'a, I>(owner: EntityToken, children: I)
where
    I: IntoIterator<Item = &'a dyn Releasable>,
{
    for child in children {
        if child.owner() == Some(owner) {
            child.release_with(ReleaseMode::Cascade);
        }
    }
}
