//! Listener lifecycle management.
//!
//! A [`ListenerSet`] owns the child-event subscriptions an entity holds on
//! one reference. It moves between two states:
//!
//! ```text
//! DETACHED --bind--> ATTACHED --release--> DETACHED
//! ```
//!
//! Binding always releases the previous subscriptions first, so an entity
//! never has two live generations. Every bind starts a new generation; a
//! notification that arrives for an older generation, or after release, is
//! discarded. This covers notifications the store queued before `off` ran.

use livetree_store::{ChildEvent, Reference, Snapshot};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

/// Handler invoked for one kind of child event.
pub type ChildHandler = Arc<dyn Fn(&Snapshot) + Send + Sync>;

/// Attachment state of a listener set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    /// No subscriptions are held.
    Detached,
    /// Subscriptions are registered on the current reference.
    Attached,
}

/// The three child handlers bound together.
#[derive(Clone)]
pub struct ChildHandlers {
    /// Handler for `child_added`.
    pub added: ChildHandler,
    /// Handler for `child_changed`.
    pub changed: ChildHandler,
    /// Handler for `child_removed`.
    pub removed: ChildHandler,
}

impl ChildHandlers {
    fn for_event(&self, event: ChildEvent) -> &ChildHandler {
        match event {
            ChildEvent::Added => &self.added,
            ChildEvent::Changed => &self.changed,
            ChildEvent::Removed => &self.removed,
        }
    }
}

struct Inner {
    state: ListenerState,
    reference: Option<Reference>,
    generation: u64,
}

impl Inner {
    fn is_current(&self, generation: u64) -> bool {
        self.state == ListenerState::Attached && self.generation == generation
    }
}

/// The subscriptions an entity holds on its current reference.
#[derive(Clone)]
pub struct ListenerSet {
    inner: Arc<Mutex<Inner>>,
}

impl ListenerSet {
    /// Creates a detached listener set.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: ListenerState::Detached,
                reference: None,
                generation: 0,
            })),
        }
    }

    /// Releases any previous subscriptions, then registers `handlers` on
    /// `reference`. Returns the new generation.
    pub fn bind(&self, reference: Reference, handlers: ChildHandlers) -> u64 {
        self.release();

        let generation = {
            let mut inner = self.inner.lock();
            inner.generation += 1;
            inner.state = ListenerState::Attached;
            inner.reference = Some(reference.clone());
            inner.generation
        };
        debug!(path = %reference.path(), generation, "bind listeners");

        for event in ChildEvent::ALL {
            let handler = Arc::clone(handlers.for_event(event));
            let guard: Weak<Mutex<Inner>> = Arc::downgrade(&self.inner);
            reference.on(
                event,
                Arc::new(move |snapshot: &Snapshot| {
                    let current = guard
                        .upgrade()
                        .is_some_and(|inner| inner.lock().is_current(generation));
                    if !current {
                        trace!(%event, key = ?snapshot.key(), generation, "discard stale notification");
                        return;
                    }
                    handler(snapshot);
                }),
            );
        }
        generation
    }

    /// Unregisters all subscriptions. Returns false if already detached.
    pub fn release(&self) -> bool {
        let reference = {
            let mut inner = self.inner.lock();
            inner.state = ListenerState::Detached;
            inner.reference.take()
        };
        match reference {
            Some(reference) => {
                reference.off();
                debug!(path = %reference.path(), "release listeners");
                true
            }
            None => false,
        }
    }

    /// Returns the current state.
    pub fn state(&self) -> ListenerState {
        self.inner.lock().state
    }

    /// Returns true if subscriptions are held.
    pub fn is_attached(&self) -> bool {
        self.state() == ListenerState::Attached
    }

    /// Returns the reference subscriptions are held on.
    pub fn reference(&self) -> Option<Reference> {
        self.inner.lock().reference.clone()
    }

    /// Returns the generation of the latest bind.
    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    /// Returns true if `generation` is the live, attached generation.
    pub fn is_current(&self, generation: u64) -> bool {
        self.inner.lock().is_current(generation)
    }
}

impl Default for ListenerSet {
    fn default() -> Self {
        Self::new()
    }
}
