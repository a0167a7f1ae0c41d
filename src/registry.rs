//! Concurrent registry of live sessions.
//!
//! Identifiers are reserved before the session they name exists:
//! [`SessionRegistry::preoccupy_id`] inserts a placeholder under a fresh
//! [`SessionId`], and [`SessionRegistry::add`] later fills it in. Placeholders
//! count towards [`len`](SessionRegistry::len) so connection limits see
//! sessions that are still being set up, but never appear in
//! [`all`](SessionRegistry::all).

use std::{fmt, sync::Arc};

use dashmap::{DashMap, mapref::entry::Entry};
use uuid::Uuid;

/// Number of fresh ids tried by [`SessionRegistry::preoccupy_id`].
pub const MAX_PREOCCUPY_ATTEMPTS: usize = 10;

/// Identifier assigned to a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a random (v4) identifier.
    #[must_use]
    pub fn generate() -> Self { Self(Uuid::new_v4()) }

    /// Return the inner UUID.
    #[must_use]
    pub fn as_uuid(&self) -> &Uuid { &self.0 }
}

impl From<Uuid> for SessionId {
    fn from(value: Uuid) -> Self { Self(value) }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { self.0.fmt(f) }
}

/// Concurrent map from [`SessionId`] to shared sessions.
pub struct SessionRegistry<T>(DashMap<SessionId, Option<Arc<T>>>);

impl<T> Default for SessionRegistry<T> {
    fn default() -> Self { Self(DashMap::new()) }
}

impl<T> fmt::Debug for SessionRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("len", &self.0.len())
            .finish()
    }
}

impl<T> SessionRegistry<T> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Reserve a fresh id by inserting a placeholder.
    ///
    /// Returns `None` if [`MAX_PREOCCUPY_ATTEMPTS`] generated ids all
    /// collided with existing entries.
    #[must_use]
    pub fn preoccupy_id(&self) -> Option<SessionId> { self.preoccupy_with(SessionId::generate) }

    pub(crate) fn preoccupy_with(&self, mut generate: impl FnMut() -> SessionId) -> Option<SessionId> {
        (0..MAX_PREOCCUPY_ATTEMPTS).find_map(|_| match self.0.entry(generate()) {
            Entry::Vacant(slot) => {
                let id = *slot.key();
                slot.insert(None);
                Some(id)
            }
            Entry::Occupied(_) => None,
        })
    }

    /// Register `session` under `id`.
    ///
    /// Succeeds when `id` is free or holds a placeholder; returns `false` if
    /// a live session already occupies it.
    pub fn add(&self, id: SessionId, session: Arc<T>) -> bool {
        match self.0.entry(id) {
            Entry::Vacant(slot) => {
                slot.insert(Some(session));
                true
            }
            Entry::Occupied(mut slot) if slot.get().is_none() => {
                slot.insert(Some(session));
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    /// Register `session` under `id`, replacing any previous entry.
    ///
    /// Returns the session that was replaced.
    pub fn set(&self, id: SessionId, session: Arc<T>) -> Option<Arc<T>> {
        self.0.insert(id, Some(session)).flatten()
    }

    /// Look up a live session.
    #[must_use]
    pub fn get(&self, id: &SessionId) -> Option<Arc<T>> {
        self.0.get(id).and_then(|entry| entry.value().clone())
    }

    /// Remove `id` whether it holds a session or a placeholder.
    ///
    /// Idempotent; returns the session if one was registered.
    pub fn remove(&self, id: &SessionId) -> Option<Arc<T>> {
        self.0.remove(id).and_then(|(_, session)| session)
    }

    /// Drop a reservation that was never filled in.
    ///
    /// Returns `false` (and leaves the entry alone) if a live session is
    /// registered under `id`.
    pub fn release(&self, id: &SessionId) -> bool {
        self.0.remove_if(id, |_, session| session.is_none()).is_some()
    }

    /// Returns `true` if `id` holds a session or a placeholder.
    #[must_use]
    pub fn contains(&self, id: &SessionId) -> bool { self.0.contains_key(id) }

    /// Snapshot of every live session.
    #[must_use]
    pub fn all(&self) -> Vec<Arc<T>> {
        self.0
            .iter()
            .filter_map(|entry| entry.value().clone())
            .collect()
    }

    /// Snapshot of the ids of every live session.
    #[must_use]
    pub fn ids(&self) -> Vec<SessionId> {
        self.0
            .iter()
            .filter(|entry| entry.value().is_some())
            .map(|entry| *entry.key())
            .collect()
    }

    /// Number of entries, reservations included.
    #[must_use]
    pub fn len(&self) -> usize { self.0.len() }

    /// Returns `true` when there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, thread};

    use rstest::{fixture, rstest};

    use super::*;

    #[fixture]
    fn registry() -> SessionRegistry<&'static str> { SessionRegistry::new() }

    #[rstest]
    fn reservation_is_filled_by_add(registry: SessionRegistry<&'static str>) {
        let id = registry.preoccupy_id().expect("reserve id");
        assert!(registry.contains(&id));
        assert!(registry.get(&id).is_none());
        assert_eq!(registry.len(), 1);
        assert!(registry.all().is_empty());

        assert!(registry.add(id, Arc::new("alpha")));
        assert_eq!(registry.get(&id).as_deref(), Some(&"alpha"));
        assert_eq!(registry.ids(), vec![id]);
    }

    #[rstest]
    fn add_refuses_live_entry(registry: SessionRegistry<&'static str>) {
        let id = SessionId::generate();
        assert!(registry.add(id, Arc::new("first")));
        assert!(!registry.add(id, Arc::new("second")));
        assert_eq!(registry.get(&id).as_deref(), Some(&"first"));

        let replaced = registry.set(id, Arc::new("third"));
        assert_eq!(replaced.as_deref(), Some(&"first"));
        assert_eq!(registry.get(&id).as_deref(), Some(&"third"));
    }

    #[rstest]
    fn remove_is_idempotent(registry: SessionRegistry<&'static str>) {
        let id = SessionId::generate();
        registry.add(id, Arc::new("gone"));
        assert_eq!(registry.remove(&id).as_deref(), Some(&"gone"));
        assert!(registry.remove(&id).is_none());
        assert!(registry.is_empty());
    }

    #[rstest]
    fn release_only_drops_placeholders(registry: SessionRegistry<&'static str>) {
        let reserved = registry.preoccupy_id().expect("reserve id");
        let live = SessionId::generate();
        registry.add(live, Arc::new("live"));

        assert!(registry.release(&reserved));
        assert!(!registry.release(&live));
        assert!(!registry.contains(&reserved));
        assert!(registry.contains(&live));
    }

    #[rstest]
    fn preoccupy_gives_up_after_repeated_collisions(registry: SessionRegistry<&'static str>) {
        let taken = SessionId::generate();
        registry.add(taken, Arc::new("taken"));
        let mut calls = 0;

        let reserved = registry.preoccupy_with(|| {
            calls += 1;
            taken
        });

        assert!(reserved.is_none());
        assert_eq!(calls, MAX_PREOCCUPY_ATTEMPTS);
    }

    #[test]
    fn concurrent_reservations_are_unique() {
        let registry = Arc::new(SessionRegistry::<()>::new());
        let workers: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    (0..250)
                        .map(|_| registry.preoccupy_id().expect("reserve id"))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for worker in workers {
            for id in worker.join().expect("worker panicked") {
                assert!(seen.insert(id), "duplicate id {id}");
            }
        }
        assert_eq!(seen.len(), 2000);
        assert_eq!(registry.len(), 2000);
    }
}
