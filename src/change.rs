//! A single atomic mutation of one keyed item.

use serde::{Deserialize, Serialize};

/// The reason a [`Change`] was produced.
///
/// `Moved` only ever appears in a change set carrying sort order
/// (`ChangeSetKind::Sorted`/`Paged`/`Virtual`); unsorted change sets never emit it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeReason {
    /// A new key entered the collection.
    Add,
    /// An existing key's value was replaced.
    Update,
    /// A key left the collection.
    Remove,
    /// The key's identity and value reference are unchanged, but derived
    /// state may have changed (an explicit re-evaluation request).
    Refresh,
    /// Sorted-only: the key's value is unchanged but its index moved.
    Moved,
}

impl ChangeReason {
    /// Whether this reason corresponds to the key being present in the
    /// collection after the change (`Add`, `Update`, `Refresh`, `Moved`).
    #[must_use]
    pub fn is_present_after(self) -> bool {
        !matches!(self, ChangeReason::Remove)
    }
}

/// One atomic mutation of one keyed item `K -> V`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change<K, V> {
    reason: ChangeReason,
    key: K,
    current: V,
    previous: Option<V>,
    current_index: Option<usize>,
    previous_index: Option<usize>,
}

impl<K, V> Change<K, V> {
    /// Builds an `Add` change.
    pub fn add(key: K, current: V) -> Self {
        Change { reason: ChangeReason::Add, key, current, previous: None, current_index: None, previous_index: None }
    }

    /// Builds an `Update` change; `previous` is the value being replaced.
    pub fn update(key: K, current: V, previous: V) -> Self {
        Change { reason: ChangeReason::Update, key, current, previous: Some(previous), current_index: None, previous_index: None }
    }

    /// Builds a `Remove` change; `current` is the value being removed.
    pub fn remove(key: K, current: V) -> Self {
        Change { reason: ChangeReason::Remove, key, current, previous: None, current_index: None, previous_index: None }
    }

    /// Builds a `Refresh` change: identity and value are unchanged, but
    /// derived/observable state may have.
    pub fn refresh(key: K, current: V) -> Self {
        Change { reason: ChangeReason::Refresh, key, current, previous: None, current_index: None, previous_index: None }
    }

    /// Builds a `Moved` change: the value is unchanged, only its index.
    pub fn moved(key: K, current: V, current_index: usize, previous_index: usize) -> Self {
        Change {
            reason: ChangeReason::Moved,
            key,
            current,
            previous: None,
            current_index: Some(current_index),
            previous_index: Some(previous_index),
        }
    }

    /// Attaches sorted-position indices to an already-built change.
    #[must_use]
    pub fn with_indices(mut self, current_index: Option<usize>, previous_index: Option<usize>) -> Self {
        self.current_index = current_index;
        self.previous_index = previous_index;
        self
    }

    pub fn reason(&self) -> ChangeReason {
        self.reason
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn current(&self) -> &V {
        &self.current
    }

    pub fn previous(&self) -> Option<&V> {
        self.previous.as_ref()
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current_index
    }

    pub fn previous_index(&self) -> Option<usize> {
        self.previous_index
    }

    /// Consumes the change, returning `(key, current, previous)`.
    pub fn into_parts(self) -> (K, V, Option<V>) {
        (self.key, self.current, self.previous)
    }

    /// Maps the value carried by this change, preserving its reason, key and indices.
    pub fn map_value<W>(self, mut f: impl FnMut(V) -> W) -> Change<K, W>
    where
        K: Clone,
    {
        Change {
            reason: self.reason,
            key: self.key,
            current: f(self.current),
            previous: self.previous.map(&mut f),
            current_index: self.current_index,
            previous_index: self.previous_index,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_carries_previous_remove_carries_current() {
        let update = Change::update("A", 2, 1);
        assert_eq!(update.reason(), ChangeReason::Update);
        assert_eq!(*update.current(), 2);
        assert_eq!(update.previous(), Some(&1));

        let remove = Change::remove("A", 2);
        assert_eq!(remove.reason(), ChangeReason::Remove);
        assert_eq!(*remove.current(), 2);
        assert_eq!(remove.previous(), None);
    }

    #[test]
    fn moved_is_the_only_reason_requiring_previous_index() {
        let moved = Change::moved("A", 1, 3, 5);
        assert_eq!(moved.current_index(), Some(3));
        assert_eq!(moved.previous_index(), Some(5));
    }
}
