//! Net-effect folding of per-key edits accumulated within one edit scope.
//!
//! Runs of same-key edits fold down to their net effect, discarding
//! anything that cancels to nothing — but by folding [`Change`] reasons
//! rather than summing numeric weights, since this engine's "weight" is a
//! small state machine (`Add`/`Update`/`Remove`/`Refresh`) rather than a
//! number.

use std::hash::Hash;

use indexmap::IndexMap;

use crate::change::Change;
use crate::change_set::{ChangeSet, ChangeSetBuilder, ChangeSetKind, Counts};

/// Per-key pending mutation within an open edit scope.
struct Pending<V> {
    /// The key's value immediately before this edit scope, or `None` if it
    /// did not exist. Reset to `None` when an add-then-remove within the
    /// same scope fully cancels (the key becomes, for consolidation
    /// purposes, as if it had never existed).
    initial: Option<V>,
    /// `Some(Some(v))`: will be present with value `v` when the scope ends.
    /// `Some(None)`: will be absent when the scope ends.
    /// `None`: untouched by `addOrUpdate`/`remove` (but may be `refreshed`).
    pending: Option<Option<V>>,
    refreshed: bool,
}

impl<V> Pending<V> {
    fn resolves_present(&self) -> bool {
        match &self.pending {
            Some(Some(_)) => true,
            Some(None) => false,
            None => self.initial.is_some(),
        }
    }
}

/// Accumulates `addOrUpdate`/`remove`/`refresh` calls touching possibly-repeated
/// keys within one edit scope, and folds them down to at most one net
/// [`Change`] per key, in first-touch order.
///
/// Also tallies the diagnostic, call-level [`Counts`]: these count
/// *requested* operations that had an effect at the moment they were
/// requested, which can differ from the net emitted `Counts` once
/// cancellation collapses a key's history to nothing.
pub(crate) struct EditAccumulator<K, V> {
    order: IndexMap<K, Pending<V>>,
    diagnostics: Counts,
}

impl<K: Hash + Eq + Clone, V: Clone> EditAccumulator<K, V> {
    pub(crate) fn new() -> Self {
        EditAccumulator { order: IndexMap::new(), diagnostics: Counts::default() }
    }

    pub(crate) fn diagnostics(&self) -> Counts {
        self.diagnostics
    }

    fn entry(&mut self, key: K, lookup_initial: impl FnOnce() -> Option<V>) -> &mut Pending<V> {
        self.order.entry(key).or_insert_with(|| Pending { initial: lookup_initial(), pending: None, refreshed: false })
    }

    /// Records an `addOrUpdate(key, value)`. `lookup_initial` is called at
    /// most once per key, to snapshot its pre-scope value the first time it
    /// is touched.
    pub(crate) fn add_or_update(&mut self, key: K, value: V, lookup_initial: impl FnOnce() -> Option<V>) {
        let is_add = !self.entry(key.clone(), lookup_initial).resolves_present();
        let entry = self.order.get_mut(&key).expect("just inserted");
        entry.pending = Some(Some(value));
        if is_add {
            self.diagnostics.adds += 1;
        } else {
            self.diagnostics.updates += 1;
        }
    }

    /// Records a `remove(key)`. No-op (uncounted) if the key does not
    /// currently resolve present. Folds fully away ("Add+Remove cancels")
    /// when the key had no pre-scope value and was only ever added within
    /// this scope.
    pub(crate) fn remove(&mut self, key: K, lookup_initial: impl FnOnce() -> Option<V>) {
        let present = self.entry(key.clone(), lookup_initial).resolves_present();
        if !present {
            return;
        }
        self.diagnostics.removes += 1;
        let entry = self.order.get_mut(&key).expect("just inserted");
        if entry.initial.is_none() {
            // The key only existed because of an addOrUpdate earlier in this
            // same scope: cancel it entirely, as if untouched.
            self.order.shift_remove(&key);
        } else {
            entry.pending = Some(None);
            entry.refreshed = false;
        }
    }

    /// Records a `refresh(key)`. No-op (uncounted) if the key does not
    /// currently resolve present. Subsumed (not separately emitted, but
    /// still counted) if another mutation already touched the key this scope.
    pub(crate) fn refresh(&mut self, key: K, lookup_initial: impl FnOnce() -> Option<V>) {
        let entry = self.entry(key, lookup_initial);
        if !entry.resolves_present() {
            return;
        }
        self.diagnostics.refreshes += 1;
        if entry.pending.is_none() {
            entry.refreshed = true;
        }
    }

    /// Folds the accumulated per-key state into a single [`ChangeSet`]
    /// (`None` if every key cancelled away to nothing), in first-touch order.
    pub(crate) fn finish(self) -> Option<ChangeSet<K, V>> {
        let mut builder = ChangeSetBuilder::new();
        for (key, state) in self.order {
            match (state.initial, state.pending, state.refreshed) {
                (None, Some(Some(value)), _) => {
                    builder.push(Change::add(key, value));
                }
                (Some(previous), Some(Some(value)), _) => {
                    builder.push(Change::update(key, value, previous));
                }
                (Some(previous), Some(None), _) => {
                    builder.push(Change::remove(key, previous));
                }
                (Some(value), None, true) => {
                    builder.push(Change::refresh(key, value));
                }
                (None, Some(None), _) | (_, None, false) => {
                    // Can't actually occur: such keys are never inserted.
                }
            }
        }
        builder.build(ChangeSetKind::Unsorted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_update_update_collapses_to_add_with_final_value() {
        let mut acc: EditAccumulator<&str, i32> = EditAccumulator::new();
        acc.add_or_update("A", 1, || None);
        acc.add_or_update("A", 2, || None);
        acc.add_or_update("A", 3, || None);
        let set = acc.finish().unwrap();
        assert_eq!(set.len(), 1);
        let change = &set.changes()[0];
        assert_eq!(change.reason(), crate::change::ChangeReason::Add);
        assert_eq!(*change.current(), 3);
    }

    #[test]
    fn add_then_remove_cancels_entirely() {
        let mut acc: EditAccumulator<&str, i32> = EditAccumulator::new();
        acc.add_or_update("A", 1, || None);
        acc.remove("A", || None);
        assert!(acc.finish().is_none());
    }

    #[test]
    fn update_then_remove_reports_earliest_previous() {
        let mut acc: EditAccumulator<&str, i32> = EditAccumulator::new();
        acc.add_or_update("A", 2, || Some(1));
        acc.remove("A", || Some(1));
        let set = acc.finish().unwrap();
        let change = &set.changes()[0];
        assert_eq!(change.reason(), crate::change::ChangeReason::Remove);
        assert_eq!(*change.current(), 1);
    }

    #[test]
    fn trailing_refresh_after_mutation_is_subsumed() {
        let mut acc: EditAccumulator<&str, i32> = EditAccumulator::new();
        acc.add_or_update("A", 2, || Some(1));
        acc.refresh("A", || Some(1));
        let set = acc.finish().unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.changes()[0].reason(), crate::change::ChangeReason::Update);
    }

    #[test]
    fn refresh_on_an_absent_key_is_a_silent_no_op() {
        let mut acc: EditAccumulator<&str, i32> = EditAccumulator::new();
        acc.refresh("A", || None);
        assert!(acc.finish().is_none());
    }

    #[test]
    fn diagnostics_count_requested_operations_even_through_full_cancellation() {
        // cache.addOrUpdate(A, 1..=4); refresh(A); remove(A); refresh(A)
        // all within one scope: the add+3 updates+remove cancel entirely
        // (key never existed outside the scope), so nothing is emitted, but
        // the diagnostic operation counters still reflect what was asked for
        // (except the second refresh, which targets an already-absent key
        // and is therefore an uncounted no-op).
        let mut acc: EditAccumulator<&str, i32> = EditAccumulator::new();
        for value in 1..=4 {
            acc.add_or_update("A", value, || None);
        }
        acc.refresh("A", || None);
        acc.remove("A", || None);
        acc.refresh("A", || None);

        let diagnostics = acc.diagnostics();
        assert_eq!(diagnostics.adds, 1);
        assert_eq!(diagnostics.updates, 3);
        assert_eq!(diagnostics.removes, 1);
        assert_eq!(diagnostics.refreshes, 1);

        assert!(acc.finish().is_none());
    }
}
