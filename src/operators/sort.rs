//! `.sort(compare)`: maintains a fully materialised ordered view, attaching
//! `current_index`/`previous_index` to every pass-through change and
//! synthesising `Moved` changes for keys whose value didn't change this
//! batch but whose position did (because something else was added, removed,
//! or re-valued around them).
//!
//! Two strategies for recomputing the order live side by side, chosen per
//! call via [`SortOptions`]: [`SortOptimisation::Reset`] re-sorts the whole
//! collection from scratch on every batch (simple, and fine when the
//! `Virtualise`/`Page` operators downstream bound how much of the order
//! actually gets materialised further along the chain); [`SortOptimisation::Inline`]
//! instead removes only the touched keys from the existing order and
//! reinserts them by binary search against the untouched remainder, which
//! stays cheap as long as a batch doesn't touch more than
//! `reset_threshold` keys — past that point a full reset wins out and is
//! used instead.

use std::hash::Hash;
use std::rc::Rc;

use fnv::{FnvHashMap, FnvHashSet};
use indexmap::IndexMap;

use crate::change::{Change, ChangeReason};
use crate::change_set::{ChangeSetBuilder, ChangeSetKind};
use crate::config::{SortOptimisation, SortOptions};
use crate::controllers::SortController;
use crate::observable::{ChangeSetObservable, ChangeSetResult};

pub trait Sort<K, V> {
    /// Equivalent to [`Sort::sort_with_controller`] with a controller the
    /// caller never touches again and the default (always-reset) options.
    fn sort(&self, compare: impl Fn(&V, &V) -> std::cmp::Ordering + 'static) -> ChangeSetObservable<K, V>;

    /// As `sort`, but with explicit [`SortOptions`].
    fn sort_with_options(
        &self,
        compare: impl Fn(&V, &V) -> std::cmp::Ordering + 'static,
        options: SortOptions,
    ) -> ChangeSetObservable<K, V>;

    /// As `sort`, but the comparator can be swapped live via
    /// [`SortController::change`], or re-applied in place via
    /// [`SortController::resort`] — either one re-sorts the whole maintained
    /// order and emits the resulting `Moved`s as a single change set.
    fn sort_with_controller(&self, controller: &SortController<V>, options: SortOptions) -> ChangeSetObservable<K, V>;
}

/// Dispatches to [`resort_reset`] or [`resort_inline`] per `options`,
/// falling back to a full reset whenever `touched` exceeds the configured
/// threshold.
fn resort<K, V>(
    cache: &IndexMap<K, V>,
    old_order: &[K],
    touched: &FnvHashSet<K>,
    compare: &dyn Fn(&V, &V) -> std::cmp::Ordering,
    options: &SortOptions,
) -> (Vec<K>, ChangeSetBuilder<K, V>)
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    match options.optimisation {
        SortOptimisation::Reset => resort_reset(cache, old_order, touched, compare),
        SortOptimisation::Inline if touched.len() <= options.reset_threshold => {
            resort_inline(cache, old_order, touched, compare)
        }
        SortOptimisation::Inline => resort_reset(cache, old_order, touched, compare),
    }
}

/// Re-sorts `cache` against `compare` from scratch, diffs the result against
/// `old_order`, and returns the reordered key list plus a builder seeded
/// with `Moved` changes for every key whose position shifted without being
/// in `touched` (the keys an incoming change set, or none at all, already
/// account for).
fn resort_reset<K, V>(
    cache: &IndexMap<K, V>,
    old_order: &[K],
    touched: &FnvHashSet<K>,
    compare: &dyn Fn(&V, &V) -> std::cmp::Ordering,
) -> (Vec<K>, ChangeSetBuilder<K, V>)
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    let old_positions: FnvHashMap<K, usize> = old_order.iter().enumerate().map(|(index, key)| (key.clone(), index)).collect();
    let mut new_order: Vec<K> = cache.keys().cloned().collect();
    new_order.sort_by(|a, b| compare(&cache[a], &cache[b]));
    let new_positions: FnvHashMap<K, usize> = new_order.iter().enumerate().map(|(index, key)| (key.clone(), index)).collect();

    let mut builder = ChangeSetBuilder::new();
    for key in new_order.iter() {
        if touched.contains(key) {
            continue;
        }
        let new_index = new_positions[key];
        if let Some(old_index) = old_positions.get(key).copied() {
            if old_index != new_index {
                builder.push(Change::moved(key.clone(), cache[key].clone(), new_index, old_index));
            }
        }
    }
    (new_order, builder)
}

/// Leaves the untouched remainder of `old_order` exactly as it was and
/// reinserts each touched key (still present in `cache`) at its binary
/// search position against that remainder, rather than re-sorting
/// everything. Cheap when few keys are touched relative to the order's
/// total length.
fn resort_inline<K, V>(
    cache: &IndexMap<K, V>,
    old_order: &[K],
    touched: &FnvHashSet<K>,
    compare: &dyn Fn(&V, &V) -> std::cmp::Ordering,
) -> (Vec<K>, ChangeSetBuilder<K, V>)
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    let old_positions: FnvHashMap<K, usize> = old_order.iter().enumerate().map(|(index, key)| (key.clone(), index)).collect();

    let mut new_order: Vec<K> =
        old_order.iter().filter(|key| cache.contains_key(key) && !touched.contains(key)).cloned().collect();
    for key in touched {
        if let Some(value) = cache.get(key) {
            let position = new_order.partition_point(|existing| compare(&cache[existing], value) != std::cmp::Ordering::Greater);
            new_order.insert(position, key.clone());
        }
    }
    let new_positions: FnvHashMap<K, usize> = new_order.iter().enumerate().map(|(index, key)| (key.clone(), index)).collect();

    let mut builder = ChangeSetBuilder::new();
    for key in new_order.iter() {
        if touched.contains(key) {
            continue;
        }
        let new_index = new_positions[key];
        if let Some(old_index) = old_positions.get(key).copied() {
            if old_index != new_index {
                builder.push(Change::moved(key.clone(), cache[key].clone(), new_index, old_index));
            }
        }
    }
    (new_order, builder)
}

impl<K, V> Sort<K, V> for ChangeSetObservable<K, V>
where
    K: Hash + Eq + Clone + 'static,
    V: Clone + 'static,
{
    fn sort(&self, compare: impl Fn(&V, &V) -> std::cmp::Ordering + 'static) -> ChangeSetObservable<K, V> {
        self.sort_with_controller(&SortController::new(compare), SortOptions::default())
    }

    fn sort_with_options(
        &self,
        compare: impl Fn(&V, &V) -> std::cmp::Ordering + 'static,
        options: SortOptions,
    ) -> ChangeSetObservable<K, V> {
        self.sort_with_controller(&SortController::new(compare), options)
    }

    fn sort_with_controller(&self, controller: &SortController<V>, options: SortOptions) -> ChangeSetObservable<K, V> {
        let source = self.clone();
        let controller = controller.clone();
        ChangeSetObservable::new(move |observer: Box<dyn FnMut(ChangeSetResult<K, V>)>| {
            let observer: Rc<std::cell::RefCell<Box<dyn FnMut(ChangeSetResult<K, V>)>>> = Rc::new(std::cell::RefCell::new(observer));
            let cache: Rc<std::cell::RefCell<IndexMap<K, V>>> = Rc::new(std::cell::RefCell::new(IndexMap::new()));
            let order: Rc<std::cell::RefCell<Vec<K>>> = Rc::new(std::cell::RefCell::new(Vec::new()));

            let cache_for_source = cache.clone();
            let order_for_source = order.clone();
            let observer_for_source = observer.clone();
            let controller_for_source = controller.clone();
            let source_subscription = source.subscribe(move |result| match result {
                Ok(change_set) => {
                    let mut cache = cache_for_source.borrow_mut();
                    let mut order = order_for_source.borrow_mut();
                    let old_positions: FnvHashMap<K, usize> =
                        order.iter().enumerate().map(|(index, key)| (key.clone(), index)).collect();

                    let mut touched = FnvHashSet::default();
                    for change in change_set.iter() {
                        touched.insert(change.key().clone());
                        match change.reason() {
                            ChangeReason::Add | ChangeReason::Update | ChangeReason::Refresh => {
                                cache.insert(change.key().clone(), change.current().clone());
                            }
                            ChangeReason::Remove => {
                                cache.shift_remove(change.key());
                            }
                            ChangeReason::Moved => {}
                        }
                    }

                    let compare = controller_for_source.current();
                    let (new_order, mut builder) = resort(&cache, &order, &touched, compare.as_ref(), &options);
                    let new_positions: FnvHashMap<K, usize> =
                        new_order.iter().enumerate().map(|(index, key)| (key.clone(), index)).collect();
                    for change in change_set.iter() {
                        let current_index = new_positions.get(change.key()).copied();
                        let previous_index = old_positions.get(change.key()).copied();
                        builder.push(change.clone().with_indices(current_index, previous_index));
                    }

                    *order = new_order.clone();
                    if let Some(set) = builder.build(ChangeSetKind::Sorted { sorted_keys: new_order }) {
                        (*observer_for_source.borrow_mut())(Ok(Rc::new(set)));
                    }
                }
                Err(error) => (*observer_for_source.borrow_mut())(Err(error)),
            });

            let cache_for_controller = cache.clone();
            let order_for_controller = order.clone();
            let observer_for_controller = observer.clone();
            let controller_for_notify = controller.clone();
            let controller_subscription = controller.subscribe(move |()| {
                let cache = cache_for_controller.borrow();
                let mut order = order_for_controller.borrow_mut();
                let compare = controller_for_notify.current();
                let (new_order, builder) =
                    resort(&cache, &order, &FnvHashSet::default(), compare.as_ref(), &options);
                *order = new_order.clone();
                if let Some(set) = builder.build(ChangeSetKind::Sorted { sorted_keys: new_order }) {
                    (*observer_for_controller.borrow_mut())(Ok(Rc::new(set)));
                }
            });

            crate::observable::Subscription::new(move || {
                drop(source_subscription);
                drop(controller_subscription);
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source_cache::SourceCache;

    #[test]
    fn sort_attaches_indices_and_reports_moves_for_untouched_keys() {
        let cache: SourceCache<&str, i32> = SourceCache::new();
        let sorted = cache.as_observable().sort(|a, b| a.cmp(b));

        let received: Rc<std::cell::RefCell<Vec<crate::change_set::ChangeSet<&str, i32>>>> =
            Rc::new(std::cell::RefCell::new(Vec::new()));
        let received_clone = received.clone();
        let _subscription = sorted.subscribe(move |result| received_clone.borrow_mut().push(result.unwrap()));

        cache.edit_infallible(|updater| {
            updater.add_or_update("A", 3);
            updater.add_or_update("B", 5);
        });
        assert_eq!(received.borrow().last().unwrap().kind().sorted_keys(), Some(["A", "B"].as_slice()));

        cache.edit_infallible(|updater| updater.add_or_update("C", 1));
        let last = received.borrow().last().unwrap().clone();
        assert_eq!(last.kind().sorted_keys(), Some(["C", "A", "B"].as_slice()));
        let moved: Vec<_> = last.changes().iter().filter(|c| c.reason() == ChangeReason::Moved).collect();
        assert_eq!(moved.len(), 2);
    }

    #[test]
    fn swapping_the_sort_controllers_comparator_reorders_with_no_upstream_event() {
        let cache: SourceCache<&str, i32> = SourceCache::new();
        let controller = SortController::new(|a: &i32, b: &i32| a.cmp(b));
        let sorted = cache.as_observable().sort_with_controller(&controller, SortOptions::default());

        let received: Rc<std::cell::RefCell<Vec<crate::change_set::ChangeSet<&str, i32>>>> =
            Rc::new(std::cell::RefCell::new(Vec::new()));
        let received_clone = received.clone();
        let _subscription = sorted.subscribe(move |result| received_clone.borrow_mut().push(result.unwrap()));

        cache.edit_infallible(|updater| {
            updater.add_or_update("A", 1);
            updater.add_or_update("B", 2);
            updater.add_or_update("C", 3);
        });
        assert_eq!(received.borrow().last().unwrap().kind().sorted_keys(), Some(["A", "B", "C"].as_slice()));

        controller.change(|a: &i32, b: &i32| b.cmp(a));
        let last = received.borrow().last().unwrap().clone();
        assert_eq!(last.kind().sorted_keys(), Some(["C", "B", "A"].as_slice()));
        assert!(last.changes().iter().all(|c| c.reason() == ChangeReason::Moved));
    }

    #[test]
    fn resort_inline_repositions_only_touched_keys_and_agrees_with_a_full_reset() {
        let mut cache = IndexMap::new();
        for (key, value) in [("A", 1), ("B", 3), ("C", 5), ("D", 7)] {
            cache.insert(key, value);
        }
        let old_order = vec!["A", "B", "C", "D"];
        cache.insert("B", 6); // B moves from just after A to just before D
        let touched: FnvHashSet<&str> = ["B"].into_iter().collect();
        let compare: &dyn Fn(&i32, &i32) -> std::cmp::Ordering = &|a, b| a.cmp(b);

        let (inline_order, _) = resort_inline(&cache, &old_order, &touched, compare);
        let (reset_order, _) = resort_reset(&cache, &old_order, &touched, compare);
        assert_eq!(inline_order, vec!["A", "C", "B", "D"]);
        assert_eq!(inline_order, reset_order);
    }

    #[test]
    fn sort_with_options_falls_back_to_a_full_reset_once_the_threshold_is_exceeded() {
        let cache: SourceCache<&str, i32> = SourceCache::new();
        let sorted = cache.as_observable().sort_with_options(|a, b| a.cmp(b), SortOptions::inline(1));

        let received: Rc<std::cell::RefCell<Vec<crate::change_set::ChangeSet<&str, i32>>>> =
            Rc::new(std::cell::RefCell::new(Vec::new()));
        let received_clone = received.clone();
        let _subscription = sorted.subscribe(move |result| received_clone.borrow_mut().push(result.unwrap()));

        cache.edit_infallible(|updater| {
            updater.add_or_update("A", 1);
            updater.add_or_update("B", 2);
            updater.add_or_update("C", 3);
        });
        assert_eq!(received.borrow().last().unwrap().kind().sorted_keys(), Some(["A", "B", "C"].as_slice()));

        // Two keys touched in one batch exceeds reset_threshold(1), so this
        // batch takes the reset path even though the comparator is unchanged.
        cache.edit_infallible(|updater| {
            updater.add_or_update("A", 10);
            updater.add_or_update("B", 20);
        });
        assert_eq!(received.borrow().last().unwrap().kind().sorted_keys(), Some(["C", "A", "B"].as_slice()));
    }
}
