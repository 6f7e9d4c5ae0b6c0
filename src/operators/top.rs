//! `.top(size)`: the first `size` items of an already-ordered upstream
//! collection, re-sliced on every upstream change set. The simplest case of
//! the windowing shape `crate::operators::page` generalizes — a single fixed
//! window starting at index `0` rather than a live, host-movable one, so
//! there is no controller here and no `PageResponse` metadata to report.

use std::cell::RefCell;
use std::hash::Hash;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::change::Change;
use crate::change_set::{ChangeSetBuilder, ChangeSetKind};
use crate::observable::{ChangeSetObservable, ChangeSetResult};

pub trait Top<K, V> {
    fn top(&self, size: usize) -> ChangeSetObservable<K, V>;
}

struct TopState<K, V> {
    values: IndexMap<K, V>,
    order: Vec<K>,
    visible: IndexMap<K, V>,
}

impl<K: Hash + Eq + Clone, V: Clone> TopState<K, V> {
    fn new() -> Self {
        TopState { values: IndexMap::new(), order: Vec::new(), visible: IndexMap::new() }
    }
}

impl<K, V> Top<K, V> for ChangeSetObservable<K, V>
where
    K: Hash + Eq + Clone + 'static,
    V: Clone + PartialEq + 'static,
{
    fn top(&self, size: usize) -> ChangeSetObservable<K, V> {
        let source = self.clone();
        ChangeSetObservable::new(move |mut observer: Box<dyn FnMut(ChangeSetResult<K, V>)>| {
            let state: Rc<RefCell<TopState<K, V>>> = Rc::new(RefCell::new(TopState::new()));

            source.subscribe(move |result| match result {
                Ok(change_set) => {
                    let mut state = state.borrow_mut();
                    use crate::change::ChangeReason::*;
                    for change in change_set.iter() {
                        match change.reason() {
                            Add | Update | Refresh => {
                                state.values.insert(change.key().clone(), change.current().clone());
                            }
                            Remove => {
                                state.values.shift_remove(change.key());
                            }
                            Moved => {}
                        }
                    }
                    if let Some(sorted) = change_set.kind().sorted_keys() {
                        state.order = sorted.to_vec();
                    } else {
                        state.order = state.values.keys().cloned().collect();
                    }

                    let window: Vec<K> = state.order.iter().take(size).cloned().collect();
                    let mut new_visible: IndexMap<K, V> = IndexMap::new();
                    for key in &window {
                        if let Some(value) = state.values.get(key) {
                            new_visible.insert(key.clone(), value.clone());
                        }
                    }

                    let mut builder = ChangeSetBuilder::new();
                    for (key, old_value) in state.visible.iter() {
                        if !new_visible.contains_key(key) {
                            builder.push(Change::remove(key.clone(), old_value.clone()));
                        }
                    }
                    for (key, new_value) in new_visible.iter() {
                        match state.visible.get(key) {
                            None => builder.push(Change::add(key.clone(), new_value.clone())),
                            Some(old_value) if old_value != new_value => {
                                builder.push(Change::update(key.clone(), new_value.clone(), old_value.clone()))
                            }
                            Some(_) => {}
                        }
                    }
                    state.visible = new_visible;

                    if let Some(set) = builder.build(ChangeSetKind::Sorted { sorted_keys: window }) {
                        observer(Ok(Rc::new(set)));
                    }
                }
                Err(error) => observer(Err(error)),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change_set::ChangeSet;
    use crate::operators::sort::Sort;
    use crate::source_cache::SourceCache;

    #[test]
    fn top_keeps_only_the_first_n_items_of_the_order() {
        let cache: SourceCache<&str, i32> = SourceCache::new();
        let sorted = cache.as_observable().sort(|a, b| a.cmp(b));
        let top = sorted.top(2);

        let received: Rc<RefCell<Vec<ChangeSet<&str, i32>>>> = Rc::new(RefCell::new(Vec::new()));
        let received_clone = received.clone();
        let _subscription = top.subscribe(move |result| received_clone.borrow_mut().push(result.unwrap()));

        cache.edit_infallible(|updater| {
            updater.add_or_update("A", 3);
            updater.add_or_update("B", 5);
            updater.add_or_update("C", 1);
        });
        let last = received.borrow().last().unwrap().clone();
        assert_eq!(last.kind().sorted_keys(), Some(["C", "A"].as_slice()));
    }

    #[test]
    fn top_drops_an_item_that_falls_out_of_the_window_and_promotes_the_next_one() {
        let cache: SourceCache<&str, i32> = SourceCache::new();
        let sorted = cache.as_observable().sort(|a, b| a.cmp(b));
        let top = sorted.top(2);

        let received: Rc<RefCell<Vec<ChangeSet<&str, i32>>>> = Rc::new(RefCell::new(Vec::new()));
        let received_clone = received.clone();
        let _subscription = top.subscribe(move |result| received_clone.borrow_mut().push(result.unwrap()));

        cache.edit_infallible(|updater| {
            updater.add_or_update("A", 1);
            updater.add_or_update("B", 2);
        });
        cache.edit_infallible(|updater| updater.add_or_update("Z", 0));
        let last = received.borrow().last().unwrap().clone();
        assert_eq!(last.kind().sorted_keys(), Some(["Z", "A"].as_slice()));
        let reasons: Vec<_> = last.changes().iter().map(|c| (*c.key(), c.reason())).collect();
        assert!(reasons.contains(&("Z", crate::change::ChangeReason::Add)));
        assert!(reasons.contains(&("B", crate::change::ChangeReason::Remove)));
    }
}
