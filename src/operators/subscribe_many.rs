//! `.subscribe_many(subscribe)` / `.dispose_many(dispose)`: per-item
//! lifecycle management, the dual of each other. `subscribe_many` runs
//! `subscribe` once for every item that enters the collection and tears
//! down the [`Subscription`] it returned the moment that item leaves (on
//! `Remove`, or when it is replaced by an `Update` — the old value's
//! subscription doesn't outlive the value itself). `dispose_many` is the
//! simpler, pass-through half: it forwards every change unmodified but
//! calls `dispose` on a value's behalf when nothing downstream will see it
//! again, for values that own a resource but aren't subscriptions
//! themselves.

use std::cell::RefCell;
use std::hash::Hash;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::change::ChangeReason;
use crate::observable::{ChangeSetObservable, ChangeSetResult, Subscription};

pub trait SubscribeMany<K, V> {
    /// Returns one [`Subscription`] covering the upstream connection and
    /// every still-live per-item subscription; dropping it tears down both.
    fn subscribe_many(&self, subscribe: impl Fn(&K, &V) -> Subscription + 'static) -> Subscription;
}

impl<K, V> SubscribeMany<K, V> for ChangeSetObservable<K, V>
where
    K: Hash + Eq + Clone + 'static,
    V: Clone + 'static,
{
    fn subscribe_many(&self, subscribe: impl Fn(&K, &V) -> Subscription + 'static) -> Subscription {
        let live: Rc<RefCell<IndexMap<K, Subscription>>> = Rc::new(RefCell::new(IndexMap::new()));
        let live_for_source = live.clone();
        let upstream = self.subscribe(move |result| {
            if let Ok(change_set) = result {
                let mut live = live_for_source.borrow_mut();
                for change in change_set.iter() {
                    match change.reason() {
                        ChangeReason::Add => {
                            live.insert(change.key().clone(), subscribe(change.key(), change.current()));
                        }
                        ChangeReason::Update => {
                            live.shift_remove(change.key());
                            live.insert(change.key().clone(), subscribe(change.key(), change.current()));
                        }
                        ChangeReason::Remove => {
                            live.shift_remove(change.key());
                        }
                        ChangeReason::Refresh | ChangeReason::Moved => {}
                    }
                }
            }
        });

        Subscription::new(move || {
            drop(upstream);
            live.borrow_mut().clear();
        })
    }
}

pub trait DisposeMany<K, V> {
    fn dispose_many(&self, dispose: impl Fn(&V) + 'static) -> ChangeSetObservable<K, V>;
}

impl<K, V> DisposeMany<K, V> for ChangeSetObservable<K, V>
where
    K: Hash + Eq + Clone + 'static,
    V: Clone + 'static,
{
    fn dispose_many(&self, dispose: impl Fn(&V) + 'static) -> ChangeSetObservable<K, V> {
        let source = self.clone();
        let dispose = Rc::new(dispose);
        ChangeSetObservable::new(move |mut observer: Box<dyn FnMut(ChangeSetResult<K, V>)>| {
            let owned: Rc<RefCell<IndexMap<K, V>>> = Rc::new(RefCell::new(IndexMap::new()));
            let dispose = dispose.clone();
            let owned_for_source = owned.clone();
            let upstream = source.subscribe(move |result| {
                if let Ok(change_set) = &result {
                    let mut owned = owned_for_source.borrow_mut();
                    for change in change_set.iter() {
                        match change.reason() {
                            ChangeReason::Add | ChangeReason::Update | ChangeReason::Refresh => {
                                if let Some(previous) = owned.insert(change.key().clone(), change.current().clone()) {
                                    if change.reason() == ChangeReason::Update {
                                        dispose(&previous);
                                    }
                                }
                            }
                            ChangeReason::Remove => {
                                if let Some(value) = owned.shift_remove(change.key()) {
                                    dispose(&value);
                                }
                            }
                            ChangeReason::Moved => {}
                        }
                    }
                }
                observer(result);
            });

            let owned_for_teardown = owned.clone();
            let dispose = dispose.clone();
            Subscription::new(move || {
                drop(upstream);
                for (_key, value) in owned_for_teardown.borrow_mut().drain(..) {
                    dispose(&value);
                }
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source_cache::SourceCache;
    use std::collections::HashSet;

    #[test]
    fn subscribe_many_tears_down_a_per_item_subscription_on_remove() {
        let cache: SourceCache<&str, i32> = SourceCache::new();
        let live: Rc<RefCell<HashSet<&str>>> = Rc::new(RefCell::new(HashSet::new()));
        let live_clone = live.clone();
        let subscription = cache.as_observable().subscribe_many(move |key, _value| {
            live_clone.borrow_mut().insert(*key);
            let live_clone = live_clone.clone();
            let key = *key;
            Subscription::new(move || {
                live_clone.borrow_mut().remove(key);
            })
        });

        cache.edit_infallible(|updater| {
            updater.add_or_update("A", 1);
            updater.add_or_update("B", 2);
        });
        assert_eq!(*live.borrow(), HashSet::from(["A", "B"]));

        cache.edit_infallible(|updater| updater.remove("A"));
        assert_eq!(*live.borrow(), HashSet::from(["B"]));

        drop(subscription);
        assert!(live.borrow().is_empty());
    }

    #[test]
    fn subscribe_many_resubscribes_on_update() {
        let cache: SourceCache<&str, i32> = SourceCache::new();
        let resubscribes: Rc<RefCell<usize>> = Rc::new(RefCell::new(0));
        let resubscribes_clone = resubscribes.clone();
        let _subscription = cache.as_observable().subscribe_many(move |_key, _value| {
            *resubscribes_clone.borrow_mut() += 1;
            Subscription::noop()
        });

        cache.edit_infallible(|updater| updater.add_or_update("A", 1));
        cache.edit_infallible(|updater| updater.add_or_update("A", 2));
        assert_eq!(*resubscribes.borrow(), 2);
    }

    #[test]
    fn dispose_many_disposes_a_removed_items_value_and_forwards_the_change() {
        let cache: SourceCache<&str, i32> = SourceCache::new();
        let disposed: Rc<RefCell<Vec<i32>>> = Rc::new(RefCell::new(Vec::new()));
        let disposed_clone = disposed.clone();
        let observed = cache.as_observable().dispose_many(move |value| disposed_clone.borrow_mut().push(*value));

        let seen: Rc<RefCell<usize>> = Rc::new(RefCell::new(0));
        let seen_clone = seen.clone();
        let subscription = observed.subscribe(move |result| *seen_clone.borrow_mut() += result.unwrap().len());

        cache.edit_infallible(|updater| updater.add_or_update("A", 1));
        assert!(disposed.borrow().is_empty());

        cache.edit_infallible(|updater| updater.remove("A"));
        assert_eq!(*disposed.borrow(), vec![1]);
        assert_eq!(*seen.borrow(), 2);

        cache.edit_infallible(|updater| updater.add_or_update("B", 2));
        drop(subscription);
        assert_eq!(*disposed.borrow(), vec![1, 2]);
    }
}
