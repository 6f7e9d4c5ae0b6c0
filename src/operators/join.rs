//! The keyed join family: `LeftJoin`, `RightJoin`, `InnerJoin`,
//! `FullJoin` over two change-set streams sharing a common key type. Each
//! maintains both sides' caches and re-derives the joined value only for the
//! keys touched by whichever side just emitted — the same touched-keys-only
//! shape as [`crate::operators::set_algebra`], generalised to two distinct
//! value types instead of one.
//!
//! `JoinMany` (pairing one side with the other's whole group under a foreign
//! key) is left to a host composing [`crate::operators::group::Group`] with
//! one of these rather than a fifth bespoke operator: `group` already
//! maintains "the live sub-collection keyed to a foreign key," which is
//! exactly what `JoinMany` would otherwise duplicate.

use std::cell::RefCell;
use std::hash::Hash;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::change::Change;
use crate::change_set::{ChangeSetBuilder, ChangeSetKind};
use crate::observable::{ChangeSetObservable, ChangeSetResult, Subscription};

/// Shared machinery for the four join flavours: maintain a cache per side,
/// and whenever one side changes, recompute `build(left, right)` for every
/// key that side's change set touched.
fn combine_join<K, V, V2, Out>(
    left: ChangeSetObservable<K, V>,
    right: ChangeSetObservable<K, V2>,
    build: impl Fn(Option<V>, Option<V2>) -> Option<Out> + 'static,
) -> ChangeSetObservable<K, Out>
where
    K: Hash + Eq + Clone + 'static,
    V: Clone + 'static,
    V2: Clone + 'static,
    Out: Clone + PartialEq + 'static,
{
    let build = Rc::new(build);
    ChangeSetObservable::new(move |observer: Box<dyn FnMut(ChangeSetResult<K, Out>)>| {
        let observer: Rc<RefCell<Box<dyn FnMut(ChangeSetResult<K, Out>)>>> = Rc::new(RefCell::new(observer));
        let left_cache: Rc<RefCell<IndexMap<K, V>>> = Rc::new(RefCell::new(IndexMap::new()));
        let right_cache: Rc<RefCell<IndexMap<K, V2>>> = Rc::new(RefCell::new(IndexMap::new()));
        let visible: Rc<RefCell<IndexMap<K, Out>>> = Rc::new(RefCell::new(IndexMap::new()));

        fn reconcile<K, V, V2, Out>(
            left_cache: &IndexMap<K, V>,
            right_cache: &IndexMap<K, V2>,
            visible: &mut IndexMap<K, Out>,
            build: &dyn Fn(Option<V>, Option<V2>) -> Option<Out>,
            touched: Vec<K>,
            builder: &mut ChangeSetBuilder<K, Out>,
        ) where
            K: Hash + Eq + Clone,
            V: Clone,
            V2: Clone,
            Out: Clone + PartialEq,
        {
            for key in touched {
                let new_value = build(left_cache.get(&key).cloned(), right_cache.get(&key).cloned());
                match (visible.get(&key).cloned(), new_value) {
                    (None, Some(value)) => {
                        visible.insert(key.clone(), value.clone());
                        builder.push(Change::add(key, value));
                    }
                    (Some(old), Some(new)) => {
                        if old != new {
                            visible.insert(key.clone(), new.clone());
                            builder.push(Change::update(key, new, old));
                        } else {
                            visible.insert(key, old);
                        }
                    }
                    (Some(old), None) => {
                        visible.shift_remove(&key);
                        builder.push(Change::remove(key, old));
                    }
                    (None, None) => {}
                }
            }
        }

        let left_subscription = {
            let left_cache = left_cache.clone();
            let right_cache = right_cache.clone();
            let visible = visible.clone();
            let build = build.clone();
            let observer = observer.clone();
            left.subscribe(move |result| match result {
                Ok(change_set) => {
                    let mut touched = Vec::with_capacity(change_set.len());
                    {
                        let mut left_cache = left_cache.borrow_mut();
                        for change in change_set.iter() {
                            touched.push(change.key().clone());
                            apply_side(&mut left_cache, change);
                        }
                    }
                    let mut builder = ChangeSetBuilder::new();
                    reconcile(&left_cache.borrow(), &right_cache.borrow(), &mut visible.borrow_mut(), build.as_ref(), touched, &mut builder);
                    if let Some(set) = builder.build(ChangeSetKind::Unsorted) {
                        (*observer.borrow_mut())(Ok(Rc::new(set)));
                    }
                }
                Err(error) => (*observer.borrow_mut())(Err(error)),
            })
        };

        let right_subscription = {
            let left_cache = left_cache.clone();
            let right_cache = right_cache.clone();
            let visible = visible.clone();
            let build = build.clone();
            let observer = observer.clone();
            right.subscribe(move |result| match result {
                Ok(change_set) => {
                    let mut touched = Vec::with_capacity(change_set.len());
                    {
                        let mut right_cache = right_cache.borrow_mut();
                        for change in change_set.iter() {
                            touched.push(change.key().clone());
                            apply_side(&mut right_cache, change);
                        }
                    }
                    let mut builder = ChangeSetBuilder::new();
                    reconcile(&left_cache.borrow(), &right_cache.borrow(), &mut visible.borrow_mut(), build.as_ref(), touched, &mut builder);
                    if let Some(set) = builder.build(ChangeSetKind::Unsorted) {
                        (*observer.borrow_mut())(Ok(Rc::new(set)));
                    }
                }
                Err(error) => (*observer.borrow_mut())(Err(error)),
            })
        };

        Subscription::new(move || {
            drop(left_subscription);
            drop(right_subscription);
        })
    })
}

fn apply_side<K: Hash + Eq + Clone, W: Clone>(cache: &mut IndexMap<K, W>, change: &Change<K, W>) {
    use crate::change::ChangeReason::*;
    match change.reason() {
        Add | Update | Refresh => {
            cache.insert(change.key().clone(), change.current().clone());
        }
        Remove => {
            cache.shift_remove(change.key());
        }
        Moved => {}
    }
}

pub trait LeftJoin<K, V> {
    fn left_join<V2>(&self, other: &ChangeSetObservable<K, V2>) -> ChangeSetObservable<K, (V, Option<V2>)>
    where
        V2: Clone + PartialEq + 'static;
}

impl<K, V> LeftJoin<K, V> for ChangeSetObservable<K, V>
where
    K: Hash + Eq + Clone + 'static,
    V: Clone + PartialEq + 'static,
{
    fn left_join<V2>(&self, other: &ChangeSetObservable<K, V2>) -> ChangeSetObservable<K, (V, Option<V2>)>
    where
        V2: Clone + PartialEq + 'static,
    {
        combine_join(self.clone(), other.clone(), |left, right| left.map(|value| (value, right)))
    }
}

pub trait RightJoin<K, V> {
    /// Mirror of [`LeftJoin::left_join`]: every key `other` holds appears,
    /// with `self`'s value optional rather than `other`'s.
    fn right_join<V1>(&self, other: &ChangeSetObservable<K, V1>) -> ChangeSetObservable<K, (V1, Option<V>)>
    where
        V1: Clone + PartialEq + 'static;
}

impl<K, V> RightJoin<K, V> for ChangeSetObservable<K, V>
where
    K: Hash + Eq + Clone + 'static,
    V: Clone + PartialEq + 'static,
{
    fn right_join<V1>(&self, other: &ChangeSetObservable<K, V1>) -> ChangeSetObservable<K, (V1, Option<V>)>
    where
        V1: Clone + PartialEq + 'static,
    {
        combine_join(other.clone(), self.clone(), |other_value, self_value| other_value.map(|value| (value, self_value)))
    }
}

pub trait InnerJoin<K, V> {
    fn inner_join<V2>(&self, other: &ChangeSetObservable<K, V2>) -> ChangeSetObservable<K, (V, V2)>
    where
        V2: Clone + PartialEq + 'static;
}

impl<K, V> InnerJoin<K, V> for ChangeSetObservable<K, V>
where
    K: Hash + Eq + Clone + 'static,
    V: Clone + PartialEq + 'static,
{
    fn inner_join<V2>(&self, other: &ChangeSetObservable<K, V2>) -> ChangeSetObservable<K, (V, V2)>
    where
        V2: Clone + PartialEq + 'static,
    {
        combine_join(self.clone(), other.clone(), |left, right| match (left, right) {
            (Some(left), Some(right)) => Some((left, right)),
            _ => None,
        })
    }
}

pub trait FullJoin<K, V> {
    fn full_join<V2>(&self, other: &ChangeSetObservable<K, V2>) -> ChangeSetObservable<K, (Option<V>, Option<V2>)>
    where
        V2: Clone + PartialEq + 'static;
}

impl<K, V> FullJoin<K, V> for ChangeSetObservable<K, V>
where
    K: Hash + Eq + Clone + 'static,
    V: Clone + PartialEq + 'static,
{
    fn full_join<V2>(&self, other: &ChangeSetObservable<K, V2>) -> ChangeSetObservable<K, (Option<V>, Option<V2>)>
    where
        V2: Clone + PartialEq + 'static,
    {
        combine_join(self.clone(), other.clone(), |left, right| {
            if left.is_some() || right.is_some() { Some((left, right)) } else { None }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::ChangeReason;
    use crate::source_cache::SourceCache;

    #[test]
    fn inner_join_emits_only_when_both_sides_hold_the_key() {
        let left: SourceCache<&str, &str> = SourceCache::new();
        let right: SourceCache<&str, i32> = SourceCache::new();
        let joined = left.as_observable().inner_join(&right.as_observable());

        let seen: Rc<RefCell<Vec<(&str, ChangeReason)>>> = Rc::new(RefCell::new(Vec::new()));
        let seen_clone = seen.clone();
        let _subscription = joined.subscribe(move |result| {
            for change in result.unwrap().iter() {
                seen_clone.borrow_mut().push((*change.key(), change.reason()));
            }
        });

        left.edit_infallible(|updater| updater.add_or_update("A", "red"));
        assert!(seen.borrow().is_empty());

        right.edit_infallible(|updater| updater.add_or_update("A", 1));
        assert_eq!(seen.borrow().last(), Some(&("A", ChangeReason::Add)));

        right.edit_infallible(|updater| updater.remove("A"));
        assert_eq!(seen.borrow().last(), Some(&("A", ChangeReason::Remove)));
    }

    #[test]
    fn left_join_always_emits_for_left_keys_with_an_optional_right_value() {
        let left: SourceCache<&str, &str> = SourceCache::new();
        let right: SourceCache<&str, i32> = SourceCache::new();
        let joined = left.as_observable().left_join(&right.as_observable());

        let last: Rc<RefCell<Option<(&str, Option<i32>)>>> = Rc::new(RefCell::new(None));
        let last_clone = last.clone();
        let _subscription = joined.subscribe(move |result| {
            for change in result.unwrap().iter() {
                *last_clone.borrow_mut() = Some((*change.key(), change.current().1));
            }
        });

        left.edit_infallible(|updater| updater.add_or_update("A", "red"));
        assert_eq!(*last.borrow(), Some(("A", None)));

        right.edit_infallible(|updater| updater.add_or_update("A", 9));
        assert_eq!(*last.borrow(), Some(("A", Some(9))));
    }

    #[test]
    fn full_join_emits_while_either_side_holds_the_key() {
        let left: SourceCache<&str, &str> = SourceCache::new();
        let right: SourceCache<&str, i32> = SourceCache::new();
        let joined = left.as_observable().full_join(&right.as_observable());

        let present: Rc<RefCell<bool>> = Rc::new(RefCell::new(false));
        let present_clone = present.clone();
        let _subscription = joined.subscribe(move |result| {
            for change in result.unwrap().iter() {
                *present_clone.borrow_mut() = change.reason() != ChangeReason::Remove;
            }
        });

        left.edit_infallible(|updater| updater.add_or_update("A", "red"));
        assert!(*present.borrow());

        left.edit_infallible(|updater| updater.remove("A"));
        right.edit_infallible(|updater| updater.add_or_update("A", 1));
        assert!(*present.borrow());

        right.edit_infallible(|updater| updater.remove("A"));
        assert!(!*present.borrow());
    }

    #[test]
    fn right_join_always_emits_for_right_keys_with_an_optional_left_value() {
        let left: SourceCache<&str, i32> = SourceCache::new();
        let right: SourceCache<&str, &str> = SourceCache::new();
        let joined = left.as_observable().right_join(&right.as_observable());

        let last: Rc<RefCell<Option<(&str, Option<i32>)>>> = Rc::new(RefCell::new(None));
        let last_reason: Rc<RefCell<Option<ChangeReason>>> = Rc::new(RefCell::new(None));
        let last_clone = last.clone();
        let last_reason_clone = last_reason.clone();
        let _subscription = joined.subscribe(move |result| {
            for change in result.unwrap().iter() {
                *last_clone.borrow_mut() = Some((*change.key(), change.current().1));
                *last_reason_clone.borrow_mut() = Some(change.reason());
            }
        });

        right.edit_infallible(|updater| updater.add_or_update("A", "red"));
        assert_eq!(*last.borrow(), Some(("A", None)));

        left.edit_infallible(|updater| updater.add_or_update("A", 9));
        assert_eq!(*last.borrow(), Some(("A", Some(9))));

        left.edit_infallible(|updater| updater.remove("A"));
        assert_eq!(*last.borrow(), Some(("A", None)));

        right.edit_infallible(|updater| updater.remove("A"));
        assert_eq!(*last_reason.borrow(), Some(ChangeReason::Remove));
    }
}
