//! Set-algebra combinators over keyed collections: `And`/`Or`/`Except`/
//! `Xor`, each maintaining one cache per upstream and re-deriving membership
//! for whichever keys were touched in the event that just arrived. Every
//! combinator shares [`combine`]; only the inclusion predicate differs.
//!
//! This crate exposes the static list form only (`Vec<ChangeSetObservable<K,
//! V>>` fixed at construction) — dynamic list variants, whose membership
//! itself changes over time, are left to a host composing
//! `transform_many`/`group` over its own observable-of-observables.

use std::hash::Hash;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::change::Change;
use crate::change_set::{ChangeSetBuilder, ChangeSetKind};
use crate::observable::{ChangeSetObservable, ChangeSetResult};

/// Builds a combinator over `sources`, including a key downstream iff
/// `include(presence_flags)` holds, where `presence_flags[i]` is whether
/// `sources[i]` currently holds that key. The emitted value is taken from the
/// first upstream that currently holds the key.
fn combine<K, V>(
    sources: Vec<ChangeSetObservable<K, V>>,
    include: impl Fn(&[bool]) -> bool + 'static,
) -> ChangeSetObservable<K, V>
where
    K: Hash + Eq + Clone + 'static,
    V: Clone + PartialEq + 'static,
{
    let include = Rc::new(include);
    ChangeSetObservable::new(move |observer: Box<dyn FnMut(ChangeSetResult<K, V>)>| {
        let observer: Rc<std::cell::RefCell<Box<dyn FnMut(ChangeSetResult<K, V>)>>> =
            Rc::new(std::cell::RefCell::new(observer));
        let per_source: Rc<std::cell::RefCell<Vec<IndexMap<K, V>>>> =
            Rc::new(std::cell::RefCell::new((0..sources.len()).map(|_| IndexMap::new()).collect()));
        let visible: Rc<std::cell::RefCell<IndexMap<K, V>>> = Rc::new(std::cell::RefCell::new(IndexMap::new()));

        let mut subscriptions = Vec::with_capacity(sources.len());
        for (index, source) in sources.iter().enumerate() {
            let per_source = per_source.clone();
            let visible = visible.clone();
            let include = include.clone();
            let observer = observer.clone();
            subscriptions.push(source.subscribe(move |result| match result {
                Ok(change_set) => {
                    let mut per_source = per_source.borrow_mut();
                    let mut visible = visible.borrow_mut();
                    let mut touched = Vec::with_capacity(change_set.len());

                    for change in change_set.iter() {
                        touched.push(change.key().clone());
                        use crate::change::ChangeReason::*;
                        match change.reason() {
                            Add | Update | Refresh => {
                                per_source[index].insert(change.key().clone(), change.current().clone());
                            }
                            Remove => {
                                per_source[index].shift_remove(change.key());
                            }
                            Moved => {}
                        }
                    }

                    let mut builder = ChangeSetBuilder::new();
                    for key in touched {
                        let flags: Vec<bool> = per_source.iter().map(|cache| cache.contains_key(&key)).collect();
                        let should_be_visible = include(&flags);
                        let value = per_source.iter().find_map(|cache| cache.get(&key).cloned());

                        match (visible.get(&key).cloned(), should_be_visible.then_some(()).and(value.clone())) {
                            (None, Some(new_value)) => {
                                visible.insert(key.clone(), new_value.clone());
                                builder.push(Change::add(key, new_value));
                            }
                            (Some(old_value), Some(new_value)) => {
                                if old_value != new_value {
                                    visible.insert(key.clone(), new_value.clone());
                                    builder.push(Change::update(key, new_value, old_value));
                                } else {
                                    visible.insert(key, old_value);
                                }
                            }
                            (Some(old_value), None) => {
                                visible.shift_remove(&key);
                                builder.push(Change::remove(key, old_value));
                            }
                            (None, None) => {}
                        }
                    }

                    if let Some(set) = builder.build(ChangeSetKind::Unsorted) {
                        (*observer.borrow_mut())(Ok(Rc::new(set)));
                    }
                }
                Err(error) => (*observer.borrow_mut())(Err(error)),
            }));
        }

        crate::observable::Subscription::new(move || {
            subscriptions.clear();
        })
    })
}

pub trait And<K, V> {
    /// Present downstream iff present in `self` and every one of `others`.
    fn and(&self, others: Vec<ChangeSetObservable<K, V>>) -> ChangeSetObservable<K, V>;
}

impl<K, V> And<K, V> for ChangeSetObservable<K, V>
where
    K: Hash + Eq + Clone + 'static,
    V: Clone + PartialEq + 'static,
{
    fn and(&self, others: Vec<ChangeSetObservable<K, V>>) -> ChangeSetObservable<K, V> {
        let mut sources = vec![self.clone()];
        sources.extend(others);
        combine(sources, |flags| !flags.is_empty() && flags.iter().all(|present| *present))
    }
}

pub trait Or<K, V> {
    /// Present downstream iff present in `self` or any of `others`.
    fn or(&self, others: Vec<ChangeSetObservable<K, V>>) -> ChangeSetObservable<K, V>;
}

impl<K, V> Or<K, V> for ChangeSetObservable<K, V>
where
    K: Hash + Eq + Clone + 'static,
    V: Clone + PartialEq + 'static,
{
    fn or(&self, others: Vec<ChangeSetObservable<K, V>>) -> ChangeSetObservable<K, V> {
        let mut sources = vec![self.clone()];
        sources.extend(others);
        combine(sources, |flags| flags.iter().any(|present| *present))
    }
}

pub trait Except<K, V> {
    /// Present downstream iff present in `self` and absent from every one of
    /// `subtract`.
    fn except(&self, subtract: Vec<ChangeSetObservable<K, V>>) -> ChangeSetObservable<K, V>;
}

impl<K, V> Except<K, V> for ChangeSetObservable<K, V>
where
    K: Hash + Eq + Clone + 'static,
    V: Clone + PartialEq + 'static,
{
    fn except(&self, subtract: Vec<ChangeSetObservable<K, V>>) -> ChangeSetObservable<K, V> {
        let mut sources = vec![self.clone()];
        sources.extend(subtract);
        combine(sources, |flags| flags[0] && flags[1..].iter().all(|present| !*present))
    }
}

pub trait Xor<K, V> {
    /// Present downstream iff present in an odd number of `self` and
    /// `others`.
    fn xor(&self, others: Vec<ChangeSetObservable<K, V>>) -> ChangeSetObservable<K, V>;
}

impl<K, V> Xor<K, V> for ChangeSetObservable<K, V>
where
    K: Hash + Eq + Clone + 'static,
    V: Clone + PartialEq + 'static,
{
    fn xor(&self, others: Vec<ChangeSetObservable<K, V>>) -> ChangeSetObservable<K, V> {
        let mut sources = vec![self.clone()];
        sources.extend(others);
        combine(sources, |flags| flags.iter().filter(|present| **present).count() % 2 == 1)
    }
}
