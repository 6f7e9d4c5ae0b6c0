//! `.transform_many(selector)`: one source item expands to zero or
//! more target items under a derived key. Every update or removal of the
//! source item retracts its previously produced targets and, for
//! update/refresh, re-emits the freshly selected ones — a full
//! retract-and-reapply rather than a minimal diff against the prior target
//! set, which keeps the bookkeeping here to "which target keys did this
//! source key most recently produce," nothing more.

use std::hash::Hash;
use std::rc::Rc;

use fnv::FnvHashMap;
use indexmap::IndexMap;

use crate::change::{Change, ChangeReason};
use crate::change_set::ChangeSetBuilder;
use crate::observable::{ChangeSetObservable, ChangeSetResult};

pub trait TransformMany<K, V> {
    fn transform_many<K2, V2>(
        &self,
        selector: impl Fn(&K, &V) -> Vec<(K2, V2)> + 'static,
    ) -> ChangeSetObservable<K2, V2>
    where
        K2: Hash + Eq + Clone + 'static,
        V2: Clone + 'static;
}

impl<K, V> TransformMany<K, V> for ChangeSetObservable<K, V>
where
    K: Hash + Eq + Clone + 'static,
    V: Clone + 'static,
{
    fn transform_many<K2, V2>(
        &self,
        selector: impl Fn(&K, &V) -> Vec<(K2, V2)> + 'static,
    ) -> ChangeSetObservable<K2, V2>
    where
        K2: Hash + Eq + Clone + 'static,
        V2: Clone + 'static,
    {
        let source = self.clone();
        let selector = Rc::new(selector);
        ChangeSetObservable::new(move |mut observer: Box<dyn FnMut(ChangeSetResult<K2, V2>)>| {
            let produced: Rc<std::cell::RefCell<FnvHashMap<K, Vec<K2>>>> = Rc::new(std::cell::RefCell::new(FnvHashMap::default()));
            let targets: Rc<std::cell::RefCell<IndexMap<K2, V2>>> = Rc::new(std::cell::RefCell::new(IndexMap::new()));
            let selector = selector.clone();
            source.subscribe(move |result| match result {
                Ok(change_set) => {
                    let mut produced = produced.borrow_mut();
                    let mut targets = targets.borrow_mut();
                    let mut builder = ChangeSetBuilder::new();

                    let mut retract = |builder: &mut ChangeSetBuilder<K2, V2>, keys: Vec<K2>, targets: &mut IndexMap<K2, V2>| {
                        for key in keys {
                            if let Some(value) = targets.shift_remove(&key) {
                                builder.push(Change::remove(key, value));
                            }
                        }
                    };

                    for change in change_set.iter() {
                        match change.reason() {
                            ChangeReason::Add => {
                                let items = selector(change.key(), change.current());
                                let mut new_keys = Vec::with_capacity(items.len());
                                for (target_key, target_value) in items {
                                    new_keys.push(target_key.clone());
                                    targets.insert(target_key.clone(), target_value.clone());
                                    builder.push(Change::add(target_key, target_value));
                                }
                                produced.insert(change.key().clone(), new_keys);
                            }
                            ChangeReason::Update | ChangeReason::Refresh => {
                                if let Some(previous_keys) = produced.remove(change.key()) {
                                    retract(&mut builder, previous_keys, &mut targets);
                                }
                                let items = selector(change.key(), change.current());
                                let mut new_keys = Vec::with_capacity(items.len());
                                for (target_key, target_value) in items {
                                    new_keys.push(target_key.clone());
                                    targets.insert(target_key.clone(), target_value.clone());
                                    builder.push(Change::add(target_key, target_value));
                                }
                                produced.insert(change.key().clone(), new_keys);
                            }
                            ChangeReason::Remove => {
                                if let Some(previous_keys) = produced.remove(change.key()) {
                                    retract(&mut builder, previous_keys, &mut targets);
                                }
                            }
                            ChangeReason::Moved => {}
                        }
                    }

                    if let Some(set) = builder.build(crate::change_set::ChangeSetKind::Unsorted) {
                        observer(Ok(Rc::new(set)));
                    }
                }
                Err(error) => observer(Err(match error {
                    crate::error::Error::Callback { cause, .. } => crate::error::Error::Callback { key: None, cause },
                    crate::error::Error::Contract(violation) => crate::error::Error::Contract(violation),
                    crate::error::Error::Disposed => crate::error::Error::Disposed,
                })),
            })
        })
    }
}
