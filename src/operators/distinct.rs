//! `.distinct()` / `.distinct_values(selector)`: the set of distinct
//! values (or distinct derived keys) currently present, reference-counted
//! so a value shared by several source keys survives until the last holder
//! leaves. The resulting collection is keyed by the value (or derived key)
//! itself — `ChangeSet<U, U>` — reusing the tagged `ChangeSet` type rather
//! than inventing a parallel "distinct change set" type. `distinct()` is
//! just `distinct_values` with the identity selector.

use std::hash::Hash;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::change::{Change, ChangeReason};
use crate::change_set::{ChangeSetBuilder, ChangeSetKind};
use crate::observable::{ChangeSetObservable, ChangeSetResult};

pub trait Distinct<K, V> {
    fn distinct(&self) -> ChangeSetObservable<V, V>
    where
        V: Hash + Eq + Clone + 'static;

    fn distinct_values<U>(&self, selector: impl Fn(&V) -> U + 'static) -> ChangeSetObservable<U, U>
    where
        U: Hash + Eq + Clone + 'static;
}

impl<K, V> Distinct<K, V> for ChangeSetObservable<K, V>
where
    K: Hash + Eq + Clone + 'static,
    V: Clone + 'static,
{
    fn distinct(&self) -> ChangeSetObservable<V, V>
    where
        V: Hash + Eq + Clone + 'static,
    {
        self.distinct_values(|value| value.clone())
    }

    fn distinct_values<U>(&self, selector: impl Fn(&V) -> U + 'static) -> ChangeSetObservable<U, U>
    where
        U: Hash + Eq + Clone + 'static,
    {
        let source = self.clone();
        let selector = Rc::new(selector);
        ChangeSetObservable::new(move |mut observer: Box<dyn FnMut(ChangeSetResult<U, U>)>| {
            let counts: Rc<std::cell::RefCell<IndexMap<U, usize>>> = Rc::new(std::cell::RefCell::new(IndexMap::new()));
            let selector = selector.clone();
            source.subscribe(move |result| match result {
                Ok(change_set) => {
                    let mut counts = counts.borrow_mut();
                    let mut builder = ChangeSetBuilder::new();

                    let mut increment = |builder: &mut ChangeSetBuilder<U, U>, counts: &mut IndexMap<U, usize>, value: U| {
                        let count = counts.entry(value.clone()).or_insert(0);
                        *count += 1;
                        if *count == 1 {
                            builder.push(Change::add(value.clone(), value));
                        }
                    };
                    let mut decrement = |builder: &mut ChangeSetBuilder<U, U>, counts: &mut IndexMap<U, usize>, value: U| {
                        if let Some(count) = counts.get_mut(&value) {
                            *count -= 1;
                            if *count == 0 {
                                counts.shift_remove(&value);
                                builder.push(Change::remove(value.clone(), value));
                            }
                        }
                    };

                    for change in change_set.iter() {
                        match change.reason() {
                            ChangeReason::Add => increment(&mut builder, &mut counts, selector(change.current())),
                            ChangeReason::Update => {
                                if let Some(previous) = change.previous() {
                                    decrement(&mut builder, &mut counts, selector(previous));
                                }
                                increment(&mut builder, &mut counts, selector(change.current()));
                            }
                            ChangeReason::Remove => decrement(&mut builder, &mut counts, selector(change.current())),
                            ChangeReason::Refresh | ChangeReason::Moved => {}
                        }
                    }

                    if let Some(set) = builder.build(ChangeSetKind::Unsorted) {
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
