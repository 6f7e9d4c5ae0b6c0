//! `.filter(predicate)`: re-derives membership from a predicate over
//! each value, translating upstream changes into `Add`/`Update`/`Remove`
//! relative to what previously passed.

use std::cell::RefCell;
use std::hash::Hash;
use std::rc::Rc;

use fnv::FnvHashSet;
use indexmap::IndexMap;

use crate::change::{Change, ChangeReason};
use crate::change_set::{ChangeSetBuilder, ChangeSetKind};
use crate::controllers::FilterController;
use crate::observable::{ChangeSetObservable, ChangeSetResult};

pub trait Filter<K, V> {
    /// Keeps only items for which `predicate` returns `true`, live-updating
    /// as upstream values change. Membership transitions surface as
    /// synthetic `Add`/`Remove`, not just pass-through of the upstream
    /// reason; see the module doc for the per-reason rules. Equivalent to
    /// `filter_with_controller` with a controller the caller never touches
    /// again.
    fn filter(&self, predicate: impl Fn(&V) -> bool + 'static) -> ChangeSetObservable<K, V>;

    /// As `filter`, but the predicate can be swapped live via
    /// [`FilterController::change`], or re-applied in place via
    /// [`FilterController::reevaluate`] — either one re-scans this
    /// operator's full owned cache and emits the resulting Adds/Removes as a
    /// single change set.
    fn filter_with_controller(&self, controller: &FilterController<V>) -> ChangeSetObservable<K, V>;
}

impl<K, V> Filter<K, V> for ChangeSetObservable<K, V>
where
    K: Hash + Eq + Clone + 'static,
    V: Clone + 'static,
{
    fn filter(&self, predicate: impl Fn(&V) -> bool + 'static) -> ChangeSetObservable<K, V> {
        self.filter_with_controller(&FilterController::new(predicate))
    }

    fn filter_with_controller(&self, controller: &FilterController<V>) -> ChangeSetObservable<K, V> {
        let source = self.clone();
        let controller = controller.clone();
        ChangeSetObservable::new(move |observer: Box<dyn FnMut(ChangeSetResult<K, V>)>| {
            let observer: Rc<RefCell<Box<dyn FnMut(ChangeSetResult<K, V>)>>> = Rc::new(RefCell::new(observer));
            // The full upstream collection, independent of membership, so a
            // predicate swap or a `reevaluate()` can recheck values the
            // filter has never had reason to look at since they arrived.
            let cache: Rc<RefCell<IndexMap<K, V>>> = Rc::new(RefCell::new(IndexMap::new()));
            let membership: Rc<RefCell<FnvHashSet<K>>> = Rc::new(RefCell::new(FnvHashSet::default()));

            let cache_for_source = cache.clone();
            let membership_for_source = membership.clone();
            let observer_for_source = observer.clone();
            let controller_for_source = controller.clone();
            let source_subscription = source.subscribe(move |result| match result {
                Ok(change_set) => {
                    let mut cache = cache_for_source.borrow_mut();
                    let mut membership = membership_for_source.borrow_mut();
                    let predicate = controller_for_source.current();
                    let mut builder = ChangeSetBuilder::new();
                    for change in change_set.iter() {
                        if change.reason() != ChangeReason::Remove {
                            cache.insert(change.key().clone(), change.current().clone());
                        } else {
                            cache.shift_remove(change.key());
                        }
                    }
                    for change in change_set.iter() {
                        match change.reason() {
                            ChangeReason::Add => {
                                if predicate(change.current()) {
                                    membership.insert(change.key().clone());
                                    builder.push(Change::add(change.key().clone(), change.current().clone()));
                                }
                            }
                            ChangeReason::Update => {
                                let was_member = membership.contains(change.key());
                                let is_member = predicate(change.current());
                                match (was_member, is_member) {
                                    (true, true) => {
                                        builder.push(Change::update(
                                            change.key().clone(),
                                            change.current().clone(),
                                            change.previous().cloned().expect("update carries previous"),
                                        ));
                                    }
                                    (true, false) => {
                                        membership.remove(change.key());
                                        builder.push(Change::remove(
                                            change.key().clone(),
                                            change.previous().cloned().expect("update carries previous"),
                                        ));
                                    }
                                    (false, true) => {
                                        membership.insert(change.key().clone());
                                        builder.push(Change::add(change.key().clone(), change.current().clone()));
                                    }
                                    (false, false) => {}
                                }
                            }
                            ChangeReason::Remove => {
                                if membership.remove(change.key()) {
                                    builder.push(Change::remove(change.key().clone(), change.current().clone()));
                                }
                            }
                            ChangeReason::Refresh => {
                                let was_member = membership.contains(change.key());
                                let is_member = predicate(change.current());
                                match (was_member, is_member) {
                                    (true, true) => {
                                        builder.push(Change::refresh(change.key().clone(), change.current().clone()));
                                    }
                                    (true, false) => {
                                        membership.remove(change.key());
                                        builder.push(Change::remove(change.key().clone(), change.current().clone()));
                                    }
                                    (false, true) => {
                                        membership.insert(change.key().clone());
                                        builder.push(Change::add(change.key().clone(), change.current().clone()));
                                    }
                                    (false, false) => {}
                                }
                            }
                            // Re-ordering is meaningless below a presence filter; this
                            // operator only ever produces `Unsorted` change sets.
                            ChangeReason::Moved => {}
                        }
                    }
                    if let Some(set) = builder.build(ChangeSetKind::Unsorted) {
                        (*observer_for_source.borrow_mut())(Ok(Rc::new(set)));
                    }
                }
                Err(error) => (*observer_for_source.borrow_mut())(Err(error)),
            });

            // A controller notification (predicate swap or bare reevaluate)
            // re-scans the whole owned cache rather than just touched items,
            // since a swapped predicate may change the verdict for anything.
            let cache_for_controller = cache.clone();
            let membership_for_controller = membership.clone();
            let observer_for_controller = observer.clone();
            let controller_for_notify = controller.clone();
            let controller_subscription = controller.subscribe(move |()| {
                let cache = cache_for_controller.borrow();
                let mut membership = membership_for_controller.borrow_mut();
                let predicate = controller_for_notify.current();
                let mut builder = ChangeSetBuilder::new();

                for key in membership.iter().cloned().collect::<Vec<_>>() {
                    let value = cache.get(&key).expect("member key stays in cache until removed");
                    if !predicate(value) {
                        let value = value.clone();
                        membership.remove(&key);
                        builder.push(Change::remove(key.clone(), value));
                    }
                }
                for (key, value) in cache.iter() {
                    if !membership.contains(key) && predicate(value) {
                        membership.insert(key.clone());
                        builder.push(Change::add(key.clone(), value.clone()));
                    }
                }

                if let Some(set) = builder.build(ChangeSetKind::Unsorted) {
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
