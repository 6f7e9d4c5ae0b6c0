//! `.virtualise(controller)`: the UI-virtualisation counterpart to
//! [`crate::operators::page::Page`] — a `(start_index, size)` window over a
//! sorted collection instead of a `(page, page_size)` one, otherwise the same
//! two-source (upstream + controller) re-evaluation shape.

use std::cell::RefCell;
use std::hash::Hash;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::change::Change;
use crate::change_set::{ChangeSetBuilder, ChangeSetKind, VirtualRequest, VirtualResponse};
use crate::controllers::VirtualController;
use crate::error::Error;
use crate::observable::{ChangeSetObservable, ChangeSetResult, Subscription};
use crate::source_cache::require_non_negative_start_index;

struct VirtualState<K, V> {
    values: IndexMap<K, V>,
    order: Vec<K>,
    visible: IndexMap<K, V>,
}

impl<K: Hash + Eq + Clone, V: Clone> VirtualState<K, V> {
    fn new() -> Self {
        VirtualState { values: IndexMap::new(), order: Vec::new(), visible: IndexMap::new() }
    }

    fn apply_upstream(&mut self, change_set: &crate::change_set::ChangeSet<K, V>) {
        use crate::change::ChangeReason::*;
        for change in change_set.iter() {
            match change.reason() {
                Add | Update | Refresh => {
                    self.values.insert(change.key().clone(), change.current().clone());
                }
                Remove => {
                    self.values.shift_remove(change.key());
                }
                Moved => {}
            }
        }
        if let Some(sorted) = change_set.kind().sorted_keys() {
            self.order = sorted.to_vec();
        }
    }
}

fn validate(request: VirtualRequest) -> Result<(), crate::error::ContractViolation> {
    require_non_negative_start_index(request.start_index as i64)?;
    Ok(())
}

pub trait Virtualise<K, V> {
    fn virtualise(&self, controller: &VirtualController) -> ChangeSetObservable<K, V>;
}

impl<K, V> Virtualise<K, V> for ChangeSetObservable<K, V>
where
    K: Hash + Eq + Clone + 'static,
    V: Clone + PartialEq + 'static,
{
    fn virtualise(&self, controller: &VirtualController) -> ChangeSetObservable<K, V> {
        let source = self.clone();
        let controller = controller.clone();
        ChangeSetObservable::new(move |observer: Box<dyn FnMut(ChangeSetResult<K, V>)>| {
            let observer: Rc<RefCell<Box<dyn FnMut(ChangeSetResult<K, V>)>>> = Rc::new(RefCell::new(observer));
            let state = Rc::new(RefCell::new(VirtualState::<K, V>::new()));

            let state_for_source = state.clone();
            let observer_for_source = observer.clone();
            let controller_for_source = controller.clone();
            let source_subscription = source.subscribe(move |result| match result {
                Ok(change_set) => {
                    let mut state = state_for_source.borrow_mut();
                    state.apply_upstream(&change_set);
                    let request = controller_for_source.current();
                    emit_window(&mut state, request, &mut *observer_for_source.borrow_mut());
                }
                Err(error) => (*observer_for_source.borrow_mut())(Err(error)),
            });

            let state_for_controller = state.clone();
            let observer_for_controller = observer.clone();
            let controller_subscription = controller.subscribe(move |request| {
                let mut state = state_for_controller.borrow_mut();
                emit_window(&mut state, request, &mut *observer_for_controller.borrow_mut());
            });

            Subscription::new(move || {
                drop(source_subscription);
                drop(controller_subscription);
            })
        })
    }
}

fn emit_window<K, V>(
    state: &mut VirtualState<K, V>,
    request: VirtualRequest,
    observer: &mut dyn FnMut(ChangeSetResult<K, V>),
) where
    K: Hash + Eq + Clone,
    V: Clone + PartialEq,
{
    if let Err(violation) = validate(request) {
        observer(Err(Error::Contract(violation)));
        return;
    }

    let total_count = state.order.len();
    let start = request.start_index.min(total_count);
    let end = start.saturating_add(request.size).min(total_count);
    let window: Vec<K> = state.order[start..end].to_vec();

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

    let response = VirtualResponse { start_index: request.start_index, size: request.size, total_count };
    if let Some(set) = builder.build(ChangeSetKind::Virtual { sorted_keys: window, response }) {
        observer(Ok(Rc::new(set)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change_set::ChangeSet;
    use crate::operators::sort::Sort;
    use crate::source_cache::SourceCache;

    #[test]
    fn virtualise_emits_only_the_requested_window() {
        let cache: SourceCache<&str, i32> = SourceCache::new();
        let sorted = cache.as_observable().sort(|a, b| a.cmp(b));
        let controller = VirtualController::new(VirtualRequest::new(0, 2));
        let windowed = sorted.virtualise(&controller);

        let received: Rc<RefCell<Vec<ChangeSet<&str, i32>>>> = Rc::new(RefCell::new(Vec::new()));
        let received_clone = received.clone();
        let _subscription = windowed.subscribe(move |result| received_clone.borrow_mut().push(result.unwrap()));

        cache.edit_infallible(|updater| {
            updater.add_or_update("A", 1);
            updater.add_or_update("B", 2);
            updater.add_or_update("C", 3);
        });
        assert_eq!(received.borrow().last().unwrap().kind().sorted_keys(), Some(["A", "B"].as_slice()));

        received.borrow_mut().clear();
        controller.set(VirtualRequest::new(1, 2));
        let last = received.borrow().last().unwrap().clone();
        assert_eq!(last.kind().sorted_keys(), Some(["B", "C"].as_slice()));
    }

    #[test]
    fn a_start_index_past_the_end_yields_an_empty_window_without_erroring() {
        let cache: SourceCache<&str, i32> = SourceCache::new();
        let sorted = cache.as_observable().sort(|a, b| a.cmp(b));
        let controller = VirtualController::new(VirtualRequest::new(50, 2));
        let windowed = sorted.virtualise(&controller);

        let errors: Rc<RefCell<Vec<Error<&str>>>> = Rc::new(RefCell::new(Vec::new()));
        let errors_clone = errors.clone();
        let _subscription = windowed.subscribe(move |result| {
            if let Err(error) = result {
                errors_clone.borrow_mut().push(error);
            }
        });

        cache.edit_infallible(|updater| updater.add_or_update("A", 1));
        assert!(errors.borrow().is_empty());
    }
}
