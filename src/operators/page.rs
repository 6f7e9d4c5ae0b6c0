//! `.page(controller)`: slices a sorted collection into one page at a
//! time. Unlike the other operators, a new page can be requested without any
//! upstream change at all — [`PageController`] is a live parameter the host
//! mutates directly — so this operator subscribes to *two* sources (the
//! upstream sorted collection and the controller's change notifications) and
//! re-evaluates the visible window whenever either fires.

use std::cell::RefCell;
use std::hash::Hash;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::change::Change;
use crate::change_set::{ChangeSetBuilder, ChangeSetKind, PageRequest, PageResponse};
use crate::controllers::PageController;
use crate::error::Error;
use crate::observable::{ChangeSetObservable, ChangeSetResult, Subscription};
use crate::source_cache::{require_positive_page, require_positive_page_size};

struct PageState<K, V> {
    values: IndexMap<K, V>,
    order: Vec<K>,
    visible: IndexMap<K, V>,
}

impl<K: Hash + Eq + Clone, V: Clone> PageState<K, V> {
    fn new() -> Self {
        PageState { values: IndexMap::new(), order: Vec::new(), visible: IndexMap::new() }
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

fn validate(request: PageRequest) -> Result<(), crate::error::ContractViolation> {
    require_positive_page(request.page as i64)?;
    require_positive_page_size(request.page_size as i64)?;
    Ok(())
}

pub trait Page<K, V> {
    fn page(&self, controller: &PageController) -> ChangeSetObservable<K, V>;
}

impl<K, V> Page<K, V> for ChangeSetObservable<K, V>
where
    K: Hash + Eq + Clone + 'static,
    V: Clone + PartialEq + 'static,
{
    fn page(&self, controller: &PageController) -> ChangeSetObservable<K, V> {
        let source = self.clone();
        let controller = controller.clone();
        ChangeSetObservable::new(move |observer: Box<dyn FnMut(ChangeSetResult<K, V>)>| {
            let observer: Rc<RefCell<Box<dyn FnMut(ChangeSetResult<K, V>)>>> = Rc::new(RefCell::new(observer));
            let state = Rc::new(RefCell::new(PageState::<K, V>::new()));

            let state_for_source = state.clone();
            let observer_for_source = observer.clone();
            let controller_for_source = controller.clone();
            let source_subscription = source.subscribe(move |result| match result {
                Ok(change_set) => {
                    let mut state = state_for_source.borrow_mut();
                    state.apply_upstream(&change_set);
                    let request = controller_for_source.current();
                    emit_page(&mut state, request, &mut *observer_for_source.borrow_mut());
                }
                Err(error) => (*observer_for_source.borrow_mut())(Err(error)),
            });

            let state_for_controller = state.clone();
            let observer_for_controller = observer.clone();
            let controller_subscription = controller.subscribe(move |request| {
                let mut state = state_for_controller.borrow_mut();
                emit_page(&mut state, request, &mut *observer_for_controller.borrow_mut());
            });

            Subscription::new(move || {
                drop(source_subscription);
                drop(controller_subscription);
            })
        })
    }
}

fn emit_page<K, V>(state: &mut PageState<K, V>, request: PageRequest, observer: &mut dyn FnMut(ChangeSetResult<K, V>))
where
    K: Hash + Eq + Clone,
    V: Clone + PartialEq,
{
    if let Err(violation) = validate(request) {
        observer(Err(Error::Contract(violation)));
        return;
    }

    let total_count = state.order.len();
    let page_size = request.page_size;
    let total_pages = total_count.div_ceil(page_size);
    // A page past the end clamps down to the last page rather than coming
    // back empty, so a host doesn't need to watch `total_pages` itself just
    // to avoid requesting one slice too far.
    let page = request.page.min(total_pages.max(1));
    let start = (page - 1).saturating_mul(page_size).min(total_count);
    let end = start.saturating_add(page_size).min(total_count);
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

    let response = PageResponse { page, page_size, total_pages, total_count };
    if let Some(set) = builder.build(ChangeSetKind::Paged { sorted_keys: window, response }) {
        observer(Ok(Rc::new(set)));
    }
}
