//! Live-updatable parameters for the operators that need more than "the
//! current upstream change set" to decide what to emit: `Page` needs to
//! react to a changed [`PageRequest`] even when nothing upstream changed,
//! `Virtualise` needs the same for [`VirtualRequest`], `Filter` needs to
//! re-scan its cache when a host swaps its predicate, `Sort` needs the same
//! for a swapped comparator, `Transform` needs to re-project already-cached
//! items on demand, and `Group` needs to re-derive group keys on demand.
//! Each controller is a small `Cell`/`RefCell` + [`Subject`] pair a host
//! mutates directly; the operator subscribes to the notification side.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::change_set::{PageRequest, VirtualRequest};
use crate::observable::{Subject, Subscription};

/// Drives [`crate::operators::page::Page`]. Cloning shares the same
/// underlying request — typically held by a host's UI layer and handed to
/// `.page(&controller)`.
#[derive(Clone)]
pub struct PageController {
    request: std::rc::Rc<Cell<PageRequest>>,
    changed: std::rc::Rc<Subject<PageRequest>>,
}

impl PageController {
    pub fn new(initial: PageRequest) -> Self {
        PageController { request: std::rc::Rc::new(Cell::new(initial)), changed: std::rc::Rc::new(Subject::new()) }
    }

    pub fn current(&self) -> PageRequest {
        self.request.get()
    }

    pub fn set(&self, request: PageRequest) {
        self.request.set(request);
        self.changed.emit(request);
    }

    pub(crate) fn subscribe(&self, observer: impl FnMut(PageRequest) + 'static) -> Subscription {
        self.changed.subscribe(Box::new(observer))
    }
}

/// Drives [`crate::operators::virtualise::Virtualise`].
#[derive(Clone)]
pub struct VirtualController {
    request: std::rc::Rc<Cell<VirtualRequest>>,
    changed: std::rc::Rc<Subject<VirtualRequest>>,
}

impl VirtualController {
    pub fn new(initial: VirtualRequest) -> Self {
        VirtualController { request: std::rc::Rc::new(Cell::new(initial)), changed: std::rc::Rc::new(Subject::new()) }
    }

    pub fn current(&self) -> VirtualRequest {
        self.request.get()
    }

    pub fn set(&self, request: VirtualRequest) {
        self.request.set(request);
        self.changed.emit(request);
    }

    pub(crate) fn subscribe(&self, observer: impl FnMut(VirtualRequest) + 'static) -> Subscription {
        self.changed.subscribe(Box::new(observer))
    }
}

/// Drives [`crate::operators::filter::Filter::filter_with_controller`]. Holds
/// the live predicate and a bare `()` notification: `change` swaps the
/// predicate and notifies, `reevaluate` notifies without swapping it (for
/// when an item's own state moved in place and the filter needs to
/// re-inspect values it already has). Either way the filter re-scans its
/// whole owned cache against whichever predicate is current at notification
/// time, so one signal covers both.
#[derive(Clone)]
pub struct FilterController<V> {
    predicate: Rc<RefCell<Rc<dyn Fn(&V) -> bool>>>,
    changed: Rc<Subject<()>>,
}

impl<V: 'static> FilterController<V> {
    pub fn new(predicate: impl Fn(&V) -> bool + 'static) -> Self {
        FilterController { predicate: Rc::new(RefCell::new(Rc::new(predicate))), changed: Rc::new(Subject::new()) }
    }

    pub fn change(&self, predicate: impl Fn(&V) -> bool + 'static) {
        *self.predicate.borrow_mut() = Rc::new(predicate);
        self.changed.emit(());
    }

    pub fn reevaluate(&self) {
        self.changed.emit(());
    }

    pub(crate) fn current(&self) -> Rc<dyn Fn(&V) -> bool> {
        self.predicate.borrow().clone()
    }

    pub(crate) fn subscribe(&self, observer: impl FnMut(()) + 'static) -> Subscription {
        self.changed.subscribe(Box::new(observer))
    }
}

/// Fires [`crate::operators::transform::Transform::transform_with_trigger`]'s
/// retransform pass. Unlike the other controllers this carries no persistent
/// state of its own — each `fire` call hands the operator a one-shot
/// selector naming which already-cached items to re-project, then the
/// selector is discarded.
#[derive(Clone)]
pub struct RetransformTrigger<K, V> {
    signal: Rc<Subject<Rc<dyn Fn(&K, &V) -> bool>>>,
}

impl<K: 'static, V: 'static> RetransformTrigger<K, V> {
    pub fn new() -> Self {
        RetransformTrigger { signal: Rc::new(Subject::new()) }
    }

    pub fn fire(&self, selector: impl Fn(&K, &V) -> bool + 'static) {
        self.signal.emit(Rc::new(selector));
    }

    pub(crate) fn subscribe(&self, observer: impl FnMut(Rc<dyn Fn(&K, &V) -> bool>) + 'static) -> Subscription {
        self.signal.subscribe(Box::new(observer))
    }
}

impl<K: 'static, V: 'static> Default for RetransformTrigger<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives [`crate::operators::sort::Sort::sort_with_controller`]. As
/// [`FilterController`], but the swapped state is a comparator rather than a
/// predicate: `change` re-sorts the whole maintained order against the new
/// comparator, `resort` re-sorts in place against whichever comparator is
/// current (for when an item's own sort key moved without the comparator
/// itself changing).
#[derive(Clone)]
pub struct SortController<V> {
    compare: Rc<RefCell<Rc<dyn Fn(&V, &V) -> std::cmp::Ordering>>>,
    changed: Rc<Subject<()>>,
}

impl<V: 'static> SortController<V> {
    pub fn new(compare: impl Fn(&V, &V) -> std::cmp::Ordering + 'static) -> Self {
        SortController { compare: Rc::new(RefCell::new(Rc::new(compare))), changed: Rc::new(Subject::new()) }
    }

    pub fn change(&self, compare: impl Fn(&V, &V) -> std::cmp::Ordering + 'static) {
        *self.compare.borrow_mut() = Rc::new(compare);
        self.changed.emit(());
    }

    pub fn resort(&self) {
        self.changed.emit(());
    }

    pub(crate) fn current(&self) -> Rc<dyn Fn(&V, &V) -> std::cmp::Ordering> {
        self.compare.borrow().clone()
    }

    pub(crate) fn subscribe(&self, observer: impl FnMut(()) + 'static) -> Subscription {
        self.changed.subscribe(Box::new(observer))
    }
}

/// Drives [`crate::operators::group::Group::group_with_controller`]'s regroup
/// signal: forces every currently cached
/// item's group key to be recomputed, even though nothing about the item
/// itself changed — for when the grouping function depends on state outside
/// the item. Carries no persistent state of its own, the same as
/// [`RetransformTrigger`].
#[derive(Clone)]
pub struct RegroupController {
    signal: Rc<Subject<()>>,
}

impl RegroupController {
    pub fn new() -> Self {
        RegroupController { signal: Rc::new(Subject::new()) }
    }

    pub fn regroup(&self) {
        self.signal.emit(());
    }

    pub(crate) fn subscribe(&self, observer: impl FnMut(()) + 'static) -> Subscription {
        self.signal.subscribe(Box::new(observer))
    }
}

impl Default for RegroupController {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives [`crate::operators::misc::BatchIf::batch_if`]: while paused,
/// upstream changes accumulate instead of passing straight through; the
/// moment `resume` (or `set(false)`) runs, everything collected since
/// pausing flushes as one consolidated change set. `pause`/`resume` are
/// no-ops if the controller is already in that state, so toggling it
/// doesn't flush an empty accumulator.
#[derive(Clone)]
pub struct PauseController {
    paused: Rc<Cell<bool>>,
    changed: Rc<Subject<bool>>,
}

impl PauseController {
    pub fn new() -> Self {
        PauseController { paused: Rc::new(Cell::new(false)), changed: Rc::new(Subject::new()) }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.get()
    }

    pub fn pause(&self) {
        self.set(true);
    }

    pub fn resume(&self) {
        self.set(false);
    }

    pub fn set(&self, paused: bool) {
        if self.paused.get() != paused {
            self.paused.set(paused);
            self.changed.emit(paused);
        }
    }

    pub(crate) fn subscribe(&self, observer: impl FnMut(bool) + 'static) -> Subscription {
        self.changed.subscribe(Box::new(observer))
    }
}

impl Default for PauseController {
    fn default() -> Self {
        Self::new()
    }
}
