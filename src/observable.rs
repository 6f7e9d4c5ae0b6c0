//! The cold-observable interface every operator consumes and produces.
//!
//! Concrete publish/subscribe machinery is treated as an external
//! collaborator, described by interface only. This module is that
//! interface, plus the minimal concrete implementation ([`Subject`]) the
//! crate's own operators and tests need to actually run: a synchronous,
//! single-threaded multicast broadcaster, in the spirit of the
//! callback-registry pattern used by reactive collection crates (e.g. an
//! `on_insert`/`on_remove` subscriber list kept in a `RefCell<Vec<_>>`). A
//! production host is free to swap in a real publish/subscribe runtime by
//! implementing [`ChangeSetSource`] itself.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::change_set::ChangeSet;
use crate::error::Error;

/// The item type every change-set stream carries: either the next
/// consolidated change set, or a terminal error — an error terminates only
/// the affected subscription, not every other subscriber of the same
/// source.
pub type ChangeSetResult<K, V> = Result<Rc<ChangeSet<K, V>>, Error<K>>;

/// A disposable handle to an active subscription.
///
/// Disposal is idempotent: calling [`Subscription::dispose`] more than
/// once, or dropping after disposing, runs the teardown action at most
/// once.
pub struct Subscription {
    teardown: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    pub fn new(teardown: impl FnOnce() + 'static) -> Self {
        Subscription { teardown: Some(Box::new(teardown)) }
    }

    /// A subscription with no teardown action.
    pub fn noop() -> Self {
        Subscription { teardown: None }
    }

    pub fn dispose(&mut self) {
        if let Some(teardown) = self.teardown.take() {
            teardown();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.teardown.is_none()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Anything that can be subscribed to for a stream of change sets.
///
/// Subscribing is, by default, "cold": each call to [`ChangeSetSource::subscribe`]
/// independently drives the operator chain from its upstream (re-running
/// `connect()`-style initial snapshots). [`crate::operators::publish_ref_count`]
/// is the operator that turns a cold source into a shared, ref-counted one.
pub trait ChangeSetSource<K, V> {
    fn subscribe(&self, observer: Box<dyn FnMut(ChangeSetResult<K, V>)>) -> Subscription;
}

impl<K, V, F> ChangeSetSource<K, V> for F
where
    F: Fn(Box<dyn FnMut(ChangeSetResult<K, V>)>) -> Subscription,
{
    fn subscribe(&self, observer: Box<dyn FnMut(ChangeSetResult<K, V>)>) -> Subscription {
        self(observer)
    }
}

/// A thin, cloneable handle onto a (possibly not-yet-constructed)
/// change-set stream. Operators are implemented as traits with extension
/// methods on `ChangeSetObservable`, so `use
/// reactive_collections::operators::Filter;` brings `.filter(...)` into
/// scope for any value of this type.
pub struct ChangeSetObservable<K, V> {
    source: Rc<dyn ChangeSetSource<K, V>>,
}

impl<K, V> ChangeSetObservable<K, V> {
    pub fn new(source: impl ChangeSetSource<K, V> + 'static) -> Self {
        ChangeSetObservable { source: Rc::new(source) }
    }

    pub fn from_rc(source: Rc<dyn ChangeSetSource<K, V>>) -> Self {
        ChangeSetObservable { source }
    }

    pub fn as_rc(&self) -> Rc<dyn ChangeSetSource<K, V>> {
        self.source.clone()
    }

    pub fn subscribe(&self, observer: impl FnMut(ChangeSetResult<K, V>) + 'static) -> Subscription {
        self.source.subscribe(Box::new(observer))
    }
}

impl<K, V> Clone for ChangeSetObservable<K, V> {
    fn clone(&self) -> Self {
        ChangeSetObservable { source: self.source.clone() }
    }
}

/// A synchronous multicast broadcaster: every subscriber registered at the
/// moment [`Subject::emit`] is called receives the (cheaply `Rc`-shared)
/// value. Used by `SourceCache` to fan edit-scope change sets out to
/// `connect()`ed subscribers, and by `PublishRefCount` to share one upstream
/// subscription across many downstream ones.
pub struct Subject<T> {
    next_id: Cell<u64>,
    observers: Rc<RefCell<Vec<(u64, Box<dyn FnMut(T)>)>>>,
}

impl<T: Clone> Default for Subject<T> {
    fn default() -> Self {
        Subject { next_id: Cell::new(0), observers: Rc::new(RefCell::new(Vec::new())) }
    }
}

impl<T: Clone> Subject<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscriber_count(&self) -> usize {
        self.observers.borrow().len()
    }

    /// Registers an observer, returning a subscription that removes it.
    pub fn subscribe(&self, observer: Box<dyn FnMut(T)>) -> Subscription {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.observers.borrow_mut().push((id, observer));

        let observers = self.observers.clone();
        Subscription::new(move || {
            observers.borrow_mut().retain(|(observer_id, _)| *observer_id != id);
        })
    }

    /// Delivers `value` to every observer registered at the start of this
    /// call.
    ///
    /// The observer list is moved out of the `RefCell` for the duration of
    /// the loop so that callbacks may freely subscribe (appended after the
    /// loop) or unsubscribe other observers. An observer that unsubscribes
    /// *itself* mid-emission takes effect starting with the next `emit`
    /// call, not the current one — a documented simplification appropriate
    /// for this single-threaded reference implementation.
    pub fn emit(&self, value: T) {
        let mut active = std::mem::take(&mut *self.observers.borrow_mut());
        for (_, callback) in active.iter_mut() {
            callback(value.clone());
        }
        let mut observers = self.observers.borrow_mut();
        active.extend(observers.drain(..));
        *observers = active;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell as StdRefCell;

    #[test]
    fn subscription_teardown_runs_at_most_once() {
        let calls = Rc::new(StdRefCell::new(0));
        let calls_clone = calls.clone();
        let mut subscription = Subscription::new(move || *calls_clone.borrow_mut() += 1);
        subscription.dispose();
        subscription.dispose();
        drop(subscription);
        assert_eq!(*calls.borrow(), 1);
    }
}
