//! Connection status monitoring: a small state machine tracking
//! whether a source has delivered its initial snapshot yet, plus the
//! `deferUntilLoaded`/`skipInitial` operator helpers built on it.

use std::cell::RefCell;
use std::rc::Rc;

use crate::observable::{ChangeSetObservable, ChangeSetResult, Subscription};

/// The lifecycle of a subscribed source, from the observer's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    /// Subscribed, but no change set (not even an empty initial one) has
    /// arrived yet.
    Pending,
    /// At least one change set has been received.
    Loaded,
    /// The upstream terminated with an error.
    Errored,
    /// The upstream completed (not currently modelled by any source in this
    /// crate, but operators that wrap an external `ChangeSetSource` may
    /// reach it).
    Completed,
}

impl ConnectionStatus {
    pub fn is_loaded(self) -> bool {
        matches!(self, ConnectionStatus::Loaded)
    }
}

/// `monitorStatus()`: a `ConnectionStatus` stream derived from a
/// `ChangeSetObservable`'s own activity, independent of its change-set
/// payloads.
pub fn monitor_status<K, V>(
    source: &ChangeSetObservable<K, V>,
    mut observer: impl FnMut(ConnectionStatus) + 'static,
) -> Subscription
where
    K: 'static,
    V: 'static,
{
    observer(ConnectionStatus::Pending);
    source.subscribe(move |result| match result {
        Ok(_) => observer(ConnectionStatus::Loaded),
        Err(_) => observer(ConnectionStatus::Errored),
    })
}

/// `deferUntilLoaded()`: suppresses every change set until the source has
/// emitted its first one, then passes everything through unchanged.
/// Equivalent to buffering nothing — this engine's sources always deliver a
/// full snapshot as their first emission, so "loaded" is simply "has emitted
/// once."
pub fn defer_until_loaded<K, V>(source: &ChangeSetObservable<K, V>) -> ChangeSetObservable<K, V>
where
    K: 'static,
    V: 'static,
{
    let source = source.clone();
    ChangeSetObservable::new(move |mut observer: Box<dyn FnMut(ChangeSetResult<K, V>)>| {
        let loaded = Rc::new(RefCell::new(false));
        source.subscribe(move |result| {
            if result.is_ok() {
                *loaded.borrow_mut() = true;
            }
            if *loaded.borrow() {
                observer(result);
            }
        })
    })
}

/// `skipInitial()`: suppresses exactly the first change set (the initial
/// snapshot) and forwards everything after it.
pub fn skip_initial<K, V>(source: &ChangeSetObservable<K, V>) -> ChangeSetObservable<K, V>
where
    K: 'static,
    V: 'static,
{
    let source = source.clone();
    ChangeSetObservable::new(move |mut observer: Box<dyn FnMut(ChangeSetResult<K, V>)>| {
        let skipped = Rc::new(RefCell::new(false));
        source.subscribe(move |result| {
            if !*skipped.borrow() {
                *skipped.borrow_mut() = true;
                return;
            }
            observer(result);
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::Change;
    use crate::change_set::ChangeSetBuilder;
    use crate::source_cache::SourceCache;

    #[test]
    fn status_transitions_from_pending_to_loaded_on_first_emission() {
        let cache: SourceCache<&str, i32> = SourceCache::new();
        let observable = cache.as_observable();
        let statuses = Rc::new(RefCell::new(Vec::new()));
        let statuses_clone = statuses.clone();
        let _subscription = monitor_status(&observable, move |status| statuses_clone.borrow_mut().push(status));
        assert_eq!(*statuses.borrow(), vec![ConnectionStatus::Pending]);

        cache.edit_infallible(|updater| updater.add_or_update("A", 1));
        assert_eq!(*statuses.borrow(), vec![ConnectionStatus::Pending, ConnectionStatus::Loaded]);
    }

    #[test]
    fn skip_initial_drops_only_the_first_change_set() {
        let mut builder = ChangeSetBuilder::new();
        builder.push(Change::add("A", 1));
        let first = Rc::new(builder.build_unsorted().unwrap());
        let mut builder = ChangeSetBuilder::new();
        builder.push(Change::add("B", 2));
        let second = Rc::new(builder.build_unsorted().unwrap());

        let observable = ChangeSetObservable::new(move |mut observer: Box<dyn FnMut(ChangeSetResult<&str, i32>)>| {
            observer(Ok(first.clone()));
            observer(Ok(second.clone()));
            Subscription::noop()
        });
        let skipped = skip_initial(&observable);
        let received = Rc::new(RefCell::new(Vec::new()));
        let received_clone = received.clone();
        let _subscription = skipped.subscribe(move |result| received_clone.borrow_mut().push(result.unwrap()));
        assert_eq!(received.borrow().len(), 1);
        assert_eq!(received.borrow()[0].changes()[0].key(), &"B");
    }
}
