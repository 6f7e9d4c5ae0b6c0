//! `.as_observable_cache()`: eagerly subscribes to a [`ChangeSetObservable`]
//! and materialises it into a queryable [`ObservableCache`] — current
//! count, `lookup`/`items`/`key_values` snapshots, and a `connect()` stream
//! for anyone who wants the live change sets too, all backed by the same
//! [`ObservableCacheHandle`] `SourceCache` and `PublishRefCount` already use.
//! Unlike `publish_ref_count`, the upstream subscription here is eager and
//! owned outright by the returned value — there's no ref-counted
//! multiplexing, since an `ObservableCache` is meant to be held (and
//! queried synchronously) rather than subscribed to directly many times.

use std::hash::Hash;
use std::rc::Rc;

use crate::cache::ObservableCacheHandle;
use crate::change::Change;
use crate::observable::{ChangeSetObservable, ChangeSetResult, Subscription};

/// A materialised, queryable snapshot of a [`ChangeSetObservable`], kept
/// live for as long as this value is held. Dropping it disposes the
/// upstream subscription.
pub struct ObservableCache<K, V> {
    handle: ObservableCacheHandle<K, V>,
    _upstream: Subscription,
}

impl<K, V> ObservableCache<K, V>
where
    K: Hash + Eq + Clone + 'static,
    V: Clone + 'static,
{
    pub fn count(&self) -> usize {
        self.handle.count()
    }

    pub fn lookup(&self, key: &K) -> Option<V> {
        self.handle.lookup(key)
    }

    pub fn items(&self) -> Vec<V> {
        self.handle.items()
    }

    pub fn key_values(&self) -> Vec<(K, V)> {
        self.handle.key_values()
    }

    /// A fresh subscriber receives the current contents as one `Add`-only
    /// change set, then every subsequent upstream change.
    pub fn connect(&self, observer: impl FnMut(ChangeSetResult<K, V>) + 'static) -> Subscription {
        self.handle.connect(observer)
    }

    pub fn count_changed(&self, observer: impl FnMut(usize) + 'static) -> Subscription {
        self.handle.count_changed(observer)
    }

    pub fn watch(&self, key: K, observer: impl FnMut(Change<K, V>) + 'static) -> Subscription {
        self.handle.watch(key, observer)
    }
}

pub trait AsObservableCache<K, V> {
    fn as_observable_cache(&self) -> ObservableCache<K, V>;
}

impl<K, V> AsObservableCache<K, V> for ChangeSetObservable<K, V>
where
    K: Hash + Eq + Clone + 'static,
    V: Clone + 'static,
{
    fn as_observable_cache(&self) -> ObservableCache<K, V> {
        let handle = ObservableCacheHandle::new();
        let handle_for_upstream = handle.clone();
        let upstream = self.subscribe(move |result| {
            if let Ok(change_set) = result {
                handle_for_upstream.apply(change_set);
            }
        });
        ObservableCache { handle, _upstream: upstream }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source_cache::SourceCache;
    use std::cell::RefCell;

    #[test]
    fn as_observable_cache_tracks_upstream_state_synchronously() {
        let cache: SourceCache<&str, i32> = SourceCache::new();
        cache.edit_infallible(|updater| {
            updater.add_or_update("A", 1);
            updater.add_or_update("B", 2);
        });

        let observable_cache = cache.as_observable().as_observable_cache();
        assert_eq!(observable_cache.count(), 2);
        assert_eq!(observable_cache.lookup(&"A"), Some(1));

        cache.edit_infallible(|updater| updater.remove("A"));
        assert_eq!(observable_cache.count(), 1);
        assert_eq!(observable_cache.lookup(&"A"), None);
    }

    #[test]
    fn connect_on_an_observable_cache_replays_the_snapshot_then_live_changes() {
        let cache: SourceCache<&str, i32> = SourceCache::new();
        cache.edit_infallible(|updater| updater.add_or_update("A", 1));
        let observable_cache = cache.as_observable().as_observable_cache();

        let received: Rc<RefCell<Vec<usize>>> = Rc::new(RefCell::new(Vec::new()));
        let received_clone = received.clone();
        let _subscription = observable_cache.connect(move |result| received_clone.borrow_mut().push(result.unwrap().len()));
        assert_eq!(*received.borrow(), vec![1]);

        cache.edit_infallible(|updater| updater.add_or_update("B", 2));
        assert_eq!(*received.borrow(), vec![1, 1]);
    }

    #[test]
    fn dropping_the_observable_cache_disposes_the_upstream_subscription() {
        use std::cell::Cell;
        let torn_down: Rc<Cell<bool>> = Rc::new(Cell::new(false));
        let torn_down_clone = torn_down.clone();
        let source = ChangeSetObservable::<&str, i32>::new(move |_observer| {
            let torn_down_clone = torn_down_clone.clone();
            Subscription::new(move || torn_down_clone.set(true))
        });

        let observable_cache = source.as_observable_cache();
        assert!(!torn_down.get());
        drop(observable_cache);
        assert!(torn_down.get());
    }
}
