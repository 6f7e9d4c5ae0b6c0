//! `Cache<K, V>`: the in-memory key -> value map every owned collection in
//! this crate is built on, plus `ObservableCacheHandle`, the connected,
//! subscribable view over one.
//!
//! `IndexMap` (rather than a plain `HashMap`) is used throughout so that
//! iteration order matches insertion/first-touch order without a second
//! side structure — see `DESIGN.md` for the full rationale.

use std::hash::Hash;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::change::Change;
use crate::change_set::{ChangeSet, ChangeSetKind};
use crate::observable::{ChangeSetResult, Subject, Subscription};

/// A plain in-memory key -> value map. Keys are unique; unlike a
/// `SourceCache`, a bare `Cache` has no notion of edit scopes or change
/// notification — it is the storage primitive operators embed.
#[derive(Debug, Clone)]
pub struct Cache<K, V> {
    map: IndexMap<K, V>,
}

impl<K: Hash + Eq, V> Default for Cache<K, V> {
    fn default() -> Self {
        Cache { map: IndexMap::new() }
    }
}

impl<K: Hash + Eq, V> Cache<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.map.get(key)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.map.get_mut(key)
    }

    /// Inserts or overwrites a value, returning the previous one if any.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        self.map.insert(key, value)
    }

    /// Removes a key, returning its value if it was present.
    ///
    /// Uses `shift_remove` so remaining entries keep their relative order
    /// (important for `SizeLimiter`'s insertion-order eviction and for any
    /// cache whose iteration order a downstream operator depends on).
    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.map.shift_remove(key)
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    pub fn iter(&self) -> indexmap::map::Iter<'_, K, V> {
        self.map.iter()
    }

    pub fn keys(&self) -> indexmap::map::Keys<'_, K, V> {
        self.map.keys()
    }

    pub fn values(&self) -> indexmap::map::Values<'_, K, V> {
        self.map.values()
    }

    pub fn get_index_of(&self, key: &K) -> Option<usize> {
        self.map.get_index_of(key)
    }
}

impl<'a, K: Hash + Eq, V> IntoIterator for &'a Cache<K, V> {
    type Item = (&'a K, &'a V);
    type IntoIter = indexmap::map::Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.map.iter()
    }
}

/// The connected, read-only view over an owned cache: current count, items,
/// a `countChanged` stream, a `connect()` stream of change sets (initial
/// snapshot, then live edits) and a per-key `watch(key)` stream.
///
/// This is shared machinery: `SourceCache` embeds one to implement its own
/// public `connect`/`watch`/`countChanged`, and operators that expose a
/// live sub-cache (`Group`'s mutable groups) embed one too.
pub struct ObservableCacheHandle<K, V> {
    cache: Rc<std::cell::RefCell<Cache<K, V>>>,
    changes: Rc<Subject<ChangeSetResult<K, V>>>,
    count_changed: Rc<Subject<usize>>,
    watchers: Rc<std::cell::RefCell<IndexMap<K, Subject<Change<K, V>>>>>,
}

impl<K, V> Clone for ObservableCacheHandle<K, V> {
    fn clone(&self) -> Self {
        ObservableCacheHandle {
            cache: self.cache.clone(),
            changes: self.changes.clone(),
            count_changed: self.count_changed.clone(),
            watchers: self.watchers.clone(),
        }
    }
}

impl<K, V> ObservableCacheHandle<K, V>
where
    K: Hash + Eq + Clone + 'static,
    V: Clone + 'static,
{
    pub fn new() -> Self {
        ObservableCacheHandle {
            cache: Rc::new(std::cell::RefCell::new(Cache::new())),
            changes: Rc::new(Subject::new()),
            count_changed: Rc::new(Subject::new()),
            watchers: Rc::new(std::cell::RefCell::new(IndexMap::new())),
        }
    }

    pub fn count(&self) -> usize {
        self.cache.borrow().len()
    }

    pub fn lookup(&self, key: &K) -> Option<V> {
        self.cache.borrow().get(key).cloned()
    }

    pub fn items(&self) -> Vec<V> {
        self.cache.borrow().values().cloned().collect()
    }

    pub fn key_values(&self) -> Vec<(K, V)> {
        self.cache.borrow().iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    /// Applies a net change set to the backing cache and notifies all
    /// subscribers (`connect()`, `countChanged`, and any active `watch(key)`
    /// streams). This is the single place cache mutation and notification
    /// are kept in lock-step; callers (`SourceCache::edit`, lifecycle
    /// operators) build the `ChangeSet` first and hand it here.
    pub fn apply(&self, change_set: Rc<ChangeSet<K, V>>) {
        let count_before = self.cache.borrow().len();
        {
            let mut cache = self.cache.borrow_mut();
            for change in change_set.changes() {
                use crate::change::ChangeReason::*;
                match change.reason() {
                    Add | Update | Refresh => {
                        cache.insert(change.key().clone(), change.current().clone());
                    }
                    Remove => {
                        cache.remove(change.key());
                    }
                    Moved => {
                        // value unchanged; nothing to write to the map itself.
                    }
                }
            }
        }
        let count_after = self.cache.borrow().len();

        {
            let watchers = self.watchers.borrow();
            for change in change_set.changes() {
                if let Some(subject) = watchers.get(change.key()) {
                    subject.emit(change.clone());
                }
            }
        }

        self.changes.emit(Ok(change_set));
        if count_before != count_after {
            self.count_changed.emit(count_after);
        }
    }

    /// `connect()`: a fresh subscriber first receives the current contents
    /// as one `Add`-only change set (if non-empty), then every subsequent
    /// `apply`.
    pub fn connect(&self, observer: impl FnMut(ChangeSetResult<K, V>) + 'static) -> Subscription {
        let mut observer = observer;
        let snapshot: Vec<Change<K, V>> =
            self.cache.borrow().iter().map(|(k, v)| Change::add(k.clone(), v.clone())).collect();
        if !snapshot.is_empty() {
            let mut builder = crate::change_set::ChangeSetBuilder::new();
            for change in snapshot {
                builder.push(change);
            }
            if let Some(set) = builder.build(ChangeSetKind::Unsorted) {
                observer(Ok(Rc::new(set)));
            }
        }
        self.changes.subscribe(Box::new(observer))
    }

    /// `countChanged`: the current count immediately, then after every edit
    /// that changes it.
    pub fn count_changed(&self, mut observer: impl FnMut(usize) + 'static) -> Subscription {
        observer(self.count());
        self.count_changed.subscribe(Box::new(observer))
    }

    /// `watch(key)`: the current value for `key` immediately (as an `Add`),
    /// if present, then every subsequent `Change` touching that key.
    pub fn watch(&self, key: K, mut observer: impl FnMut(Change<K, V>) + 'static) -> Subscription {
        if let Some(value) = self.cache.borrow().get(&key).cloned() {
            observer(Change::add(key.clone(), value));
        }
        let mut watchers = self.watchers.borrow_mut();
        let subject = watchers.entry(key).or_insert_with(Subject::new);
        subject.subscribe(Box::new(observer))
    }

    pub fn with_cache<R>(&self, f: impl FnOnce(&Cache<K, V>) -> R) -> R {
        f(&self.cache.borrow())
    }

    /// Direct mutable access to the backing cache, bypassing change-set
    /// notification entirely. Only for seeding a cache before anything has
    /// subscribed to it (see `SourceCache::seeded`) — anything observed must
    /// go through `apply`.
    pub(crate) fn with_cache_mut<R>(&self, f: impl FnOnce(&mut Cache<K, V>) -> R) -> R {
        f(&mut self.cache.borrow_mut())
    }
}

impl<K, V> Default for ObservableCacheHandle<K, V>
where
    K: Hash + Eq + Clone + 'static,
    V: Clone + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_remove_preserves_relative_order() {
        let mut cache: Cache<&str, i32> = Cache::new();
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.insert("c", 3);
        cache.remove(&"b");
        let keys: Vec<_> = cache.keys().copied().collect();
        assert_eq!(keys, vec!["a", "c"]);
    }

    #[test]
    fn connect_replays_snapshot_then_live_changes() {
        let handle: ObservableCacheHandle<&str, i32> = ObservableCacheHandle::new();
        let mut builder = crate::change_set::ChangeSetBuilder::new();
        builder.push(Change::add("a", 1));
        handle.apply(Rc::new(builder.build_unsorted().unwrap()));

        let received = Rc::new(std::cell::RefCell::new(Vec::new()));
        let received_clone = received.clone();
        let _subscription = handle.connect(move |result| {
            received_clone.borrow_mut().push(result.unwrap());
        });
        assert_eq!(received.borrow().len(), 1);
        assert_eq!(received.borrow()[0].changes()[0].reason(), crate::change::ChangeReason::Add);

        let mut builder = crate::change_set::ChangeSetBuilder::new();
        builder.push(Change::add("b", 2));
        handle.apply(Rc::new(builder.build_unsorted().unwrap()));
        assert_eq!(received.borrow().len(), 2);
    }
}
