//! `SourceCache<K, V>`: the root, owned, edit-scoped collection.
//!
//! Everything downstream — filters, sorts, groups, joins — ultimately reads
//! from one or more `SourceCache`s (or from an external binding via
//! `adaptors::binding`). A `SourceCache` owns its data; all mutation happens
//! inside an `edit` scope, which accumulates `addOrUpdate`/`remove`/`refresh`
//! calls via `consolidation::EditAccumulator` and commits at most one net
//! `ChangeSet` when the scope closes.

use std::hash::Hash;
use std::rc::Rc;

use crate::cache::ObservableCacheHandle;
use crate::change::Change;
use crate::change_set::{ChangeSet, Counts};
use crate::consolidation::EditAccumulator;
use crate::error::ContractViolation;
use crate::logging::{EditScopeEvent, Logger};
use crate::observable::{ChangeSetResult, Subscription};

/// The outcome of one `SourceCache::edit` scope: the diagnostic,
/// call-level operation counters, and whether a change set was
/// actually emitted (`false` when every touched key cancelled away to
/// nothing).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EditSummary {
    pub counters: Counts,
    pub emitted: bool,
}

/// The mutation surface handed to the closure passed to [`SourceCache::edit`].
///
/// Every call here is buffered in the scope's `EditAccumulator`; nothing is
/// written to the cache or announced to subscribers until the closure
/// returns successfully.
pub struct Updater<'a, K, V> {
    handle: &'a ObservableCacheHandle<K, V>,
    accumulator: &'a mut EditAccumulator<K, V>,
}

impl<'a, K, V> Updater<'a, K, V>
where
    K: Hash + Eq + Clone + 'static,
    V: Clone + 'static,
{
    pub fn add_or_update(&mut self, key: K, value: V) {
        let handle = self.handle;
        let key_for_lookup = key.clone();
        self.accumulator.add_or_update(key, value, || handle.lookup(&key_for_lookup));
    }

    pub fn add_or_update_many(&mut self, items: impl IntoIterator<Item = (K, V)>) {
        for (key, value) in items {
            self.add_or_update(key, value);
        }
    }

    pub fn remove(&mut self, key: K) {
        let handle = self.handle;
        let key_for_lookup = key.clone();
        self.accumulator.remove(key, || handle.lookup(&key_for_lookup));
    }

    pub fn remove_many(&mut self, keys: impl IntoIterator<Item = K>) {
        for key in keys {
            self.remove(key);
        }
    }

    pub fn refresh(&mut self, key: K) {
        let handle = self.handle;
        let key_for_lookup = key.clone();
        self.accumulator.refresh(key, || handle.lookup(&key_for_lookup));
    }

    pub fn refresh_many(&mut self, keys: impl IntoIterator<Item = K>) {
        for key in keys {
            self.refresh(key);
        }
    }

    /// Removes every currently-present key. Equivalent to, but more direct
    /// than, `remove_many(self.keys())`.
    pub fn clear(&mut self) {
        let keys: Vec<K> = self.handle.with_cache(|cache| cache.keys().cloned().collect());
        self.remove_many(keys);
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.handle.with_cache(|cache| cache.contains_key(key))
    }

    pub fn lookup(&self, key: &K) -> Option<V> {
        self.handle.lookup(key)
    }

    pub fn count(&self) -> usize {
        self.handle.count()
    }
}

/// An owned, edit-scoped, observable keyed collection.
pub struct SourceCache<K, V> {
    handle: ObservableCacheHandle<K, V>,
    name: &'static str,
    logger: Logger,
}

impl<K, V> Default for SourceCache<K, V>
where
    K: Hash + Eq + Clone + 'static,
    V: Clone + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> SourceCache<K, V>
where
    K: Hash + Eq + Clone + 'static,
    V: Clone + 'static,
{
    pub fn new() -> Self {
        SourceCache { handle: ObservableCacheHandle::new(), name: "source_cache", logger: Logger::noop() }
    }

    /// Attaches a name (used only in diagnostic events) and a [`Logger`].
    #[must_use]
    pub fn named(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    #[must_use]
    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    /// Seeds the cache with an initial key/value set, bypassing edit-scope
    /// bookkeeping (no change set is emitted — there is nothing to observe
    /// yet, since this only makes sense before any `connect`/`watch` call).
    pub fn seeded(items: impl IntoIterator<Item = (K, V)>) -> Self {
        let cache = Self::new();
        for (key, value) in items {
            cache.handle.with_cache_mut(|c| {
                c.insert(key, value);
            });
        }
        cache
    }

    pub fn count(&self) -> usize {
        self.handle.count()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    pub fn lookup(&self, key: &K) -> Option<V> {
        self.handle.lookup(key)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.handle.with_cache(|cache| cache.contains_key(key))
    }

    pub fn items(&self) -> Vec<V> {
        self.handle.items()
    }

    pub fn key_values(&self) -> Vec<(K, V)> {
        self.handle.key_values()
    }

    /// Runs `body` against an [`Updater`], accumulating every
    /// `addOrUpdate`/`remove`/`refresh` call against a private
    /// `EditAccumulator`. If `body` returns `Ok`, the net change set (if
    /// non-empty) is committed to the cache and announced to subscribers in
    /// one step; if `body` returns `Err`, nothing committed during this call
    /// is visible — the cache is exactly as it was before `edit` was called
    /// (all-or-nothing).
    pub fn edit<E>(&self, body: impl FnOnce(&mut Updater<'_, K, V>) -> Result<(), E>) -> Result<EditSummary, E> {
        let mut accumulator = EditAccumulator::new();
        let mut updater = Updater { handle: &self.handle, accumulator: &mut accumulator };
        body(&mut updater)?;

        let counters = accumulator.diagnostics();
        let finished = accumulator.finish();
        let emitted = finished.is_some();
        if let Some(set) = finished {
            self.handle.apply(Rc::new(set));
        }
        self.logger.log(EditScopeEvent {
            source: self.name,
            adds: counters.adds,
            updates: counters.updates,
            removes: counters.removes,
            refreshes: counters.refreshes,
            emitted,
        });
        Ok(EditSummary { counters, emitted })
    }

    /// Convenience for the common case of a single `addOrUpdate`/`remove`/
    /// `refresh` call that cannot itself fail.
    pub fn edit_infallible(&self, body: impl FnOnce(&mut Updater<'_, K, V>)) -> EditSummary {
        self.edit(|updater| {
            body(updater);
            Ok::<(), std::convert::Infallible>(())
        })
        .unwrap_or_else(|never| match never {})
    }

    /// A cloneable, type-erased read/subscribe handle — what operators
    /// actually hold onto rather than a `&SourceCache`.
    pub fn handle(&self) -> ObservableCacheHandle<K, V> {
        self.handle.clone()
    }

    pub fn connect(&self, observer: impl FnMut(ChangeSetResult<K, V>) + 'static) -> Subscription {
        self.handle.connect(observer)
    }

    pub fn count_changed(&self, observer: impl FnMut(usize) + 'static) -> Subscription {
        self.handle.count_changed(observer)
    }

    pub fn watch(&self, key: K, observer: impl FnMut(Change<K, V>) + 'static) -> Subscription {
        self.handle.watch(key, observer)
    }

    /// Converts this cache into a `ChangeSetObservable`, the common currency
    /// every operator in `crate::operators` is implemented against.
    pub fn as_observable(&self) -> crate::observable::ChangeSetObservable<K, V> {
        let handle = self.handle.clone();
        crate::observable::ChangeSetObservable::new(move |observer: Box<dyn FnMut(ChangeSetResult<K, V>)>| {
            let mut observer = observer;
            handle.connect(move |result| observer(result))
        })
    }
}

/// Parameter validation shared by operators that take a page/window
/// request, kept here so `SourceCache`'s own error type and the
/// operators' stay in lock-step with each other.
pub(crate) fn require_positive_page(page: i64) -> Result<usize, ContractViolation> {
    if page < 1 {
        Err(ContractViolation::NonPositivePage(page))
    } else {
        Ok(page as usize)
    }
}

pub(crate) fn require_positive_page_size(page_size: i64) -> Result<usize, ContractViolation> {
    if page_size < 1 {
        Err(ContractViolation::NonPositivePageSize(page_size))
    } else {
        Ok(page_size as usize)
    }
}

pub(crate) fn require_non_negative_start_index(start_index: i64) -> Result<usize, ContractViolation> {
    if start_index < 0 {
        Err(ContractViolation::NegativeStartIndex(start_index))
    } else {
        Ok(start_index as usize)
    }
}
